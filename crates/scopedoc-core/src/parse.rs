//! The parse-oracle interface: what the engine needs to know about code
//! structure, and nothing more.
//!
//! The oracle maintains a tree of nested nodes over the document and answers
//! span and containment queries. After an edit it slides its spans and
//! reports which ranges it wants re-analyzed; the scheduler later calls
//! [`ParseTree::reparse`] on bounded windows and receives a
//! [`StructuralDelta`] — a flat record of added, removed, and resized nodes
//! that the scope engine turns into cache damage.

use thiserror::Error;

use crate::document::Document;

/// Opaque identifier for a node in the oracle's tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

/// Structural classification of a node, mapped to scope color classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// The whole-document root.
    CompilationUnit,
    /// A type definition (class, struct, enum, interface).
    TypeDef,
    /// A callable definition.
    MethodDef,
    /// A loop construct.
    Iteration,
    /// A conditional construct.
    Selection,
    /// A comment.
    Comment,
    /// An expression-level node.
    Expression,
    /// No particular classification.
    None,
}

/// Per-node flags the scope engine draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    /// Classification for coloring.
    pub kind: NodeKind,
    /// Whether the node draws a scope box around its children.
    pub container: bool,
    /// Whether the node is the inside of a container (the region between a
    /// block's braces). Inner nodes get the tighter left margin and their
    /// content is skipped when measuring the parent's indent.
    pub inner: bool,
}

/// A node together with its current absolute span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSpan {
    /// The node.
    pub node: NodeId,
    /// Absolute start offset.
    pub pos: usize,
    /// Span length in characters.
    pub size: usize,
}

impl NodeSpan {
    /// Absolute end offset (exclusive).
    pub fn end(&self) -> usize {
        self.pos + self.size
    }
}

/// A node whose span changed during a reparse, with both spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizedNode {
    /// The node.
    pub node: NodeId,
    /// Span before the reparse.
    pub old_pos: usize,
    /// Span length before the reparse.
    pub old_size: usize,
    /// Span after the reparse.
    pub new_pos: usize,
    /// Span length after the reparse.
    pub new_size: usize,
}

/// Everything one reparse call changed, as plain data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuralDelta {
    /// Start of the window the oracle actually analyzed.
    pub parsed_from: usize,
    /// Length of the analyzed window.
    pub parsed_size: usize,
    /// Nodes created by this reparse.
    pub added: Vec<NodeSpan>,
    /// Nodes discarded by this reparse, with their last known spans.
    pub removed: Vec<NodeSpan>,
    /// Nodes whose span moved or changed length.
    pub resized: Vec<ResizedNode>,
}

impl StructuralDelta {
    /// Whether the reparse changed any node.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.resized.is_empty()
    }
}

/// A range the oracle wants re-analyzed after an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReparseRequest {
    /// Start offset of the stale range.
    pub pos: usize,
    /// Length of the stale range (at least 1).
    pub size: usize,
}

/// An oracle failure surfaced through the scheduler.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The oracle's structure no longer matches the document.
    #[error("parser desynchronized at offset {offset}: {message}")]
    Desynchronized {
        /// Offset where the mismatch was detected.
        offset: usize,
        /// Oracle-specific description.
        message: String,
    },
    /// The oracle hit an internal invariant violation.
    #[error("parser internal error: {0}")]
    Internal(String),
}

/// Structural oracle over a [`Document`].
///
/// Spans are absolute character offsets and must stay consistent with the
/// document between calls: the engine calls `text_inserted` /
/// `text_removed` for every edit before anything else touches the tree.
pub trait ParseTree {
    /// The root node, spanning the whole document.
    fn root(&self) -> NodeId;

    /// Flags for `node`.
    fn node_info(&self, node: NodeId) -> NodeInfo;

    /// Current absolute span of `node`.
    fn span(&self, node: NodeId) -> NodeSpan;

    /// The leftmost direct child of `parent` whose span contains `pos`
    /// (either endpoint counts as containment).
    fn find_node_at(&self, parent: NodeId, pos: usize) -> Option<NodeSpan>;

    /// The first direct child of `parent` ending at or after `pos`.
    fn find_node_at_or_after(&self, parent: NodeId, pos: usize) -> Option<NodeSpan>;

    /// The next sibling of `node`, if any.
    fn next_sibling(&self, node: NodeId) -> Option<NodeSpan>;

    /// Slide spans for an insertion of `length` characters at `offset` and
    /// report which ranges became stale.
    fn text_inserted(&mut self, offset: usize, length: usize) -> Vec<ReparseRequest>;

    /// Slide spans for a removal of `length` characters at `offset` and
    /// report which ranges became stale.
    fn text_removed(&mut self, offset: usize, length: usize) -> Vec<ReparseRequest>;

    /// Re-analyze `node` around `up_to`, looking at no more than roughly
    /// `max_chars` characters, and report the structural consequences. The
    /// returned delta's parsed window tells the scheduler what to retire.
    fn reparse(
        &mut self,
        doc: &Document,
        node: NodeId,
        up_to: usize,
        max_chars: usize,
    ) -> Result<StructuralDelta, ParseError>;
}
