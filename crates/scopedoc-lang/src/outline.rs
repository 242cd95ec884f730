//! A brace-block outline oracle for curly-brace languages.
//!
//! The outliner nests on `{`/`}`, ignoring braces inside string literals,
//! character literals, and comments. Each block becomes a container node
//! starting at its declaration (the first non-whitespace after the previous
//! `;`, `{`, or `}`) with a single inner child spanning the text between the
//! braces. Line and block comments become leaf nodes. Blocks are classified
//! by their declaration's leading keyword (`class` and friends, loop and
//! conditional keywords) with a parenthesis as the method fallback.
//!
//! Reparsing is deliberately coarse: the requested node's whole subtree is
//! rebuilt from the document text. When the node's region turns out brace-
//! imbalanced — an edit added or removed a brace that pairs outside the node
//! — the rebuild escalates to the root. Node identities below the reparsed
//! node are not preserved; the engine treats them as removed-and-added,
//! which costs re-measuring but never staleness.

use scopedoc_core::{
    Document, NodeId, NodeInfo, NodeKind, NodeSpan, ParseError, ParseTree, ReparseRequest,
    StructuralDelta,
};

#[derive(Debug)]
struct NodeData {
    parent: Option<NodeId>,
    /// Direct children, sorted by position.
    children: Vec<NodeId>,
    pos: usize,
    size: usize,
    info: NodeInfo,
}

/// Brace-block [`ParseTree`] implementation.
///
/// The root spans the whole document and is created empty; the engine's
/// initial `text_inserted` plus the first reparse populate it.
#[derive(Debug)]
pub struct BlockOutline {
    nodes: Vec<Option<NodeData>>,
    free: Vec<u32>,
}

impl Default for BlockOutline {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockOutline {
    /// An outline over an (initially empty) document.
    pub fn new() -> Self {
        Self {
            nodes: vec![Some(NodeData {
                parent: None,
                children: Vec::new(),
                pos: 0,
                size: 0,
                info: NodeInfo {
                    kind: NodeKind::CompilationUnit,
                    container: false,
                    inner: false,
                },
            })],
            free: Vec::new(),
        }
    }

    /// Number of live nodes, the root included.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    fn data(&self, node: NodeId) -> &NodeData {
        self.nodes[node.0 as usize]
            .as_ref()
            .unwrap_or_else(|| panic!("node {node:?} was removed"))
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx as usize] = Some(data);
                NodeId(idx)
            }
            None => {
                self.nodes.push(Some(data));
                NodeId((self.nodes.len() - 1) as u32)
            }
        }
    }

    fn dealloc(&mut self, node: NodeId) {
        self.nodes[node.0 as usize] = None;
        self.free.push(node.0);
    }

    fn span_of(&self, data: &NodeData, node: NodeId) -> NodeSpan {
        NodeSpan {
            node,
            pos: data.pos,
            size: data.size,
        }
    }

    /// Spans of every descendant of `node`, depth-first.
    fn collect_descendants(&self, node: NodeId, out: &mut Vec<NodeSpan>) {
        for &child in &self.data(node).children {
            out.push(self.span_of(self.data(child), child));
            self.collect_descendants(child, out);
        }
    }

    /// Attach a scanned subtree under `parent`, recording every new span.
    fn attach(&mut self, parent: NodeId, raw: RawNode, added: &mut Vec<NodeSpan>) {
        let id = self.alloc(NodeData {
            parent: Some(parent),
            children: Vec::new(),
            pos: raw.pos,
            size: raw.size,
            info: raw.info,
        });
        added.push(NodeSpan {
            node: id,
            pos: raw.pos,
            size: raw.size,
        });
        if let Some(p) = self.nodes[parent.0 as usize].as_mut() {
            p.children.push(id);
        }
        for child in raw.children {
            self.attach(id, child, added);
        }
    }

    fn slide<F: Fn(usize) -> usize, G: Fn(usize) -> usize>(&mut self, shift_pos: F, shift_end: G) {
        for slot in self.nodes.iter_mut().flatten() {
            let end = shift_end(slot.pos + slot.size);
            slot.pos = shift_pos(slot.pos);
            slot.size = end.saturating_sub(slot.pos);
        }
    }

    fn rebuild(
        &mut self,
        doc: &Document,
        node: NodeId,
    ) -> Result<StructuralDelta, ParseError> {
        let target = self.data(node);
        let (pos, size) = (target.pos, target.size);
        if pos + size > doc.len() {
            return Err(ParseError::Desynchronized {
                offset: pos + size,
                message: format!(
                    "node span {pos}..{} exceeds document length {}",
                    pos + size,
                    doc.len()
                ),
            });
        }

        let region: Vec<char> = doc.chars_in(pos, pos + size).collect();
        let (scanned, balanced) = scan_region(&region, pos);
        if !balanced && node != self.root() {
            // A brace in this region pairs outside it; the enclosing
            // structure is stale too.
            return self.rebuild(doc, self.root());
        }

        let mut removed = Vec::new();
        self.collect_descendants(node, &mut removed);
        for span in &removed {
            self.dealloc(span.node);
        }
        if let Some(data) = self.nodes[node.0 as usize].as_mut() {
            data.children.clear();
        }

        let mut added = Vec::new();
        for raw in scanned {
            self.attach(node, raw, &mut added);
        }
        Ok(StructuralDelta {
            parsed_from: pos,
            parsed_size: size,
            added,
            removed,
            resized: Vec::new(),
        })
    }
}

impl ParseTree for BlockOutline {
    fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn node_info(&self, node: NodeId) -> NodeInfo {
        self.data(node).info
    }

    fn span(&self, node: NodeId) -> NodeSpan {
        self.span_of(self.data(node), node)
    }

    fn find_node_at(&self, parent: NodeId, pos: usize) -> Option<NodeSpan> {
        self.data(parent).children.iter().find_map(|&c| {
            let d = self.data(c);
            (d.pos <= pos && pos <= d.pos + d.size).then(|| self.span_of(d, c))
        })
    }

    fn find_node_at_or_after(&self, parent: NodeId, pos: usize) -> Option<NodeSpan> {
        self.data(parent).children.iter().find_map(|&c| {
            let d = self.data(c);
            (d.pos + d.size >= pos).then(|| self.span_of(d, c))
        })
    }

    fn next_sibling(&self, node: NodeId) -> Option<NodeSpan> {
        let parent = self.data(node).parent?;
        let siblings = &self.data(parent).children;
        let idx = siblings.iter().position(|&c| c == node)?;
        siblings
            .get(idx + 1)
            .map(|&c| self.span_of(self.data(c), c))
    }

    fn text_inserted(&mut self, offset: usize, length: usize) -> Vec<ReparseRequest> {
        self.slide(
            |pos| if pos > offset { pos + length } else { pos },
            |end| if end >= offset { end + length } else { end },
        );
        vec![ReparseRequest {
            pos: offset,
            size: length.max(1),
        }]
    }

    fn text_removed(&mut self, offset: usize, length: usize) -> Vec<ReparseRequest> {
        let cut = |at: usize| {
            if at >= offset + length {
                at - length
            } else {
                at.min(offset)
            }
        };
        self.slide(cut, cut);
        let len = self.data(self.root()).size;
        if len == 0 {
            return Vec::new();
        }
        vec![ReparseRequest {
            pos: offset.min(len - 1),
            size: 1,
        }]
    }

    /// Rebuilds the requested node's whole subtree; `up_to` and `max_chars`
    /// are not used to narrow the window, so the reported parsed window is
    /// the node's full span.
    fn reparse(
        &mut self,
        doc: &Document,
        node: NodeId,
        _up_to: usize,
        _max_chars: usize,
    ) -> Result<StructuralDelta, ParseError> {
        self.rebuild(doc, node)
    }
}

// --- Scanner ---------------------------------------------------------------

struct RawNode {
    pos: usize,
    size: usize,
    info: NodeInfo,
    children: Vec<RawNode>,
}

struct OpenBlock {
    decl_pos: usize,
    brace_pos: usize,
    kind: NodeKind,
    children: Vec<RawNode>,
}

#[derive(Clone, Copy)]
enum State {
    Code,
    LineComment(usize),
    BlockComment(usize),
    Str { delim: char, escaped: bool },
}

const COMMENT: NodeInfo = NodeInfo {
    kind: NodeKind::Comment,
    container: false,
    inner: false,
};

fn push_child(opens: &mut [OpenBlock], top: &mut Vec<RawNode>, node: RawNode) {
    match opens.last_mut() {
        Some(open) => open.children.push(node),
        None => top.push(node),
    }
}

fn close_block(open: OpenBlock, inner_end: usize, block_end: usize) -> RawNode {
    let inner = RawNode {
        pos: open.brace_pos + 1,
        size: inner_end.saturating_sub(open.brace_pos + 1),
        info: NodeInfo {
            kind: NodeKind::None,
            container: false,
            inner: true,
        },
        children: open.children,
    };
    RawNode {
        pos: open.decl_pos,
        size: block_end - open.decl_pos,
        info: NodeInfo {
            kind: open.kind,
            container: true,
            inner: false,
        },
        children: vec![inner],
    }
}

fn classify(decl: &str) -> NodeKind {
    let words: Vec<&str> = decl
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .collect();
    if words.iter().any(|w| {
        matches!(
            *w,
            "class" | "struct" | "enum" | "interface" | "trait" | "impl"
        )
    }) {
        return NodeKind::TypeDef;
    }
    match words.first().copied() {
        Some("for" | "while" | "do" | "loop") => NodeKind::Iteration,
        Some("if" | "else" | "switch" | "match" | "try") => NodeKind::Selection,
        _ if decl.contains('(') => NodeKind::MethodDef,
        _ => NodeKind::None,
    }
}

/// Scan `chars` (starting at absolute offset `base`) into a block forest.
/// Returns the forest and whether every brace paired inside the region.
fn scan_region(chars: &[char], base: usize) -> (Vec<RawNode>, bool) {
    let mut top: Vec<RawNode> = Vec::new();
    let mut opens: Vec<OpenBlock> = Vec::new();
    let mut stmt_start: Option<usize> = None;
    // A ';' ends a statement only outside parentheses (for-loop headers).
    let mut paren_depth = 0usize;
    let mut balanced = true;
    let mut state = State::Code;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let abs = base + i;
        match state {
            State::Code => match c {
                '/' if chars.get(i + 1) == Some(&'/') => {
                    state = State::LineComment(abs);
                    i += 2;
                    continue;
                }
                '/' if chars.get(i + 1) == Some(&'*') => {
                    state = State::BlockComment(abs);
                    i += 2;
                    continue;
                }
                '"' | '\'' => {
                    stmt_start.get_or_insert(abs);
                    state = State::Str {
                        delim: c,
                        escaped: false,
                    };
                }
                '{' => {
                    let decl_pos = stmt_start.take().unwrap_or(abs);
                    let decl: String = chars[decl_pos - base..i].iter().collect();
                    paren_depth = 0;
                    opens.push(OpenBlock {
                        decl_pos,
                        brace_pos: abs,
                        kind: classify(&decl),
                        children: Vec::new(),
                    });
                }
                '}' => {
                    stmt_start = None;
                    paren_depth = 0;
                    match opens.pop() {
                        Some(open) => {
                            let node = close_block(open, abs, abs + 1);
                            push_child(&mut opens, &mut top, node);
                        }
                        None => balanced = false,
                    }
                }
                '(' => {
                    stmt_start.get_or_insert(abs);
                    paren_depth += 1;
                }
                ')' => {
                    stmt_start.get_or_insert(abs);
                    paren_depth = paren_depth.saturating_sub(1);
                }
                ';' if paren_depth == 0 => stmt_start = None,
                c if !c.is_whitespace() => {
                    stmt_start.get_or_insert(abs);
                }
                _ => {}
            },
            State::LineComment(start) => {
                if c == '\n' {
                    push_child(
                        &mut opens,
                        &mut top,
                        RawNode {
                            pos: start,
                            size: abs - start,
                            info: COMMENT,
                            children: Vec::new(),
                        },
                    );
                    state = State::Code;
                }
            }
            State::BlockComment(start) => {
                if c == '*' && chars.get(i + 1) == Some(&'/') {
                    push_child(
                        &mut opens,
                        &mut top,
                        RawNode {
                            pos: start,
                            size: abs + 2 - start,
                            info: COMMENT,
                            children: Vec::new(),
                        },
                    );
                    state = State::Code;
                    i += 2;
                    continue;
                }
            }
            State::Str { delim, escaped } => {
                state = if escaped || (c != '\\' && c != delim) {
                    State::Str {
                        delim,
                        escaped: false,
                    }
                } else if c == '\\' {
                    State::Str {
                        delim,
                        escaped: true,
                    }
                } else {
                    State::Code
                };
            }
        }
        i += 1;
    }

    let end_abs = base + chars.len();
    if let State::LineComment(start) | State::BlockComment(start) = state {
        push_child(
            &mut opens,
            &mut top,
            RawNode {
                pos: start,
                size: end_abs - start,
                info: COMMENT,
                children: Vec::new(),
            },
        );
    }
    if !opens.is_empty() {
        balanced = false;
    }
    while let Some(open) = opens.pop() {
        let node = close_block(open, end_abs, end_abs);
        push_child(&mut opens, &mut top, node);
    }
    (top, balanced)
}
