//! Reparse scheduling: damage ranges in, bounded oracle calls out.
//!
//! The scheduler owns the pending-damage [`IntervalSet`] and drains it one
//! bounded piece at a time. Each poll walks the oracle tree to the deepest
//! node whose span starts at or before the damage offset without ending
//! exactly there, asks it to reparse at most `max_parse_piece` characters,
//! and retires whatever window the oracle reports as analyzed — splitting or
//! re-queuing the rest. Oracle failures get a postmortem dump (recent edits
//! plus document content) before propagating.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{error, trace};

use crate::document::{Document, TextChange};
use crate::intervals::IntervalSet;
use crate::parse::{NodeId, NodeSpan, ParseError, ParseTree, StructuralDelta};

/// Edits remembered for the failure dump.
const RECENT_EDIT_CAPACITY: usize = 10;

/// Upper bound on characters handed to one oracle call by default.
pub const DEFAULT_MAX_PARSE_PIECE: usize = 8000;

/// Default time budget for [`ReparseScheduler::run_slice`].
pub const DEFAULT_REPARSE_SLICE: Duration = Duration::from_millis(15);

/// Queue of pending reparse damage over one document/oracle pair.
#[derive(Debug)]
pub struct ReparseScheduler {
    pending: IntervalSet,
    recent_edits: VecDeque<TextChange>,
    max_parse_piece: usize,
}

impl Default for ReparseScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PARSE_PIECE)
    }
}

impl ReparseScheduler {
    /// Create a scheduler that hands the oracle at most `max_parse_piece`
    /// characters per call.
    pub fn new(max_parse_piece: usize) -> Self {
        Self {
            pending: IntervalSet::new(),
            recent_edits: VecDeque::with_capacity(RECENT_EDIT_CAPACITY),
            max_parse_piece,
        }
    }

    /// Change the per-call character bound.
    pub fn set_max_parse_piece(&mut self, max_parse_piece: usize) {
        self.max_parse_piece = max_parse_piece;
    }

    /// Whether no damage is pending.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// The pending damage ranges.
    pub fn pending(&self) -> &IntervalSet {
        &self.pending
    }

    /// Note an edit: remember it for postmortems and slide the pending
    /// ranges so they stay anchored. Call before scheduling the oracle's
    /// stale ranges for the same edit.
    pub fn record_edit(&mut self, change: &TextChange) {
        if self.recent_edits.len() == RECENT_EDIT_CAPACITY {
            self.recent_edits.pop_front();
        }
        self.recent_edits.push_back(change.clone());
        self.pending
            .apply_edit(change.start, change.removed_end(), change.inserted_len());
    }

    /// Add `[pos, pos + size)` to the pending damage.
    pub fn schedule(&mut self, pos: usize, size: usize) {
        trace!(pos, size, "reparse scheduled");
        self.pending.schedule(pos, size);
    }

    /// Drop all pending damage (on oracle replacement).
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Process the lowest pending range, if any. Returns the structural
    /// delta the oracle produced, `Ok(None)` when idle.
    pub fn poll<T: ParseTree + ?Sized>(
        &mut self,
        doc: &Document,
        tree: &mut T,
    ) -> Result<Option<StructuralDelta>, ParseError> {
        let Some(range) = self.pending.first() else {
            return Ok(None);
        };
        let pos = range.start;
        let target = Self::node_for_reparse(tree, pos);
        trace!(pos, node = target.node.0, "reparse poll");

        let delta = match tree.reparse(doc, target.node, pos, self.max_parse_piece) {
            Ok(delta) => delta,
            Err(err) => {
                self.dump_postmortem(doc, pos, &err);
                return Err(err);
            }
        };

        if delta.parsed_size == 0 {
            // The oracle made no visible progress; retire the polled range
            // so the queue cannot spin.
            self.pending.mark_parsed(range.start, range.end - range.start);
        } else {
            self.pending.mark_parsed(delta.parsed_from, delta.parsed_size);
        }
        Ok(Some(delta))
    }

    /// Drain the queue synchronously, collecting every delta.
    pub fn flush<T: ParseTree + ?Sized>(
        &mut self,
        doc: &Document,
        tree: &mut T,
    ) -> Result<Vec<StructuralDelta>, ParseError> {
        let mut deltas = Vec::new();
        while let Some(delta) = self.poll(doc, tree)? {
            deltas.push(delta);
        }
        Ok(deltas)
    }

    /// Poll until `budget` elapses or the queue drains. Returns the deltas
    /// produced; check [`is_idle`](Self::is_idle) for whether work remains.
    pub fn run_slice<T: ParseTree + ?Sized>(
        &mut self,
        doc: &Document,
        tree: &mut T,
        budget: Duration,
    ) -> Result<Vec<StructuralDelta>, ParseError> {
        let deadline = Instant::now() + budget;
        let mut deltas = Vec::new();
        loop {
            match self.poll(doc, tree)? {
                Some(delta) => deltas.push(delta),
                None => break,
            }
            if Instant::now() >= deadline {
                break;
            }
        }
        Ok(deltas)
    }

    /// The deepest node whose span starts at or before `pos` without ending
    /// exactly at it. Siblings that end exactly at `pos` are skipped so the
    /// reparse lands in the node that owns the text *after* the offset.
    fn node_for_reparse<T: ParseTree + ?Sized>(tree: &T, pos: usize) -> NodeSpan {
        let mut target = tree.span(tree.root());
        let mut child = Self::child_owning(tree, target.node, pos);
        while let Some(c) = child {
            if c.pos > pos {
                break;
            }
            target = c;
            child = Self::child_owning(tree, c.node, pos);
        }
        target
    }

    fn child_owning<T: ParseTree + ?Sized>(
        tree: &T,
        parent: NodeId,
        pos: usize,
    ) -> Option<NodeSpan> {
        let mut child = tree.find_node_at(parent, pos);
        while let Some(c) = child {
            if c.end() != pos {
                return Some(c);
            }
            child = tree.next_sibling(c.node);
        }
        None
    }

    fn dump_postmortem(&self, doc: &Document, pos: usize, err: &ParseError) {
        error!(
            offset = pos,
            error = %err,
            recent_edits = ?self.recent_edits,
            "reparse failed; dumping document state"
        );
        error!(content = %doc.full_content(), "document at time of failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{NodeInfo, NodeKind, ReparseRequest};

    /// Fixed two-level tree: root plus a flat list of children. Reparse
    /// reports a configurable window and records what it was asked.
    struct FlatTree {
        children: Vec<NodeSpan>,
        doc_len: usize,
        window: Option<(usize, usize)>,
        fail: bool,
        calls: Vec<(NodeId, usize)>,
    }

    impl FlatTree {
        fn new(doc_len: usize, children: Vec<(u32, usize, usize)>) -> Self {
            Self {
                children: children
                    .into_iter()
                    .map(|(id, pos, size)| NodeSpan {
                        node: NodeId(id),
                        pos,
                        size,
                    })
                    .collect(),
                doc_len,
                window: None,
                fail: false,
                calls: Vec::new(),
            }
        }
    }

    impl ParseTree for FlatTree {
        fn root(&self) -> NodeId {
            NodeId(0)
        }

        fn node_info(&self, _node: NodeId) -> NodeInfo {
            NodeInfo {
                kind: NodeKind::None,
                container: true,
                inner: false,
            }
        }

        fn span(&self, node: NodeId) -> NodeSpan {
            if node == NodeId(0) {
                NodeSpan {
                    node,
                    pos: 0,
                    size: self.doc_len,
                }
            } else {
                *self.children.iter().find(|c| c.node == node).unwrap()
            }
        }

        fn find_node_at(&self, parent: NodeId, pos: usize) -> Option<NodeSpan> {
            (parent == NodeId(0))
                .then(|| {
                    self.children
                        .iter()
                        .find(|c| c.pos <= pos && pos <= c.end())
                        .copied()
                })
                .flatten()
        }

        fn find_node_at_or_after(&self, parent: NodeId, pos: usize) -> Option<NodeSpan> {
            (parent == NodeId(0))
                .then(|| self.children.iter().find(|c| c.end() >= pos).copied())
                .flatten()
        }

        fn next_sibling(&self, node: NodeId) -> Option<NodeSpan> {
            let idx = self.children.iter().position(|c| c.node == node)?;
            self.children.get(idx + 1).copied()
        }

        fn text_inserted(&mut self, offset: usize, length: usize) -> Vec<ReparseRequest> {
            vec![ReparseRequest {
                pos: offset,
                size: length,
            }]
        }

        fn text_removed(&mut self, offset: usize, _length: usize) -> Vec<ReparseRequest> {
            vec![ReparseRequest {
                pos: offset,
                size: 1,
            }]
        }

        fn reparse(
            &mut self,
            _doc: &Document,
            node: NodeId,
            up_to: usize,
            max_chars: usize,
        ) -> Result<StructuralDelta, ParseError> {
            if self.fail {
                return Err(ParseError::Desynchronized {
                    offset: up_to,
                    message: "stub failure".into(),
                });
            }
            self.calls.push((node, up_to));
            let (from, size) = self
                .window
                .unwrap_or((up_to, max_chars.min(self.doc_len - up_to).max(1)));
            Ok(StructuralDelta {
                parsed_from: from,
                parsed_size: size,
                ..StructuralDelta::default()
            })
        }
    }

    #[test]
    fn test_poll_descends_to_owning_child() {
        let doc = Document::with_content(&"x".repeat(100));
        // Children: [10, 30) and [30, 60). Damage at 30 must skip the child
        // ending exactly there and land in the second one.
        let mut tree = FlatTree::new(100, vec![(1, 10, 20), (2, 30, 30)]);
        let mut sched = ReparseScheduler::default();
        sched.schedule(30, 5);
        let delta = sched.poll(&doc, &mut tree).unwrap().unwrap();
        assert_eq!(tree.calls, vec![(NodeId(2), 30)]);
        assert_eq!(delta.parsed_from, 30);
    }

    #[test]
    fn test_poll_falls_back_to_root() {
        let doc = Document::with_content(&"x".repeat(100));
        let mut tree = FlatTree::new(100, vec![(1, 40, 20)]);
        let mut sched = ReparseScheduler::default();
        sched.schedule(5, 3); // before any child
        sched.poll(&doc, &mut tree).unwrap();
        assert_eq!(tree.calls, vec![(NodeId(0), 5)]);
    }

    #[test]
    fn test_partial_window_keeps_remainder_pending() {
        let doc = Document::with_content(&"x".repeat(100));
        let mut tree = FlatTree::new(100, vec![]);
        tree.window = Some((10, 20)); // oracle only covers [10, 30)
        let mut sched = ReparseScheduler::default();
        sched.schedule(10, 50);
        sched.poll(&doc, &mut tree).unwrap();
        assert_eq!(sched.pending().ranges(), &[30..60]);
        assert!(!sched.is_idle());
    }

    #[test]
    fn test_flush_drains_queue() {
        let doc = Document::with_content(&"x".repeat(100));
        let mut tree = FlatTree::new(100, vec![]);
        let mut sched = ReparseScheduler::new(16);
        sched.schedule(0, 64);
        let deltas = sched.flush(&doc, &mut tree).unwrap();
        assert!(sched.is_idle());
        assert_eq!(deltas.len(), 4); // 64 chars in 16-char pieces
    }

    #[test]
    fn test_error_propagates_and_keeps_damage() {
        let doc = Document::with_content("abc");
        let mut tree = FlatTree::new(3, vec![]);
        tree.fail = true;
        let mut sched = ReparseScheduler::default();
        sched.schedule(0, 3);
        assert!(sched.poll(&doc, &mut tree).is_err());
        assert!(!sched.is_idle());
    }

    #[test]
    fn test_record_edit_slides_pending() {
        let mut doc = Document::with_content("0123456789");
        let mut sched = ReparseScheduler::default();
        sched.schedule(6, 4);
        let change = doc.replace_text(0, 0, "ab");
        sched.record_edit(&change);
        assert_eq!(sched.pending().ranges(), &[8..12]);
    }

    #[test]
    fn test_empty_window_still_retires_range() {
        let doc = Document::with_content("abc");
        let mut tree = FlatTree::new(3, vec![]);
        tree.window = Some((0, 0));
        let mut sched = ReparseScheduler::default();
        sched.schedule(0, 3);
        sched.poll(&doc, &mut tree).unwrap();
        assert!(sched.is_idle());
    }
}
