//! Scope and indent recalculation.
//!
//! A scope box's left edge is the *minimum* indent over the lines its node
//! occupies, measured in pixels. Measuring is expensive and sometimes
//! impossible (off-screen lines), so measured indents are cached per node
//! and repaired incrementally:
//!
//! - inserting text can only pull a node's indent further left on the edited
//!   lines, so a newly measured indent overwrites the cache only when
//!   smaller;
//! - removing text can push the indent right, so any cached indent at or
//!   above the damage point's new indent is re-measured or purged, while
//!   smaller cached indents survive single-line removals untouched.
//!
//! This asymmetry is what keeps the cache sound without whole-document
//! re-measures; both paths report back the grown damage range so only the
//! affected lines get their rows rebuilt.
//!
//! Unavailable measurements are never guessed: the affected row is marked
//! incomplete, buffered, and retried after the next layout pass, a bounded
//! number of times per line.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::document::{Document, TextChange};
use crate::parse::{NodeId, NodeInfo, NodeKind, NodeSpan, ParseTree, StructuralDelta};
use crate::view::{EngineConfig, RenderView};

/// Color class of a scope box; the renderer maps classes to its palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeColor {
    /// Type-definition body (outermost boxes).
    Class,
    /// The inside of a container node.
    ClassInner,
    /// A callable definition.
    Method,
    /// A loop construct.
    Iteration,
    /// A conditional (also the fallback for unclassified containers).
    Selection,
}

/// One scope box segment on one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NestedScope {
    /// Left pixel bound (indent minus the scope's left margin).
    pub left: i32,
    /// Right pixel bound.
    pub right: i32,
    /// Whether the box starts on this line (draw a rounded top).
    pub starts: bool,
    /// Whether the box ends on this line (draw a rounded bottom).
    pub ends: bool,
    /// Color class.
    pub color: ScopeColor,
}

/// The recalculated scope boxes for one line, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeRow {
    /// Boxes to paint behind the line, in painting order.
    pub scopes: Vec<NestedScope>,
    /// A measurement was unavailable; the row will be recalculated after
    /// the next layout pass.
    pub incomplete: bool,
}

/// A line's offsets: `[start, end)` where `end` includes the newline (it is
/// the start of the next line, or the document length on the last line).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LineSpan {
    index: usize,
    start: usize,
    end: usize,
}

fn line_span(doc: &Document, index: usize) -> LineSpan {
    let start = doc.line_start(index);
    let end = if index + 1 < doc.line_count() {
        doc.line_start(index + 1)
    } else {
        doc.len()
    };
    LineSpan { index, start, end }
}

/// The above/current/below line triple a row calculation looks at.
#[derive(Debug, Clone, Copy)]
struct Lines {
    above: Option<LineSpan>,
    this: LineSpan,
    below: Option<LineSpan>,
}

/// Result of asking for a node's indent on a specific line.
enum LineIndent {
    /// The node has no presence on this line.
    NotHere,
    /// The indent could not be measured yet.
    Pending,
    /// Indent in pixels.
    At(i32),
}

/// Incremental scope/indent state for one document/oracle pair.
pub struct ScopeEngine {
    node_indents: HashMap<NodeId, i32>,
    /// `cached_space_widths[n]` is the left edge of column `n` on an
    /// all-spaces prefix; uniform space width is assumed, and with four or
    /// more samples off-screen indents are extrapolated from it.
    cached_space_widths: Vec<f64>,
    pending_rows: HashMap<usize, ScopeRow>,
    /// Lines whose rows came out incomplete, awaiting retry.
    deferred: BTreeSet<usize>,
    retry_counts: HashMap<usize, u32>,
    config: EngineConfig,
}

impl ScopeEngine {
    /// Create an empty engine.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            node_indents: HashMap::new(),
            cached_space_widths: Vec::new(),
            pending_rows: HashMap::new(),
            deferred: BTreeSet::new(),
            retry_counts: HashMap::new(),
            config,
        }
    }

    /// Replace the configuration. Caches are left to the caller to
    /// invalidate (margins affect row output, not cache validity).
    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    /// The cached indent for `node`, if any. Mostly useful in tests.
    pub fn cached_indent(&self, node: NodeId) -> Option<i32> {
        self.node_indents.get(&node).copied()
    }

    /// Take the buffered rows, leaving the buffer empty.
    pub fn take_pending(&mut self) -> HashMap<usize, ScopeRow> {
        std::mem::take(&mut self.pending_rows)
    }

    /// Buffered rows not yet pushed to the render view.
    pub fn pending_rows(&self) -> &HashMap<usize, ScopeRow> {
        &self.pending_rows
    }

    /// Drop every cache and recalculate all rows (width or font change).
    pub fn invalidate_all<T: ParseTree + ?Sized, R: RenderView + ?Sized>(
        &mut self,
        doc: &Document,
        tree: &T,
        view: &R,
    ) {
        self.node_indents.clear();
        self.cached_space_widths.clear();
        self.retry_counts.clear();
        self.deferred.clear();
        self.recalc_rows(doc, tree, view, 0, doc.line_count() - 1);
    }

    // --- Damage entry points ---------------------------------------------

    /// Repair the cache and rows for one round of damage: the nodes a
    /// structural delta touched, plus (for the edit that is being applied)
    /// the indent reassessment around the edit point.
    pub fn update_damage<T: ParseTree + ?Sized, R: RenderView + ?Sized>(
        &mut self,
        doc: &Document,
        tree: &T,
        view: &R,
        delta: &StructuralDelta,
        edit: Option<&TextChange>,
    ) {
        let mut damage_start = doc.len();
        let mut damage_end = 0usize;

        for r in &delta.removed {
            self.node_indents.remove(&r.node);
            damage_start = damage_start.min(r.pos);
            damage_end = damage_end.max(r.end());
            self.clear_ancestors(tree, Some(r.node), r.end(), &mut damage_start, &mut damage_end);
        }
        for r in &delta.resized {
            self.node_indents.remove(&r.node);
            damage_start = damage_start.min(r.new_pos).min(r.old_pos);
            damage_end = damage_end
                .max(r.new_pos + r.new_size)
                .max(r.old_pos + r.old_size);
            self.clear_ancestors(
                tree,
                Some(r.node),
                r.new_pos + r.new_size,
                &mut damage_start,
                &mut damage_end,
            );
        }
        for a in &delta.added {
            self.node_indents.remove(&a.node);
            damage_start = damage_start.min(a.pos);
            damage_end = damage_end.max(a.end());
            self.clear_ancestors(tree, Some(a.node), a.end(), &mut damage_start, &mut damage_end);
        }

        // An edit that changes the line count shifts every row below it;
        // their old rows sit at stale indices and must all be rebuilt.
        let lines_shifted = edit.is_some_and(|c| c.lines_added != c.lines_removed);

        if let Some(change) = edit {
            if change.removed_len() > 0 {
                damage_start = damage_start.min(change.start);
                let multi_line = change.lines_removed > 0;
                let (s, e) = self.reassess_indents_remove(doc, tree, view, change.start, multi_line);
                damage_start = damage_start.min(s);
                damage_end = damage_end.max(e);
            }
            if change.inserted_len() > 0 {
                damage_start = damage_start.min(change.start);
                damage_end = damage_end.max(change.inserted_end());
                let (s, e) = self.reassess_indents_add(doc, tree, view, damage_start, damage_end);
                damage_start = s;
                damage_end = e;
            }
        }

        if damage_start < damage_end || lines_shifted {
            let first = doc.line_from_position(damage_start.min(doc.len()));
            let last = if lines_shifted {
                doc.line_count() - 1
            } else {
                doc.line_from_position(damage_end.min(doc.len()).saturating_sub(1))
            };
            self.recalc_rows(doc, tree, view, first, last.max(first));
        }
    }

    /// Purge the cache along the ancestor chain covering `end_pos`, from
    /// the innermost enclosing inner node downward. Content changes inside
    /// an inner node cannot affect the indents of nodes above it.
    fn clear_ancestors<T: ParseTree + ?Sized>(
        &mut self,
        tree: &T,
        target: Option<NodeId>,
        end_pos: usize,
        damage_start: &mut usize,
        damage_end: &mut usize,
    ) {
        let mut chain: Vec<NodeSpan> = Vec::new();
        let mut top = Some(tree.span(tree.root()));
        while let Some(t) = top {
            if Some(t.node) == target {
                break;
            }
            if tree.node_info(t.node).inner {
                chain.clear();
            }
            chain.push(t);
            top = tree.find_node_at(t.node, end_pos);
        }
        for c in chain {
            *damage_start = (*damage_start).min(c.pos);
            *damage_end = (*damage_end).max(c.end());
            self.node_indents.remove(&c.node);
        }
    }

    // --- Indent reassessment ----------------------------------------------

    /// Walk the lines of `[dmg_start, dmg_end]` after an insertion,
    /// re-measuring the indent of every node active on those lines. Returns
    /// the damage range grown by any node whose cached indent changed.
    pub fn reassess_indents_add<T: ParseTree + ?Sized, R: RenderView + ?Sized>(
        &mut self,
        doc: &Document,
        tree: &T,
        view: &R,
        dmg_start: usize,
        dmg_end: usize,
    ) -> (usize, usize) {
        let mut dmg = (dmg_start, dmg_end);
        let ls = doc.line_from_position(dmg_start);
        let le = doc.line_from_position(dmg_end.min(doc.len()));
        let mut i = ls;
        let line_end_pos = line_span(doc, le).end;
        let mut line = line_span(doc, ls);

        let mut top = tree.find_node_at_or_after(tree.root(), line.start);
        while let Some(t) = top {
            if t.end() != line.start {
                break;
            }
            top = tree.next_sibling(t.node);
        }
        let Some(top) = top else {
            return dmg;
        };
        if top.pos >= line.end {
            // The first node begins on a line after the additions.
            i = doc.line_from_position(top.pos);
            if i > le {
                return dmg;
            }
            line = line_span(doc, i);
        }

        let mut stack = vec![top];
        let mut nap = tree.find_node_at_or_after(top.node, line.start + 1);
        while let Some(n) = nap {
            stack.push(n);
            nap = tree.find_node_at_or_after(n.node, line.start + 1);
        }

        'outer: loop {
            // Skip to the next line with text on it.
            let nws = loop {
                if let Some(nws) = find_non_whitespace(doc, line, 0) {
                    break nws;
                }
                i += 1;
                if i > le {
                    break 'outer;
                }
                line = line_span(doc, i);
            };
            let curpos = line.start + nws;

            // Pop nodes the walk has passed, then rebuild the stack from
            // the siblings of the last popped node.
            let mut top_nap: Option<NodeSpan> = None;
            while let Some(&last) = stack.last() {
                if last.end() > curpos {
                    break;
                }
                top_nap = Some(last);
                stack.pop();
            }
            if let Some(popped) = top_nap {
                let mut cand = tree.next_sibling(popped.node);
                while let Some(c) = cand {
                    if c.end() > curpos {
                        break;
                    }
                    cand = tree.next_sibling(c.node);
                }
                while let Some(c) = cand {
                    if c.pos >= line_end_pos {
                        break;
                    }
                    stack.push(c);
                    cand = tree.find_node_at_or_after(c.node, curpos + 1);
                }
            }
            if stack.is_empty() {
                break;
            }

            // Re-measure active nodes, innermost outward, stopping at the
            // first inner node (its content cannot affect enclosing nodes).
            let mut indent = self.left_edge(doc, view, curpos).unwrap_or(0);
            for idx in (0..stack.len()).rev() {
                let next = stack[idx];
                if next.pos <= curpos {
                    self.update_node_indent(next, indent, &mut dmg);
                } else if next.pos < line.end {
                    // Starts later on this line.
                    if let Some(n2) = find_non_whitespace(doc, line, next.pos - line.start)
                        && self.node_indents.contains_key(&next.node)
                    {
                        indent = self.left_edge(doc, view, line.start + n2).unwrap_or(0);
                        self.update_node_indent(next, indent, &mut dmg);
                    }
                } else {
                    continue;
                }
                if tree.node_info(next.node).inner {
                    break;
                }
            }

            // Nodes ending on this line may have siblings also on it.
            let mut idx = stack.len();
            while idx > 0 {
                idx -= 1;
                let ending = stack[idx];
                if ending.end() > line.end {
                    break;
                }
                let mut sib = tree.next_sibling(ending.node);
                stack.remove(idx);
                if sib.is_some() {
                    while let Some(s) = sib {
                        stack.push(s);
                        if s.pos < line.end {
                            let spos = s.pos.saturating_sub(line.start);
                            if let Some(n2) = find_non_whitespace(doc, line, spos)
                                && self.node_indents.contains_key(&s.node)
                            {
                                let ind = self.left_edge(doc, view, line.start + n2).unwrap_or(0);
                                self.update_node_indent(s, ind, &mut dmg);
                            }
                        }
                        sib = tree.find_node_at_or_after(s.node, s.pos);
                    }
                    idx = stack.len();
                }
            }

            i += 1;
            if i > le {
                break;
            }
            line = line_span(doc, i);
        }
        dmg
    }

    /// Repair cached indents after a removal at `dmg_point`. Cached indents
    /// smaller than the damage point's new indent are still valid minimums
    /// — unless the removal spanned lines, in which case any line could
    /// have been the minimum. Returns the grown damage range.
    pub fn reassess_indents_remove<T: ParseTree + ?Sized, R: RenderView + ?Sized>(
        &mut self,
        doc: &Document,
        tree: &T,
        view: &R,
        dmg_point: usize,
        multi_line: bool,
    ) -> (usize, usize) {
        let mut dmg = (dmg_point, dmg_point);
        let ls = doc.line_from_position(dmg_point);
        let line = line_span(doc, ls);

        let mut top = tree.find_node_at_or_after(tree.root(), line.start);
        while let Some(t) = top {
            if t.end() != line.start {
                break;
            }
            top = tree.next_sibling(t.node);
        }
        let Some(top) = top else {
            return dmg;
        };
        if top.pos >= line.end {
            return dmg;
        }

        let mut rstack = self.scope_stack_after(tree, dmg_point);
        rstack.remove(0); // the root has no box
        let mut do_continue = true;
        let dp_indent = self.left_edge(doc, view, dmg_point).unwrap_or(0);

        while do_continue && !rstack.is_empty() {
            let mut rtop = rstack.pop();
            while let Some(rt) = rtop {
                if rt.pos >= line.end {
                    break;
                }
                if rt.pos <= dmg_point
                    && rt.end() >= line.end
                    && tree.node_info(rt.node).inner
                {
                    // Content of inner nodes can't affect containing nodes.
                    do_continue = false;
                }

                let Some(&cached) = self.node_indents.get(&rt.node) else {
                    rtop = tree.next_sibling(rt.node);
                    continue;
                };
                if !multi_line && cached < dp_indent {
                    rtop = tree.next_sibling(rt.node);
                    continue;
                }

                if node_skips_start(tree, doc, rt, Some(line)) {
                    // The remove may have emptied this line.
                    if rt.pos <= dmg_point {
                        self.purge(rt, &mut dmg);
                    }
                    break; // no more siblings can be on this line
                }

                let nws_from = line.start.max(rt.pos) - line.start;
                let nws = find_non_whitespace(doc, line, nws_from);
                let measurable = match nws {
                    Some(n) if line.start + n < rt.end() => Some(n),
                    _ => None,
                };
                let Some(n) = measurable else {
                    if rt.pos <= dmg_point {
                        self.purge(rt, &mut dmg);
                    }
                    rtop = tree.next_sibling(rt.node);
                    continue;
                };

                let new_indent = self.left_edge(doc, view, line.start + n).unwrap_or(0);
                if new_indent < cached {
                    self.node_indents.insert(rt.node, new_indent);
                    dmg.0 = dmg.0.min(rt.pos);
                    dmg.1 = dmg.1.max(rt.end());
                } else if new_indent > cached && rt.pos <= dmg_point {
                    self.purge(rt, &mut dmg);
                }
                rtop = tree.next_sibling(rt.node);
            }
        }
        dmg
    }

    fn purge(&mut self, nap: NodeSpan, dmg: &mut (usize, usize)) {
        self.node_indents.remove(&nap.node);
        dmg.0 = dmg.0.min(nap.pos);
        dmg.1 = dmg.1.max(nap.end());
    }

    /// A freshly measured indent overwrites the cached one only when
    /// smaller; a larger measurement means the cached minimum came from a
    /// line that changed, so the entry is purged for re-measuring.
    fn update_node_indent(&mut self, nap: NodeSpan, indent: i32, dmg: &mut (usize, usize)) {
        let Some(&old) = self.node_indents.get(&nap.node) else {
            return;
        };
        if indent < old {
            self.node_indents.insert(nap.node, indent);
        } else if indent != old {
            self.node_indents.remove(&nap.node);
        }
        if indent != old {
            dmg.0 = dmg.0.min(nap.pos);
            dmg.1 = dmg.1.max(nap.end());
        }
    }

    // --- Row recalculation --------------------------------------------------

    /// Rebuild the scope rows of `[first_line, last_line]` into the pending
    /// buffer.
    pub fn recalc_rows<T: ParseTree + ?Sized, R: RenderView + ?Sized>(
        &mut self,
        doc: &Document,
        tree: &T,
        view: &R,
        first_line: usize,
        last_line: usize,
    ) {
        let line_count = doc.line_count();
        let first_line = first_line.min(line_count - 1);
        let last_line = last_line.min(line_count - 1);

        let mut stack = self.scope_stack_after(tree, doc.line_start(first_line));
        let mut lines = Lines {
            above: first_line.checked_sub(1).map(|l| line_span(doc, l)),
            this: line_span(doc, first_line),
            below: (first_line + 1 < line_count).then(|| line_span(doc, first_line + 1)),
        };

        let mut cur = first_line;
        while cur <= last_line {
            if stack.is_empty() {
                break;
            }
            let mut row = ScopeRow::default();
            self.scopes_for_line(doc, tree, view, &lines, &mut stack, &mut row);
            self.note_row(cur, row);

            cur += 1;
            if cur <= last_line {
                lines.above = Some(lines.this);
                lines.this = lines.below.take().unwrap_or_else(|| line_span(doc, cur));
                lines.below = (cur + 1 < line_count).then(|| line_span(doc, cur + 1));
            }
        }
    }

    /// Recalculate the rows of lines whose last calculation was incomplete.
    /// Lines past the retry limit are left as delivered and logged.
    pub fn retry_deferred<T: ParseTree + ?Sized, R: RenderView + ?Sized>(
        &mut self,
        doc: &Document,
        tree: &T,
        view: &R,
    ) {
        let lines: Vec<usize> = std::mem::take(&mut self.deferred).into_iter().collect();
        for line in lines {
            if line < doc.line_count() {
                self.recalc_rows(doc, tree, view, line, line);
            }
        }
    }

    fn note_row(&mut self, line: usize, row: ScopeRow) {
        if row.incomplete {
            let count = self.retry_counts.entry(line).or_insert(0);
            if *count >= self.config.indent_retry_limit {
                debug!(line, "indent measurement retries exhausted; delivering row as-is");
                self.retry_counts.remove(&line);
            } else {
                *count += 1;
                self.deferred.insert(line);
            }
        } else {
            self.retry_counts.remove(&line);
            self.deferred.remove(&line);
        }
        self.pending_rows.insert(line, row);
    }

    /// Stack of nodes overlapping or following `position`: the root at the
    /// bottom, then at each level the first child that overlaps (but does
    /// not end at) `position`, or failing that the first child after it.
    fn scope_stack_after<T: ParseTree + ?Sized>(&self, tree: &T, position: usize) -> Vec<NodeSpan> {
        // position + 1 skips nodes that end exactly here and zero-size nodes.
        let mut stack = vec![tree.span(tree.root())];
        let mut nap = tree.find_node_at_or_after(tree.root(), position + 1);
        while let Some(n) = nap {
            stack.push(n);
            nap = tree.find_node_at_or_after(n.node, position + 1);
        }
        stack
    }

    /// Compute one line's scope boxes from the scope stack at the line
    /// start, and advance the stack past nodes that end on this line.
    fn scopes_for_line<T: ParseTree + ?Sized, R: RenderView + ?Sized>(
        &mut self,
        doc: &Document,
        tree: &T,
        view: &R,
        lines: &Lines,
        stack: &mut Vec<NodeSpan>,
        row: &mut ScopeRow,
    ) {
        let right_margin = 10;
        let full_width = view.text_display_width() as i32;
        let this = lines.this;
        let mut node_depth: i32 = 0;

        // Boxes for every node spanning the start of this line.
        for idx in 0..stack.len() {
            let nap = stack[idx];
            if nap.pos >= this.end {
                // Not on this line, nor is anything deeper.
                return;
            }
            if !draw_node(tree, doc, nap, this) {
                continue;
            }
            if node_skips_end(doc, nap.pos, nap.end(), Some(this)) {
                node_depth += 1;
                break;
            }
            match self.node_indent_on_line(doc, tree, view, nap, Some(this)) {
                LineIndent::At(xpos) if xpos <= full_width => {
                    let starts = node_skips_start(tree, doc, nap, lines.above);
                    let ends = node_skips_end(doc, nap.pos, nap.end(), lines.below);
                    let rbound =
                        self.node_rbound(doc, tree, view, nap, full_width - right_margin, node_depth, this);
                    row.scopes
                        .push(self.nested_scope(tree.node_info(nap.node), xpos, rbound, starts, ends));
                }
                LineIndent::Pending => {
                    row.incomplete = true;
                }
                _ => {}
            }
            node_depth += 1;
        }

        // Advance past nodes ending on this line, drawing any siblings that
        // start on it.
        node_depth -= 1;
        let Some(&last) = stack.last() else {
            return;
        };
        let mut nap = last;
        while nap.end() <= this.end {
            stack.pop();
            if draw_node(tree, doc, nap, this) {
                node_depth -= 1;
            }
            let Some(&parent) = stack.last() else {
                return;
            };
            let mut next = tree.next_sibling(nap.node);
            nap = parent;
            while let Some(nx) = next {
                stack.push(nx);
                if nx.pos < this.end
                    && !node_skips_start(tree, doc, nx, Some(this))
                    && draw_node(tree, doc, nx, this)
                {
                    node_depth += 1;
                    let indent = self.node_indent_on_line(doc, tree, view, nx, Some(this));
                    let rbound =
                        self.node_rbound(doc, tree, view, nx, full_width - right_margin, node_depth, this);
                    let starts = node_skips_start(tree, doc, nx, lines.above);
                    let ends = node_skips_end(doc, nx.pos, nx.end(), lines.below);
                    if let LineIndent::At(xpos) = indent
                        && xpos <= full_width
                    {
                        row.scopes
                            .push(self.nested_scope(tree.node_info(nx.node), xpos, rbound, starts, ends));
                    }
                }
                nap = nx;
                next = tree.find_node_at_or_after(nx.node, nx.pos);
            }
        }
    }

    fn nested_scope(
        &self,
        info: NodeInfo,
        xpos: i32,
        rbound: i32,
        starts: bool,
        ends: bool,
    ) -> NestedScope {
        let margin = if info.inner {
            self.config.left_inner_scope_margin
        } else {
            self.config.left_outer_scope_margin
        };
        NestedScope {
            left: xpos - margin,
            right: rbound,
            starts,
            ends,
            color: scope_color(info),
        }
    }

    // --- Indent measurement ---------------------------------------------

    /// A node's indent on a given line: the cached whole-node indent,
    /// stretched right if the node starts mid-line behind other text.
    fn node_indent_on_line<T: ParseTree + ?Sized, R: RenderView + ?Sized>(
        &mut self,
        doc: &Document,
        tree: &T,
        view: &R,
        nap: NodeSpan,
        line: Option<LineSpan>,
    ) -> LineIndent {
        let Some(line) = line else {
            return LineIndent::NotHere;
        };
        if nap.pos >= line.end || nap.end() <= line.start {
            return LineIndent::NotHere;
        }
        if node_skips_start(tree, doc, nap, Some(line))
            || node_skips_end(doc, nap.pos, nap.end(), Some(line))
        {
            return LineIndent::NotHere;
        }

        let cached = match self.node_indents.get(&nap.node) {
            Some(&i) => Some(i),
            None => {
                // No point measuring while the line can't be laid out.
                if view.is_line_visible(line.index) {
                    let measured = self.measure_node_indent(doc, tree, view, nap);
                    if let Some(i) = measured {
                        self.node_indents.insert(nap.node, i);
                    }
                    measured
                } else {
                    None
                }
            }
        };
        let Some(mut xpos) = cached else {
            return LineIndent::Pending;
        };

        // Node starts mid-line: stretch its edge right up to (not past) the
        // last preceding non-whitespace, which belongs to another node.
        if nap.pos > line.start {
            if let Some(nwsb) =
                find_non_whitespace_backwards(doc, line, nap.pos - line.start - 1, 0)
                && let Some(lx) = self.left_edge(doc, view, line.start + nwsb + 1)
            {
                xpos = xpos.max(lx);
            }
        }
        LineIndent::At(xpos)
    }

    /// Measure a node's indent from scratch: the minimum left edge of the
    /// first non-whitespace over the node's lines, skipping the content of
    /// inner child nodes. `None` when nothing could be measured.
    fn measure_node_indent<T: ParseTree + ?Sized, R: RenderView + ?Sized>(
        &mut self,
        doc: &Document,
        tree: &T,
        view: &R,
        nap: NodeSpan,
    ) -> Option<i32> {
        let mut indent = i32::MAX;
        let nap_end = nap.end();
        let nap_inner = tree.node_info(nap.node).inner;
        let mut curpos = nap.pos;
        let mut stack: Vec<NodeSpan> = vec![nap];

        'outer: while curpos < nap_end {
            while stack.last().is_some_and(|t| t.end() <= curpos) {
                stack.pop();
            }
            let Some(&top) = stack.last() else {
                break;
            };

            // Descend, skipping over inner child nodes entirely. Children
            // are found at curpos + 1 to avoid nodes that end here, but only
            // ones spanning curpos count.
            let mut top = top;
            loop {
                let Some(child) = tree.find_node_at(top.node, curpos + 1) else {
                    break;
                };
                if child.pos > curpos {
                    break;
                }
                if tree.node_info(child.node).inner {
                    curpos = child.end();
                    continue 'outer;
                }
                stack.push(child);
                top = child;
            }

            let line = line_span(doc, doc.line_from_position(curpos));
            let line_offset = curpos - line.start;
            let nws = if line.start < nap.pos && nap_inner {
                find_non_whitespace_comment(tree, doc, nap, line, line_offset)
            } else {
                find_non_whitespace(doc, line, line_offset)
            };
            match nws {
                Some(n) if n == line_offset => {
                    if let Some(x) = self.left_edge(doc, view, curpos) {
                        indent = indent.min(x);
                    }
                    curpos = line.end;
                }
                None => {
                    curpos = line.end;
                }
                Some(n) => {
                    curpos += n - line_offset;
                }
            }
        }
        (indent != i32::MAX).then_some(indent)
    }

    /// Left pixel edge of the character at `offset`, using and extending
    /// the space-width cache for whitespace-only prefixes so off-screen
    /// indents can be extrapolated.
    fn left_edge<R: RenderView + ?Sized>(
        &mut self,
        doc: &Document,
        view: &R,
        offset: usize,
    ) -> Option<i32> {
        let line_idx = doc.line_from_position(offset);
        let line_start = doc.line_start(line_idx);
        let column = offset - line_start;
        let all_spaces = column == 0 || doc.chars_in(line_start, offset).all(|c| c == ' ');

        if !view.is_line_visible(line_idx) && (!all_spaces || self.cached_space_widths.len() <= 4)
        {
            return None;
        }

        if all_spaces {
            while column >= self.cached_space_widths.len() {
                let probe = offset - column + self.cached_space_widths.len();
                match view.left_edge_x(probe) {
                    Some(x) => self.cached_space_widths.push(x),
                    None => {
                        if self.cached_space_widths.len() >= 4 {
                            // Spaces are uniform width; extrapolate.
                            let hi = self.cached_space_widths.len() - 1;
                            let width =
                                self.cached_space_widths[hi] - self.cached_space_widths[0];
                            return Some(
                                (width / hi as f64 * column as f64
                                    + self.cached_space_widths[0])
                                    as i32,
                            );
                        }
                        return None;
                    }
                }
            }
            Some(self.cached_space_widths[column] as i32)
        } else {
            view.left_edge_x(offset).map(|x| x as i32)
        }
    }

    /// Right bound for a node's box on a line: the full width stepped in by
    /// depth, clipped to the left edge of any trailing text past the node's
    /// end on that line.
    fn node_rbound<T: ParseTree + ?Sized, R: RenderView + ?Sized>(
        &mut self,
        doc: &Document,
        tree: &T,
        view: &R,
        nap: NodeSpan,
        full_width: i32,
        node_depth: i32,
        line: LineSpan,
    ) -> i32 {
        let rbound = full_width - node_depth * self.config.right_scope_margin;
        let nap_end = nap.end();
        if nap_end >= line.end || nap_end < line.start {
            return rbound;
        }
        if find_non_whitespace_comment(tree, doc, nap, line, nap_end - line.start).is_some()
            && let Some(x) = self.left_edge(doc, view, nap_end)
        {
            return rbound.min(x);
        }
        rbound
    }
}

fn scope_color(info: NodeInfo) -> ScopeColor {
    if info.inner {
        ScopeColor::ClassInner
    } else {
        match info.kind {
            NodeKind::MethodDef => ScopeColor::Method,
            NodeKind::Iteration => ScopeColor::Iteration,
            NodeKind::Selection | NodeKind::None => ScopeColor::Selection,
            _ => ScopeColor::Class,
        }
    }
}

/// Whether a node gets a box on this line at all.
fn draw_node<T: ParseTree + ?Sized>(
    tree: &T,
    doc: &Document,
    nap: NodeSpan,
    this: LineSpan,
) -> bool {
    if nap.pos >= this.end {
        return false;
    }
    let info = tree.node_info(nap.node);
    if !info.container && !info.inner {
        return false;
    }
    if node_skips_start(tree, doc, nap, Some(this)) {
        return false;
    }
    !node_skips_end(doc, nap.pos, nap.end(), Some(this))
}

/// A node that officially starts on this line but has only whitespace here
/// is drawn from the next line down instead.
fn node_skips_start<T: ParseTree + ?Sized>(
    tree: &T,
    doc: &Document,
    nap: NodeSpan,
    line: Option<LineSpan>,
) -> bool {
    let Some(line) = line else {
        return true;
    };
    if nap.pos > line.start && nap.end() > line.end {
        if nap.pos >= line.end {
            return true;
        }
        if find_non_whitespace_comment(tree, doc, nap, line, nap.pos - line.start).is_none() {
            return true;
        }
    }
    false
}

/// A node that officially ends on this line but has only whitespace here is
/// drawn up to the previous line instead.
fn node_skips_end(doc: &Document, nap_pos: usize, nap_end: usize, line: Option<LineSpan>) -> bool {
    let Some(line) = line else {
        return true;
    };
    if nap_end < line.end && nap_pos < line.start {
        if nap_end <= line.start {
            return true;
        }
        if nap_end >= line.end {
            return false;
        }
        match find_non_whitespace(doc, line, 0) {
            None => return true,
            Some(n) if line.start + n >= nap_end => return true,
            _ => {}
        }
    }
    false
}

/// First non-whitespace at or after `from` (relative to the line start), or
/// `None`.
fn find_non_whitespace(doc: &Document, line: LineSpan, from: usize) -> Option<usize> {
    if line.start + from >= line.end {
        return None;
    }
    doc.chars_in(line.start + from, line.end)
        .position(|c| !matches!(c, ' ' | '\t' | '\n' | '\r'))
        .map(|p| p + from)
}

/// Like [`find_non_whitespace`], but a trailing comment node covering the
/// rest of the line counts as whitespace.
fn find_non_whitespace_comment<T: ParseTree + ?Sized>(
    tree: &T,
    doc: &Document,
    nap: NodeSpan,
    line: LineSpan,
    from: usize,
) -> Option<usize> {
    let nws = find_non_whitespace(doc, line, from)?;
    let pos = line.start + nws;
    let covering = if nap.end() > pos {
        tree.find_node_at(nap.node, pos)
    } else {
        tree.next_sibling(nap.node)
    };
    if let Some(c) = covering
        && tree.node_info(c.node).kind == NodeKind::Comment
        && c.pos == pos
        && c.end() == line.end.saturating_sub(1)
    {
        return None;
    }
    Some(nws)
}

/// Last non-whitespace at or before `start`, strictly after `end` (both
/// relative to the line start), or `None`.
fn find_non_whitespace_backwards(
    doc: &Document,
    line: LineSpan,
    start: usize,
    end: usize,
) -> Option<usize> {
    let text: Vec<char> = doc
        .chars_in(line.start, line.end.min(line.start + start + 1))
        .collect();
    let mut i = start.min(text.len().saturating_sub(1));
    while i > end {
        if !matches!(text[i], ' ' | '\t' | '\n' | '\r') {
            return Some(i);
        }
        i -= 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{ParseError, ReparseRequest};

    /// Hand-built tree for driving the engine: nodes with fixed spans and a
    /// parent/children arena.
    struct StubTree {
        // (parent, pos, size, info) per node; node 0 is the root.
        nodes: Vec<(Option<usize>, usize, usize, NodeInfo)>,
    }

    impl StubTree {
        fn new(doc_len: usize) -> Self {
            Self {
                nodes: vec![(
                    None,
                    0,
                    doc_len,
                    NodeInfo {
                        kind: NodeKind::CompilationUnit,
                        container: false,
                        inner: false,
                    },
                )],
            }
        }

        fn add(
            &mut self,
            parent: usize,
            pos: usize,
            size: usize,
            kind: NodeKind,
            container: bool,
            inner: bool,
        ) -> NodeId {
            self.nodes.push((
                Some(parent),
                pos,
                size,
                NodeInfo {
                    kind,
                    container,
                    inner,
                },
            ));
            NodeId((self.nodes.len() - 1) as u32)
        }

        fn children(&self, parent: usize) -> impl Iterator<Item = (usize, NodeSpan)> + '_ {
            self.nodes
                .iter()
                .enumerate()
                .filter(move |(_, n)| n.0 == Some(parent))
                .map(|(i, n)| {
                    (
                        i,
                        NodeSpan {
                            node: NodeId(i as u32),
                            pos: n.1,
                            size: n.2,
                        },
                    )
                })
        }
    }

    impl ParseTree for StubTree {
        fn root(&self) -> NodeId {
            NodeId(0)
        }

        fn node_info(&self, node: NodeId) -> NodeInfo {
            self.nodes[node.0 as usize].3
        }

        fn span(&self, node: NodeId) -> NodeSpan {
            let n = &self.nodes[node.0 as usize];
            NodeSpan {
                node,
                pos: n.1,
                size: n.2,
            }
        }

        fn find_node_at(&self, parent: NodeId, pos: usize) -> Option<NodeSpan> {
            self.children(parent.0 as usize)
                .map(|(_, s)| s)
                .find(|s| s.pos <= pos && pos <= s.end())
        }

        fn find_node_at_or_after(&self, parent: NodeId, pos: usize) -> Option<NodeSpan> {
            self.children(parent.0 as usize)
                .map(|(_, s)| s)
                .find(|s| s.end() >= pos)
        }

        fn next_sibling(&self, node: NodeId) -> Option<NodeSpan> {
            let parent = self.nodes[node.0 as usize].0?;
            self.children(parent)
                .map(|(i, s)| (i, s))
                .skip_while(|(i, _)| *i != node.0 as usize)
                .nth(1)
                .map(|(_, s)| s)
        }

        fn text_inserted(&mut self, _offset: usize, _length: usize) -> Vec<ReparseRequest> {
            Vec::new()
        }

        fn text_removed(&mut self, _offset: usize, _length: usize) -> Vec<ReparseRequest> {
            Vec::new()
        }

        fn reparse(
            &mut self,
            _doc: &Document,
            _node: NodeId,
            _up_to: usize,
            _max_chars: usize,
        ) -> Result<StructuralDelta, ParseError> {
            Ok(StructuralDelta::default())
        }
    }

    /// Fixed-grid render view: every character is 7px wide, lines can be
    /// hidden to exercise the deferral paths.
    struct GridView {
        doc_line_starts: Vec<usize>,
        hidden: Vec<usize>,
        width: f64,
    }

    impl GridView {
        fn covering(doc: &Document) -> Self {
            Self {
                doc_line_starts: (0..doc.line_count()).map(|l| doc.line_start(l)).collect(),
                hidden: Vec::new(),
                width: 200.0,
            }
        }

        fn line_of(&self, offset: usize) -> usize {
            self.doc_line_starts
                .partition_point(|&s| s <= offset)
                .saturating_sub(1)
        }
    }

    impl RenderView for GridView {
        fn is_line_visible(&self, line: usize) -> bool {
            !self.hidden.contains(&line)
        }

        fn left_edge_x(&self, offset: usize) -> Option<f64> {
            let line = self.line_of(offset);
            if self.hidden.contains(&line) {
                return None;
            }
            Some(((offset - self.doc_line_starts[line]) * 7) as f64)
        }

        fn text_display_width(&self) -> f64 {
            self.width
        }

        fn apply_scope_backgrounds(&mut self, _rows: HashMap<usize, ScopeRow>) {}
    }

    /// `class A { int x; }` over three lines, with the class node and its
    /// inner body node.
    fn class_fixture() -> (Document, StubTree, NodeId, NodeId) {
        let doc = Document::with_content("class A {\n    int x;\n}");
        let mut tree = StubTree::new(doc.len());
        let class = tree.add(0, 0, 22, NodeKind::TypeDef, true, false);
        let inner = tree.add(1, 9, 12, NodeKind::None, false, true);
        (doc, tree, class, inner)
    }

    #[test]
    fn test_rows_for_simple_class() {
        let (doc, tree, _, _) = class_fixture();
        let view = GridView::covering(&doc);
        let mut engine = ScopeEngine::new(EngineConfig::default());
        engine.recalc_rows(&doc, &tree, &view, 0, 2);
        let rows = engine.take_pending();

        let top = &rows[&0];
        assert!(!top.incomplete);
        assert_eq!(top.scopes.len(), 1);
        assert_eq!(top.scopes[0].color, ScopeColor::Class);
        assert!(top.scopes[0].starts);
        assert!(!top.scopes[0].ends);

        let mid = &rows[&1];
        assert_eq!(mid.scopes.len(), 2);
        assert_eq!(mid.scopes[1].color, ScopeColor::ClassInner);
        // The body's box starts and ends on its single content line, pulled
        // left of the 4-space indent (28px) by the inner margin.
        assert!(mid.scopes[1].starts && mid.scopes[1].ends);
        assert_eq!(mid.scopes[1].left, 28 - 5);

        let bottom = &rows[&2];
        assert_eq!(bottom.scopes.len(), 1);
        assert!(bottom.scopes[0].ends);
    }

    #[test]
    fn test_node_indent_is_minimum_over_lines() {
        // The class keyword at column 0 beats the brace line's indent.
        let (doc, tree, class, _) = class_fixture();
        let view = GridView::covering(&doc);
        let mut engine = ScopeEngine::new(EngineConfig::default());
        engine.recalc_rows(&doc, &tree, &view, 0, 2);
        assert_eq!(engine.cached_indent(class), Some(0));
    }

    #[test]
    fn test_hidden_line_defers_row() {
        let (doc, tree, class, _) = class_fixture();
        let mut view = GridView::covering(&doc);
        view.hidden = vec![0, 1, 2];
        let mut engine = ScopeEngine::new(EngineConfig::default());
        engine.recalc_rows(&doc, &tree, &view, 0, 2);
        assert!(engine.pending_rows()[&0].incomplete);
        assert_eq!(engine.cached_indent(class), None);

        // Lines become measurable; the deferred rows complete on retry.
        view.hidden.clear();
        engine.retry_deferred(&doc, &tree, &view);
        assert!(!engine.pending_rows()[&0].incomplete);
        assert_eq!(engine.cached_indent(class), Some(0));
    }

    #[test]
    fn test_retry_limit_abandons_line() {
        let (doc, tree, _, _) = class_fixture();
        let mut view = GridView::covering(&doc);
        view.hidden = vec![0, 1, 2];
        let mut engine = ScopeEngine::new(EngineConfig::default());
        let limit = engine.config.indent_retry_limit;
        engine.recalc_rows(&doc, &tree, &view, 0, 2);
        for _ in 0..limit {
            engine.retry_deferred(&doc, &tree, &view);
        }
        // Retries exhausted: nothing left deferred even though still hidden.
        assert!(engine.deferred.is_empty());
    }

    #[test]
    fn test_add_reassessment_smaller_indent_wins() {
        let (mut doc, mut tree, class, _) = class_fixture();
        let view = GridView::covering(&doc);
        let mut engine = ScopeEngine::new(EngineConfig::default());
        engine.recalc_rows(&doc, &tree, &view, 0, 2);
        assert_eq!(engine.cached_indent(class), Some(0));

        // Outdent the class onto a new first line at column 0 stays 0; but
        // inserting a *less* indented line inside pulls a deeper node left.
        let inner = NodeId(2);
        engine.node_indents.insert(inner, 28);
        let change = doc.replace_text(21, 21, "x();\n");
        tree.nodes[2].2 += 5; // inner grows
        tree.nodes[1].2 += 5; // class grows
        let view = GridView::covering(&doc);
        let (s, e) = engine.reassess_indents_add(
            &doc,
            &tree,
            &view,
            change.start,
            change.inserted_end(),
        );
        // New line "x();" at column 0 is smaller than 28: cache updates and
        // damage grows to cover the whole inner node.
        assert_eq!(engine.cached_indent(inner), Some(0));
        assert!(s <= 9 && e >= 26);
    }

    #[test]
    fn test_add_reassessment_larger_indent_purges() {
        let (mut doc, mut tree, _, _) = class_fixture();
        let inner = NodeId(2);
        let mut engine = ScopeEngine::new(EngineConfig::default());
        // Pretend the cached minimum came from the line we are editing.
        engine.node_indents.insert(inner, 7);
        let change = doc.replace_text(14, 14, "    ");
        tree.nodes[2].2 += 4;
        tree.nodes[1].2 += 4;
        let view = GridView::covering(&doc);
        engine.reassess_indents_add(&doc, &tree, &view, change.start, change.inserted_end());
        // Measured 56px > cached 7px: the entry is purged, not overwritten.
        assert_eq!(engine.cached_indent(inner), None);
    }

    #[test]
    fn test_remove_reassessment_asymmetry() {
        // "    int x;" outdented by removing two spaces: indent at the
        // damage point is 14px.
        let (mut doc, mut tree, class, _) = class_fixture();
        let inner = NodeId(2);
        let mut engine = ScopeEngine::new(EngineConfig::default());
        engine.node_indents.insert(inner, 28);
        engine.node_indents.insert(class, 0);

        doc.replace_text(10, 12, "");
        tree.nodes[2].2 -= 2;
        tree.nodes[1].2 -= 2;
        let view = GridView::covering(&doc);
        engine.reassess_indents_remove(&doc, &tree, &view, 10, false);

        // inner: cached 28 >= new indent 14, re-measured down to 14.
        assert_eq!(engine.cached_indent(inner), Some(14));
        // class: cached 0 < 14 on a single-line removal, survives.
        assert_eq!(engine.cached_indent(class), Some(0));
    }

    #[test]
    fn test_multiline_remove_revisits_smaller_indents() {
        let (mut doc, mut tree, class, _) = class_fixture();
        let mut engine = ScopeEngine::new(EngineConfig::default());
        // A stale, too-small cached indent that a single-line removal would
        // leave alone.
        engine.node_indents.insert(class, 5);
        // Remove "x;\n" (spans a line break), leaving "class A {\n    int }".
        doc.replace_text(18, 21, "");
        tree.nodes[1].2 -= 3;
        tree.nodes[2].2 -= 3;
        let view = GridView::covering(&doc);
        engine.reassess_indents_remove(&doc, &tree, &view, 18, true);
        // The re-measured indent (28) is larger than the cached 5: purged.
        assert_eq!(engine.cached_indent(class), None);

        // The same removal treated as single-line keeps the smaller cache
        // (5 < the damage point's 56px indent).
        engine.node_indents.insert(class, 5);
        engine.reassess_indents_remove(&doc, &tree, &view, 18, false);
        assert_eq!(engine.cached_indent(class), Some(5));
    }

    #[test]
    fn test_update_damage_purges_delta_nodes_and_ancestors() {
        let (doc, mut tree, class, inner) = class_fixture();
        let method = tree.add(2, 14, 6, NodeKind::MethodDef, true, false);
        // Hide every line so the recalc cannot re-measure what was purged.
        let mut view = GridView::covering(&doc);
        view.hidden = vec![0, 1, 2];
        let mut engine = ScopeEngine::new(EngineConfig::default());
        engine.node_indents.insert(class, 0);
        engine.node_indents.insert(inner, 28);
        engine.node_indents.insert(method, 28);

        let delta = StructuralDelta {
            parsed_from: 14,
            parsed_size: 6,
            removed: vec![NodeSpan {
                node: method,
                pos: 14,
                size: 6,
            }],
            ..StructuralDelta::default()
        };
        engine.update_damage(&doc, &tree, &view, &delta, None);

        assert_eq!(engine.cached_indent(method), None);
        // Ancestors from the innermost inner node down are purged too.
        assert_eq!(engine.cached_indent(inner), None);
        // Nodes above the inner boundary are untouched.
        assert_eq!(engine.cached_indent(class), Some(0));
        // The damaged lines were recalculated.
        assert!(engine.pending_rows().contains_key(&1));
    }

    #[test]
    fn test_trailing_text_clips_right_bound() {
        // "{ int x; } trailing" — the node ends mid-line with text after.
        let doc = Document::with_content("{ int x; } trailing");
        let mut tree = StubTree::new(doc.len());
        let block = tree.add(0, 0, 10, NodeKind::Selection, true, false);
        let view = GridView::covering(&doc);
        let mut engine = ScopeEngine::new(EngineConfig::default());
        engine.recalc_rows(&doc, &tree, &view, 0, 0);
        let rows = engine.take_pending();
        let scope = rows[&0]
            .scopes
            .iter()
            .find(|s| s.color == ScopeColor::Selection)
            .copied()
            .unwrap();
        // Right bound clipped to the left edge of the node end (col 10).
        assert_eq!(scope.right, 70);
        let _ = block;
    }

    #[test]
    fn test_whitespace_only_padding_lines_skip_start_and_end() {
        // Node officially spans the blank lines around its content.
        let doc = Document::with_content("a\n  \nbb\n  \nc");
        let mut tree = StubTree::new(doc.len());
        // Node covers " \nbb\n " (positions 3..9), starting and ending
        // mid-way through the whitespace-only lines 1 and 3.
        tree.add(0, 3, 6, NodeKind::Selection, true, false);
        let l1 = line_span(&doc, 1);
        let l2 = line_span(&doc, 2);
        let l3 = line_span(&doc, 3);
        let nap = tree.span(NodeId(1));
        assert!(node_skips_start(&tree, &doc, nap, Some(l1)));
        assert!(!node_skips_start(&tree, &doc, nap, Some(l2)));
        assert!(node_skips_end(&doc, nap.pos, nap.end(), Some(l3)));
        assert!(!node_skips_end(&doc, nap.pos, nap.end(), Some(l2)));
    }

    #[test]
    fn test_space_width_extrapolation() {
        // Hide a deeply indented line; with >4 cached samples the indent is
        // extrapolated instead of deferred.
        let doc = Document::with_content("        x\n                y");
        let mut view = GridView::covering(&doc);
        let mut engine = ScopeEngine::new(EngineConfig::default());
        // Prime the cache from the visible line (columns 0..=8).
        assert_eq!(engine.left_edge(&doc, &view, 8), Some(56));
        view.hidden = vec![1];
        // Column 16 on the hidden line: 16 * 7 = 112 by extrapolation.
        assert_eq!(engine.left_edge(&doc, &view, 10 + 16), Some(112));
    }
}
