//! `SyntaxView`: the orchestration layer tying the document, the parse
//! oracle, the reparse scheduler, and the scope engine together.
//!
//! The view owns the oracle and drives one unidirectional flow: edits go to
//! the oracle (span sliding) and the scheduler (damage), polling drains the
//! scheduler through the oracle and feeds structural deltas to the scope
//! engine, and finished scope rows are pushed wholesale to the render
//! collaborator once the queue drains — partially updated lines are never
//! shown.

use std::collections::HashMap;
use std::time::Duration;

use crate::document::{Document, TextChange};
use crate::parse::{ParseError, ParseTree, StructuralDelta};
use crate::reparse::{DEFAULT_MAX_PARSE_PIECE, DEFAULT_REPARSE_SLICE, ReparseScheduler};
use crate::scopes::{ScopeEngine, ScopeRow};

/// Everything the engine needs from the rendering side.
///
/// Measurements are in pixels of the render surface. `left_edge_x` may
/// return `None` whenever a measurement is not available (off-screen line,
/// layout not done); the engine defers and retries rather than guessing.
pub trait RenderView {
    /// Whether `line` is currently laid out and measurable.
    fn is_line_visible(&self, line: usize) -> bool;

    /// Left x-coordinate of the character at `offset`, if measurable.
    fn left_edge_x(&self, offset: usize) -> Option<f64>;

    /// Width of the text display area.
    fn text_display_width(&self) -> f64;

    /// Receive a batch of recalculated scope rows, keyed by line index.
    fn apply_scope_backgrounds(&mut self, rows: HashMap<usize, ScopeRow>);
}

/// Tunables for the engine, threaded explicitly rather than read from
/// globals.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Upper bound on characters per oracle reparse call.
    pub max_parse_piece: usize,
    /// Time budget for one background reparse slice.
    pub reparse_slice: Duration,
    /// How many times an unmeasurable line is retried before being
    /// abandoned for the cycle.
    pub indent_retry_limit: u32,
    /// Pixels an inner scope's box is pulled left of its indent.
    pub left_inner_scope_margin: i32,
    /// Pixels an outer scope's box is pulled left of its indent.
    pub left_outer_scope_margin: i32,
    /// Per-nesting-depth step subtracted from the right bound.
    pub right_scope_margin: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parse_piece: DEFAULT_MAX_PARSE_PIECE,
            reparse_slice: DEFAULT_REPARSE_SLICE,
            indent_retry_limit: 5,
            left_inner_scope_margin: 5,
            left_outer_scope_margin: 2,
            right_scope_margin: 4,
        }
    }
}

/// Incremental structure view over one document and one oracle.
pub struct SyntaxView<T: ParseTree> {
    tree: T,
    scheduler: ReparseScheduler,
    scopes: ScopeEngine,
    config: EngineConfig,
}

impl<T: ParseTree> SyntaxView<T> {
    /// Create a view over `tree` and schedule an initial full analysis of
    /// `doc`.
    pub fn new(doc: &Document, mut tree: T, config: EngineConfig) -> Self {
        let mut scheduler = ReparseScheduler::new(config.max_parse_piece);
        if doc.len() > 0 {
            for req in tree.text_inserted(0, doc.len()) {
                scheduler.schedule(req.pos, req.size);
            }
        }
        Self {
            tree,
            scheduler,
            scopes: ScopeEngine::new(config.clone()),
            config,
        }
    }

    /// The oracle.
    pub fn tree(&self) -> &T {
        &self.tree
    }

    /// The scope engine (cached indents, pending rows).
    pub fn scopes(&self) -> &ScopeEngine {
        &self.scopes
    }

    /// Pending reparse damage.
    pub fn scheduler(&self) -> &ReparseScheduler {
        &self.scheduler
    }

    /// Current configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replace the configuration, invalidating measurement caches and
    /// recalculating every scope row.
    pub fn set_config(&mut self, doc: &Document, view: &impl RenderView, config: EngineConfig) {
        self.scheduler.set_max_parse_piece(config.max_parse_piece);
        self.scopes.set_config(config.clone());
        self.config = config;
        self.scopes.invalidate_all(doc, &self.tree, view);
    }

    /// The render width or font changed: drop every pixel-derived cache and
    /// recalculate all scope rows.
    pub fn width_changed(&mut self, doc: &Document, view: &impl RenderView) {
        self.scopes.invalidate_all(doc, &self.tree, view);
    }

    /// Feed one document change through the pipeline: slide oracle spans,
    /// schedule the stale ranges it reports, and reassess indent damage
    /// around the edit.
    pub fn text_changed(&mut self, doc: &Document, view: &impl RenderView, change: &TextChange) {
        self.scheduler.record_edit(change);
        let removed = change.removed_len();
        if removed > 0 {
            for req in self.tree.text_removed(change.start, removed) {
                self.scheduler.schedule(req.pos, req.size);
            }
        }
        let inserted = change.inserted_len();
        if inserted > 0 {
            for req in self.tree.text_inserted(change.start, inserted) {
                self.scheduler.schedule(req.pos, req.size);
            }
        }
        self.scopes.update_damage(
            doc,
            &self.tree,
            view,
            &StructuralDelta::default(),
            Some(change),
        );
    }

    /// Process one pending reparse piece. Returns whether anything was
    /// processed.
    pub fn poll(
        &mut self,
        doc: &Document,
        view: &(impl RenderView + ?Sized),
    ) -> Result<bool, ParseError> {
        match self.scheduler.poll(doc, &mut self.tree)? {
            Some(delta) => {
                self.scopes
                    .update_damage(doc, &self.tree, view, &delta, None);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run reparses until the configured time budget elapses or the queue
    /// drains; push finished rows when idle. Returns whether work remains.
    pub fn run_slice(
        &mut self,
        doc: &Document,
        view: &mut (impl RenderView + ?Sized),
    ) -> Result<bool, ParseError> {
        let deltas = self
            .scheduler
            .run_slice(doc, &mut self.tree, self.config.reparse_slice)?;
        for delta in &deltas {
            self.scopes.update_damage(doc, &self.tree, view, delta, None);
        }
        if self.scheduler.is_idle() {
            self.apply_pending(doc, view);
        }
        Ok(!self.scheduler.is_idle())
    }

    /// Drain the reparse queue synchronously and push every finished row.
    pub fn flush(
        &mut self,
        doc: &Document,
        view: &mut (impl RenderView + ?Sized),
    ) -> Result<(), ParseError> {
        while self.poll(doc, view)? {}
        self.apply_pending(doc, view);
        Ok(())
    }

    /// Lines scrolled into view: recalculate their rows and push them.
    pub fn line_visibility_changed(
        &mut self,
        doc: &Document,
        view: &mut (impl RenderView + ?Sized),
        first_line: usize,
        last_line: usize,
    ) {
        self.scopes
            .recalc_rows(doc, &self.tree, view, first_line, last_line);
        self.apply_pending(doc, view);
    }

    /// Retry deferred lines, then push buffered rows to the render view.
    fn apply_pending(&mut self, doc: &Document, view: &mut (impl RenderView + ?Sized)) {
        self.scopes.retry_deferred(doc, &self.tree, view);
        let rows = self.scopes.take_pending();
        if !rows.is_empty() {
            view.apply_scope_backgrounds(rows);
        }
    }
}
