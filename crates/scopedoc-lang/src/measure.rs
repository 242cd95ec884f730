//! A render view that measures text on a fixed-width grid.
//!
//! Every Unicode column is `column_px` pixels wide, with wide characters
//! (CJK and friends) taking two columns per `unicode-width`. Lines can be
//! marked invisible to exercise the engine's deferral paths, and applied
//! scope rows are kept for inspection. The view holds its own copy of the
//! line text; call [`FixedWidthView::sync`] after editing the document, the
//! way a real text pane re-layouts before the engine polls.

use std::collections::HashMap;
use std::ops::Range;

use scopedoc_core::{Document, RenderView, ScopeRow};
use unicode_width::UnicodeWidthChar;

/// Fixed-grid [`RenderView`] for tests and headless hosts.
#[derive(Debug)]
pub struct FixedWidthView {
    /// Line text without trailing newlines, mirroring the document.
    lines: Vec<String>,
    column_px: f64,
    width_px: f64,
    /// Lines outside this range report as not laid out. `None` means all
    /// lines are visible.
    visible: Option<Range<usize>>,
    rows: HashMap<usize, ScopeRow>,
}

impl FixedWidthView {
    /// A view where each column is `column_px` wide and the text area is
    /// `width_px` across.
    pub fn new(column_px: f64, width_px: f64) -> Self {
        Self {
            lines: vec![String::new()],
            column_px,
            width_px,
            visible: None,
            rows: HashMap::new(),
        }
    }

    /// Mirror the document's current lines.
    pub fn sync(&mut self, doc: &Document) {
        self.lines = doc.lines().collect();
    }

    /// Restrict visibility to `range` of lines, or `None` for everything.
    pub fn set_visible_lines(&mut self, range: Option<Range<usize>>) {
        self.visible = range;
    }

    /// Scope rows applied so far, keyed by line.
    pub fn rows(&self) -> &HashMap<usize, ScopeRow> {
        &self.rows
    }

    /// The applied row for `line`, if any.
    pub fn row(&self, line: usize) -> Option<&ScopeRow> {
        self.rows.get(&line)
    }

    /// Forget applied rows (between test phases).
    pub fn clear_rows(&mut self) {
        self.rows.clear();
    }

    /// The line containing `offset` and the offset of its first character.
    fn locate(&self, offset: usize) -> Option<(usize, usize)> {
        let mut start = 0;
        for (i, line) in self.lines.iter().enumerate() {
            let end = start + line.chars().count();
            if offset <= end {
                return Some((i, start));
            }
            start = end + 1; // the newline
        }
        None
    }
}

impl RenderView for FixedWidthView {
    fn is_line_visible(&self, line: usize) -> bool {
        self.visible.as_ref().is_none_or(|r| r.contains(&line))
    }

    fn left_edge_x(&self, offset: usize) -> Option<f64> {
        let (line, start) = self.locate(offset)?;
        if !self.is_line_visible(line) {
            return None;
        }
        let columns: usize = self.lines[line]
            .chars()
            .take(offset - start)
            .map(|c| c.width().unwrap_or(0))
            .sum();
        Some(columns as f64 * self.column_px)
    }

    fn text_display_width(&self) -> f64 {
        self.width_px
    }

    fn apply_scope_backgrounds(&mut self, rows: HashMap<usize, ScopeRow>) {
        self.rows.extend(rows);
    }
}
