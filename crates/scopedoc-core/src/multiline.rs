//! Incremental tracking of multiline string delimiters.
//!
//! The tracker keeps a sorted set of offsets where a complete run of three
//! marker characters (`"""` by default) begins. Rather than rescanning the
//! document, an edit rescans only a small window: the rewritten text grown
//! outward over any adjacent marker characters, so a run that an edit splits
//! or extends is always re-counted whole.

use crate::document::{Document, TextChange};

/// Callback fired when the marker set changes, with the new set.
pub type MarkerChangeCallback = Box<dyn FnMut(&[usize])>;

/// Tracks the offsets of triple-`marker` delimiters across edits.
pub struct MultilineTracker {
    marker: char,
    /// Sorted offsets of the first character of each complete triple.
    markers: Vec<usize>,
    on_change: Option<MarkerChangeCallback>,
}

impl MultilineTracker {
    /// Create a tracker for triple runs of `marker`, scanning `doc` for the
    /// initial set.
    pub fn new(doc: &Document, marker: char) -> Self {
        let mut tracker = Self {
            marker,
            markers: Vec::new(),
            on_change: None,
        };
        tracker.markers = tracker.scan(doc, 0, doc.len());
        tracker
    }

    /// Tracker for the default `"` marker.
    pub fn for_quotes(doc: &Document) -> Self {
        Self::new(doc, '"')
    }

    /// Current marker offsets, sorted ascending.
    pub fn markers(&self) -> &[usize] {
        &self.markers
    }

    /// Set the callback fired after any edit that changes the marker set.
    pub fn set_change_callback(&mut self, callback: impl FnMut(&[usize]) + 'static) {
        self.on_change = Some(Box::new(callback));
    }

    /// Update the marker set for `change`. `doc` must already reflect the
    /// edit.
    pub fn text_changed(&mut self, doc: &Document, change: &TextChange) {
        let inserted = change.inserted_len();
        let removed = change.removed_len();

        // Grow the affected window over adjacent marker characters so any
        // run the edit touches is recounted in full.
        let mut window_start = change.start;
        while window_start > 0 && doc.char_at(window_start - 1) == self.marker {
            window_start -= 1;
        }
        let mut window_end = change.start + inserted;
        while window_end < doc.len() && doc.char_at(window_end) == self.marker {
            window_end += 1;
        }
        // The window end in pre-edit coordinates, for deciding which old
        // markers were rewritten and which merely slide.
        let old_window_end = window_end + removed - inserted;

        let mut next: Vec<usize> = Vec::with_capacity(self.markers.len());
        for &m in &self.markers {
            if m < window_start {
                next.push(m);
            } else if m >= old_window_end {
                next.push(m + inserted - removed);
            }
        }
        let insert_at = next.partition_point(|&m| m < window_start);
        let rescanned = self.scan(doc, window_start, window_end);
        let tail = next.split_off(insert_at);
        next.extend(rescanned);
        next.extend(tail);

        if next != self.markers {
            self.markers = next;
            if let Some(cb) = &mut self.on_change {
                cb(&self.markers);
            }
        }
    }

    /// Count complete triples in `[start, end)`: every third consecutive
    /// marker character registers one and resets the counter, so seven
    /// consecutive markers yield triples at relative offsets 0 and 3.
    fn scan(&self, doc: &Document, start: usize, end: usize) -> Vec<usize> {
        let mut found = Vec::new();
        let mut run = 0usize;
        for (i, c) in doc.chars_in(start, end).enumerate() {
            if c == self.marker {
                run += 1;
                if run == 3 {
                    found.push(start + i - 2);
                    run = 0;
                }
            } else {
                run = 0;
            }
        }
        found
    }

    /// Whether the triple at `pos` can open a multiline string: nothing but
    /// whitespace follows it on its line.
    pub fn valid_opening_marker(&self, doc: &Document, pos: usize) -> bool {
        let line = doc.line_from_position(pos);
        let line_end = doc.line_end(line);
        let after = (pos + 3).min(line_end);
        doc.chars_in(after, line_end).all(char::is_whitespace)
    }

    /// Whether the triple at `pos` can close a multiline string: nothing but
    /// whitespace precedes it on its line.
    pub fn valid_closing_marker(&self, doc: &Document, pos: usize) -> bool {
        let line_start = doc.line_start(doc.line_from_position(pos));
        doc.chars_in(line_start, pos).all(char::is_whitespace)
    }
}
