//! Compiler-fed error highlights and per-line attributes.
//!
//! The overlay is a dumb store: an external analysis pushes ranged
//! diagnostics in, the editor queries them by position, and any document
//! content change wipes the lot — stale ranges are worse than none, and the
//! analysis re-delivers after the next run.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::document::Document;

/// A ranged diagnostic over the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorHighlight {
    /// Start offset (inclusive).
    pub start: usize,
    /// End offset (exclusive).
    pub end: usize,
    /// Diagnostic text.
    pub message: String,
    /// Identifier assigned by the producer, echoed back on queries.
    pub id: u32,
}

/// Rejection of a malformed highlight. Ranges are never clamped; a producer
/// whose offsets are out of step with the document should resynchronize, not
/// have its mistake papered over.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HighlightError {
    /// `end` precedes `start`.
    #[error("highlight range is inverted ({start} > {end})")]
    InvertedRange {
        /// Requested start offset.
        start: usize,
        /// Requested end offset.
        end: usize,
    },
    /// The range extends past the end of the document.
    #[error("highlight range {start}..{end} exceeds document length {len}")]
    OutOfBounds {
        /// Requested start offset.
        start: usize,
        /// Requested end offset.
        end: usize,
        /// Document length at the time of the call.
        len: usize,
    },
}

/// Marker attribute attached to a whole line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineAttribute {
    /// The line contains an error highlight.
    Error,
    /// A breakpoint is set on the line.
    Breakpoint,
    /// The debugger is stopped on the line.
    StepMark,
}

/// Store of current error highlights and line attributes.
#[derive(Debug, Default)]
pub struct ErrorOverlay {
    /// In arrival order; later entries win containment ties.
    errors: Vec<ErrorHighlight>,
    line_attributes: HashMap<usize, HashSet<LineAttribute>>,
}

impl ErrorOverlay {
    /// Empty overlay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current highlights, in arrival order.
    pub fn errors(&self) -> &[ErrorHighlight] {
        &self.errors
    }

    /// Add a highlight, marking its starting line with
    /// [`LineAttribute::Error`]. A zero-length range is accepted (a caret
    /// diagnostic at one offset).
    pub fn add_error_highlight(
        &mut self,
        doc: &Document,
        start: usize,
        end: usize,
        message: impl Into<String>,
        id: u32,
    ) -> Result<(), HighlightError> {
        if end < start {
            return Err(HighlightError::InvertedRange { start, end });
        }
        if end > doc.len() {
            return Err(HighlightError::OutOfBounds {
                start,
                end,
                len: doc.len(),
            });
        }
        let line = doc.line_from_position(start);
        self.set_line_attribute(line, LineAttribute::Error);
        self.errors.push(ErrorHighlight {
            start,
            end,
            message: message.into(),
            id,
        });
        Ok(())
    }

    /// The highlight containing `pos`, if any. When highlights overlap the
    /// most recently added one wins.
    pub fn error_at_position(&self, pos: usize) -> Option<&ErrorHighlight> {
        self.errors
            .iter()
            .rev()
            .find(|e| e.start <= pos && pos < e.end.max(e.start + 1))
    }

    /// The error nearest to `from` for next-error navigation: any error
    /// starting strictly after `from` beats any error at or behind it, and
    /// within a side the closest one wins. An error starting exactly at
    /// `from` is the current one, not the next.
    pub fn next_error_from(&self, from: usize) -> Option<&ErrorHighlight> {
        let mut best: Option<(&ErrorHighlight, bool, usize)> = None;
        for e in &self.errors {
            let (ahead, distance) = if e.start > from {
                (true, e.start - from)
            } else {
                (false, from - e.start)
            };
            let better = match best {
                None => true,
                Some((_, best_ahead, best_distance)) => {
                    (ahead, distance) != (best_ahead, best_distance)
                        && (ahead && !best_ahead
                            || ahead == best_ahead && distance < best_distance)
                }
            };
            if better {
                best = Some((e, ahead, distance));
            }
        }
        best.map(|(e, _, _)| e)
    }

    /// Drop every highlight and every [`LineAttribute::Error`]. Called on
    /// any document content change; other attributes are kept.
    pub fn document_content_changed(&mut self) {
        self.errors.clear();
        self.line_attributes.retain(|_, attrs| {
            attrs.remove(&LineAttribute::Error);
            !attrs.is_empty()
        });
    }

    /// Set `attr` on `line`.
    pub fn set_line_attribute(&mut self, line: usize, attr: LineAttribute) {
        self.line_attributes.entry(line).or_default().insert(attr);
    }

    /// Remove `attr` from `line`. Returns whether it was set.
    pub fn clear_line_attribute(&mut self, line: usize, attr: LineAttribute) -> bool {
        match self.line_attributes.get_mut(&line) {
            Some(attrs) => {
                let was = attrs.remove(&attr);
                if attrs.is_empty() {
                    self.line_attributes.remove(&line);
                }
                was
            }
            None => false,
        }
    }

    /// Whether `attr` is set on `line`.
    pub fn has_line_attribute(&self, line: usize, attr: LineAttribute) -> bool {
        self.line_attributes
            .get(&line)
            .is_some_and(|attrs| attrs.contains(&attr))
    }

    /// Remove `attr` from every line, returning the lines it was set on,
    /// sorted ascending.
    pub fn clear_attribute_throughout(&mut self, attr: LineAttribute) -> Vec<usize> {
        let mut cleared: Vec<usize> = self
            .line_attributes
            .iter()
            .filter(|(_, attrs)| attrs.contains(&attr))
            .map(|(&line, _)| line)
            .collect();
        cleared.sort_unstable();
        for line in &cleared {
            self.clear_line_attribute(*line, attr);
        }
        cleared
    }

    /// Lines carrying `attr`, sorted ascending.
    pub fn lines_with_attribute(&self, attr: LineAttribute) -> Vec<usize> {
        let mut lines: Vec<usize> = self
            .line_attributes
            .iter()
            .filter(|(_, attrs)| attrs.contains(&attr))
            .map(|(&line, _)| line)
            .collect();
        lines.sort_unstable();
        lines
    }
}
