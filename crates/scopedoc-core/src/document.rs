//! Gap-buffer text storage with a line-start index and change listeners.
//!
//! The document stores characters as `[content][hole][content]`. Edits move
//! the hole to the edit point, so a run of nearby edits (the common case
//! while typing) costs O(edit size); a far jump costs O(distance). The hole
//! grows by a fixed margin beyond what an insertion needs, so consecutive
//! insertions at one spot do not reallocate.
//!
//! Line starts are kept as a sorted vector of offsets, one per `\n` already
//! in the text, pointing at the character *after* the newline. Line 0 has no
//! stored entry, which keeps a whole-document replacement from ever
//! corrupting the index.

use crate::position::{PositionBias, PositionHandle, PositionTable, shift_offset};

/// Extra hole capacity allocated beyond an insertion's immediate need.
const GROWTH_MARGIN: usize = 256;

/// One document mutation, as reported to change listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChange {
    /// Offset where the replacement started.
    pub start: usize,
    /// The text that was removed (may be empty).
    pub removed: String,
    /// The text that was inserted (may be empty).
    pub inserted: String,
    /// Number of line breaks in `removed`.
    pub lines_removed: usize,
    /// Number of line breaks in `inserted`.
    pub lines_added: usize,
}

impl TextChange {
    /// Length of the removed text in characters.
    pub fn removed_len(&self) -> usize {
        self.removed.chars().count()
    }

    /// Length of the inserted text in characters.
    pub fn inserted_len(&self) -> usize {
        self.inserted.chars().count()
    }

    /// Offset one past the end of the removed range (pre-edit coordinates).
    pub fn removed_end(&self) -> usize {
        self.start + self.removed_len()
    }

    /// Offset one past the end of the inserted text (post-edit coordinates).
    pub fn inserted_end(&self) -> usize {
        self.start + self.inserted_len()
    }
}

/// Callback invoked after every document mutation.
pub type ChangeListener = Box<dyn FnMut(&TextChange)>;

/// Gap-buffer document: text, line index, tracked positions, listeners.
///
/// All offsets are character offsets. Out-of-range arguments to mutating
/// calls are programming errors and panic; externally sourced ranges must be
/// validated by the caller.
pub struct Document {
    buf: Vec<char>,
    gap_start: usize,
    gap_end: usize,
    /// Offsets of the first character of every line except line 0, sorted.
    line_starts: Vec<usize>,
    positions: PositionTable,
    front_listeners: Vec<ChangeListener>,
    back_listeners: Vec<ChangeListener>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("len", &self.len())
            .field("line_count", &self.line_count())
            .finish_non_exhaustive()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            gap_start: 0,
            gap_end: 0,
            line_starts: Vec::new(),
            positions: PositionTable::default(),
            front_listeners: Vec::new(),
            back_listeners: Vec::new(),
        }
    }

    /// Create a document holding `content`. No listeners fire.
    pub fn with_content(content: &str) -> Self {
        let buf: Vec<char> = content.chars().collect();
        let line_starts = buf
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c == '\n')
            .map(|(i, _)| i + 1)
            .collect();
        let gap = buf.len();
        Self {
            buf,
            gap_start: gap,
            gap_end: gap,
            line_starts,
            positions: PositionTable::default(),
            front_listeners: Vec::new(),
            back_listeners: Vec::new(),
        }
    }

    /// Document length in characters.
    pub fn len(&self) -> usize {
        self.buf.len() - (self.gap_end - self.gap_start)
    }

    /// Whether the document is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The character at `offset`.
    ///
    /// # Panics
    /// If `offset >= len()`.
    pub fn char_at(&self, offset: usize) -> char {
        assert!(offset < self.len(), "char_at out of range");
        if offset < self.gap_start {
            self.buf[offset]
        } else {
            self.buf[offset + (self.gap_end - self.gap_start)]
        }
    }

    /// Replace `[start, end)` with `text`, returning the change record after
    /// every listener has seen it.
    ///
    /// A zero-length range is an insertion; empty `text` is a deletion.
    /// Tracked positions and line starts are adjusted before listeners run.
    ///
    /// # Panics
    /// If `start > end` or `end > len()`.
    pub fn replace_text(&mut self, start: usize, end: usize, text: &str) -> TextChange {
        assert!(start <= end, "replace_text: start {start} > end {end}");
        assert!(
            end <= self.len(),
            "replace_text: end {end} beyond document length {}",
            self.len()
        );

        let removed: String = self.content(start, end);
        let inserted: Vec<char> = text.chars().collect();
        let removed_len = end - start;

        self.move_gap(start);
        // The removed range now sits directly after the hole; swallow it.
        self.gap_end += removed_len;
        self.grow_gap(inserted.len());
        for &c in &inserted {
            self.buf[self.gap_start] = c;
            self.gap_start += 1;
        }

        self.update_line_starts(start, end, &inserted);
        self.positions.apply_edit(start, end, inserted.len());

        let change = TextChange {
            start,
            lines_removed: removed.matches('\n').count(),
            lines_added: inserted.iter().filter(|&&c| c == '\n').count(),
            removed,
            inserted: text.to_string(),
        };
        for listener in &mut self.front_listeners {
            listener(&change);
        }
        for listener in &mut self.back_listeners {
            listener(&change);
        }
        change
    }

    fn move_gap(&mut self, offset: usize) {
        if offset < self.gap_start {
            let n = self.gap_start - offset;
            self.buf.copy_within(offset..self.gap_start, self.gap_end - n);
            self.gap_start = offset;
            self.gap_end -= n;
        } else if offset > self.gap_start {
            let n = offset - self.gap_start;
            self.buf
                .copy_within(self.gap_end..self.gap_end + n, self.gap_start);
            self.gap_start += n;
            self.gap_end += n;
        }
    }

    fn grow_gap(&mut self, needed: usize) {
        let hole = self.gap_end - self.gap_start;
        if hole >= needed {
            return;
        }
        let extra = needed - hole + GROWTH_MARGIN;
        let old_len = self.buf.len();
        self.buf.resize(old_len + extra, '\0');
        self.buf.copy_within(self.gap_end..old_len, self.gap_end + extra);
        self.gap_end += extra;
    }

    /// Rebuild the affected slice of the line-start index for a replacement
    /// of `[start, end)` by `inserted`.
    fn update_line_starts(&mut self, start: usize, end: usize, inserted: &[char]) {
        // Entries in (start, end] belong to removed newlines; later entries
        // slide by the length delta; new entries come from inserted newlines.
        let lo = self.line_starts.partition_point(|&s| s <= start);
        let hi = self.line_starts.partition_point(|&s| s <= end);
        let removed_len = end - start;
        for s in &mut self.line_starts[hi..] {
            *s = *s + inserted.len() - removed_len;
        }
        let fresh = inserted
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c == '\n')
            .map(|(i, _)| start + i + 1);
        self.line_starts.splice(lo..hi, fresh);
    }

    // --- Line queries ---------------------------------------------------

    /// Number of lines. An empty document has one (empty) line.
    pub fn line_count(&self) -> usize {
        self.line_starts.len() + 1
    }

    /// Index of the line containing `offset` (greatest line start at or
    /// before it). `offset == len()` maps to the last line.
    pub fn line_from_position(&self, offset: usize) -> usize {
        self.line_starts.partition_point(|&s| s <= offset)
    }

    /// Offset of the first character of `line`.
    ///
    /// # Panics
    /// If `line >= line_count()`.
    pub fn line_start(&self, line: usize) -> usize {
        if line == 0 {
            0
        } else {
            self.line_starts[line - 1]
        }
    }

    /// Offset of the end of `line`'s content: the position of its trailing
    /// `\n`, or the document length for the last line.
    pub fn line_end(&self, line: usize) -> usize {
        if line < self.line_starts.len() {
            self.line_starts[line] - 1
        } else {
            assert!(line == self.line_starts.len(), "line_end out of range");
            self.len()
        }
    }

    /// Length of `line` in characters, including its trailing newline if any.
    pub fn line_length(&self, line: usize) -> usize {
        let start = self.line_start(line);
        let end = self.line_end(line);
        let newline = if line < self.line_starts.len() { 1 } else { 0 };
        end - start + newline
    }

    /// Column of `offset` within its line.
    pub fn column_from_position(&self, offset: usize) -> usize {
        offset - self.line_start(self.line_from_position(offset))
    }

    /// The text of `[start, end)`.
    pub fn content(&self, start: usize, end: usize) -> String {
        self.chars_in(start, end).collect()
    }

    /// The whole document as a `String`.
    pub fn full_content(&self) -> String {
        self.content(0, self.len())
    }

    /// Iterator over the characters of `[start, end)`, reading around the
    /// hole without copying.
    pub fn chars_in(&self, start: usize, end: usize) -> impl Iterator<Item = char> + '_ {
        assert!(start <= end && end <= self.len(), "chars_in out of range");
        (start..end).map(move |i| {
            if i < self.gap_start {
                self.buf[i]
            } else {
                self.buf[i + (self.gap_end - self.gap_start)]
            }
        })
    }

    /// The lines of the document, without trailing newlines. Yields
    /// `line_count()` items.
    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        (0..self.line_count()).map(|l| self.content(self.line_start(l), self.line_end(l)))
    }

    // --- Tracked positions ------------------------------------------------

    /// Track `offset` across future edits. The handle stays valid until
    /// [`release_position`](Self::release_position).
    pub fn track_position(&mut self, offset: usize, bias: PositionBias) -> PositionHandle {
        assert!(offset <= self.len(), "track_position out of range");
        self.positions.insert(offset, bias)
    }

    /// Free a tracked position. Releasing twice is a no-op.
    pub fn release_position(&mut self, handle: PositionHandle) {
        self.positions.release(handle);
    }

    /// Current offset of a tracked position.
    ///
    /// # Panics
    /// If the handle was released.
    pub fn position(&self, handle: PositionHandle) -> usize {
        self.try_position(handle)
            .unwrap_or_else(|| panic!("position handle {handle:?} was released"))
    }

    /// Current offset of a tracked position, or `None` for a stale handle.
    pub fn try_position(&self, handle: PositionHandle) -> Option<usize> {
        self.positions.get(handle)
    }

    /// Line of a tracked position.
    pub fn position_line(&self, handle: PositionHandle) -> usize {
        self.line_from_position(self.position(handle))
    }

    /// Column of a tracked position within its line.
    pub fn position_column(&self, handle: PositionHandle) -> usize {
        self.column_from_position(self.position(handle))
    }

    // --- Listeners --------------------------------------------------------

    /// Register a change listener. Listeners registered with
    /// `at_start = true` run before the others, each group in registration
    /// order. Listeners run after positions and line starts are adjusted.
    pub fn add_listener(&mut self, at_start: bool, listener: impl FnMut(&TextChange) + 'static) {
        if at_start {
            self.front_listeners.push(Box::new(listener));
        } else {
            self.back_listeners.push(Box::new(listener));
        }
    }

    /// Adjust a bare offset the way a tracked position with `bias` would
    /// move for `change`.
    pub fn shift_for_change(offset: usize, bias: PositionBias, change: &TextChange) -> usize {
        shift_offset(
            offset,
            bias,
            change.start,
            change.removed_end(),
            change.inserted_len(),
        )
    }
}
