//! Position-ordered interval set used to track pending reparse damage.
//!
//! Intervals are kept sorted, non-empty, and non-overlapping in a plain
//! vector; binary search locates neighbours in O(log n) and the set is small
//! in practice (damage merges aggressively). Ranges slide across edits under
//! the same rules as tracked positions, so scheduled damage stays anchored to
//! the text it was raised for.

use std::ops::Range;

/// Sorted set of half-open `[start, end)` character ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    ranges: Vec<Range<usize>>,
}

impl IntervalSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Whether no damage is pending.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of disjoint ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// The lowest pending range, if any.
    pub fn first(&self) -> Option<Range<usize>> {
        self.ranges.first().cloned()
    }

    /// All pending ranges in order.
    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    /// Remove every range.
    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// Add `[pos, pos + size)` to the pending set.
    ///
    /// If an existing range starts within the new one, its start slides back
    /// to `pos`. If an existing range already covers `pos`, it is extended
    /// forward, absorbing the chain of successors the grown range now
    /// touches. Otherwise a fresh range is inserted.
    pub fn schedule(&mut self, pos: usize, size: usize) {
        if size == 0 {
            return;
        }
        let new_end = pos + size;
        // First range ending at or after pos; earlier ranges cannot interact.
        let idx = self.ranges.partition_point(|r| r.end < pos);
        if idx == self.ranges.len() {
            self.ranges.push(pos..new_end);
            return;
        }
        let existing = self.ranges[idx].clone();
        if existing.start > new_end {
            self.ranges.insert(idx, pos..new_end);
        } else if existing.start > pos {
            // Starts inside the new damage: slide its start back.
            self.ranges[idx].start = pos;
            if self.ranges[idx].end < new_end {
                self.extend_and_absorb(idx, new_end);
            }
        } else if existing.end < new_end {
            self.extend_and_absorb(idx, new_end);
        }
    }

    /// Grow `ranges[idx]` to at least `new_end`, merging successors that the
    /// grown range reaches.
    fn extend_and_absorb(&mut self, idx: usize, new_end: usize) {
        let mut end = new_end.max(self.ranges[idx].end);
        let mut last = idx;
        while last + 1 < self.ranges.len() && self.ranges[last + 1].start <= end {
            last += 1;
            end = end.max(self.ranges[last].end);
        }
        self.ranges[idx].end = end;
        self.ranges.drain(idx + 1..=last);
    }

    /// Mark `[pos, pos + size)` as handled, shrinking, removing, or
    /// splitting the pending ranges it overlaps. A range split in two keeps
    /// both remainders pending.
    pub fn mark_parsed(&mut self, pos: usize, size: usize) {
        let end = pos + size;
        let mut idx = self.ranges.partition_point(|r| r.end <= pos);
        while idx < self.ranges.len() && self.ranges[idx].start < end {
            let r = self.ranges[idx].clone();
            if r.start >= pos && r.end <= end {
                self.ranges.remove(idx);
            } else if r.start < pos && r.end > end {
                self.ranges[idx].end = pos;
                self.ranges.insert(idx + 1, end..r.end);
                return;
            } else if r.start < pos {
                self.ranges[idx].end = pos;
                idx += 1;
            } else {
                self.ranges[idx].start = end;
                return;
            }
        }
    }

    /// Slide ranges for a replacement of `[start, end)` by `inserted`
    /// characters, the same adjustment tracked positions get. Range starts
    /// inside the removed span collapse to `start`; ends at or after the
    /// removal end shift by the delta. Emptied ranges are dropped and
    /// overlaps produced by the collapse are merged.
    pub fn apply_edit(&mut self, start: usize, end: usize, inserted: usize) {
        let removed = end - start;
        for r in &mut self.ranges {
            if r.start >= end {
                r.start = r.start + inserted - removed;
            } else if r.start > start {
                r.start = start;
            }
            if r.end >= end {
                r.end = r.end + inserted - removed;
            } else if r.end > start {
                r.end = start + inserted;
            }
        }
        self.ranges.retain(|r| r.start < r.end);
        self.merge_adjacent();
    }

    fn merge_adjacent(&mut self) {
        let mut i = 0;
        while i + 1 < self.ranges.len() {
            if self.ranges[i + 1].start <= self.ranges[i].end {
                self.ranges[i].end = self.ranges[i].end.max(self.ranges[i + 1].end);
                self.ranges.remove(i + 1);
            } else {
                i += 1;
            }
        }
    }
}
