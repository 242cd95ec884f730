//! Tracked positions: offsets that follow the text they are anchored to.
//!
//! The document owns an arena of position records. Callers hold a
//! [`PositionHandle`] (slot index + generation); releasing a handle frees the
//! slot for reuse and bumps the generation so stale handles are detectable.

/// Tie-breaking rule applied when an edit boundary lands exactly on a
/// tracked position.
///
/// - `Forward`: the position sticks to the text after it. An insertion at
///   the position pushes it to the end of the inserted text.
/// - `Back`: the position sticks to the text before it. An insertion at the
///   position leaves it where it is.
/// - `None`: no affinity; behaves like `Back` for insertions at the position
///   and collapses with a removal ending exactly on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionBias {
    /// Stick to the following text.
    Forward,
    /// Stick to the preceding text.
    Back,
    /// No affinity.
    None,
}

/// Handle to a tracked position owned by a [`Document`](crate::Document).
///
/// Handles are `Copy` and cheap; the generation field detects use after
/// `release_position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PositionHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

#[derive(Debug, Clone)]
struct Slot {
    offset: usize,
    bias: PositionBias,
    generation: u32,
    live: bool,
}

/// Arena of tracked positions. One per document.
#[derive(Debug, Default)]
pub(crate) struct PositionTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl PositionTable {
    pub(crate) fn insert(&mut self, offset: usize, bias: PositionBias) -> PositionHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.offset = offset;
            slot.bias = bias;
            slot.live = true;
            PositionHandle {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                offset,
                bias,
                generation: 0,
                live: true,
            });
            PositionHandle {
                index,
                generation: 0,
            }
        }
    }

    pub(crate) fn release(&mut self, handle: PositionHandle) {
        if let Some(slot) = self.slots.get_mut(handle.index as usize) {
            if slot.live && slot.generation == handle.generation {
                slot.live = false;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(handle.index);
            }
        }
    }

    pub(crate) fn get(&self, handle: PositionHandle) -> Option<usize> {
        let slot = self.slots.get(handle.index as usize)?;
        (slot.live && slot.generation == handle.generation).then_some(slot.offset)
    }

    pub(crate) fn is_live(&self, handle: PositionHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Adjust every live position for a replacement of `[start, end)` by
    /// `inserted` characters.
    pub(crate) fn apply_edit(&mut self, start: usize, end: usize, inserted: usize) {
        for slot in self.slots.iter_mut().filter(|s| s.live) {
            slot.offset = shift_offset(slot.offset, slot.bias, start, end, inserted);
        }
    }
}

/// The single adjustment rule shared by tracked positions and line starts.
///
/// For a replacement of `[start, end)` by `inserted` characters:
/// 1. a position inside the removed range — strictly after `start` (or at it
///    with `Forward` bias) and strictly before `end` (or at it with a
///    non-`Forward` bias) — collapses to `start`;
/// 2. a position at or after `end` shifts by `inserted - (end - start)`;
/// 3. anything before the edit is untouched.
pub(crate) fn shift_offset(
    offset: usize,
    bias: PositionBias,
    start: usize,
    end: usize,
    inserted: usize,
) -> usize {
    if offset < start {
        offset
    } else if offset < end || (offset == end && bias != PositionBias::Forward) {
        start
    } else {
        offset + inserted - (end - start)
    }
}
