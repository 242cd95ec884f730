//! Undo/redo over document change groups.
//!
//! The stack registers itself as a front document listener and records every
//! change. History is a flat list of change groups plus an index: everything
//! before the index is undoable, everything at or after it is redoable. A
//! plain edit becomes a singleton group and truncates the redo tail;
//! [`DocumentUndoStack::compound_edit`] batches several replacements into
//! one group so they undo and redo atomically. Replayed edits pass through
//! the same listener but are suppressed by a re-entrancy flag.

use std::cell::RefCell;
use std::rc::Rc;

use crate::document::{Document, TextChange};

/// Callback fired when undo or redo availability flips.
pub type UndoStateCallback = Box<dyn FnMut(bool, bool)>;

#[derive(Debug, Clone)]
struct RecordedChange {
    start: usize,
    removed: String,
    inserted: String,
}

#[derive(Default)]
struct UndoState {
    groups: Vec<Vec<RecordedChange>>,
    /// Groups before this index are undoable; the rest are redoable.
    change_index: usize,
    /// Set while undo/redo replays edits, so they are not re-recorded.
    replaying: bool,
    /// Nesting depth of open compound edits.
    compound_depth: u32,
    state_callback: Option<UndoStateCallback>,
}

impl UndoState {
    fn record(&mut self, change: &TextChange) {
        if self.replaying {
            return;
        }
        // A replacement that neither removed nor inserted anything is not a
        // change; recording it would wrongly discard the redo tail.
        if change.removed.is_empty() && change.inserted.is_empty() {
            return;
        }
        let recorded = RecordedChange {
            start: change.start,
            removed: change.removed.clone(),
            inserted: change.inserted.clone(),
        };
        if self.compound_depth > 0 {
            // The open group is always the last one.
            self.groups
                .last_mut()
                .unwrap_or_else(|| unreachable!("compound edit without open group"))
                .push(recorded);
        } else {
            self.groups.truncate(self.change_index);
            self.groups.push(vec![recorded]);
            self.change_index = self.groups.len();
        }
    }

    fn availability(&self) -> (bool, bool) {
        (self.change_index > 0, self.change_index < self.groups.len())
    }
}

/// Undo/redo stack attached to one [`Document`].
pub struct DocumentUndoStack {
    state: Rc<RefCell<UndoState>>,
}

impl DocumentUndoStack {
    /// Attach a new stack to `doc`. The stack observes edits from a front
    /// listener, so it records changes before downstream observers run.
    pub fn attach(doc: &mut Document) -> Self {
        let state = Rc::new(RefCell::new(UndoState::default()));
        let recorder = Rc::clone(&state);
        doc.add_listener(true, move |change| {
            let before = recorder.borrow().availability();
            recorder.borrow_mut().record(change);
            Self::fire_if_flipped(&recorder, before);
        });
        Self { state }
    }

    /// Number of undoable change groups.
    pub fn can_undo_count(&self) -> usize {
        self.state.borrow().change_index
    }

    /// Number of redoable change groups.
    pub fn can_redo_count(&self) -> usize {
        let s = self.state.borrow();
        s.groups.len() - s.change_index
    }

    /// Set the callback fired whenever undo or redo availability flips.
    pub fn set_state_callback(&self, callback: impl FnMut(bool, bool) + 'static) {
        self.state.borrow_mut().state_callback = Some(Box::new(callback));
    }

    /// Run `action`, recording every replacement it performs as one group.
    ///
    /// Nested calls fold into the outermost group. A group that ends up
    /// empty is discarded and leaves the history untouched.
    pub fn compound_edit<R>(&self, doc: &mut Document, action: impl FnOnce(&mut Document) -> R) -> R {
        let before = {
            let mut s = self.state.borrow_mut();
            let before = s.availability();
            if s.compound_depth == 0 {
                let live = s.change_index;
                s.groups.truncate(live);
                s.groups.push(Vec::new());
            }
            s.compound_depth += 1;
            before
        };
        let result = action(doc);
        {
            let mut s = self.state.borrow_mut();
            s.compound_depth -= 1;
            if s.compound_depth == 0 {
                if s.groups.last().is_some_and(Vec::is_empty) {
                    s.groups.pop();
                } else {
                    s.change_index = s.groups.len();
                }
            }
        }
        Self::fire_if_flipped(&self.state, before);
        result
    }

    /// Undo the most recent group, replaying its changes newest-first as
    /// inverse replacements. Returns the caret restore offset (the end of
    /// the restored text of the last replayed change), or `None` when there
    /// is nothing to undo.
    pub fn undo(&self, doc: &mut Document) -> Option<usize> {
        let (before, changes) = {
            let mut s = self.state.borrow_mut();
            if s.change_index == 0 || s.compound_depth > 0 {
                return None;
            }
            let before = s.availability();
            s.replaying = true;
            (before, s.groups[s.change_index - 1].clone())
        };
        let mut caret = 0;
        for c in changes.iter().rev() {
            doc.replace_text(c.start, c.start + c.inserted.chars().count(), &c.removed);
            caret = c.start + c.removed.chars().count();
        }
        {
            let mut s = self.state.borrow_mut();
            s.replaying = false;
            s.change_index -= 1;
        }
        Self::fire_if_flipped(&self.state, before);
        Some(caret)
    }

    /// Redo the next group, replaying its changes oldest-first. Returns the
    /// caret restore offset, or `None` when there is nothing to redo.
    pub fn redo(&self, doc: &mut Document) -> Option<usize> {
        let (before, changes) = {
            let mut s = self.state.borrow_mut();
            if s.change_index == s.groups.len() || s.compound_depth > 0 {
                return None;
            }
            let before = s.availability();
            s.replaying = true;
            (before, s.groups[s.change_index].clone())
        };
        let mut caret = 0;
        for c in &changes {
            doc.replace_text(c.start, c.start + c.removed.chars().count(), &c.inserted);
            caret = c.start + c.inserted.chars().count();
        }
        {
            let mut s = self.state.borrow_mut();
            s.replaying = false;
            s.change_index += 1;
        }
        Self::fire_if_flipped(&self.state, before);
        Some(caret)
    }

    fn fire_if_flipped(state: &Rc<RefCell<UndoState>>, before: (bool, bool)) {
        let after = state.borrow().availability();
        if after == before {
            return;
        }
        // Take the callback out so it can borrow the stack re-entrantly.
        let callback = state.borrow_mut().state_callback.take();
        if let Some(mut cb) = callback {
            cb(after.0, after.1);
            let mut s = state.borrow_mut();
            if s.state_callback.is_none() {
                s.state_callback = Some(cb);
            }
        }
    }
}
