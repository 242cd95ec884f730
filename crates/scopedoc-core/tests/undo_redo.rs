//! Undo/redo behavior through the public API, including a randomized
//! walk-back/walk-forward check against recorded snapshots.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scopedoc_core::{Document, DocumentUndoStack};

#[test]
fn test_typing_session_unwinds_in_order() {
    let mut doc = Document::new();
    let undo = DocumentUndoStack::attach(&mut doc);

    doc.replace_text(0, 0, "fn main() {}");
    doc.replace_text(11, 11, "\n    work();\n");
    doc.replace_text(7, 9, "(n: u32)");

    assert_eq!(undo.can_undo_count(), 3);
    let caret = undo.undo(&mut doc).unwrap();
    assert_eq!(doc.full_content(), "fn main() {\n    work();\n}");
    assert_eq!(caret, 9);

    undo.undo(&mut doc).unwrap();
    assert_eq!(doc.full_content(), "fn main() {}");
    undo.undo(&mut doc).unwrap();
    assert_eq!(doc.full_content(), "");
    assert_eq!(undo.undo(&mut doc), None);

    undo.redo(&mut doc).unwrap();
    undo.redo(&mut doc).unwrap();
    undo.redo(&mut doc).unwrap();
    assert_eq!(doc.full_content(), "fn main(n: u32) {\n    work();\n}");
    assert_eq!(undo.redo(&mut doc), None);
}

#[test]
fn test_compound_replace_all_is_one_step() {
    let mut doc = Document::with_content("foo bar foo baz foo");
    let undo = DocumentUndoStack::attach(&mut doc);

    // Replace every "foo" with "quux" in one user-visible step.
    undo.compound_edit(&mut doc, |doc| {
        let mut at = 0;
        while let Some(found) = doc.full_content()[at..].find("foo") {
            let start = at + found;
            doc.replace_text(start, start + 3, "quux");
            at = start + 4;
        }
    });
    assert_eq!(doc.full_content(), "quux bar quux baz quux");
    assert_eq!(undo.can_undo_count(), 1);

    undo.undo(&mut doc);
    assert_eq!(doc.full_content(), "foo bar foo baz foo");
    undo.redo(&mut doc);
    assert_eq!(doc.full_content(), "quux bar quux baz quux");
}

#[test]
fn test_new_edit_discards_redo_tail() {
    let mut doc = Document::new();
    let undo = DocumentUndoStack::attach(&mut doc);

    doc.replace_text(0, 0, "one");
    doc.replace_text(3, 3, " two");
    undo.undo(&mut doc);
    assert_eq!(undo.can_redo_count(), 1);

    doc.replace_text(3, 3, " III");
    assert_eq!(undo.can_redo_count(), 0);
    assert_eq!(undo.redo(&mut doc), None);
    undo.undo(&mut doc);
    assert_eq!(doc.full_content(), "one");
}

#[test]
fn test_state_callback_tracks_availability() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let mut doc = Document::new();
    let undo = DocumentUndoStack::attach(&mut doc);
    let states = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&states);
    undo.set_state_callback(move |can_undo, can_redo| {
        sink.borrow_mut().push((can_undo, can_redo));
    });

    doc.replace_text(0, 0, "a"); // (true, false)
    undo.undo(&mut doc); // (false, true)
    undo.redo(&mut doc); // (true, false)
    assert_eq!(
        *states.borrow(),
        vec![(true, false), (false, true), (true, false)]
    );
}

#[test]
fn test_random_history_walk_restores_snapshots() {
    let mut rng = StdRng::seed_from_u64(0xd0c);
    let mut doc = Document::new();
    let undo = DocumentUndoStack::attach(&mut doc);

    // Snapshot after every edit; snapshots[0] is the empty document.
    let mut snapshots = vec![String::new()];
    for _ in 0..200 {
        let len = doc.len();
        let start = rng.gen_range(0..=len);
        let end = rng.gen_range(start..=len.min(start + 8));
        let text = ["alpha", "\n", "{}", "x", ""][rng.gen_range(0..5)];
        if start == end && text.is_empty() {
            continue; // nothing recorded for a no-op
        }
        doc.replace_text(start, end, text);
        snapshots.push(doc.full_content());
    }

    // Walk all the way back, checking each snapshot, then all the way
    // forward again.
    for expected in snapshots.iter().rev().skip(1) {
        undo.undo(&mut doc).unwrap();
        assert_eq!(doc.full_content(), *expected);
    }
    assert_eq!(undo.can_undo_count(), 0);
    for expected in snapshots.iter().skip(1) {
        undo.redo(&mut doc).unwrap();
        assert_eq!(doc.full_content(), *expected);
    }
    assert_eq!(undo.can_redo_count(), 0);
    assert_eq!(doc.full_content(), *snapshots.last().unwrap());
}
