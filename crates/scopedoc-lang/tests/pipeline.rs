//! End-to-end pipeline: document edits flow through the scheduler and the
//! brace-block oracle into scope rows applied to a fixed-width view.

use scopedoc_core::{Document, EngineConfig, ScopeColor, SyntaxView};
use scopedoc_lang::{BlockOutline, FixedWidthView};

const SOURCE: &str = "class A {\n    void run() {\n        work();\n    }\n}\n";

fn pipeline(text: &str) -> (Document, FixedWidthView, SyntaxView<BlockOutline>) {
    let doc = Document::with_content(text);
    let mut view = FixedWidthView::new(7.0, 400.0);
    view.sync(&doc);
    let mut sv = SyntaxView::new(&doc, BlockOutline::new(), EngineConfig::default());
    sv.flush(&doc, &mut view).unwrap();
    (doc, view, sv)
}

#[test]
fn test_initial_analysis_produces_nested_rows() {
    let (_, view, sv) = pipeline(SOURCE);
    assert!(sv.scheduler().is_idle());

    // "class A {" opens the outermost box.
    let top = view.row(0).unwrap();
    assert_eq!(top.scopes.len(), 1);
    assert_eq!(top.scopes[0].color, ScopeColor::Class);
    assert!(top.scopes[0].starts && !top.scopes[0].ends);
    assert_eq!(top.scopes[0].left, -2); // indent 0 minus the outer margin

    // "    void run() {": class box, class body, method box.
    let sig = view.row(1).unwrap();
    let colors: Vec<ScopeColor> = sig.scopes.iter().map(|s| s.color).collect();
    assert_eq!(
        colors,
        vec![ScopeColor::Class, ScopeColor::ClassInner, ScopeColor::Method]
    );
    assert!(!sig.scopes[0].starts);
    assert!(sig.scopes[1].starts && sig.scopes[2].starts);
    // Body indent is the 4-space column (28px) minus the inner margin.
    assert_eq!(sig.scopes[1].left, 23);
    assert_eq!(sig.scopes[2].left, 26);

    // "        work();": the method body box starts and ends here.
    let body = view.row(2).unwrap();
    assert_eq!(body.scopes.len(), 4);
    let innermost = body.scopes.last().unwrap();
    assert_eq!(innermost.color, ScopeColor::ClassInner);
    assert!(innermost.starts && innermost.ends);
    assert_eq!(innermost.left, 56 - 5);

    // "    }" closes the method and the class body.
    let closer = view.row(3).unwrap();
    assert_eq!(closer.scopes.len(), 3);
    assert!(closer.scopes[1].ends && closer.scopes[2].ends);

    // "}" closes the class.
    let last = view.row(4).unwrap();
    assert_eq!(last.scopes.len(), 1);
    assert!(last.scopes[0].ends);
}

#[test]
fn test_right_bounds_step_in_by_depth() {
    let (_, view, _) = pipeline(SOURCE);
    let body = view.row(2).unwrap();
    // 400px wide minus the fixed 10px margin, stepped 4px per depth; the
    // root draws nothing so the class box is depth 0.
    let rights: Vec<i32> = body.scopes.iter().map(|s| s.right).collect();
    assert_eq!(rights, vec![390, 386, 382, 378]);
}

#[test]
fn test_edit_grows_method_body_across_lines() {
    let (mut doc, mut view, mut sv) = pipeline(SOURCE);

    // Add a statement line at the top of the method body.
    let change = doc.replace_text(27, 27, "        more();\n");
    view.sync(&doc);
    sv.text_changed(&doc, &view, &change);
    assert!(!sv.scheduler().is_idle());
    sv.flush(&doc, &mut view).unwrap();

    // The method body box now spans two lines: starts on the new line,
    // ends on the old one.
    let first = view.row(2).unwrap();
    let inner = first.scopes.last().unwrap();
    assert_eq!(first.scopes.len(), 4);
    assert!(inner.starts && !inner.ends);

    let second = view.row(3).unwrap();
    let inner = second.scopes.last().unwrap();
    assert_eq!(second.scopes.len(), 4);
    assert!(!inner.starts && inner.ends);

    // The closing lines moved down one row.
    assert!(view.row(5).unwrap().scopes[0].ends);
}

#[test]
fn test_incremental_analysis_matches_fresh_after_line_insert() {
    let (mut doc, mut view, mut sv) = pipeline(SOURCE);

    let change = doc.replace_text(27, 27, "        more();\n");
    view.sync(&doc);
    sv.text_changed(&doc, &view, &change);
    sv.flush(&doc, &mut view).unwrap();

    // Rows below the inserted line shifted down; every one of them must be
    // indistinguishable from analyzing the final text from scratch.
    let (_, fresh, _) = pipeline(&doc.full_content());
    for line in 0..doc.line_count() {
        assert_eq!(view.row(line), fresh.row(line), "line {line}");
    }
}

#[test]
fn test_outdent_pulls_body_box_left() {
    let (mut doc, mut view, mut sv) = pipeline(SOURCE);
    assert_eq!(view.row(2).unwrap().scopes.last().unwrap().left, 51);

    // Outdent "work();" by four spaces; the body's minimum indent drops.
    let change = doc.replace_text(27, 31, "");
    view.sync(&doc);
    sv.text_changed(&doc, &view, &change);
    sv.flush(&doc, &mut view).unwrap();

    assert_eq!(view.row(2).unwrap().scopes.last().unwrap().left, 28 - 5);
}

#[test]
fn test_run_slice_reports_remaining_work() {
    let doc = Document::with_content(SOURCE);
    let mut view = FixedWidthView::new(7.0, 400.0);
    view.sync(&doc);
    let mut sv = SyntaxView::new(&doc, BlockOutline::new(), EngineConfig::default());

    // The whole-file analysis fits in one slice here; the call must report
    // the queue drained and the rows must have been applied.
    let more = sv.run_slice(&doc, &mut view).unwrap();
    assert!(!more);
    assert!(view.row(0).is_some());
}

#[test]
fn test_comment_only_trailer_does_not_indent_scope() {
    // The body's last line is a trailing comment; the box still measures
    // from the statements, and the comment line keeps the body open.
    let (_, view, _) = pipeline("void f() {\n    a();\n    // done\n}\n");
    let body = view.row(1).unwrap();
    let inner = body.scopes.last().unwrap();
    assert_eq!(inner.color, ScopeColor::ClassInner);
    assert_eq!(inner.left, 28 - 5);
    let comment_line = view.row(2).unwrap();
    assert_eq!(comment_line.scopes.last().unwrap().left, 23);
}
