#![warn(missing_docs)]
//! Scopedoc Core - Headless Incremental Document & Scope Engine
//!
//! # Overview
//!
//! `scopedoc-core` is a headless document engine for code editors. It owns the
//! text (a gap buffer with a line-start index), tracked positions, undo/redo,
//! and the incremental machinery that keeps structural decorations — nested
//! scope backgrounds and indent guides — correct across edits without full
//! re-analysis. It does not paint anything: a render collaborator supplies
//! pixel measurements and receives finished per-line scope rows.
//!
//! # Core Features
//!
//! - **Gap-buffer storage**: `[content][hole][content]`, amortized
//!   O(edit size + gap distance) edits, line-start index maintained in place
//! - **Tracked positions**: arena of position records with bias-aware
//!   adjustment across every edit
//! - **Undo/redo**: flat change-group history with compound edits
//! - **Multiline-token tracking**: incremental triple-quote marker set
//! - **Reparse scheduling**: damage ranges merged, split, and drained in
//!   bounded chunks against a pluggable parse oracle
//! - **Scope/indent recalculation**: per-node indent cache with asymmetric
//!   add/remove damage rules, producing nested scope rows per line
//! - **Error overlay**: compiler-fed ranged highlights with nearest-error
//!   navigation and per-line attributes
//!
//! # Architecture Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  SyntaxView (scheduler + scope engine)      │  ← Orchestration
//! ├─────────────────────────────────────────────┤
//! │  ParseTree oracle / RenderView collaborator │  ← Pluggable edges
//! ├─────────────────────────────────────────────┤
//! │  Reparse scheduler (interval set)           │  ← Damage tracking
//! ├─────────────────────────────────────────────┤
//! │  Undo stack / tracker / error overlay       │  ← Document observers
//! ├─────────────────────────────────────────────┤
//! │  Document (gap buffer + tracked positions)  │  ← Text storage
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use scopedoc_core::{Document, PositionBias};
//!
//! let mut doc = Document::new();
//! doc.replace_text(0, 0, "fn main() {\n}\n");
//!
//! let here = doc.track_position(3, PositionBias::Forward);
//! doc.replace_text(0, 0, "// entry\n");
//! assert_eq!(doc.position(here), 12);
//! assert_eq!(doc.line_count(), 4);
//! ```
//!
//! # Module Description
//!
//! - [`document`] - gap-buffer text store, line index, change listeners
//! - [`position`] - tracked-position arena and bias rules
//! - [`undo`] - change-group undo/redo stack
//! - [`multiline`] - multiline string-delimiter tracker
//! - [`intervals`] - position-ordered interval set (reparse damage)
//! - [`parse`] - parse-oracle trait and structural deltas
//! - [`reparse`] - reparse scheduling and queue draining
//! - [`scopes`] - node-indent cache and scope-row recalculation
//! - [`errors`] - error overlay and line attributes
//! - [`view`] - `SyntaxView` orchestration, `RenderView`, `EngineConfig`

pub mod document;
pub mod errors;
pub mod intervals;
pub mod multiline;
pub mod parse;
pub mod position;
pub mod reparse;
pub mod scopes;
pub mod undo;
pub mod view;

pub use document::{Document, TextChange};
pub use errors::{ErrorHighlight, ErrorOverlay, HighlightError, LineAttribute};
pub use intervals::IntervalSet;
pub use multiline::MultilineTracker;
pub use parse::{
    NodeInfo, NodeKind, NodeId, NodeSpan, ParseError, ParseTree, ReparseRequest, ResizedNode,
    StructuralDelta,
};
pub use position::{PositionBias, PositionHandle};
pub use reparse::ReparseScheduler;
pub use scopes::{NestedScope, ScopeColor, ScopeEngine, ScopeRow};
pub use undo::DocumentUndoStack;
pub use view::{EngineConfig, RenderView, SyntaxView};
