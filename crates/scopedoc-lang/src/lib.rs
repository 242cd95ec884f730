#![warn(missing_docs)]
//! `scopedoc-lang` - reference collaborators for `scopedoc-core`.
//!
//! The core engine is deliberately headless and parser-agnostic: it needs a
//! structural oracle ([`scopedoc_core::ParseTree`]) and a measurement source
//! ([`scopedoc_core::RenderView`]) plugged into it. This crate provides a
//! working pair of both:
//!
//! - [`BlockOutline`], a brace-block oracle for curly-brace languages. It is
//!   a heuristic outliner, not a compiler front end: it nests on `{`/`}`,
//!   skips string literals and comments, and classifies blocks by their
//!   declaration's leading keyword.
//! - [`FixedWidthView`], a render view that measures text on a fixed-width
//!   grid using Unicode column widths, with controllable line visibility.
//!
//! Together they make the full pipeline runnable without a GUI, which is how
//! the integration tests exercise it.

pub mod measure;
pub mod outline;

pub use measure::FixedWidthView;
pub use outline::BlockOutline;
