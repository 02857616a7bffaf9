//! Vertical (tategaki) text preparation.
//!
//! This crate holds the renderer-independent half of the vertical layout
//! pipeline:
//!
//! - [`classify`]: which adjustment a character needs when set top-to-bottom
//! - [`grid`]: grid addresses to coordinates, bounding-box derived offsets
//! - [`text_prep`]: source text plus per-character formats to wrapped lines
//!
//! Glyph materialization, measurement, auto-kerning and layout state live in
//! the `tategaki-render` crate.
//!
//! # Usage
//!
//! ```rust
//! use tategaki::{classify, grid_to_position, split_lines, wrap_lines, CharClass, SourceText};
//!
//! # fn example() -> Result<(), tategaki::TextPrepError> {
//! let source = SourceText::plain("「あいうえお。」");
//! let lines = split_lines(&source)?;
//! let wrapped = wrap_lines(&lines, 4)?;
//! assert_eq!(wrapped.len(), 2);
//!
//! assert_eq!(classify('。'), CharClass::UpperRight);
//! assert_eq!(grid_to_position(1.0, 0.5, 2, 3), (-2.0, -1.5));
//! # Ok(())
//! # }
//! ```

#![cfg_attr(
    not(test),
    deny(
        clippy::disallowed_methods,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::panic_in_result_fn,
        clippy::todo,
        clippy::unimplemented
    )
)]

pub mod classify;
pub mod grid;
pub mod text_prep;

pub use classify::{classify, CharClass, CharClassifier};
pub use grid::{grid_to_position, punctuation_offset, GlyphBounds, Vec3};
pub use text_prep::{
    split_lines, unique_characters, wrap_lines, CharFormat, CharacterStyle, LayoutLine,
    SourceText, TextPrepError,
};
