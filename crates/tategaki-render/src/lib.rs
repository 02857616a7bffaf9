//! Glyph layout, auto-kerning, and state reconciliation for `tategaki`.
//!
//! A host implements [`GlyphRenderer`] to create, move and measure glyph
//! objects. [`TategakiEngine`] owns one converted text and keeps the
//! host's glyphs in sync with its [`LayoutState`]:
//!
//! ```rust
//! use tategaki::{GlyphBounds, SourceText, Vec3};
//! use tategaki_render::{
//!     GlyphHandle, GlyphRenderer, GlyphRequest, GlyphTransform, LayoutConfig, LayoutState,
//!     ReconcilePath, RendererError, TategakiEngine,
//! };
//!
//! #[derive(Default)]
//! struct UnitGlyphs {
//!     next: u64,
//! }
//!
//! impl GlyphRenderer for UnitGlyphs {
//!     fn materialize(&mut self, _: &GlyphRequest<'_>) -> Result<GlyphHandle, RendererError> {
//!         self.next += 1;
//!         Ok(GlyphHandle(self.next))
//!     }
//!
//!     fn set_transform(&mut self, _: GlyphHandle, _: GlyphTransform) -> Result<(), RendererError> {
//!         Ok(())
//!     }
//!
//!     fn measure(&mut self, _: GlyphHandle) -> Result<GlyphBounds, RendererError> {
//!         Ok(GlyphBounds::new(Vec3::new(-0.5, -0.5, 0.0), Vec3::new(0.5, 0.5, 0.0)))
//!     }
//! }
//!
//! # fn example() -> Result<(), tategaki_render::LayoutError> {
//! let mut renderer = UnitGlyphs::default();
//! let state = LayoutState::new("tatetext", SourceText::plain("あいう"), LayoutConfig::default())?;
//! let mut engine = TategakiEngine::convert(state, &mut renderer)?;
//! assert_eq!(engine.placements().len(), 3);
//!
//! let path = engine.set_line_spacing(2.0, &mut renderer)?;
//! assert_eq!(path, ReconcilePath::LinePositions);
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

mod kerning;
mod render_engine;
mod render_ir;
mod render_layout;

pub use kerning::{apply_auto_kerning, GlyphKey, KerningCacheStats, KerningHint, KerningHintCache};
pub use render_engine::{
    FileLayoutStateStore, LayoutDiagnostic, LayoutState, LayoutStateStore, PersistError,
    PersistedKerningHint, PersistedLayoutState, ReconcilePath, TategakiEngine,
};
pub use render_ir::{
    FontSet, FontVariant, GlyphHandle, GlyphId, GlyphPlacement, GlyphRequest, GlyphTransform,
    LineContainer, LineGlyph, VerticalLayout, ROTATED,
};
pub use render_layout::{
    glyph_name, GlyphRenderer, LayoutConfig, LayoutEngine, LayoutError, RendererError,
};
