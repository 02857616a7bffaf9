use serde::{Deserialize, Serialize};
use tategaki::{
    grid_to_position, punctuation_offset, CharClass, CharacterStyle, GlyphBounds, LayoutLine,
    TextPrepError, Vec3,
};

use crate::kerning::{apply_auto_kerning, measure_glyph, KerningHint, KerningHintCache};
use crate::render_engine::LayoutState;
use crate::render_ir::{
    FontVariant, GlyphHandle, GlyphId, GlyphRequest, GlyphTransform, LineContainer, LineGlyph,
    VerticalLayout, ROTATED,
};

/// Host hook that turns layout decisions into drawable glyphs.
///
/// Calls happen synchronously and in line/column order. Glyph transforms
/// are relative to the glyph's line container; containers are positioned
/// with [`place_line`](Self::place_line).
pub trait GlyphRenderer {
    /// Instantiate a drawable glyph.
    fn materialize(&mut self, request: &GlyphRequest<'_>) -> Result<GlyphHandle, RendererError>;

    /// Move/rotate a glyph inside its line container.
    fn set_transform(
        &mut self,
        handle: GlyphHandle,
        transform: GlyphTransform,
    ) -> Result<(), RendererError>;

    /// Local bounding box of a glyph with its current rotation applied,
    /// translation excluded.
    fn measure(&mut self, handle: GlyphHandle) -> Result<GlyphBounds, RendererError>;

    /// Position the container for line `line_index`.
    ///
    /// Default does nothing, for hosts that flatten lines into glyph space.
    fn place_line(&mut self, _line_index: usize, _origin: Vec3) -> Result<(), RendererError> {
        Ok(())
    }

    /// Destroy a glyph that is no longer part of any layout.
    fn release(&mut self, _handle: GlyphHandle) {}
}

/// Failure reported by a [`GlyphRenderer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RendererError {
    message: Box<str>,
}

impl RendererError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into().into_boxed_str(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl core::fmt::Display for RendererError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RendererError {}

/// Spacing and wrapping parameters exposed to the host UI.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Distance between line containers along -x.
    pub line_spacing: f32,
    /// Grid step along -y, or the margin between glyphs when auto-kerning.
    pub chr_spacing: f32,
    /// Pack glyphs by measured extent instead of a fixed grid step.
    pub auto_kerning: bool,
    /// Hard wrap limit in characters per line.
    pub limit_length: usize,
    /// Curve resolution passed to the renderer.
    pub resolution: u32,
    /// Top extent used for blanks when auto-kerning.
    pub blank_size: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            line_spacing: 1.2,
            chr_spacing: 1.0,
            auto_kerning: false,
            limit_length: 40,
            resolution: 12,
            blank_size: 0.5,
        }
    }
}

impl LayoutConfig {
    /// Reject configurations the engine cannot lay out.
    ///
    /// Negative spacing is allowed and mirrors the layout.
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.limit_length < 1 {
            return Err(LayoutError::InvalidConfiguration {
                field: "limit_length",
                reason: format!("must be at least 1 (got {})", self.limit_length),
            });
        }
        if self.resolution < 1 {
            return Err(LayoutError::InvalidConfiguration {
                field: "resolution",
                reason: format!("must be at least 1 (got {})", self.resolution),
            });
        }
        for (field, value) in [
            ("line_spacing", self.line_spacing),
            ("chr_spacing", self.chr_spacing),
            ("blank_size", self.blank_size),
        ] {
            if !value.is_finite() {
                return Err(LayoutError::InvalidConfiguration {
                    field,
                    reason: format!("must be finite (got {})", value),
                });
            }
        }
        Ok(())
    }
}

/// Layout failure. A failed call never leaves a partial layout behind.
#[derive(Clone, Debug, PartialEq)]
pub enum LayoutError {
    /// Line and style-run lengths disagree.
    StyleMismatch(TextPrepError),
    /// A style references a material slot that does not exist.
    MaterialIndexOutOfRange { index: usize, available: usize },
    /// The renderer could not measure a glyph.
    MeasurementUnavailable {
        character: char,
        font: String,
        reason: String,
    },
    /// Rejected before any state was touched.
    InvalidConfiguration { field: &'static str, reason: String },
    /// Materialization or transform failed on the host side.
    Renderer(RendererError),
}

impl core::fmt::Display for LayoutError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::StyleMismatch(err) => write!(f, "{}", err),
            Self::MaterialIndexOutOfRange { index, available } => write!(
                f,
                "material index {} out of range ({} materials)",
                index, available
            ),
            Self::MeasurementUnavailable {
                character,
                font,
                reason,
            } => write!(
                f,
                "cannot measure {:?} in font {}: {}",
                character, font, reason
            ),
            Self::InvalidConfiguration { field, reason } => {
                write!(f, "invalid {}: {}", field, reason)
            }
            Self::Renderer(err) => write!(f, "renderer failed: {}", err),
        }
    }
}

impl std::error::Error for LayoutError {}

impl From<TextPrepError> for LayoutError {
    fn from(err: TextPrepError) -> Self {
        match err {
            TextPrepError::InvalidLimit { limit } => Self::InvalidConfiguration {
                field: "limit_length",
                reason: format!("must be at least 1 (got {})", limit),
            },
            other => Self::StyleMismatch(other),
        }
    }
}

impl From<RendererError> for LayoutError {
    fn from(err: RendererError) -> Self {
        Self::Renderer(err)
    }
}

/// Host object name for a glyph.
pub fn glyph_name(tag: &str, id: GlyphId) -> String {
    format!("chr_{}.{}", tag, id)
}

/// Layout passes over one [`LayoutState`].
///
/// Each pass reads the state and writes into a caller-owned
/// [`VerticalLayout`]; nothing here touches the live state.
#[derive(Clone, Copy, Debug)]
pub struct LayoutEngine<'a> {
    state: &'a LayoutState,
}

impl<'a> LayoutEngine<'a> {
    pub fn new(state: &'a LayoutState) -> Self {
        Self { state }
    }

    fn cfg(&self) -> LayoutConfig {
        *self.state.config()
    }

    /// Full layout of the state's wrapped lines.
    ///
    /// Materializes every glyph, applies its nominal transform, measures
    /// upper-right punctuation and finally spaces each line. On error every
    /// glyph created by this call is released.
    pub fn build(
        &self,
        hints: &mut KerningHintCache,
        renderer: &mut dyn GlyphRenderer,
    ) -> Result<VerticalLayout, LayoutError> {
        let lines = self.state.wrapped_lines();
        let mut layout =
            VerticalLayout::with_capacity(lines.iter().map(LayoutLine::len).sum(), lines.len());
        let built = self
            .materialize_lines(lines, &mut layout, hints, renderer)
            .and_then(|()| self.respace(&mut layout, hints, renderer));
        if let Err(err) = built {
            let released = layout.release_all(renderer);
            log::warn!(
                "layout of {} failed, released {} glyphs: {}",
                self.state.tag(),
                released,
                err
            );
            return Err(err);
        }
        self.place_lines(&mut layout);
        Ok(layout)
    }

    fn materialize_lines(
        &self,
        lines: &[LayoutLine],
        layout: &mut VerticalLayout,
        hints: &mut KerningHintCache,
        renderer: &mut dyn GlyphRenderer,
    ) -> Result<(), LayoutError> {
        for (line_index, line) in lines.iter().enumerate() {
            let first = layout.glyphs.len();
            for (column_index, style) in line.chars.iter().enumerate() {
                let id = GlyphId(line.start + column_index);
                let glyph =
                    self.materialize_glyph(id, line_index, column_index, style, hints, renderer)?;
                layout.glyphs.push(glyph);
            }
            layout.lines.push(LineContainer {
                index: line_index,
                origin: Vec3::ZERO,
                glyphs: first..layout.glyphs.len(),
            });
        }
        Ok(())
    }

    fn materialize_glyph(
        &self,
        id: GlyphId,
        line_index: usize,
        column_index: usize,
        style: &CharacterStyle,
        hints: &mut KerningHintCache,
        renderer: &mut dyn GlyphRenderer,
    ) -> Result<LineGlyph, LayoutError> {
        let cfg = self.cfg();
        let class = self.state.classifier().classify(style.character);
        let variant = FontVariant::for_style(style);
        let font = self.state.fonts().resolve(variant);
        let material = self.resolve_material(style.material_index)?;
        let name = glyph_name(self.state.tag(), id);

        let handle = renderer.materialize(&GlyphRequest {
            id,
            name: &name,
            font,
            variant,
            character: style.character,
            material,
            small_caps: style.small_caps,
            resolution: cfg.resolution,
            line_index,
        })?;

        let (_, nominal_y) =
            grid_to_position(cfg.line_spacing, cfg.chr_spacing, line_index, column_index);
        let mut glyph = LineGlyph {
            id,
            style: *style,
            class,
            variant,
            font: font.to_string(),
            material: material.map(str::to_string),
            handle,
            line_index,
            column_index,
            correction: Vec3::ZERO,
            position: Vec3::new(0.0, nominal_y, 0.0),
            rotation: if class.is_rotated() {
                ROTATED
            } else {
                Vec3::ZERO
            },
        };

        // Nominal placement first; upper-right punctuation is measured in
        // place and corrected afterwards.
        let placed = renderer
            .set_transform(handle, glyph.transform())
            .map_err(LayoutError::from)
            .and_then(|()| {
                if class == CharClass::UpperRight {
                    let bounds = measure_glyph(&glyph, renderer)?;
                    glyph.correction = punctuation_offset(bounds.center());
                    hints.insert_if_absent(glyph.key(), KerningHint::from(bounds));
                }
                Ok(())
            });
        if let Err(err) = placed {
            renderer.release(handle);
            return Err(err);
        }
        Ok(glyph)
    }

    fn resolve_material(&self, index: usize) -> Result<Option<&'a str>, LayoutError> {
        let materials = self.state.materials();
        if materials.is_empty() && index == 0 {
            return Ok(None);
        }
        materials
            .get(index)
            .map(|name| Some(name.as_str()))
            .ok_or(LayoutError::MaterialIndexOutOfRange {
                index,
                available: materials.len(),
            })
    }

    /// Position every line container on the primary axis.
    pub fn place_lines(&self, layout: &mut VerticalLayout) {
        let cfg = self.cfg();
        for line in &mut layout.lines {
            let (x, _) = grid_to_position(cfg.line_spacing, cfg.chr_spacing, line.index, 0);
            line.origin = Vec3::new(x, 0.0, 0.0);
        }
    }

    /// Regroup existing glyphs into the state's current wrapped lines.
    ///
    /// Glyphs keep their handles and measurements; only grid addresses and
    /// container ranges change. Wrapping preserves source order, so each
    /// line is a contiguous run of the flat glyph list.
    pub fn reassign_lines(&self, layout: &mut VerticalLayout) {
        let lines = self.state.wrapped_lines();
        layout.lines.clear();
        for (line_index, line) in lines.iter().enumerate() {
            let range = line.source_range();
            for (column_index, glyph) in layout.glyphs[range.clone()].iter_mut().enumerate() {
                glyph.line_index = line_index;
                glyph.column_index = column_index;
            }
            layout.lines.push(LineContainer {
                index: line_index,
                origin: Vec3::ZERO,
                glyphs: range,
            });
        }
    }

    /// Recompute every glyph's in-line position.
    ///
    /// Constant spacing uses the grid step plus the upper-right correction.
    /// Auto-kerning replaces the y coordinate with the packed position.
    pub fn respace(
        &self,
        layout: &mut VerticalLayout,
        hints: &mut KerningHintCache,
        renderer: &mut dyn GlyphRenderer,
    ) -> Result<(), LayoutError> {
        let cfg = self.cfg();
        for line in &layout.lines {
            let glyphs = &mut layout.glyphs[line.glyphs.clone()];
            for glyph in glyphs.iter_mut() {
                let (_, y) = grid_to_position(
                    cfg.line_spacing,
                    cfg.chr_spacing,
                    glyph.line_index,
                    glyph.column_index,
                );
                glyph.position = Vec3::new(0.0, y, 0.0) + glyph.correction;
            }
            if cfg.auto_kerning {
                apply_auto_kerning(glyphs, cfg.chr_spacing, cfg.blank_size, hints, renderer)?;
            }
        }
        Ok(())
    }

    /// Push line container positions to the renderer.
    pub fn commit_lines(
        &self,
        layout: &VerticalLayout,
        renderer: &mut dyn GlyphRenderer,
    ) -> Result<(), LayoutError> {
        for line in &layout.lines {
            renderer.place_line(line.index, line.origin)?;
        }
        Ok(())
    }

    /// Push every glyph transform to the renderer.
    pub fn commit_glyphs(
        &self,
        layout: &VerticalLayout,
        renderer: &mut dyn GlyphRenderer,
    ) -> Result<(), LayoutError> {
        for glyph in &layout.glyphs {
            renderer.set_transform(glyph.handle, glyph.transform())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(LayoutConfig::default().validate(), Ok(()));
    }

    #[test]
    fn zero_limit_is_rejected() {
        let cfg = LayoutConfig {
            limit_length: 0,
            ..LayoutConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(LayoutError::InvalidConfiguration {
                field: "limit_length",
                ..
            })
        ));
    }

    #[test]
    fn negative_spacing_is_permitted_but_nan_is_not() {
        let mirrored = LayoutConfig {
            line_spacing: -1.0,
            chr_spacing: -0.5,
            ..LayoutConfig::default()
        };
        assert_eq!(mirrored.validate(), Ok(()));

        let broken = LayoutConfig {
            blank_size: f32::NAN,
            ..LayoutConfig::default()
        };
        assert!(matches!(
            broken.validate(),
            Err(LayoutError::InvalidConfiguration {
                field: "blank_size",
                ..
            })
        ));
    }

    #[test]
    fn text_prep_errors_map_to_layout_kinds() {
        let mismatch = TextPrepError::StyleMismatch {
            line: 1,
            characters: 2,
            styles: 3,
        };
        assert_eq!(
            LayoutError::from(mismatch.clone()),
            LayoutError::StyleMismatch(mismatch)
        );
        assert!(matches!(
            LayoutError::from(TextPrepError::InvalidLimit { limit: 0 }),
            LayoutError::InvalidConfiguration { .. }
        ));
    }

    #[test]
    fn glyph_names_use_tag_and_id() {
        assert_eq!(glyph_name("Ab3xYz90", GlyphId(12)), "chr_Ab3xYz90.12");
    }
}
