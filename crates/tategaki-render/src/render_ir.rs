use core::f32::consts::FRAC_PI_2;
use core::ops::Range;
use serde::{Deserialize, Serialize};
use tategaki::{CharClass, CharacterStyle, Vec3};

use crate::kerning::GlyphKey;
use crate::render_layout::GlyphRenderer;

/// Rotation applied to [`CharClass::Rotation`] glyphs: -90° about z.
pub const ROTATED: Vec3 = Vec3::new(0.0, 0.0, -FRAC_PI_2);

/// Font face picked from a character's bold/italic flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FontVariant {
    Regular,
    Bold,
    Italic,
    BoldItalic,
}

impl FontVariant {
    /// Bold and italic together win over either flag alone.
    pub fn from_flags(bold: bool, italic: bool) -> Self {
        match (bold, italic) {
            (true, true) => Self::BoldItalic,
            (true, false) => Self::Bold,
            (false, true) => Self::Italic,
            (false, false) => Self::Regular,
        }
    }

    /// Variant for a styled character.
    pub fn for_style(style: &CharacterStyle) -> Self {
        Self::from_flags(style.bold, style.italic)
    }

    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Bold => "bold",
            Self::Italic => "italic",
            Self::BoldItalic => "bold_italic",
        }
    }
}

/// The four font handles a converted text draws from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FontSet {
    pub regular: String,
    pub bold: String,
    pub italic: String,
    pub bold_italic: String,
}

impl FontSet {
    /// Host's built-in font name.
    pub const BUILTIN: &'static str = "Bfont";

    /// Same font for every variant.
    pub fn uniform(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            regular: name.clone(),
            bold: name.clone(),
            italic: name.clone(),
            bold_italic: name,
        }
    }

    /// Font name for `variant`.
    pub fn resolve(&self, variant: FontVariant) -> &str {
        match variant {
            FontVariant::Regular => &self.regular,
            FontVariant::Bold => &self.bold,
            FontVariant::Italic => &self.italic,
            FontVariant::BoldItalic => &self.bold_italic,
        }
    }
}

impl Default for FontSet {
    fn default() -> Self {
        Self::uniform(Self::BUILTIN)
    }
}

/// Stable glyph identifier: the character's index in the flattened body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlyphId(pub usize);

impl core::fmt::Display for GlyphId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Renderer-owned handle for one materialized glyph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlyphHandle(pub u64);

/// Everything the renderer needs to instantiate a glyph.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GlyphRequest<'a> {
    pub id: GlyphId,
    /// Host object name, `chr_{tag}.{id}`.
    pub name: &'a str,
    pub font: &'a str,
    pub variant: FontVariant,
    pub character: char,
    /// `None` means the host's default material.
    pub material: Option<&'a str>,
    pub small_caps: bool,
    /// Curve resolution for vector glyphs.
    pub resolution: u32,
    /// Line container the glyph is parented to.
    pub line_index: usize,
}

/// Glyph transform relative to its line container.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlyphTransform {
    pub line_index: usize,
    pub position: Vec3,
    pub rotation: Vec3,
}

/// One laid-out glyph with everything needed to re-place it without
/// re-materializing or re-measuring.
#[derive(Clone, Debug, PartialEq)]
pub struct LineGlyph {
    pub id: GlyphId,
    pub style: CharacterStyle,
    pub class: CharClass,
    pub variant: FontVariant,
    /// Resolved font name for `variant`.
    pub font: String,
    pub material: Option<String>,
    pub handle: GlyphHandle,
    pub line_index: usize,
    pub column_index: usize,
    /// Upper-right correction measured at placement; zero for other classes.
    pub correction: Vec3,
    /// Position inside the line container.
    pub position: Vec3,
    pub rotation: Vec3,
}

impl LineGlyph {
    /// Cache key for this glyph's kerning hint.
    pub fn key(&self) -> GlyphKey {
        GlyphKey::new(self.font.clone(), self.style.character)
    }

    /// Transform to hand to the renderer.
    pub fn transform(&self) -> GlyphTransform {
        GlyphTransform {
            line_index: self.line_index,
            position: self.position,
            rotation: self.rotation,
        }
    }
}

/// Group of glyphs forming one wrapped line.
#[derive(Clone, Debug, PartialEq)]
pub struct LineContainer {
    pub index: usize,
    /// Primary-axis grid position of the line.
    pub origin: Vec3,
    /// Range into [`VerticalLayout::glyphs`].
    pub glyphs: Range<usize>,
}

/// Resolved render instruction for one character, in text space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlyphPlacement {
    pub id: GlyphId,
    pub character: char,
    pub variant: FontVariant,
    pub material: Option<String>,
    pub position: Vec3,
    pub rotation: Vec3,
    pub line_index: usize,
    pub column_index: usize,
}

/// Derived layout: glyphs in source order plus the line containers that
/// partition them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VerticalLayout {
    pub(crate) glyphs: Vec<LineGlyph>,
    pub(crate) lines: Vec<LineContainer>,
}

impl VerticalLayout {
    pub(crate) fn with_capacity(glyphs: usize, lines: usize) -> Self {
        Self {
            glyphs: Vec::with_capacity(glyphs),
            lines: Vec::with_capacity(lines),
        }
    }

    /// Every glyph in source order.
    pub fn glyphs(&self) -> &[LineGlyph] {
        &self.glyphs
    }

    /// Line containers in line order.
    pub fn lines(&self) -> &[LineContainer] {
        &self.lines
    }

    /// Look up a glyph by id.
    pub fn glyph(&self, id: GlyphId) -> Option<&LineGlyph> {
        self.glyphs.get(id.0).filter(|glyph| glyph.id == id)
    }

    /// Number of glyphs.
    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    /// Whether no glyphs were laid out.
    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    /// Text-space placements, line origin plus in-line position.
    pub fn placements(&self) -> Vec<GlyphPlacement> {
        let mut out = Vec::with_capacity(self.glyphs.len());
        for line in &self.lines {
            for glyph in &self.glyphs[line.glyphs.clone()] {
                out.push(GlyphPlacement {
                    id: glyph.id,
                    character: glyph.style.character,
                    variant: glyph.variant,
                    material: glyph.material.clone(),
                    position: line.origin + glyph.position,
                    rotation: glyph.rotation,
                    line_index: glyph.line_index,
                    column_index: glyph.column_index,
                });
            }
        }
        out
    }

    /// Release every materialized glyph; returns how many were released.
    pub(crate) fn release_all(&self, renderer: &mut dyn GlyphRenderer) -> usize {
        for glyph in &self.glyphs {
            renderer.release(glyph.handle);
        }
        self.glyphs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tategaki::CharFormat;

    fn glyph(id: usize, ch: char, line_index: usize, column_index: usize) -> LineGlyph {
        LineGlyph {
            id: GlyphId(id),
            style: CharacterStyle::new(ch, CharFormat::default()),
            class: CharClass::Normal,
            variant: FontVariant::Regular,
            font: FontSet::BUILTIN.to_string(),
            material: None,
            handle: GlyphHandle(id as u64),
            line_index,
            column_index,
            correction: Vec3::ZERO,
            position: Vec3::new(0.0, -(column_index as f32), 0.0),
            rotation: Vec3::ZERO,
        }
    }

    #[test]
    fn bold_italic_takes_precedence() {
        assert_eq!(FontVariant::from_flags(true, true), FontVariant::BoldItalic);
        assert_eq!(FontVariant::from_flags(true, false), FontVariant::Bold);
        assert_eq!(FontVariant::from_flags(false, true), FontVariant::Italic);
        assert_eq!(FontVariant::from_flags(false, false), FontVariant::Regular);
    }

    #[test]
    fn font_set_resolves_each_variant() {
        let fonts = FontSet {
            regular: "r".into(),
            bold: "b".into(),
            italic: "i".into(),
            bold_italic: "bi".into(),
        };
        assert_eq!(fonts.resolve(FontVariant::Regular), "r");
        assert_eq!(fonts.resolve(FontVariant::Bold), "b");
        assert_eq!(fonts.resolve(FontVariant::Italic), "i");
        assert_eq!(fonts.resolve(FontVariant::BoldItalic), "bi");
    }

    #[test]
    fn placements_add_line_origin() {
        let layout = VerticalLayout {
            glyphs: vec![glyph(0, 'あ', 0, 0), glyph(1, 'い', 1, 0), glyph(2, 'う', 1, 1)],
            lines: vec![
                LineContainer {
                    index: 0,
                    origin: Vec3::ZERO,
                    glyphs: 0..1,
                },
                LineContainer {
                    index: 1,
                    origin: Vec3::new(-2.0, 0.0, 0.0),
                    glyphs: 1..3,
                },
            ],
        };
        let placements = layout.placements();
        assert_eq!(placements.len(), 3);
        assert_eq!(placements[2].position, Vec3::new(-2.0, -1.0, 0.0));
        assert_eq!(placements[2].line_index, 1);
        assert_eq!(placements[2].column_index, 1);
        assert_eq!(
            layout.glyph(GlyphId(1)).map(|g| g.style.character),
            Some('い')
        );
    }
}
