//! Measured glyph extents and the auto-kerning sweep.
//!
//! Measuring a glyph means asking the host to materialize and evaluate it,
//! so extents are cached per glyph identity (font + character) for the life
//! of one layout state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tategaki::{CharClass, CharClassifier, GlyphBounds};

use crate::render_ir::LineGlyph;
use crate::render_layout::{GlyphRenderer, LayoutError};

/// Glyph extent along the line direction, in its final orientation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct KerningHint {
    pub max: f32,
    pub min: f32,
}

impl From<GlyphBounds> for KerningHint {
    fn from(bounds: GlyphBounds) -> Self {
        Self {
            max: bounds.max.y,
            min: bounds.min.y,
        }
    }
}

/// Glyph identity used as the cache key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlyphKey {
    pub font: String,
    pub character: char,
}

impl GlyphKey {
    pub fn new(font: impl Into<String>, character: char) -> Self {
        Self {
            font: font.into(),
            character,
        }
    }
}

/// Lookup counters since the cache was created or last reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KerningCacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Per-state cache of measured kerning hints.
///
/// A hint is measured at most once per glyph identity until the cache is
/// invalidated. The cache must not be shared between states with different
/// font sets: keys carry font names, not font contents.
#[derive(Clone, Debug, Default)]
pub struct KerningHintCache {
    hints: BTreeMap<GlyphKey, KerningHint>,
    stats: KerningCacheStats,
}

impl PartialEq for KerningHintCache {
    fn eq(&self, other: &Self) -> bool {
        self.hints == other.hints
    }
}

impl KerningHintCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached identities.
    pub fn len(&self) -> usize {
        self.hints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }

    /// Cached hint for `key`, if measured.
    pub fn get(&self, key: &GlyphKey) -> Option<KerningHint> {
        self.hints.get(key).copied()
    }

    /// Insert a hint only when the identity is not cached yet.
    pub fn insert_if_absent(&mut self, key: GlyphKey, hint: KerningHint) {
        self.hints.entry(key).or_insert(hint);
    }

    /// Drop every cached hint.
    pub fn invalidate(&mut self) {
        self.hints.clear();
    }

    /// Drop hints measured with `font`; returns how many were removed.
    pub fn invalidate_font(&mut self, font: &str) -> usize {
        let before = self.hints.len();
        self.hints.retain(|key, _| key.font != font);
        before - self.hints.len()
    }

    /// Drop hints of characters that `next` classifies differently from
    /// `previous`; their measurements were taken in the old orientation.
    pub fn invalidate_reclassified(
        &mut self,
        previous: &CharClassifier,
        next: &CharClassifier,
    ) -> usize {
        let before = self.hints.len();
        self.hints
            .retain(|key, _| previous.classify(key.character) == next.classify(key.character));
        before - self.hints.len()
    }

    /// Cached entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&GlyphKey, &KerningHint)> {
        self.hints.iter()
    }

    /// Hit/miss counters.
    pub fn stats(&self) -> KerningCacheStats {
        self.stats
    }

    /// Hint for a placed glyph, measuring it through `renderer` on a miss.
    ///
    /// The glyph must already carry its final rotation on the renderer side.
    pub fn hint_for(
        &mut self,
        glyph: &LineGlyph,
        renderer: &mut dyn GlyphRenderer,
    ) -> Result<KerningHint, LayoutError> {
        let key = glyph.key();
        if let Some(hint) = self.hints.get(&key) {
            self.stats.hits += 1;
            return Ok(*hint);
        }
        self.stats.misses += 1;
        log::trace!(
            "kerning hint miss for {:?} ({})",
            key.character,
            key.font
        );
        let hint = KerningHint::from(measure_glyph(glyph, renderer)?);
        self.hints.insert(key, hint);
        Ok(hint)
    }
}

impl FromIterator<(GlyphKey, KerningHint)> for KerningHintCache {
    fn from_iter<I: IntoIterator<Item = (GlyphKey, KerningHint)>>(iter: I) -> Self {
        Self {
            hints: iter.into_iter().collect(),
            stats: KerningCacheStats::default(),
        }
    }
}

/// Measure a placed glyph, rejecting missing or non-finite boxes.
pub(crate) fn measure_glyph(
    glyph: &LineGlyph,
    renderer: &mut dyn GlyphRenderer,
) -> Result<GlyphBounds, LayoutError> {
    let unavailable = |reason: String| LayoutError::MeasurementUnavailable {
        character: glyph.style.character,
        font: glyph.font.clone(),
        reason,
    };
    let bounds = renderer
        .measure(glyph.handle)
        .map_err(|err| unavailable(err.to_string()))?;
    let corners = [
        bounds.min.x,
        bounds.min.y,
        bounds.min.z,
        bounds.max.x,
        bounds.max.y,
        bounds.max.z,
    ];
    if corners.iter().any(|v| !v.is_finite()) {
        return Err(unavailable("renderer returned a non-finite box".to_string()));
    }
    Ok(bounds)
}

/// Pack one line using measured extents.
///
/// Single forward sweep carrying `forward_bottom`, the trailing edge of the
/// previous glyph. Each glyph's top sits `chr_spacing` below that edge (no
/// margin before the first glyph); blanks use `blank_size` as their top
/// extent. Only the y coordinate is written.
pub fn apply_auto_kerning(
    line: &mut [LineGlyph],
    chr_spacing: f32,
    blank_size: f32,
    cache: &mut KerningHintCache,
    renderer: &mut dyn GlyphRenderer,
) -> Result<(), LayoutError> {
    let mut forward_bottom = 0.0f32;
    for (column, glyph) in line.iter_mut().enumerate() {
        let hint = cache.hint_for(glyph, renderer)?;
        let top_extent = if glyph.class == CharClass::Blank {
            blank_size
        } else {
            hint.max
        };
        let mut y = forward_bottom - top_extent;
        if column > 0 {
            y -= chr_spacing;
        }
        glyph.position.y = y;
        forward_bottom = hint.min + y;
    }
    Ok(())
}
