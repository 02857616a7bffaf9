use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tategaki::{
    split_lines, unique_characters, wrap_lines, CharClassifier, LayoutLine, SourceText,
};

use crate::kerning::{GlyphKey, KerningCacheStats, KerningHint, KerningHintCache};
use crate::render_ir::{FontSet, GlyphId, GlyphPlacement, VerticalLayout};
use crate::render_layout::{glyph_name, GlyphRenderer, LayoutConfig, LayoutEngine, LayoutError};

const TAG_LEN: usize = 8;
const TAG_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
static TAG_NONCE: AtomicUsize = AtomicUsize::new(0);

fn fnv64(seed: u64, payload: &[u8]) -> u64 {
    let mut hash = seed;
    for b in payload {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Short alphanumeric tag naming one converted text and its glyphs.
fn generate_tag(seed: &str) -> String {
    let nonce = TAG_NONCE.fetch_add(1, Ordering::Relaxed);
    let mut hash = fnv64(0xcbf29ce484222325, seed.as_bytes());
    hash = fnv64(hash, &nonce.to_le_bytes());
    hash = fnv64(hash, &std::process::id().to_le_bytes());
    let radix = TAG_ALPHABET.len() as u64;
    (0..TAG_LEN)
        .map(|_| {
            let ch = TAG_ALPHABET[(hash % radix) as usize] as char;
            hash /= radix;
            ch
        })
        .collect()
}

/// Configuration and derived line structure for one converted text.
///
/// Fields are private so that the pre- and post-wrap lines always match the
/// source and configuration; every `with_*` setter validates before it
/// returns a new value. Snapshots are plain clones, so editing one never
/// affects an engine until it is handed back through
/// [`TategakiEngine::set_state`].
#[derive(Clone, Debug, PartialEq)]
pub struct LayoutState {
    tag: String,
    name: String,
    source: SourceText,
    lines: Vec<LayoutLine>,
    wrapped: Vec<LayoutLine>,
    config: LayoutConfig,
    materials: Vec<String>,
    fonts: FontSet,
    classifier: CharClassifier,
    kerning_hints: KerningHintCache,
}

impl LayoutState {
    /// Validate `source` and `config` and derive the line structure.
    pub fn new(
        name: impl Into<String>,
        source: SourceText,
        config: LayoutConfig,
    ) -> Result<Self, LayoutError> {
        config.validate()?;
        let lines = split_lines(&source)?;
        let wrapped = wrap_lines(&lines, config.limit_length)?;
        Ok(Self {
            tag: generate_tag(source.body()),
            name: name.into(),
            source,
            lines,
            wrapped,
            config,
            materials: Vec::new(),
            fonts: FontSet::default(),
            classifier: CharClassifier::default(),
            kerning_hints: KerningHintCache::new(),
        })
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace body text and styles.
    pub fn with_source(mut self, source: SourceText) -> Result<Self, LayoutError> {
        let lines = split_lines(&source)?;
        let wrapped = wrap_lines(&lines, self.config.limit_length)?;
        self.source = source;
        self.lines = lines;
        self.wrapped = wrapped;
        Ok(self)
    }

    /// Replace spacing/wrapping parameters, re-wrapping when the limit moves.
    pub fn with_config(mut self, config: LayoutConfig) -> Result<Self, LayoutError> {
        config.validate()?;
        if config.limit_length != self.config.limit_length {
            self.wrapped = wrap_lines(&self.lines, config.limit_length)?;
        }
        self.config = config;
        Ok(self)
    }

    pub fn with_materials(mut self, materials: Vec<String>) -> Self {
        self.materials = materials;
        self
    }

    pub fn with_fonts(mut self, fonts: FontSet) -> Self {
        self.fonts = fonts;
        self
    }

    /// Replace the classification table, dropping kerning hints of every
    /// character whose class changes.
    pub fn with_classifier(mut self, classifier: CharClassifier) -> Self {
        self.kerning_hints.invalidate_reclassified(&self.classifier, &classifier);
        self.classifier = classifier;
        self
    }

    pub fn with_kerning_hints(mut self, hints: KerningHintCache) -> Self {
        self.kerning_hints = hints;
        self
    }

    /// Same state with an empty kerning cache.
    pub fn without_kerning_hints(self) -> Self {
        self.with_kerning_hints(KerningHintCache::new())
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &SourceText {
        &self.source
    }

    /// Lines split at explicit breaks, before wrapping.
    pub fn lines(&self) -> &[LayoutLine] {
        &self.lines
    }

    /// Lines after the character-limit wrap.
    pub fn wrapped_lines(&self) -> &[LayoutLine] {
        &self.wrapped
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    pub fn materials(&self) -> &[String] {
        &self.materials
    }

    pub fn fonts(&self) -> &FontSet {
        &self.fonts
    }

    pub fn classifier(&self) -> &CharClassifier {
        &self.classifier
    }

    pub fn kerning_hints(&self) -> &KerningHintCache {
        &self.kerning_hints
    }

    /// Host object name of glyph `id`.
    pub fn glyph_name(&self, id: GlyphId) -> String {
        glyph_name(&self.tag, id)
    }

    /// Serializable snapshot for host persistence.
    pub fn export_state(&self) -> PersistedLayoutState {
        PersistedLayoutState {
            version: STATE_SCHEMA_VERSION,
            tag: self.tag.clone(),
            name: self.name.clone(),
            source: self.source.clone(),
            config: self.config,
            materials: self.materials.clone(),
            fonts: self.fonts.clone(),
            classifier: self.classifier.clone(),
            kerning_hints: self
                .kerning_hints
                .iter()
                .map(|(key, hint)| PersistedKerningHint {
                    font: key.font.clone(),
                    character: key.character,
                    max: hint.max,
                    min: hint.min,
                })
                .collect(),
        }
    }

    /// Rebuild a state from a persisted snapshot, re-validating it.
    pub fn import_state(blob: PersistedLayoutState) -> Result<Self, PersistError> {
        if blob.version != STATE_SCHEMA_VERSION {
            return Err(PersistError::UnsupportedVersion {
                found: blob.version,
            });
        }
        let hints = blob
            .kerning_hints
            .into_iter()
            .map(|entry| {
                (
                    GlyphKey::new(entry.font, entry.character),
                    KerningHint {
                        max: entry.max,
                        min: entry.min,
                    },
                )
            })
            .collect();
        let state = Self::new(blob.name, blob.source, blob.config)?
            .with_tag(blob.tag)
            .with_materials(blob.materials)
            .with_fonts(blob.fonts)
            .with_classifier(blob.classifier)
            .with_kerning_hints(hints);
        Ok(state)
    }
}

/// Smallest re-layout that brings the glyphs in line with a new state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReconcilePath {
    /// Bookkeeping only (name, tag, or a setting with no visible effect).
    Unchanged,
    /// Line containers move; glyphs stay put inside them.
    LinePositions,
    /// In-line positions are recomputed.
    Spacing,
    /// Both of the above.
    LinePositionsAndSpacing,
    /// Glyphs are regrouped into new lines, then re-placed.
    Rewrap,
    /// Everything is re-materialized and re-measured. A new tag also lands
    /// here, since glyph names are derived from it.
    Full,
}

impl ReconcilePath {
    /// Classify the delta between two states.
    pub fn between(current: &LayoutState, next: &LayoutState) -> Self {
        let (old, new) = (&current.config, &next.config);
        if current.tag != next.tag
            || current.source != next.source
            || current.fonts != next.fonts
            || current.materials != next.materials
            || current.classifier != next.classifier
            || old.resolution != new.resolution
        {
            return Self::Full;
        }
        if current.wrapped != next.wrapped {
            return Self::Rewrap;
        }

        let lines = old.line_spacing != new.line_spacing;
        let spacing = old.chr_spacing != new.chr_spacing
            || old.auto_kerning != new.auto_kerning
            || (new.auto_kerning
                && (old.blank_size != new.blank_size
                    || current.kerning_hints != next.kerning_hints));
        match (lines, spacing) {
            (false, false) => Self::Unchanged,
            (true, false) => Self::LinePositions,
            (false, true) => Self::Spacing,
            (true, true) => Self::LinePositionsAndSpacing,
        }
    }

    fn touches_lines(self) -> bool {
        matches!(
            self,
            Self::LinePositions | Self::LinePositionsAndSpacing | Self::Rewrap | Self::Full
        )
    }

    fn touches_spacing(self) -> bool {
        matches!(
            self,
            Self::Spacing | Self::LinePositionsAndSpacing | Self::Rewrap | Self::Full
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::LinePositions => "line_positions",
            Self::Spacing => "spacing",
            Self::LinePositionsAndSpacing => "line_positions_and_spacing",
            Self::Rewrap => "rewrap",
            Self::Full => "full",
        }
    }
}

/// Runtime diagnostics from layout and reconcile calls.
#[derive(Clone, Debug, PartialEq)]
pub enum LayoutDiagnostic {
    ReflowTimeMs(u32),
    Reconciled(ReconcilePath),
    /// Kerning cache lookups made by the call.
    KerningCache {
        hits: u64,
        misses: u64,
    },
}

type DiagnosticSink = Option<Box<dyn FnMut(LayoutDiagnostic)>>;

/// Owner of one converted text: its state and the glyphs laid out from it.
///
/// Every operation computes into copies and swaps them in only after the
/// renderer accepted the result, so a failed call leaves the previous
/// state and layout in place.
pub struct TategakiEngine {
    state: LayoutState,
    layout: VerticalLayout,
    diagnostics: DiagnosticSink,
}

impl fmt::Debug for TategakiEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TategakiEngine")
            .field("state", &self.state)
            .field("glyphs", &self.layout.len())
            .field("has_diagnostics", &self.diagnostics.is_some())
            .finish()
    }
}

impl TategakiEngine {
    /// Lay out a new state for the first time.
    pub fn convert(
        state: LayoutState,
        renderer: &mut dyn GlyphRenderer,
    ) -> Result<Self, LayoutError> {
        let mut engine = Self {
            state: state.clone(),
            layout: VerticalLayout::default(),
            diagnostics: None,
        };
        engine.apply_full(state, renderer)?;
        log::debug!(
            "converted {} ({} glyphs in {} lines)",
            engine.state.tag,
            engine.layout.len(),
            engine.layout.lines().len()
        );
        Ok(engine)
    }

    /// Install a diagnostics callback.
    pub fn set_diagnostic_sink<F>(&mut self, sink: F)
    where
        F: FnMut(LayoutDiagnostic) + 'static,
    {
        self.diagnostics = Some(Box::new(sink));
    }

    fn emit(&mut self, diagnostic: LayoutDiagnostic) {
        if let Some(sink) = self.diagnostics.as_mut() {
            sink(diagnostic);
        }
    }

    /// Snapshot of the live state.
    pub fn state(&self) -> LayoutState {
        self.state.clone()
    }

    /// Borrow the live state.
    pub fn state_ref(&self) -> &LayoutState {
        &self.state
    }

    pub fn layout(&self) -> &VerticalLayout {
        &self.layout
    }

    /// Text-space placement of every glyph.
    pub fn placements(&self) -> Vec<GlyphPlacement> {
        self.layout.placements()
    }

    /// Replace the live state, re-running only what the delta requires.
    pub fn set_state(
        &mut self,
        mut next: LayoutState,
        renderer: &mut dyn GlyphRenderer,
    ) -> Result<ReconcilePath, LayoutError> {
        let dropped = next
            .kerning_hints
            .invalidate_reclassified(&self.state.classifier, &next.classifier);
        if dropped > 0 {
            log::debug!(
                "dropped {} kerning hints of reclassified characters in {}",
                dropped,
                self.state.tag
            );
        }
        let path = ReconcilePath::between(&self.state, &next);
        let started = Instant::now();
        let before = next.kerning_hints.stats();
        match path {
            ReconcilePath::Unchanged => self.state = next,
            ReconcilePath::Full => self.apply_full(next, renderer)?,
            _ => self.apply_incremental(next, path, renderer)?,
        }
        self.finish_reflow(path, started, before);
        Ok(path)
    }

    /// Apply a whole configuration at once.
    pub fn reconcile(
        &mut self,
        config: LayoutConfig,
        renderer: &mut dyn GlyphRenderer,
    ) -> Result<ReconcilePath, LayoutError> {
        let next = self.state.clone().with_config(config)?;
        self.set_state(next, renderer)
    }

    pub fn set_line_spacing(
        &mut self,
        line_spacing: f32,
        renderer: &mut dyn GlyphRenderer,
    ) -> Result<ReconcilePath, LayoutError> {
        let config = LayoutConfig {
            line_spacing,
            ..self.state.config
        };
        self.reconcile(config, renderer)
    }

    pub fn set_chr_spacing(
        &mut self,
        chr_spacing: f32,
        renderer: &mut dyn GlyphRenderer,
    ) -> Result<ReconcilePath, LayoutError> {
        let config = LayoutConfig {
            chr_spacing,
            ..self.state.config
        };
        self.reconcile(config, renderer)
    }

    pub fn set_auto_kerning(
        &mut self,
        auto_kerning: bool,
        renderer: &mut dyn GlyphRenderer,
    ) -> Result<ReconcilePath, LayoutError> {
        let config = LayoutConfig {
            auto_kerning,
            ..self.state.config
        };
        self.reconcile(config, renderer)
    }

    pub fn set_limit_length(
        &mut self,
        limit_length: usize,
        renderer: &mut dyn GlyphRenderer,
    ) -> Result<ReconcilePath, LayoutError> {
        let config = LayoutConfig {
            limit_length,
            ..self.state.config
        };
        self.reconcile(config, renderer)
    }

    pub fn set_resolution(
        &mut self,
        resolution: u32,
        renderer: &mut dyn GlyphRenderer,
    ) -> Result<ReconcilePath, LayoutError> {
        let config = LayoutConfig {
            resolution,
            ..self.state.config
        };
        self.reconcile(config, renderer)
    }

    pub fn set_blank_size(
        &mut self,
        blank_size: f32,
        renderer: &mut dyn GlyphRenderer,
    ) -> Result<ReconcilePath, LayoutError> {
        let config = LayoutConfig {
            blank_size,
            ..self.state.config
        };
        self.reconcile(config, renderer)
    }

    /// Replace body text and styles (always a full re-layout).
    pub fn set_source(
        &mut self,
        source: SourceText,
        renderer: &mut dyn GlyphRenderer,
    ) -> Result<ReconcilePath, LayoutError> {
        let next = self.state.clone().with_source(source)?;
        self.set_state(next, renderer)
    }

    /// Force a full re-layout of the current state.
    pub fn relayout(&mut self, renderer: &mut dyn GlyphRenderer) -> Result<(), LayoutError> {
        let started = Instant::now();
        let before = self.state.kerning_hints.stats();
        self.apply_full(self.state.clone(), renderer)?;
        self.finish_reflow(ReconcilePath::Full, started, before);
        Ok(())
    }

    /// Measure every distinct glyph identity that is not cached yet.
    ///
    /// Returns how many hints were added.
    pub fn prefetch_kerning_hints(
        &mut self,
        renderer: &mut dyn GlyphRenderer,
    ) -> Result<usize, LayoutError> {
        let mut hints = self.state.kerning_hints.clone();
        let before = hints.len();
        for (index, _) in unique_characters(&self.state.lines) {
            if let Some(glyph) = self.layout.glyph(GlyphId(index)) {
                hints.hint_for(glyph, renderer)?;
            }
        }
        let added = hints.len() - before;
        self.state.kerning_hints = hints;
        Ok(added)
    }

    /// Drop all cached kerning hints. Current placements are kept.
    pub fn invalidate_kerning_hints(&mut self) {
        self.state.kerning_hints.invalidate();
    }

    /// Drop cached kerning hints measured with `font`.
    pub fn invalidate_font(&mut self, font: &str) -> usize {
        self.state.kerning_hints.invalidate_font(font)
    }

    pub fn export_state(&self) -> PersistedLayoutState {
        self.state.export_state()
    }

    /// Persist the live state through a host store.
    pub fn save_to(&self, store: &dyn LayoutStateStore) -> Result<(), PersistError> {
        store.store_state(&self.state.export_state())
    }

    /// Load a persisted state by tag and lay it out.
    pub fn restore_from(
        store: &dyn LayoutStateStore,
        tag: &str,
        renderer: &mut dyn GlyphRenderer,
    ) -> Result<Option<Self>, PersistError> {
        let Some(blob) = store.load_state(tag)? else {
            return Ok(None);
        };
        let state = LayoutState::import_state(blob).inspect_err(|err| {
            log::warn!("rejected persisted state {}: {}", tag, err);
        })?;
        Ok(Some(Self::convert(state, renderer)?))
    }

    /// Release every glyph and hand back the final state.
    pub fn remove(self, renderer: &mut dyn GlyphRenderer) -> LayoutState {
        let released = self.layout.release_all(renderer);
        log::debug!("removed {} ({} glyphs released)", self.state.tag, released);
        self.state
    }

    fn finish_reflow(&mut self, path: ReconcilePath, started: Instant, before: KerningCacheStats) {
        let elapsed_ms = started.elapsed().as_millis().min(u32::MAX as u128) as u32;
        let after = self.state.kerning_hints.stats();
        log::debug!(
            "reconciled {} via {} in {}ms",
            self.state.tag,
            path.as_str(),
            elapsed_ms
        );
        self.emit(LayoutDiagnostic::Reconciled(path));
        self.emit(LayoutDiagnostic::ReflowTimeMs(elapsed_ms));
        self.emit(LayoutDiagnostic::KerningCache {
            hits: after.hits.saturating_sub(before.hits),
            misses: after.misses.saturating_sub(before.misses),
        });
    }

    fn apply_full(
        &mut self,
        mut next: LayoutState,
        renderer: &mut dyn GlyphRenderer,
    ) -> Result<(), LayoutError> {
        let mut hints = next.kerning_hints.clone();
        let layout = {
            let engine = LayoutEngine::new(&next);
            let layout = engine.build(&mut hints, renderer)?;
            let committed = engine
                .commit_lines(&layout, renderer)
                .and_then(|()| engine.commit_glyphs(&layout, renderer));
            if let Err(err) = committed {
                layout.release_all(renderer);
                return Err(err);
            }
            layout
        };
        next.kerning_hints = hints;
        self.layout.release_all(renderer);
        self.layout = layout;
        self.state = next;
        Ok(())
    }

    fn apply_incremental(
        &mut self,
        mut next: LayoutState,
        path: ReconcilePath,
        renderer: &mut dyn GlyphRenderer,
    ) -> Result<(), LayoutError> {
        let mut hints = next.kerning_hints.clone();
        let mut layout = self.layout.clone();
        {
            let engine = LayoutEngine::new(&next);
            if path == ReconcilePath::Rewrap {
                engine.reassign_lines(&mut layout);
            }
            if path.touches_spacing() {
                engine.respace(&mut layout, &mut hints, renderer)?;
            }
            if path.touches_lines() {
                engine.place_lines(&mut layout);
            }

            let mut committed = Ok(());
            if path.touches_lines() {
                committed = engine.commit_lines(&layout, renderer);
            }
            if path.touches_spacing() {
                committed = committed.and_then(|()| engine.commit_glyphs(&layout, renderer));
            }
            if let Err(err) = committed {
                self.restore_transforms(renderer);
                return Err(err);
            }
        }
        next.kerning_hints = hints;
        self.layout = layout;
        self.state = next;
        Ok(())
    }

    /// Re-send the live layout after a rejected commit.
    fn restore_transforms(&self, renderer: &mut dyn GlyphRenderer) {
        let engine = LayoutEngine::new(&self.state);
        let restored = engine
            .commit_lines(&self.layout, renderer)
            .and_then(|()| engine.commit_glyphs(&self.layout, renderer));
        if let Err(err) = restored {
            log::warn!(
                "could not restore transforms for {}: {}",
                self.state.tag,
                err
            );
        }
    }
}

const STATE_SCHEMA_VERSION: u8 = 1;
const STATE_MAGIC: [u8; 4] = *b"TTGK";
const STATE_HEADER_LEN: usize = 9;
const DEFAULT_MAX_STATE_FILE_BYTES: usize = 4 * 1024 * 1024;
static STATE_WRITE_NONCE: AtomicUsize = AtomicUsize::new(0);

/// One kerning cache entry in persisted form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedKerningHint {
    pub font: String,
    pub character: char,
    pub max: f32,
    pub min: f32,
}

/// Versioned, serializable form of [`LayoutState`].
///
/// Derived lines are not stored; they are rebuilt and re-validated on
/// import.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedLayoutState {
    pub version: u8,
    pub tag: String,
    pub name: String,
    pub source: SourceText,
    pub config: LayoutConfig,
    pub materials: Vec<String>,
    pub fonts: FontSet,
    pub classifier: CharClassifier,
    pub kerning_hints: Vec<PersistedKerningHint>,
}

impl PersistedLayoutState {
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, PersistError> {
        serde_json::to_vec(self).map_err(|err| PersistError::Json(err.to_string()))
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, PersistError> {
        serde_json::from_slice(bytes).map_err(|err| PersistError::Json(err.to_string()))
    }

    /// Compact binary form: magic, schema version, crc32 of the payload,
    /// then the postcard payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PersistError> {
        let payload =
            postcard::to_allocvec(self).map_err(|err| PersistError::Postcard(err.to_string()))?;
        let mut out = Vec::with_capacity(STATE_HEADER_LEN + payload.len());
        out.extend_from_slice(&STATE_MAGIC);
        out.push(STATE_SCHEMA_VERSION);
        out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PersistError> {
        if bytes.len() < STATE_HEADER_LEN {
            return Err(PersistError::Truncated { len: bytes.len() });
        }
        let (header, payload) = bytes.split_at(STATE_HEADER_LEN);
        if header[..4] != STATE_MAGIC {
            return Err(PersistError::BadMagic);
        }
        if header[4] != STATE_SCHEMA_VERSION {
            return Err(PersistError::UnsupportedVersion { found: header[4] });
        }
        let expected = u32::from_le_bytes([header[5], header[6], header[7], header[8]]);
        let actual = crc32fast::hash(payload);
        if expected != actual {
            return Err(PersistError::ChecksumMismatch { expected, actual });
        }
        postcard::from_bytes(payload).map_err(|err| PersistError::Postcard(err.to_string()))
    }
}

/// Persistence failure.
#[derive(Clone, Debug, PartialEq)]
pub enum PersistError {
    Json(String),
    Postcard(String),
    Truncated { len: usize },
    BadMagic,
    UnsupportedVersion { found: u8 },
    ChecksumMismatch { expected: u32, actual: u32 },
    Io(String),
    /// Tag cannot be used as a file name.
    InvalidTag(String),
    /// Payload decoded but does not describe a valid state.
    Invalid(LayoutError),
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(err) => write!(f, "state JSON invalid: {}", err),
            Self::Postcard(err) => write!(f, "state payload invalid: {}", err),
            Self::Truncated { len } => write!(f, "state blob truncated ({} bytes)", len),
            Self::BadMagic => write!(f, "state blob has wrong magic"),
            Self::UnsupportedVersion { found } => {
                write!(f, "unsupported state schema version {}", found)
            }
            Self::ChecksumMismatch { expected, actual } => write!(
                f,
                "state checksum mismatch (expected={:08x} actual={:08x})",
                expected, actual
            ),
            Self::Io(err) => write!(f, "state I/O failed: {}", err),
            Self::InvalidTag(tag) => write!(f, "invalid state tag {:?}", tag),
            Self::Invalid(err) => write!(f, "persisted state rejected: {}", err),
        }
    }
}

impl std::error::Error for PersistError {}

impl From<LayoutError> for PersistError {
    fn from(err: LayoutError) -> Self {
        Self::Invalid(err)
    }
}

impl From<io::Error> for PersistError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Host storage hooks for layout state.
pub trait LayoutStateStore {
    /// Load the state stored under `tag`, if any.
    fn load_state(&self, _tag: &str) -> Result<Option<PersistedLayoutState>, PersistError> {
        Ok(None)
    }

    /// Persist a state under its own tag.
    fn store_state(&self, _state: &PersistedLayoutState) -> Result<(), PersistError> {
        Ok(())
    }
}

/// File-backed state store writing `<root>/<tag>.json`.
///
/// Writes go to a temp file that is renamed into place. Reads and writes
/// both enforce `max_file_bytes`.
#[derive(Clone, Debug)]
pub struct FileLayoutStateStore {
    root: PathBuf,
    max_file_bytes: usize,
}

impl FileLayoutStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_file_bytes: DEFAULT_MAX_STATE_FILE_BYTES,
        }
    }

    /// Values of `0` are treated as `1` to keep the cap explicit.
    pub fn with_max_file_bytes(mut self, max_file_bytes: usize) -> Self {
        self.max_file_bytes = max_file_bytes.max(1);
        self
    }

    pub fn max_file_bytes(&self) -> usize {
        self.max_file_bytes
    }

    /// Path for `tag`; tags are restricted to `[A-Za-z0-9_-]`.
    pub fn state_path(&self, tag: &str) -> Result<PathBuf, PersistError> {
        let valid = !tag.is_empty()
            && tag
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !valid {
            return Err(PersistError::InvalidTag(tag.to_string()));
        }
        Ok(self.root.join(format!("{}.json", tag)))
    }
}

impl LayoutStateStore for FileLayoutStateStore {
    fn load_state(&self, tag: &str) -> Result<Option<PersistedLayoutState>, PersistError> {
        let path = self.state_path(tag)?;
        let max_file_bytes = self.max_file_bytes as u64;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut payload = Vec::with_capacity(256);
        file.take(max_file_bytes.saturating_add(1))
            .read_to_end(&mut payload)?;
        if payload.len() > self.max_file_bytes {
            return Err(PersistError::Io(format!(
                "{} exceeds {} bytes",
                path.display(),
                self.max_file_bytes
            )));
        }
        PersistedLayoutState::from_json_slice(&payload).map(Some)
    }

    fn store_state(&self, state: &PersistedLayoutState) -> Result<(), PersistError> {
        let final_path = self.state_path(&state.tag)?;
        let payload = state.to_json_bytes()?;
        if payload.len() > self.max_file_bytes {
            return Err(PersistError::Io(format!(
                "state {} is {} bytes (limit {})",
                state.tag,
                payload.len(),
                self.max_file_bytes
            )));
        }
        fs::create_dir_all(&self.root)?;

        let nonce = STATE_WRITE_NONCE.fetch_add(1, Ordering::Relaxed);
        let temp_path = self.root.join(format!(
            "{}.json.tmp-{}-{}",
            state.tag,
            std::process::id(),
            nonce
        ));
        let written = write_synced(&temp_path, &payload)
            .and_then(|()| fs::rename(&temp_path, &final_path));
        if let Err(err) = written {
            let _ = fs::remove_file(&temp_path);
            log::warn!("failed to store state {}: {}", state.tag, err);
            return Err(err.into());
        }
        Ok(())
    }
}

fn write_synced(path: &Path, payload: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(payload)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tategaki::CharFormat;

    fn state(body: &str) -> LayoutState {
        LayoutState::new("tatetext", SourceText::plain(body), LayoutConfig::default())
            .expect("state should build")
    }

    fn temp_store_root(label: &str) -> PathBuf {
        let nonce = STATE_WRITE_NONCE.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "tategaki-render-{label}-{}-{nonce}",
            std::process::id()
        ))
    }

    #[test]
    fn tags_are_short_alphanumeric_and_unique() {
        let a = state("あいう");
        let b = state("あいう");
        assert_eq!(a.tag().len(), TAG_LEN);
        assert!(a.tag().bytes().all(|b| b.is_ascii_alphanumeric()));
        assert_ne!(a.tag(), b.tag());
        assert_eq!(a.glyph_name(GlyphId(2)), format!("chr_{}.2", a.tag()));
    }

    #[test]
    fn new_state_rejects_bad_inputs_before_building() {
        let bad_limit = LayoutConfig {
            limit_length: 0,
            ..LayoutConfig::default()
        };
        assert!(matches!(
            LayoutState::new("t", SourceText::plain("あ"), bad_limit),
            Err(LayoutError::InvalidConfiguration { .. })
        ));
        let mismatched = SourceText::new("あい", vec![vec![CharFormat::default()]]);
        assert!(matches!(
            LayoutState::new("t", mismatched, LayoutConfig::default()),
            Err(LayoutError::StyleMismatch(_))
        ));
    }

    #[test]
    fn with_config_rewraps_only_when_limit_changes() {
        let base = state("あいうえお\nかき");
        assert_eq!(base.wrapped_lines().len(), 2);
        let narrow = base
            .clone()
            .with_config(LayoutConfig {
                limit_length: 2,
                ..*base.config()
            })
            .expect("valid config");
        let lens: Vec<usize> = narrow.wrapped_lines().iter().map(LayoutLine::len).collect();
        assert_eq!(lens, vec![2, 2, 1, 2]);
        assert_eq!(narrow.lines(), base.lines());
    }

    #[test]
    fn snapshots_do_not_alias_live_state() {
        let original = state("あい");
        let snapshot = original.clone().with_name("renamed");
        assert_eq!(original.name(), "tatetext");
        assert_eq!(snapshot.name(), "renamed");
    }

    #[test]
    fn reconcile_path_picks_minimal_pass() {
        let base = state("あいうえお");
        let cfg = *base.config();
        let with = |c: LayoutConfig| base.clone().with_config(c).expect("valid config");

        assert_eq!(
            ReconcilePath::between(&base, &base.clone().with_name("x")),
            ReconcilePath::Unchanged
        );
        assert_eq!(
            ReconcilePath::between(&base, &base.clone().with_tag("Renamed1")),
            ReconcilePath::Full
        );
        assert_eq!(
            ReconcilePath::between(
                &base,
                &with(LayoutConfig {
                    line_spacing: 2.0,
                    ..cfg
                })
            ),
            ReconcilePath::LinePositions
        );
        assert_eq!(
            ReconcilePath::between(
                &base,
                &with(LayoutConfig {
                    chr_spacing: 0.3,
                    ..cfg
                })
            ),
            ReconcilePath::Spacing
        );
        assert_eq!(
            ReconcilePath::between(
                &base,
                &with(LayoutConfig {
                    auto_kerning: true,
                    line_spacing: 3.0,
                    ..cfg
                })
            ),
            ReconcilePath::LinePositionsAndSpacing
        );
        assert_eq!(
            ReconcilePath::between(
                &base,
                &with(LayoutConfig {
                    limit_length: 2,
                    ..cfg
                })
            ),
            ReconcilePath::Rewrap
        );
        assert_eq!(
            ReconcilePath::between(
                &base,
                &with(LayoutConfig {
                    limit_length: 100,
                    ..cfg
                })
            ),
            ReconcilePath::Unchanged
        );
        assert_eq!(
            ReconcilePath::between(
                &base,
                &with(LayoutConfig {
                    resolution: 3,
                    ..cfg
                })
            ),
            ReconcilePath::Full
        );
        let restyled = base
            .clone()
            .with_source(SourceText::uniform("あいうえお", CharFormat::default().bold()))
            .expect("valid source");
        assert_eq!(
            ReconcilePath::between(&base, &restyled),
            ReconcilePath::Full
        );
    }

    #[test]
    fn blank_size_only_matters_when_kerning() {
        let base = state("あ い");
        let cfg = *base.config();
        let bigger_blank = base
            .clone()
            .with_config(LayoutConfig {
                blank_size: 2.0,
                ..cfg
            })
            .expect("valid config");
        assert_eq!(
            ReconcilePath::between(&base, &bigger_blank),
            ReconcilePath::Unchanged
        );

        let kerned = base
            .clone()
            .with_config(LayoutConfig {
                auto_kerning: true,
                ..cfg
            })
            .expect("valid config");
        let kerned_bigger = kerned
            .clone()
            .with_config(LayoutConfig {
                blank_size: 2.0,
                auto_kerning: true,
                ..cfg
            })
            .expect("valid config");
        assert_eq!(
            ReconcilePath::between(&kerned, &kerned_bigger),
            ReconcilePath::Spacing
        );
    }

    #[test]
    fn export_import_reproduces_state() {
        let hints: KerningHintCache = [(
            GlyphKey::new("Bfont", 'あ'),
            KerningHint { max: 0.5, min: -0.5 },
        )]
        .into_iter()
        .collect();
        let original = state("「あい」\nう")
            .with_materials(vec!["ink".to_string()])
            .with_fonts(FontSet::uniform("Mincho"))
            .with_kerning_hints(hints);
        let restored =
            LayoutState::import_state(original.export_state()).expect("import should succeed");
        assert_eq!(restored, original);
        assert_eq!(restored.tag(), original.tag());
    }

    #[test]
    fn json_and_binary_blobs_round_trip() {
        let blob = state("あい\nう").export_state();
        let json = blob.to_json_bytes().expect("json");
        assert_eq!(
            PersistedLayoutState::from_json_slice(&json).expect("json decode"),
            blob
        );
        let bytes = blob.to_bytes().expect("bytes");
        assert_eq!(&bytes[..4], b"TTGK");
        assert_eq!(
            PersistedLayoutState::from_bytes(&bytes).expect("binary decode"),
            blob
        );
    }

    #[test]
    fn corrupted_binary_blobs_are_rejected() {
        let bytes = state("あい").export_state().to_bytes().expect("bytes");

        assert!(matches!(
            PersistedLayoutState::from_bytes(&bytes[..5]),
            Err(PersistError::Truncated { len: 5 })
        ));

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert_eq!(
            PersistedLayoutState::from_bytes(&bad_magic),
            Err(PersistError::BadMagic)
        );

        let mut bad_version = bytes.clone();
        bad_version[4] = 99;
        assert_eq!(
            PersistedLayoutState::from_bytes(&bad_version),
            Err(PersistError::UnsupportedVersion { found: 99 })
        );

        let mut flipped = bytes.clone();
        let last = flipped.len() - 1;
        flipped[last] ^= 0xff;
        assert!(matches!(
            PersistedLayoutState::from_bytes(&flipped),
            Err(PersistError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn import_rejects_invalid_payloads() {
        let mut blob = state("あい").export_state();
        blob.config.limit_length = 0;
        assert!(matches!(
            LayoutState::import_state(blob.clone()),
            Err(PersistError::Invalid(LayoutError::InvalidConfiguration { .. }))
        ));
        blob.version = 7;
        assert_eq!(
            LayoutState::import_state(blob),
            Err(PersistError::UnsupportedVersion { found: 7 })
        );
    }

    #[test]
    fn file_store_round_trips_and_reports_missing() {
        let root = temp_store_root("roundtrip");
        let store = FileLayoutStateStore::new(&root);
        let blob = state("あいう").export_state();
        assert_eq!(store.load_state(&blob.tag), Ok(None));
        store.store_state(&blob).expect("store should succeed");
        assert_eq!(store.load_state(&blob.tag), Ok(Some(blob.clone())));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn file_store_enforces_limits_and_tag_charset() {
        let root = temp_store_root("limits");
        let store = FileLayoutStateStore::new(&root).with_max_file_bytes(16);
        let blob = state("あいう").export_state();
        assert!(matches!(
            store.store_state(&blob),
            Err(PersistError::Io(_))
        ));
        assert!(matches!(
            store.state_path("../escape"),
            Err(PersistError::InvalidTag(_))
        ));
        assert_eq!(
            FileLayoutStateStore::new(&root)
                .with_max_file_bytes(0)
                .max_file_bytes(),
            1
        );
        let _ = fs::remove_dir_all(root);
    }
}
