//! Source text ingestion: lines, per-character styles and hard wrapping.
//!
//! A [`SourceText`] is a body string plus one [`CharFormat`] per character,
//! grouped by line. [`split_lines`] pairs them positionally and
//! [`wrap_lines`] splits long lines into fixed-size chunks. Wrapping counts
//! characters only; it never looks for word boundaries.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::fmt;

/// Inline capacity for one wrapped line before spilling to the heap.
const INLINE_LINE_CHARS: usize = 16;

/// Formatting flags attached to one source character.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharFormat {
    /// Slot in the configured materials list.
    pub material_index: usize,
    pub bold: bool,
    pub italic: bool,
    pub small_caps: bool,
}

impl CharFormat {
    /// Bold variant of this format.
    pub fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    /// Italic variant of this format.
    pub fn italic(mut self) -> Self {
        self.italic = true;
        self
    }

    /// Same flags with another material slot.
    pub fn with_material(mut self, material_index: usize) -> Self {
        self.material_index = material_index;
        self
    }
}

/// Body text plus per-line, per-character formats.
///
/// Lines are separated by `\n`; a trailing `\r` is dropped. Every line,
/// including empty ones, owns one format list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceText {
    body: String,
    line_formats: Vec<Vec<CharFormat>>,
}

impl SourceText {
    /// Pair a body with explicit per-line formats.
    ///
    /// Counts are checked by [`split_lines`], not here.
    pub fn new(body: impl Into<String>, line_formats: Vec<Vec<CharFormat>>) -> Self {
        Self {
            body: body.into(),
            line_formats,
        }
    }

    /// Body where every character uses the default format.
    pub fn plain(body: impl Into<String>) -> Self {
        Self::uniform(body, CharFormat::default())
    }

    /// Body where every character uses `format`.
    pub fn uniform(body: impl Into<String>, format: CharFormat) -> Self {
        let body = body.into();
        let line_formats = raw_lines(&body)
            .map(|line| vec![format; line.chars().count()])
            .collect();
        Self { body, line_formats }
    }

    /// Build from a flat format list with one entry per body character,
    /// line breaks included, as host text objects store them.
    pub fn from_body_format(
        body: impl Into<String>,
        formats: &[CharFormat],
    ) -> Result<Self, TextPrepError> {
        let body = body.into();
        let characters = body.chars().count();
        if characters != formats.len() {
            return Err(TextPrepError::FormatCountMismatch {
                characters,
                formats: formats.len(),
            });
        }

        let mut line_formats = Vec::with_capacity(8);
        let mut current = Vec::new();
        let mut chars = body.chars().zip(formats.iter().copied()).peekable();
        while let Some((ch, format)) = chars.next() {
            match ch {
                '\n' => line_formats.push(core::mem::take(&mut current)),
                '\r' if matches!(chars.peek(), Some(('\n', _)) | None) => {}
                _ => current.push(format),
            }
        }
        line_formats.push(current);
        Ok(Self { body, line_formats })
    }

    /// Raw body text.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Per-line format lists.
    pub fn line_formats(&self) -> &[Vec<CharFormat>] {
        &self.line_formats
    }

    /// Number of explicit lines in the body.
    pub fn line_count(&self) -> usize {
        raw_lines(&self.body).count()
    }
}

fn raw_lines(body: &str) -> impl Iterator<Item = &str> {
    body.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
}

/// One source character with its resolved formatting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacterStyle {
    pub character: char,
    pub material_index: usize,
    pub bold: bool,
    pub italic: bool,
    pub small_caps: bool,
}

impl CharacterStyle {
    /// Attach `format` to `character`.
    pub fn new(character: char, format: CharFormat) -> Self {
        Self {
            character,
            material_index: format.material_index,
            bold: format.bold,
            italic: format.italic,
            small_caps: format.small_caps,
        }
    }
}

/// Ordered run of styled characters forming one column of vertical text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutLine {
    /// Explicit source line this run came from (0-based).
    pub source_line: usize,
    /// Index of the first character in the whole flattened body.
    pub start: usize,
    /// Characters in reading order.
    pub chars: SmallVec<[CharacterStyle; INLINE_LINE_CHARS]>,
}

impl LayoutLine {
    /// Number of characters.
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    /// Whether the line holds no characters.
    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Flattened indices covered by this line.
    pub fn source_range(&self) -> core::ops::Range<usize> {
        self.start..self.start + self.chars.len()
    }
}

/// Source text preparation error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TextPrepError {
    /// A line's character count differs from its format count.
    StyleMismatch {
        line: usize,
        characters: usize,
        styles: usize,
    },
    /// The number of body lines differs from the number of format lists.
    LineCountMismatch { lines: usize, style_runs: usize },
    /// A flat format list does not cover the body one-to-one.
    FormatCountMismatch { characters: usize, formats: usize },
    /// Wrap limit below one character.
    InvalidLimit { limit: usize },
}

impl fmt::Display for TextPrepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StyleMismatch {
                line,
                characters,
                styles,
            } => write!(
                f,
                "style mismatch on line {}: {} characters but {} styles",
                line, characters, styles
            ),
            Self::LineCountMismatch { lines, style_runs } => write!(
                f,
                "style mismatch: {} lines but {} style runs",
                lines, style_runs
            ),
            Self::FormatCountMismatch {
                characters,
                formats,
            } => write!(
                f,
                "style mismatch: {} characters but {} formats",
                characters, formats
            ),
            Self::InvalidLimit { limit } => {
                write!(f, "line limit must be at least 1 (got {})", limit)
            }
        }
    }
}

impl std::error::Error for TextPrepError {}

/// Split the body into explicit lines and pair each character with its format.
pub fn split_lines(source: &SourceText) -> Result<Vec<LayoutLine>, TextPrepError> {
    let line_count = source.line_count();
    if line_count != source.line_formats.len() {
        return Err(TextPrepError::LineCountMismatch {
            lines: line_count,
            style_runs: source.line_formats.len(),
        });
    }

    let mut lines = Vec::with_capacity(line_count);
    let mut start = 0usize;
    for (idx, (text, formats)) in raw_lines(&source.body)
        .zip(source.line_formats.iter())
        .enumerate()
    {
        let characters = text.chars().count();
        if characters != formats.len() {
            return Err(TextPrepError::StyleMismatch {
                line: idx,
                characters,
                styles: formats.len(),
            });
        }
        let chars = text
            .chars()
            .zip(formats.iter().copied())
            .map(|(ch, format)| CharacterStyle::new(ch, format))
            .collect();
        lines.push(LayoutLine {
            source_line: idx,
            start,
            chars,
        });
        start += characters;
    }
    Ok(lines)
}

/// Hard-wrap lines longer than `limit` into consecutive chunks.
///
/// Every chunk except a line's last holds exactly `limit` characters. Lines
/// already within the limit are returned unchanged.
pub fn wrap_lines(lines: &[LayoutLine], limit: usize) -> Result<Vec<LayoutLine>, TextPrepError> {
    if limit == 0 {
        return Err(TextPrepError::InvalidLimit { limit });
    }

    let mut wrapped = Vec::with_capacity(lines.len());
    for line in lines {
        if line.len() <= limit {
            wrapped.push(line.clone());
            continue;
        }
        for (chunk_idx, chunk) in line.chars.chunks(limit).enumerate() {
            wrapped.push(LayoutLine {
                source_line: line.source_line,
                start: line.start + chunk_idx * limit,
                chars: chunk.iter().copied().collect(),
            });
        }
    }
    if wrapped.len() != lines.len() {
        log::debug!(
            "wrapped {} source lines into {} lines (limit={})",
            lines.len(),
            wrapped.len(),
            limit
        );
    }
    Ok(wrapped)
}

/// First occurrence of each distinct `(character, bold, italic)` combination,
/// with its index in the flattened body.
///
/// These are the glyph identities a font set can produce for the text, in
/// reading order.
pub fn unique_characters(lines: &[LayoutLine]) -> Vec<(usize, CharacterStyle)> {
    let mut seen = BTreeSet::new();
    lines
        .iter()
        .flat_map(|line| line.source_range().zip(line.chars.iter().copied()))
        .filter(|(_, style)| seen.insert((style.character, style.bold, style.italic)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flatten(lines: &[LayoutLine]) -> Vec<CharacterStyle> {
        lines.iter().flat_map(|l| l.chars.iter().copied()).collect()
    }

    #[test]
    fn split_pairs_characters_with_formats() {
        let bold = CharFormat::default().bold();
        let source = SourceText::new(
            "あい\nう",
            vec![vec![CharFormat::default(), bold], vec![bold.italic()]],
        );
        let lines = split_lines(&source).expect("lines should split");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].chars[1].character, 'い');
        assert!(!lines[0].chars[0].bold);
        assert!(lines[0].chars[1].bold);
        assert_eq!(lines[1].start, 2);
        assert!(lines[1].chars[0].italic);
        assert_eq!(lines[1].source_line, 1);
    }

    #[test]
    fn split_rejects_style_count_mismatch() {
        let source = SourceText::new("あいう", vec![vec![CharFormat::default(); 2]]);
        let err = split_lines(&source).expect_err("mismatch should fail");
        assert_eq!(
            err,
            TextPrepError::StyleMismatch {
                line: 0,
                characters: 3,
                styles: 2
            }
        );
    }

    #[test]
    fn split_rejects_line_count_mismatch() {
        let source = SourceText::new("a\nb", vec![vec![CharFormat::default()]]);
        assert!(matches!(
            split_lines(&source),
            Err(TextPrepError::LineCountMismatch {
                lines: 2,
                style_runs: 1
            })
        ));
    }

    #[test]
    fn empty_lines_and_crlf_are_kept_as_lines() {
        let source = SourceText::plain("ab\r\n\r\nc");
        let lines = split_lines(&source).expect("lines should split");
        let texts: Vec<String> = lines
            .iter()
            .map(|l| l.chars.iter().map(|c| c.character).collect())
            .collect();
        assert_eq!(texts, vec!["ab", "", "c"]);
        assert_eq!(lines[2].start, 2);
    }

    #[test]
    fn flat_body_format_skips_line_break_entries() {
        let bold = CharFormat::default().bold();
        let formats = [bold, CharFormat::default(), bold, CharFormat::default()];
        let source = SourceText::from_body_format("a\nbc", &formats).expect("formats fit");
        assert_eq!(
            source.line_formats(),
            &[vec![bold], vec![bold, CharFormat::default()]]
        );
        assert!(matches!(
            SourceText::from_body_format("abc", &formats),
            Err(TextPrepError::FormatCountMismatch {
                characters: 3,
                formats: 4
            })
        ));
    }

    #[test]
    fn wrap_is_lossless_and_order_preserving() {
        let source = SourceText::plain("「あいうえおかきくけこ。」\n\nさしすせそ\nたちつてとなにぬねの");
        let lines = split_lines(&source).expect("lines should split");
        for limit in 1..=14 {
            let wrapped = wrap_lines(&lines, limit).expect("limit is valid");
            assert_eq!(flatten(&wrapped), flatten(&lines), "limit={limit}");
            assert!(wrapped.iter().all(|line| line.len() <= limit));
            for line in &wrapped {
                assert_eq!(line.source_range().len(), line.len());
            }
        }
    }

    #[test]
    fn wrap_chunks_are_full_except_last() {
        let lines = split_lines(&SourceText::plain("あいうえおかき")).expect("split");
        let wrapped = wrap_lines(&lines, 3).expect("wrap");
        let lens: Vec<usize> = wrapped.iter().map(LayoutLine::len).collect();
        assert_eq!(lens, vec![3, 3, 1]);
        assert_eq!(wrapped[1].start, 3);
        assert_eq!(wrapped[2].start, 6);
        assert!(wrapped.iter().all(|line| line.source_line == 0));
    }

    #[test]
    fn wrap_is_noop_when_lines_fit() {
        let lines = split_lines(&SourceText::plain("あいう\nえお")).expect("split");
        let wrapped = wrap_lines(&lines, 3).expect("wrap");
        assert_eq!(wrapped, lines);
    }

    #[test]
    fn wrap_rejects_zero_limit() {
        let lines = split_lines(&SourceText::plain("あ")).expect("split");
        assert_eq!(
            wrap_lines(&lines, 0),
            Err(TextPrepError::InvalidLimit { limit: 0 })
        );
    }

    #[test]
    fn unique_characters_dedupes_by_glyph_identity() {
        let bold = CharFormat::default().bold();
        let source = SourceText::new(
            "ああい\nあ",
            vec![
                vec![CharFormat::default(), CharFormat::default().with_material(1), bold],
                vec![bold],
            ],
        );
        let lines = split_lines(&source).expect("split");
        let unique: Vec<(usize, char, bool)> = unique_characters(&lines)
            .iter()
            .map(|(idx, s)| (*idx, s.character, s.bold))
            .collect();
        assert_eq!(unique, vec![(0, 'あ', false), (2, 'い', true), (3, 'あ', true)]);
    }
}
