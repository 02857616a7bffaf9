//! Per-character adjustment classes for vertical setting.
//!
//! Japanese vertical text keeps most characters upright in their grid cell,
//! but commas and periods move to the upper-right corner and horizontally
//! drawn brackets, dashes and ellipses turn a quarter turn. Whitespace gets a
//! configured nominal height because it has no visual extent to measure.
//!
//! Membership is data, not code: [`CharClassifier`] carries the three tables
//! so hosts can extend them, and it is persisted with the layout state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Comma/period class shifted toward the upper-right of the cell.
const UPPER_RIGHT_CHARS: &[char] = &['、', '。', ',', '.', '，', '．', '､', '｡'];

/// Glyphs drawn horizontally that turn -90° in vertical text.
///
/// Union of every bracket and dash set the tool has shipped with.
const ROTATION_CHARS: &[char] = &[
    // paired brackets
    '「', '」', '『', '』', '（', '）', '(', ')', '［', '］', '[', ']', '｛', '｝', '{', '}', '〈',
    '〉', '《', '》', '【', '】', '〔', '〕', '〖', '〗', '〘', '〙', '〚', '〛', '＜', '＞', '<',
    '>', '｢', '｣',
    // dashes, hyphens and long vowel marks
    'ー', '－', '-', '—', '―', '–', '‐', '‑', 'ｰ',
    // tildes and wave dashes
    '～', '~', '〜', '〰',
    // ellipses
    '…', '‥', '⋯',
];

/// Whitespace that takes `blank_size` instead of a measured extent.
const BLANK_CHARS: &[char] = &[' ', '\u{3000}'];

/// Adjustment class for a single character.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CharClass {
    /// Placed on the grid without rotation or offset.
    Normal,
    /// Comma/period moved to the upper-right quadrant of its cell.
    UpperRight,
    /// Bracket, dash or ellipsis rotated -90° about the z axis.
    Rotation,
    /// Whitespace; contributes the configured blank size when kerning.
    Blank,
}

impl CharClass {
    /// Stable lowercase tag used in diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::UpperRight => "upper_right",
            Self::Rotation => "rotation",
            Self::Blank => "blank",
        }
    }

    /// Whether glyphs of this class are turned a quarter turn.
    pub fn is_rotated(self) -> bool {
        matches!(self, Self::Rotation)
    }
}

/// Configurable classification tables.
///
/// Lookups are total and pure: every character maps to exactly one class and
/// the answer only changes when the tables do. A character listed in more
/// than one table resolves in the order blank, upper-right, rotation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharClassifier {
    /// Characters shifted to the upper-right.
    pub upper_right: BTreeSet<char>,
    /// Characters rotated -90°.
    pub rotation: BTreeSet<char>,
    /// Characters treated as blanks.
    pub blank: BTreeSet<char>,
}

impl Default for CharClassifier {
    fn default() -> Self {
        Self {
            upper_right: UPPER_RIGHT_CHARS.iter().copied().collect(),
            rotation: ROTATION_CHARS.iter().copied().collect(),
            blank: BLANK_CHARS.iter().copied().collect(),
        }
    }
}

impl CharClassifier {
    /// Classifier with empty tables; everything is [`CharClass::Normal`].
    pub fn empty() -> Self {
        Self {
            upper_right: BTreeSet::new(),
            rotation: BTreeSet::new(),
            blank: BTreeSet::new(),
        }
    }

    /// Classify one character.
    pub fn classify(&self, ch: char) -> CharClass {
        if self.blank.contains(&ch) {
            CharClass::Blank
        } else if self.upper_right.contains(&ch) {
            CharClass::UpperRight
        } else if self.rotation.contains(&ch) {
            CharClass::Rotation
        } else {
            CharClass::Normal
        }
    }

    /// Add `ch` to the rotation table, removing it from the others.
    pub fn with_rotation(mut self, ch: char) -> Self {
        self.upper_right.remove(&ch);
        self.blank.remove(&ch);
        self.rotation.insert(ch);
        self
    }

    /// Add `ch` to the upper-right table, removing it from the others.
    pub fn with_upper_right(mut self, ch: char) -> Self {
        self.rotation.remove(&ch);
        self.blank.remove(&ch);
        self.upper_right.insert(ch);
        self
    }

    /// Add `ch` to the blank table, removing it from the others.
    pub fn with_blank(mut self, ch: char) -> Self {
        self.rotation.remove(&ch);
        self.upper_right.remove(&ch);
        self.blank.insert(ch);
        self
    }

    /// Return `ch` to the normal class.
    pub fn without(mut self, ch: char) -> Self {
        self.rotation.remove(&ch);
        self.upper_right.remove(&ch);
        self.blank.remove(&ch);
        self
    }
}

/// Classify with the default tables.
pub fn classify(ch: char) -> CharClass {
    if BLANK_CHARS.contains(&ch) {
        CharClass::Blank
    } else if UPPER_RIGHT_CHARS.contains(&ch) {
        CharClass::UpperRight
    } else if ROTATION_CHARS.contains(&ch) {
        CharClass::Rotation
    } else {
        CharClass::Normal
    }
}
