//! Plate text normalization and grammar validation.
//!
//! Recognized text is noisy: separators, stray punctuation and letters the
//! recognizer confuses with digits. `normalize` reduces it to a canonical form
//! and `validate` checks the canonical form against the plate grammar:
//! two digits, one or two letters, four to six digits, at most nine characters.
//!
//! Confusable letters (O, I, W, Q, J) are deleted outright rather than mapped to
//! digits. A dropped character makes the plate invalid, which is preferable to
//! storing a guessed one.

use regex::Regex;
use std::sync::OnceLock;

/// Canonical text used when the recognizer returned nothing.
pub const EMPTY_SENTINEL: &str = "EMPTY";
/// Artifact folder used when normalization leaves nothing behind.
pub const INVALID_FALLBACK: &str = "INVALID";

pub const MIN_PLATE_LEN: usize = 7;
pub const MAX_PLATE_LEN: usize = 9;

const CONFUSABLE: &[char] = &['O', 'I', 'W', 'Q', 'J'];

fn plate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[0-9]{2}[A-Z]{1,2}[0-9]{4,6}$").expect("plate pattern is a valid regex")
    })
}

fn is_separator(c: char) -> bool {
    c == '_' || c == '-' || c.is_whitespace()
}

/// Reduce raw recognized text to its canonical form.
///
/// Deterministic, idempotent and never longer than the input (in chars).
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !is_separator(*c))
        .map(|c| c.to_ascii_uppercase())
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .filter(|c| !CONFUSABLE.contains(c))
        .collect()
}

/// Check text against the plate grammar.
///
/// The minimum length applies to `text` as given; the shape is checked on its
/// normalized form.
pub fn validate(text: &str) -> bool {
    if text.chars().count() < MIN_PLATE_LEN {
        return false;
    }
    let canonical = normalize(text);
    canonical.len() <= MAX_PLATE_LEN && plate_pattern().is_match(&canonical)
}

/// Result of running both steps over one recognized string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlateText {
    pub raw: String,
    pub canonical: String,
    pub is_valid: bool,
}

impl PlateText {
    pub fn parse(raw: &str) -> Self {
        let canonical = normalize(raw);
        let is_valid = validate(raw);
        Self {
            raw: raw.to_string(),
            canonical,
            is_valid,
        }
    }

    /// Placeholder for a detection with no recognized text.
    pub fn empty() -> Self {
        Self {
            raw: String::new(),
            canonical: EMPTY_SENTINEL.to_string(),
            is_valid: false,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.canonical == EMPTY_SENTINEL
    }
}
