//! Step-count extraction from OCR text.
//!
//! Two strategies implement [`StepExtractor`]:
//!
//! - **[`LocalizedExtractor`]** runs the full pipeline: normalize, strip
//!   distractors, then try progressively weaker tiers (anchored keyword,
//!   unit-adjacent number, largest plausible number).
//! - **[`SimpleExtractor`]** takes the first standalone 3–6 digit number and
//!   nothing else. Structured smartband screens show the step count first,
//!   and the localized heuristics misread them.
//!
//! Which one runs is decided by the caller through [`ExtractionMode`].
//!
//! # Tiers
//!
//! | Tier | Rule |
//! |------|------|
//! | [`Confidence::Anchored`] | `total`/`today` keyword, ≤10 non-digits, 3–6 digits, optional unit |
//! | [`Confidence::Generic`] | 3–6 digits followed by a unit word |
//! | [`Confidence::LargestPlausible`] | largest standalone 3–6 digit number, ≤ 50,000 |
//! | [`Confidence::NotFound`] | nothing usable; steps = 0 |
//!
//! A digit run shorter than 3 or longer than 6 digits is never selected.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::distractor;
use crate::normalize::{normalize, strip_thousands_separators};

/// No realistic daily step count exceeds this.
pub const PLAUSIBILITY_CEILING: u32 = 50_000;

/// Keywords meaning "total" or "today", by locale. Matched after lower-casing.
pub const ANCHOR_KEYWORDS: &[(&str, &str)] = &[
    ("en", "total"),
    ("en", "today"),
    ("id", "jumlah"),
    ("id", "hari ini"),
    ("th", "รวม"),
    ("th", "วันนี้"),
    ("zh", "總計"),
    ("zh", "今日"),
];

/// Unit words meaning "steps", by locale.
pub const UNIT_WORDS: &[(&str, &str)] = &[
    ("en", "steps"),
    ("id", "langkah"),
    ("th", "ก้าว"),
    ("zh", "步"),
];

fn alternation(words: &[(&str, &str)]) -> String {
    words
        .iter()
        .map(|(_, w)| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|")
}

static ANCHORED_RE: Lazy<Regex> = Lazy::new(|| {
    let pattern = format!(
        r"(?:{})[^0-9]{{0,10}}([0-9]{{3,6}})(?:\s*(?:{})|[^0-9]|$)",
        alternation(ANCHOR_KEYWORDS),
        alternation(UNIT_WORDS)
    );
    Regex::new(&pattern).expect("anchored pattern must compile")
});

static UNIT_ADJACENT_RE: Lazy<Regex> = Lazy::new(|| {
    let pattern = format!(
        r"(?:^|[^0-9])([0-9]{{3,6}})\s*(?:{})",
        alternation(UNIT_WORDS)
    );
    Regex::new(&pattern).expect("unit-adjacent pattern must compile")
});

static STANDALONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[0-9]{3,6}\b").expect("standalone pattern must compile"));

/// Which tier produced a result. Used for logging only; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Anchored,
    Generic,
    LargestPlausible,
    NotFound,
}

/// Outcome of running an extractor over OCR text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExtractionResult {
    /// Extracted step count. `0` means nothing usable was found.
    pub steps: u32,
    pub confidence: Confidence,
    /// Candidate thrown out for exceeding [`PLAUSIBILITY_CEILING`].
    pub rejected: Option<u32>,
}

impl ExtractionResult {
    fn found(steps: u32, confidence: Confidence) -> Self {
        Self {
            steps,
            confidence,
            rejected: None,
        }
    }

    fn not_found() -> Self {
        Self::found(0, Confidence::NotFound)
    }
}

/// A named strategy turning raw OCR text into a step count.
pub trait StepExtractor: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Extract from the raw concatenated OCR text (fragments joined by spaces).
    fn extract(&self, raw_text: &str) -> ExtractionResult;
}

/// Full multilingual pipeline for free-form health-app screenshots.
pub struct LocalizedExtractor;

impl StepExtractor for LocalizedExtractor {
    fn name(&self) -> &'static str {
        "localized"
    }

    fn extract(&self, raw_text: &str) -> ExtractionResult {
        let stripped = distractor::strip(&normalize(raw_text));
        extract_steps(&stripped)
    }
}

/// Legacy single-pattern extraction for structured smartband screenshots.
pub struct SimpleExtractor;

impl StepExtractor for SimpleExtractor {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn extract(&self, raw_text: &str) -> ExtractionResult {
        let text = strip_thousands_separators(raw_text);
        STANDALONE_RE
            .find(&text)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .map(|steps| ExtractionResult::found(steps, Confidence::Generic))
            .unwrap_or_else(ExtractionResult::not_found)
    }
}

/// Selects an extraction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    Localized,
    Simple,
}

impl ExtractionMode {
    pub fn extractor(self) -> &'static dyn StepExtractor {
        match self {
            ExtractionMode::Localized => &LocalizedExtractor,
            ExtractionMode::Simple => &SimpleExtractor,
        }
    }
}

/// Run the tiered search over normalized, distractor-free text.
pub fn extract_steps(stripped: &str) -> ExtractionResult {
    if let Some(steps) = first_capture(&ANCHORED_RE, stripped) {
        return ExtractionResult::found(steps, Confidence::Anchored);
    }

    if let Some(steps) = first_capture(&UNIT_ADJACENT_RE, stripped) {
        return ExtractionResult::found(steps, Confidence::Generic);
    }

    let largest = STANDALONE_RE
        .find_iter(stripped)
        .filter_map(|m| m.as_str().parse::<u32>().ok())
        .max();

    match largest {
        Some(steps) if steps > PLAUSIBILITY_CEILING => ExtractionResult {
            steps: 0,
            confidence: Confidence::NotFound,
            rejected: Some(steps),
        },
        Some(steps) => ExtractionResult::found(steps, Confidence::LargestPlausible),
        None => ExtractionResult::not_found(),
    }
}

fn first_capture(re: &Regex, text: &str) -> Option<u32> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
}
