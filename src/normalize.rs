//! OCR token normalization.
//!
//! The recognizer hands back fragments in reading order. They are joined
//! with single spaces and then normalized before any pattern matching:
//! lower-cased, with thousands-separator commas and stray periods removed.
//! Nothing else is touched, so locale keywords and unit words survive intact.

/// Join recognized fragments the way every downstream stage expects them.
pub fn join_tokens<S: AsRef<str>>(tokens: &[S]) -> String {
    tokens
        .iter()
        .map(|t| t.as_ref())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lower-case and drop `,` and `.` characters.
///
/// `"Today 7,842 Steps."` becomes `"today 7842 steps"`.
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| *c != ',' && *c != '.')
        .collect::<String>()
        .to_lowercase()
}

/// Only removes thousands-separator commas. Used by the simple extractor,
/// which must see the text as close to raw as possible.
pub fn strip_thousands_separators(text: &str) -> String {
    text.replace(',', "")
}
