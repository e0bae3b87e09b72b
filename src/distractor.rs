//! Distractor stripping.
//!
//! Screenshots are full of numbers that look like step counts but are not:
//! clock times, network transfer rates, and the daily goal or average the
//! app shows next to the real value. Each of these is described by one entry
//! in [`DISTRACTORS`] and deleted from the normalized text before extraction.
//!
//! Goal/average phrases are literal per-locale patterns. There is no generic
//! cross-language rule: each language has its own word order and unit word,
//! so supporting a new locale means appending an entry to the table.
//!
//! Entries run in table order, each on the output of the previous one. The
//! whole table is re-applied until the text stops changing, because removing
//! one phrase can splice its neighbours into a new match
//! (`"goal goal 100 steps 200 steps"`).

use once_cell::sync::Lazy;
use regex::Regex;

/// What a distractor entry removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistractorKind {
    ClockTime,
    TransferRate,
    Goal,
    Average,
}

/// One row of the distractor table.
#[derive(Debug)]
pub struct Distractor {
    pub kind: DistractorKind,
    /// BCP 47-ish tag of the language the pattern is written in; `"*"` for
    /// language-neutral entries.
    pub locale: &'static str,
    pub pattern: Regex,
}

fn entry(kind: DistractorKind, locale: &'static str, pattern: &str) -> Distractor {
    Distractor {
        kind,
        locale,
        pattern: Regex::new(pattern).expect("distractor pattern must compile"),
    }
}

/// The ordered distractor table.
pub static DISTRACTORS: Lazy<Vec<Distractor>> = Lazy::new(|| {
    use DistractorKind::*;
    vec![
        entry(ClockTime, "*", r"\b[0-9]{1,2}:[0-9]{2}\b"),
        entry(
            TransferRate,
            "*",
            r"\b[0-9]+\s*(?:kb/s|mb/s|gb/s|kbps|mbps|gbps)\b",
        ),
        entry(Goal, "en", r"goal\s*[0-9]{1,6}\s*steps"),
        entry(Average, "en", r"average\s*[0-9]{1,6}\s*steps"),
        entry(Goal, "id", r"target\s*[0-9]{1,6}\s*langkah"),
        entry(Average, "id", r"rata-rata\s*[0-9]{1,6}\s*langkah"),
        entry(Goal, "ms", r"matlamat\s*[0-9]{1,6}\s*langkah"),
        entry(Average, "zh", r"平均\s*[0-9]{1,6}\s*步"),
        entry(Goal, "zh", r"(?:目標|目标)\s*[0-9]{1,6}\s*步"),
        entry(Goal, "th", r"เป้าหมาย\s*[0-9]{1,6}\s*ก้าว"),
        entry(Average, "th", r"เฉลี่ย\s*[0-9]{1,6}\s*ก้าว"),
    ]
});

/// Apply every table entry once, in order.
fn strip_once(text: &str) -> String {
    DISTRACTORS.iter().fold(text.to_string(), |acc, d| {
        d.pattern.replace_all(&acc, "").into_owned()
    })
}

/// Delete all distractor substrings from already-normalized text.
///
/// Idempotent: `strip(&strip(s)) == strip(s)`.
pub fn strip(text: &str) -> String {
    let mut current = strip_once(text);
    loop {
        let next = strip_once(&current);
        // Every effective pass shortens the text, so this terminates.
        if next == current {
            return current;
        }
        current = next;
    }
}
