//! Keyword accounting: occurrence counts, shortfalls and concatenation smells.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A requested keyword with an optional explicit target count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordSpec {
    pub keyword: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<u32>,
}

impl KeywordSpec {
    pub fn new(keyword: impl Into<String>, target: u32) -> Self {
        Self {
            keyword: keyword.into(),
            target: Some(target),
        }
    }
}

/// Observed vs. target usage of one keyword.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordTarget {
    pub keyword: String,
    pub current: u32,
    pub target: u32,
    pub shortfall: u32,
}

impl KeywordTarget {
    pub fn measure(text: &str, keyword: &str, target: u32) -> Self {
        let current = count_occurrences(text, keyword);
        Self {
            keyword: keyword.to_string(),
            current,
            target,
            shortfall: target.saturating_sub(current),
        }
    }
}

/// Non-overlapping, left-to-right, case-insensitive substring count.
///
/// An empty keyword never matches.
pub fn count_occurrences(text: &str, keyword: &str) -> u32 {
    if keyword.is_empty() {
        return 0;
    }
    let haystack = text.to_lowercase();
    let needle = keyword.to_lowercase();
    haystack.matches(needle.as_str()).count() as u32
}

/// Measures every target and orders them largest gap first.
pub fn compute_shortfalls(text: &str, targets: &[(String, u32)]) -> Vec<KeywordTarget> {
    let mut measured: Vec<KeywordTarget> = targets
        .iter()
        .map(|(keyword, target)| KeywordTarget::measure(text, keyword, *target))
        .collect();
    // Stable: ties keep caller order.
    measured.sort_by(|a, b| b.shortfall.cmp(&a.shortfall));
    measured
}

/// Resolves per-keyword targets, applying `default_target` where none is given.
pub fn resolve_targets(specs: &[KeywordSpec], default_target: u32) -> Vec<(String, u32)> {
    specs
        .iter()
        .filter(|s| !s.keyword.trim().is_empty())
        .map(|s| (s.keyword.trim().to_string(), s.target.unwrap_or(default_target)))
        .collect()
}

static RE_CJK_GAP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\p{Han}\p{Hiragana}\p{Katakana}ー]+[ \t\x{3000}]+[\p{Han}\p{Hiragana}\p{Katakana}ー]+")
        .unwrap()
});

/// Flags keyword-like CJK tokens joined by raw whitespace.
///
/// In CJK prose words are joined by particles, never spaces, so a space
/// between two CJK runs means a keyword phrase was pasted in verbatim.
/// Heading markers are ignored; findings are deduplicated in order.
pub fn detect_awkward_concatenations(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for line in text.lines() {
        let body = line.trim_start_matches('#').trim();
        for m in RE_CJK_GAP.find_iter(body) {
            let phrase = m.as_str().to_string();
            if !found.contains(&phrase) {
                found.push(phrase);
            }
        }
    }
    found
}

/// Natural-language rewrites for a whitespace-joined keyword phrase.
pub fn natural_phrasings(phrase: &str) -> Vec<String> {
    let parts: Vec<&str> = phrase
        .split(|c: char| c.is_whitespace() || c == '\u{3000}')
        .filter(|p| !p.is_empty())
        .collect();

    match parts.as_slice() {
        [a, b] => vec![
            format!("{a}では{b}"),
            format!("{a}で{b}"),
            format!("{a}に取り組んでも{b}"),
            format!("{a}を続けても{b}"),
        ],
        [a, b, c] => vec![
            format!("{a}の{b}で{c}"),
            format!("{a}で{b}を{c}"),
            format!("{a}における{b}の{c}"),
        ],
        _ => vec![parts.concat()],
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{AC00}'..='\u{D7AF}'
    )
}

/// Word count used for length targets.
///
/// Each CJK character counts as one word; every other run of
/// non-whitespace characters counts as one word. Markdown `#` markers are
/// not counted.
pub fn count_words(text: &str) -> usize {
    let mut words = 0;
    let mut in_run = false;
    for c in text.chars() {
        if is_cjk(c) {
            words += 1;
            in_run = false;
        } else if c.is_whitespace() || c == '#' {
            in_run = false;
        } else if !in_run {
            words += 1;
            in_run = true;
        }
    }
    words
}
