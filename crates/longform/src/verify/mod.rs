//! Constraint verification of an assembled document.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::keywords::{compute_shortfalls, count_words, detect_awkward_concatenations, KeywordTarget};

pub mod cleanup;
pub mod oversize;
pub mod rewriter;

pub use cleanup::tidy_document;
pub use oversize::{enforce_ceiling, truncate_with_marker, Bounded};
pub use rewriter::{RewriteBrief, RewriteError, Rewriter};

static RE_KEYWORD_LISTING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*[^*\n]+\*\*\s*[、,]\s*\*\*[^*\n]+\*\*").unwrap());

/// Accepted distance from the targets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tolerance {
    /// Allowed relative deviation of the word count, e.g. `0.10` for ±10%.
    pub word_ratio: f32,
    /// Allowed deviation in top-level section count.
    pub sections: u32,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            word_ratio: 0.10,
            sections: 2,
        }
    }
}

impl Tolerance {
    pub fn word_bounds(&self, target: u32) -> (usize, usize) {
        let slack = (target as f32 * self.word_ratio).round() as usize;
        let target = target as usize;
        (target.saturating_sub(slack), target + slack)
    }
}

/// One finding of a verification pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum QualityIssue {
    #[serde(rename_all = "camelCase")]
    KeywordShortfall {
        keyword: String,
        current: u32,
        target: u32,
        shortfall: u32,
    },
    #[serde(rename_all = "camelCase")]
    TooShort {
        observed: usize,
        target: u32,
        percent: u32,
    },
    #[serde(rename_all = "camelCase")]
    TooLong {
        observed: usize,
        target: u32,
        percent: u32,
    },
    AwkwardConcatenation { phrase: String },
    KeywordListing { excerpt: String },
    HorizontalRule { count: usize },
}

impl QualityIssue {
    /// Blocking issues fail the check; the rest are advisory.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            QualityIssue::KeywordShortfall { .. }
                | QualityIssue::TooShort { .. }
                | QualityIssue::TooLong { .. }
        )
    }
}

impl fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityIssue::KeywordShortfall {
                keyword, shortfall, ..
            } => write!(f, "keyword '{}' under target by {}", keyword, shortfall),
            QualityIssue::TooShort { percent, .. } => {
                write!(f, "document {}% short of target length", percent)
            }
            QualityIssue::TooLong { percent, .. } => {
                write!(f, "document {}% over target length", percent)
            }
            QualityIssue::AwkwardConcatenation { phrase } => {
                write!(f, "awkward keyword concatenation: '{}'", phrase)
            }
            QualityIssue::KeywordListing { excerpt } => {
                write!(f, "keywords listed instead of used: '{}'", excerpt)
            }
            QualityIssue::HorizontalRule { count } => {
                write!(f, "{} horizontal rule(s) in body", count)
            }
        }
    }
}

/// Verdict of one verification pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityCheck {
    pub passed: bool,
    pub word_count: usize,
    pub h2_count: usize,
    pub h3_count: usize,
    pub keywords: Vec<KeywordTarget>,
    pub issues: Vec<QualityIssue>,
}

impl QualityCheck {
    /// Keywords still below target, largest gap first.
    pub fn shortfalls(&self) -> impl Iterator<Item = &KeywordTarget> {
        self.keywords.iter().filter(|k| k.shortfall > 0)
    }

    pub fn blocking_issues(&self) -> impl Iterator<Item = &QualityIssue> {
        self.issues.iter().filter(|i| i.is_blocking())
    }
}

pub(crate) fn heading_counts(document: &str) -> (usize, usize) {
    document.lines().fold((0, 0), |(h2, h3), line| {
        let line = line.trim_start();
        if line.starts_with("### ") {
            (h2, h3 + 1)
        } else if line.starts_with("## ") {
            (h2 + 1, h3)
        } else {
            (h2, h3)
        }
    })
}

pub(crate) fn is_horizontal_rule(line: &str) -> bool {
    let trimmed: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    let mut chars = trimmed.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    matches!(first, '-' | '*' | '=' | '_' | '━' | '─')
        && trimmed.chars().count() >= 3
        && chars.all(|c| c == first)
}

/// Measures documents against length and keyword targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verifier {
    tolerance: Tolerance,
}

impl Verifier {
    pub fn new(tolerance: Tolerance) -> Self {
        Self { tolerance }
    }

    pub fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    /// Pure: the same input always yields the same verdict.
    pub fn check(
        &self,
        document: &str,
        targets: &[(String, u32)],
        target_word_count: u32,
    ) -> QualityCheck {
        let word_count = count_words(document);
        let (h2_count, h3_count) = heading_counts(document);
        let keywords = compute_shortfalls(document, targets);

        let mut issues: Vec<QualityIssue> = keywords
            .iter()
            .filter(|k| k.shortfall > 0)
            .map(|k| QualityIssue::KeywordShortfall {
                keyword: k.keyword.clone(),
                current: k.current,
                target: k.target,
                shortfall: k.shortfall,
            })
            .collect();

        let (low, high) = self.tolerance.word_bounds(target_word_count);
        let target = target_word_count.max(1) as usize;
        if word_count < low {
            issues.push(QualityIssue::TooShort {
                observed: word_count,
                target: target_word_count,
                percent: ((target - word_count) * 100 / target) as u32,
            });
        } else if word_count > high {
            issues.push(QualityIssue::TooLong {
                observed: word_count,
                target: target_word_count,
                percent: ((word_count - target) * 100 / target) as u32,
            });
        }

        issues.extend(
            detect_awkward_concatenations(document)
                .into_iter()
                .map(|phrase| QualityIssue::AwkwardConcatenation { phrase }),
        );
        issues.extend(
            RE_KEYWORD_LISTING
                .find_iter(document)
                .map(|m| QualityIssue::KeywordListing {
                    excerpt: m.as_str().to_string(),
                }),
        );
        let rules = document.lines().filter(|l| is_horizontal_rule(l)).count();
        if rules > 0 {
            issues.push(QualityIssue::HorizontalRule { count: rules });
        }

        let passed = !issues.iter().any(QualityIssue::is_blocking);

        QualityCheck {
            passed,
            word_count,
            h2_count,
            h3_count,
            keywords,
            issues,
        }
    }
}
