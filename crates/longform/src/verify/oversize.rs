//! Hard size ceiling for persisted fields.

use crate::llm::{CompletionRequest, TextCompletion};
use crate::text::char_prefix;

/// Result of bounding a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bounded {
    pub text: String,
    pub compressed: bool,
    pub truncated: bool,
}

fn marker(omitted: usize) -> String {
    format!("\n\n[truncated: {} characters omitted]", omitted)
}

/// Cuts `text` so that it plus a visible marker fits in `ceiling` chars.
pub fn truncate_with_marker(text: &str, ceiling: usize) -> String {
    let total = text.chars().count();
    if total <= ceiling {
        return text.to_string();
    }
    // Size the marker for the worst case so the final string never overshoots.
    let reserve = marker(total).chars().count();
    if ceiling <= reserve {
        return char_prefix(marker(total).trim_start(), ceiling).to_string();
    }
    let keep = ceiling - reserve;
    let mut out = char_prefix(text, keep).trim_end().to_string();
    let omitted = total - out.chars().count();
    out.push_str(&marker(omitted));
    out
}

/// Brings `text` under `ceiling` characters.
///
/// First a best-effort summarization call; if that fails or is still too
/// large, a deterministic truncation with a marker.
pub async fn enforce_ceiling(llm: &dyn TextCompletion, text: &str, ceiling: usize) -> Bounded {
    if text.chars().count() <= ceiling {
        return Bounded {
            text: text.to_string(),
            compressed: false,
            truncated: false,
        };
    }

    let request = CompletionRequest::new("compress")
        .system(
            "Condense the following Markdown article. Keep every heading and the key facts, \
             cut repetition. Return Markdown only.",
        )
        .user(format!(
            "Keep the result under {} characters.\n\n{}",
            ceiling, text
        ));

    let (candidate, compressed) = match llm.complete(request).await {
        Ok(completion) if !completion.text.trim().is_empty() => {
            (completion.text.trim().to_string(), true)
        }
        Ok(_) => (text.to_string(), false),
        Err(e) => {
            tracing::warn!(error = %e, "Compression pass failed, truncating instead");
            (text.to_string(), false)
        }
    };

    if candidate.chars().count() <= ceiling {
        return Bounded {
            text: candidate,
            compressed,
            truncated: false,
        };
    }

    tracing::warn!(ceiling, "Content still over ceiling, truncating");
    Bounded {
        text: truncate_with_marker(&candidate, ceiling),
        compressed,
        truncated: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::Canned;
    use crate::llm::CompletionError;

    #[test]
    fn test_truncate_with_marker_fits_ceiling() {
        let text = "x".repeat(100_000);
        let out = truncate_with_marker(&text, 60_000);
        assert!(out.chars().count() <= 60_000);
        assert!(out.contains("[truncated: "));
        assert!(out.starts_with("xxxx"));
    }

    #[test]
    fn test_truncate_short_text_untouched() {
        assert_eq!(truncate_with_marker("short", 10), "short");
    }

    #[test]
    fn test_truncate_tiny_ceiling() {
        let out = truncate_with_marker(&"y".repeat(500), 5);
        assert_eq!(out.chars().count(), 5);
        assert!(out.starts_with("[trun"));
    }

    #[tokio::test]
    async fn test_compression_success_skips_truncation() {
        let llm = Canned::texts(&["## A\n\nshort summary"]);
        let bounded = enforce_ceiling(&llm, &"z".repeat(500), 100).await;
        assert_eq!(bounded.text, "## A\n\nshort summary");
        assert!(bounded.compressed);
        assert!(!bounded.truncated);
    }

    #[tokio::test]
    async fn test_compression_failure_falls_back_to_truncation() {
        let llm = Canned::new(vec![Err(CompletionError::provider("down"))]);
        let bounded = enforce_ceiling(&llm, &"z".repeat(100_000), 60_000).await;
        assert!(bounded.truncated);
        assert!(!bounded.compressed);
        assert!(bounded.text.chars().count() <= 60_000);
        assert!(bounded.text.contains("[truncated: "));
    }

    #[tokio::test]
    async fn test_under_ceiling_makes_no_call() {
        let llm = Canned::texts(&[]);
        let bounded = enforce_ceiling(&llm, "small", 100).await;
        assert_eq!(bounded.text, "small");
        assert_eq!(llm.calls(), 0);
    }
}
