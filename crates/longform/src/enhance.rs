//! Optional post-verification extras: FAQ and meta description.

use serde::{Deserialize, Serialize};

use crate::llm::{sanitize_for_prompt, CompletionError, CompletionRequest, TextCompletion};
use crate::text::char_prefix;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaqEntry {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enhancements {
    pub meta_description: String,
    #[serde(default)]
    pub faq: Vec<FaqEntry>,
}

impl Enhancements {
    /// schema.org FAQPage JSON-LD for the FAQ entries.
    pub fn faq_json_ld(&self) -> serde_json::Value {
        serde_json::json!({
            "@context": "https://schema.org",
            "@type": "FAQPage",
            "mainEntity": self.faq.iter().map(|f| serde_json::json!({
                "@type": "Question",
                "name": f.question,
                "acceptedAnswer": { "@type": "Answer", "text": f.answer }
            })).collect::<Vec<_>>()
        })
    }

    fn stored_len(&self) -> usize {
        serde_json::to_string(self).map_or(0, |s| s.chars().count())
    }

    /// Drops trailing FAQ entries, then shortens the meta description, until
    /// the stored form fits in `ceiling` chars. Returns whether anything was cut.
    pub fn fit_within(&mut self, ceiling: usize) -> bool {
        let mut trimmed = false;
        while self.stored_len() > ceiling && self.faq.pop().is_some() {
            trimmed = true;
        }
        let over = self.stored_len().saturating_sub(ceiling);
        if over > 0 {
            let keep = self.meta_description.chars().count().saturating_sub(over);
            self.meta_description = char_prefix(&self.meta_description, keep).to_string();
            trimmed = true;
        }
        trimmed
    }
}

/// Characters of the article shown to the enhancement call.
const EXCERPT_CHARS: usize = 12_000;

/// Generates a meta description and FAQ for a finished article.
pub async fn enhance(
    llm: &dyn TextCompletion,
    theme: &str,
    document: &str,
) -> Result<Enhancements, CompletionError> {
    let request = CompletionRequest::new("enhance")
        .system(
            "You write SEO metadata. Given an article, produce a meta description of at most \
             120 characters and three to five FAQ entries answered from the article. JSON only.",
        )
        .user(format!(
            "Theme: {}\n\nArticle:\n<<<\n{}\n>>>",
            sanitize_for_prompt(theme),
            char_prefix(document, EXCERPT_CHARS)
        ))
        .schema(
            "enhancements",
            serde_json::json!({
                "type": "object",
                "required": ["metaDescription", "faq"],
                "properties": {
                    "metaDescription": { "type": "string" },
                    "faq": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["question", "answer"],
                            "properties": {
                                "question": { "type": "string" },
                                "answer": { "type": "string" }
                            }
                        }
                    }
                }
            }),
        );

    llm.complete(request).await?.parse_json()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::Canned;

    #[tokio::test]
    async fn test_enhance_parses_response() {
        let llm = Canned::texts(&[r#"{"metaDescription": "All about X.",
            "faq": [{"question": "What is X?", "answer": "A thing."}]}"#]);
        let result = enhance(&llm, "X", "## A\n\ntext").await.unwrap();
        assert_eq!(result.meta_description, "All about X.");
        assert_eq!(result.faq.len(), 1);

        let ld = result.faq_json_ld();
        assert_eq!(ld["@type"], "FAQPage");
        assert_eq!(ld["mainEntity"][0]["name"], "What is X?");
    }

    #[test]
    fn test_fit_within_drops_faq_then_meta() {
        let mut enhancements = Enhancements {
            meta_description: "m".repeat(50),
            faq: (0..5)
                .map(|i| FaqEntry {
                    question: format!("Q{}?", i),
                    answer: "a".repeat(30),
                })
                .collect(),
        };
        let full = enhancements.stored_len();
        assert!(!enhancements.fit_within(full));

        assert!(enhancements.fit_within(full - 10));
        assert_eq!(enhancements.faq.len(), 4);
        assert_eq!(enhancements.meta_description.len(), 50);

        assert!(enhancements.fit_within(60));
        assert!(enhancements.faq.is_empty());
        assert!(enhancements.stored_len() <= 60);
    }

    #[tokio::test]
    async fn test_enhance_sanitizes_theme() {
        let llm = Canned::texts(&[r#"{"metaDescription": "M", "faq": []}"#]);
        enhance(&llm, "<|im_start|>X", "text").await.unwrap();
        let requests = llm.requests.lock().unwrap();
        let prompt = requests[0].user_text();
        assert!(!prompt.contains("<|im_start|>"));
    }

    #[tokio::test]
    async fn test_enhance_malformed_output() {
        let llm = Canned::texts(&["not json"]);
        let err = enhance(&llm, "X", "text").await.unwrap_err();
        assert!(matches!(err, CompletionError::MalformedOutput(_)));
    }
}
