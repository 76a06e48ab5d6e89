//! Corrective rewrite pass driven by a failed quality check.

use thiserror::Error;

use super::{heading_counts, QualityCheck, QualityIssue};
use crate::keywords::natural_phrasings;
use crate::llm::json::strip_code_fences;
use crate::llm::{sanitize_for_prompt, CompletionError, CompletionRequest, TextCompletion};
use crate::style::StyleProfile;

#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("Rewrite call failed: {0}")]
    Completion(#[from] CompletionError),

    #[error("Rewrite rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Default)]
pub struct RewriteBrief<'a> {
    pub theme: &'a str,
    pub target_word_count: u32,
    pub style: Option<&'a StyleProfile>,
    pub persona: Option<&'a str>,
    pub max_output_tokens: Option<u32>,
}

pub struct Rewriter {
    /// Smallest accepted output length relative to the input.
    min_length_ratio: f32,
}

impl Default for Rewriter {
    fn default() -> Self {
        Self {
            min_length_ratio: 0.5,
        }
    }
}

impl Rewriter {
    /// One corrective pass over the full document.
    pub async fn rewrite(
        &self,
        llm: &dyn TextCompletion,
        document: &str,
        check: &QualityCheck,
        brief: &RewriteBrief<'_>,
    ) -> Result<String, RewriteError> {
        let mut request = CompletionRequest::new("rewrite")
            .system(self.system_prompt(brief))
            .user(self.user_prompt(document, check, brief));
        if let Some(max) = brief.max_output_tokens {
            request = request.max_output_tokens(max);
        }

        let completion = llm.complete(request).await?;
        let rewritten = strip_code_fences(&completion.text).to_string();
        self.accept(document, &rewritten)?;
        Ok(rewritten)
    }

    /// Rejects output that lost structure or most of the text.
    fn accept(&self, original: &str, rewritten: &str) -> Result<(), RewriteError> {
        let (before_h2, _) = heading_counts(original);
        let (after_h2, _) = heading_counts(rewritten);
        if after_h2 < before_h2 {
            return Err(RewriteError::Rejected(format!(
                "top-level sections dropped from {} to {}",
                before_h2, after_h2
            )));
        }

        let before = original.chars().count() as f32;
        let after = rewritten.chars().count() as f32;
        if after < before * self.min_length_ratio {
            return Err(RewriteError::Rejected(format!(
                "output shrank to {:.0}% of the input",
                after / before.max(1.0) * 100.0
            )));
        }
        Ok(())
    }

    fn system_prompt(&self, brief: &RewriteBrief<'_>) -> String {
        let mut system = String::from(
            "You are an editor revising a long article so it meets measurable targets. \
             Keep every heading, in order and with the same wording. \
             Keep the author's voice. Return the complete revised article in Markdown only.\n",
        );
        if let Some(persona) = brief.persona {
            system.push_str(&format!("The author is: {}\n", sanitize_for_prompt(persona)));
        }
        if let Some(style) = brief.style {
            system.push('\n');
            system.push_str(&style.instructions());
        }
        system
    }

    fn user_prompt(&self, document: &str, check: &QualityCheck, brief: &RewriteBrief<'_>) -> String {
        let mut prompt = format!(
            "Theme: {}\nTarget length: {} words (currently {}).\n\n",
            sanitize_for_prompt(brief.theme),
            brief.target_word_count,
            check.word_count
        );

        let shortfalls: Vec<_> = check.shortfalls().collect();
        if !shortfalls.is_empty() {
            prompt.push_str("Keywords below target, most urgent first:\n");
            for k in &shortfalls {
                prompt.push_str(&format!(
                    "- \"{}\": used {} times, needs at least {} (add {})\n",
                    k.keyword, k.current, k.target, k.shortfall
                ));
            }
            prompt.push_str(
                "Add them by expanding the passages where they fit: new explanations, \
                 examples or steps. Do not just splice the keywords into existing sentences \
                 and never list keywords in bold separated by commas.\n\n",
            );
        }

        for issue in &check.issues {
            match issue {
                QualityIssue::TooShort { observed, target, .. } => prompt.push_str(&format!(
                    "The article is {} words short. Expand the thinnest sections with substance.\n\n",
                    *target as usize - observed
                )),
                QualityIssue::TooLong { observed, target, .. } => prompt.push_str(&format!(
                    "The article is {} words too long. Tighten repetitive passages.\n\n",
                    observed - *target as usize
                )),
                _ => {}
            }
        }

        let awkward: Vec<&str> = check
            .issues
            .iter()
            .filter_map(|i| match i {
                QualityIssue::AwkwardConcatenation { phrase } => Some(phrase.as_str()),
                _ => None,
            })
            .collect();
        if !awkward.is_empty() {
            prompt.push_str("These phrases paste words together with a space. Rephrase them naturally:\n");
            for phrase in awkward {
                let examples = natural_phrasings(phrase);
                prompt.push_str(&format!("- \"{}\" → e.g. {}\n", phrase, examples.join(" / ")));
            }
            prompt.push('\n');
        }

        prompt.push_str(&format!("Article:\n<<<\n{}\n>>>", document));
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::Canned;
    use crate::verify::Verifier;

    fn failing_check(document: &str) -> QualityCheck {
        Verifier::default().check(
            document,
            &[("foo".into(), 5), ("bar".into(), 1)],
            40,
        )
    }

    #[tokio::test]
    async fn test_prompt_prioritizes_largest_shortfall() {
        let doc = "## A\n\nsome text here\n\n## B\n\n副業 稼げない話";
        let check = failing_check(doc);
        let rewritten = "## A\n\nsome text here with foo\n\n## B\n\nmore text";
        let llm = Canned::texts(&[rewritten]);

        let out = Rewriter::default()
            .rewrite(&llm, doc, &check, &RewriteBrief::default())
            .await
            .unwrap();
        assert_eq!(out, rewritten);

        let prompt = llm.requests.lock().unwrap()[0].user_text();
        let foo = prompt.find("\"foo\"").unwrap();
        let bar = prompt.find("\"bar\"").unwrap();
        assert!(foo < bar);
        assert!(prompt.contains("add 5"));
        assert!(prompt.contains("副業では稼げない話"));
        assert!(prompt.contains("words short"));
    }

    #[tokio::test]
    async fn test_rejects_output_that_drops_sections() {
        let doc = "## A\n\ntext\n\n## B\n\ntext";
        let llm = Canned::texts(&["## A\n\ntext text text text text"]);
        let err = Rewriter::default()
            .rewrite(&llm, doc, &failing_check(doc), &RewriteBrief::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RewriteError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_rejects_output_that_shrinks_too_much() {
        let doc = format!("## A\n\n{}", "long text ".repeat(50));
        let llm = Canned::texts(&["## A\n\nshort"]);
        let err = Rewriter::default()
            .rewrite(&llm, &doc, &failing_check(&doc), &RewriteBrief::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RewriteError::Rejected(msg) if msg.contains("shrank")));
    }
}
