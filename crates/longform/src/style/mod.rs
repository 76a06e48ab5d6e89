//! Persona/style profile derived from a user's reference corpus.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::{sanitize_for_prompt, CompletionError, CompletionRequest, TextCompletion};
use crate::sources::{CorpusProvider, SourceError};
use crate::text::char_prefix;

pub mod cache;

pub use cache::StyleProfileCache;

/// Default cap on reference text fed into analysis.
pub const DEFAULT_CORPUS_CAP_CHARS: usize = 50_000;

#[derive(Error, Debug)]
pub enum StyleError {
    #[error("No reference data for user '{user_id}'")]
    NoReferenceData { user_id: String },

    #[error("Style profile generation failed: {0}")]
    ProfileGeneration(String),

    #[error("Reference corpus unavailable: {0}")]
    Corpus(#[from] SourceError),
}

/// Writing-style descriptor used to condition every generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleProfile {
    pub tone: String,
    pub vocabulary: Vec<String>,
    pub sentence_structure: String,
    pub punctuation: String,
    pub perspective: String,
    pub characteristics: Vec<String>,
    pub style_guide: String,
}

impl StyleProfile {
    /// Prompt block instructing the model to write in this style.
    pub fn instructions(&self) -> String {
        let mut out = String::from("Write in the following style.\n");
        out.push_str(&format!("- Tone: {}\n", self.tone));
        if !self.vocabulary.is_empty() {
            out.push_str(&format!(
                "- Characteristic vocabulary: {}\n",
                self.vocabulary.join(", ")
            ));
        }
        out.push_str(&format!("- Sentence structure: {}\n", self.sentence_structure));
        out.push_str(&format!("- Punctuation: {}\n", self.punctuation));
        out.push_str(&format!("- Perspective: {}\n", self.perspective));
        for trait_ in &self.characteristics {
            out.push_str(&format!("- {}\n", trait_));
        }
        if !self.style_guide.trim().is_empty() {
            out.push_str("\nStyle guide:\n");
            out.push_str(self.style_guide.trim());
            out.push('\n');
        }
        out
    }

    fn json_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["tone", "vocabulary", "sentenceStructure", "punctuation",
                         "perspective", "characteristics", "styleGuide"],
            "properties": {
                "tone": { "type": "string" },
                "vocabulary": { "type": "array", "items": { "type": "string" } },
                "sentenceStructure": { "type": "string" },
                "punctuation": { "type": "string" },
                "perspective": { "type": "string" },
                "characteristics": { "type": "array", "items": { "type": "string" } },
                "styleGuide": { "type": "string" }
            }
        })
    }
}

const SYSTEM_PROMPT: &str = "You are an editor who analyzes writing style. \
Describe the author's tone, characteristic vocabulary, sentence structure, \
punctuation habits, narrative perspective and distinctive traits, then write \
a short style guide another writer could follow. Respond with JSON only.";

/// Builds a [`StyleProfile`] with a single structured completion call.
pub struct StyleProfileBuilder {
    corpus_cap_chars: usize,
}

impl Default for StyleProfileBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_CORPUS_CAP_CHARS)
    }
}

impl StyleProfileBuilder {
    pub fn new(corpus_cap_chars: usize) -> Self {
        Self { corpus_cap_chars }
    }

    /// Fetches the user's corpus and analyzes it.
    pub async fn build_for_user(
        &self,
        llm: &dyn TextCompletion,
        corpus: &dyn CorpusProvider,
        user_id: &str,
    ) -> Result<StyleProfile, StyleError> {
        let text = corpus.reference_corpus(user_id).await?;
        if text.trim().is_empty() {
            return Err(StyleError::NoReferenceData {
                user_id: user_id.to_string(),
            });
        }
        self.build(llm, &text).await
    }

    /// Analyzes `corpus`, truncated front-to-back to the configured cap.
    pub async fn build(
        &self,
        llm: &dyn TextCompletion,
        corpus: &str,
    ) -> Result<StyleProfile, StyleError> {
        if corpus.trim().is_empty() {
            return Err(StyleError::NoReferenceData {
                user_id: String::new(),
            });
        }

        let sample = char_prefix(corpus, self.corpus_cap_chars);
        tracing::debug!(
            corpus_chars = corpus.chars().count(),
            sample_chars = sample.chars().count(),
            "Analyzing reference corpus"
        );

        let request = CompletionRequest::new("style_profile")
            .system(SYSTEM_PROMPT)
            .user(format!(
                "Reference text:\n<<<\n{}\n>>>",
                sanitize_for_prompt(sample)
            ))
            .schema("style_profile", StyleProfile::json_schema());

        let completion = llm.complete(request).await.map_err(|e| match e {
            CompletionError::MalformedOutput(msg) => StyleError::ProfileGeneration(msg),
            other => StyleError::ProfileGeneration(other.to_string()),
        })?;

        completion
            .parse_json::<StyleProfile>()
            .map_err(|e| StyleError::ProfileGeneration(e.to_string()))
    }
}
