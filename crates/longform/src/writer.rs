//! Chunked section writer.
//!
//! Sections are written strictly in outline order: every call sees the tail
//! of everything written before it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keywords::count_words;
use crate::llm::{sanitize_for_prompt, CompletionError, CompletionRequest, TextCompletion};
use crate::planner::Outline;
use crate::style::StyleProfile;
use crate::text::char_suffix;

#[derive(Error, Debug)]
#[error("Section {index} generation failed: {source}")]
pub struct SectionGenerationError {
    pub index: usize,
    #[source]
    pub source: CompletionError,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriterSettings {
    /// Characters of prior text handed to each call.
    pub trailing_context_chars: usize,
    /// Largest share a single call is asked to produce.
    pub single_call_max_words: u32,
    /// Hard ceiling relative to a call's target length.
    pub ceiling_ratio: f32,
    pub tokens_per_word: f32,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            trailing_context_chars: 1000,
            single_call_max_words: 2500,
            ceiling_ratio: 1.2,
            tokens_per_word: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Generating,
    Completed,
}

/// One bounded piece of an oversized section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChunk {
    pub index: usize,
    pub text: String,
    pub word_count: usize,
    pub status: ChunkStatus,
}

/// Everything the writer needs besides the section index.
#[derive(Debug, Clone, Default)]
pub struct WritingBrief<'a> {
    pub theme: &'a str,
    pub outline: Option<&'a Outline>,
    pub style: Option<&'a StyleProfile>,
    pub persona: Option<&'a str>,
    pub keywords: &'a [(String, u32)],
    pub target_word_count: u32,
    pub remarks: Option<&'a str>,
    pub offer: Option<&'a str>,
}

/// Splits `total` words across `sections`; the last one takes the remainder.
pub fn section_shares(total: u32, sections: usize) -> Vec<u32> {
    if sections == 0 {
        return Vec::new();
    }
    let n = sections as u32;
    let base = total / n;
    let mut shares = vec![base; sections];
    if let Some(last) = shares.last_mut() {
        *last += total - base * n;
    }
    shares
}

/// Joins the title and finished sections into the document text.
pub fn assemble_document(title: Option<&str>, sections: &[String]) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(sections.len() + 1);
    if let Some(title) = title.filter(|t| !t.trim().is_empty()) {
        parts.push(format!("# {}", title.trim()));
    }
    parts.extend(sections.iter().map(|s| s.trim().to_string()));
    parts.join("\n\n")
}

pub struct SectionWriter {
    settings: WriterSettings,
}

impl SectionWriter {
    pub fn new(settings: WriterSettings) -> Self {
        Self { settings }
    }

    /// Writes section `index`, given the sections already written before it.
    pub async fn write_section(
        &self,
        llm: &dyn TextCompletion,
        brief: &WritingBrief<'_>,
        index: usize,
        written: &[String],
    ) -> Result<String, SectionGenerationError> {
        let outline = brief.outline.ok_or_else(|| SectionGenerationError {
            index,
            source: CompletionError::MalformedOutput("no outline to write from".into()),
        })?;
        let section = outline.sections.get(index).ok_or_else(|| SectionGenerationError {
            index,
            source: CompletionError::MalformedOutput(format!("outline has no section {}", index)),
        })?;

        let share = section_shares(brief.target_word_count, outline.sections.len())[index];
        let chunk_targets = self.chunk_targets(share);
        let mut context = assemble_document(outline.title.as_deref(), written);
        let mut chunks: Vec<ContentChunk> = Vec::with_capacity(chunk_targets.len());

        tracing::debug!(
            section = index,
            share,
            chunks = chunk_targets.len(),
            "Writing section"
        );

        for (chunk_index, target) in chunk_targets.iter().enumerate() {
            let mut chunk = ContentChunk {
                index: chunk_index,
                text: String::new(),
                word_count: 0,
                status: ChunkStatus::Generating,
            };

            let request = self.chunk_request(
                brief,
                outline,
                index,
                chunk_index,
                chunk_targets.len(),
                *target,
                &context,
            );
            let completion = llm
                .complete(request)
                .await
                .map_err(|source| SectionGenerationError { index, source })?;

            chunk.text = if chunk_index == 0 {
                strip_title_line(&completion.text).trim().to_string()
            } else {
                strip_leading_headings(&completion.text).trim().to_string()
            };
            chunk.word_count = count_words(&chunk.text);
            chunk.status = ChunkStatus::Completed;

            if !context.is_empty() {
                context.push_str("\n\n");
            }
            context.push_str(&chunk.text);
            chunks.push(chunk);
        }

        let body = chunks
            .into_iter()
            .filter(|c| c.status == ChunkStatus::Completed)
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(ensure_heading(&body, &section.heading()))
    }

    fn chunk_targets(&self, share: u32) -> Vec<u32> {
        let max = self.settings.single_call_max_words.max(1);
        let count = share.div_ceil(max).max(1) as usize;
        section_shares(share, count)
    }

    fn max_output_tokens(&self, target_words: u32) -> u32 {
        let ceiling = self.ceiling_words(target_words) as f32;
        ((ceiling * self.settings.tokens_per_word).ceil() as u32).max(256)
    }

    fn ceiling_words(&self, target_words: u32) -> u32 {
        (target_words as f32 * self.settings.ceiling_ratio).round() as u32
    }

    #[allow(clippy::too_many_arguments)]
    fn chunk_request(
        &self,
        brief: &WritingBrief<'_>,
        outline: &Outline,
        index: usize,
        chunk_index: usize,
        chunk_count: usize,
        target: u32,
        context: &str,
    ) -> CompletionRequest {
        let section = &outline.sections[index];
        let ceiling = self.ceiling_words(target);

        let mut system = String::from(
            "You are a professional writer producing one part of a long article. \
             Write in Markdown. Keep the outline's headings exactly as given.\n",
        );
        if let Some(persona) = brief.persona {
            system.push_str(&format!("You write as: {}\n", sanitize_for_prompt(persona)));
        }
        if let Some(style) = brief.style {
            system.push('\n');
            system.push_str(&style.instructions());
        }

        let mut user = format!(
            "Article theme: {}\n\nFull outline:\n{}\n\n",
            sanitize_for_prompt(brief.theme),
            outline.to_markdown()
        );

        if chunk_count > 1 {
            user.push_str(&format!(
                "Write part {} of {} of this section:\n{}\n",
                chunk_index + 1,
                chunk_count,
                section.to_markdown()
            ));
        } else {
            user.push_str(&format!("Write this section:\n{}\n", section.to_markdown()));
        }

        user.push_str(&format!(
            "Length: about {} words, never more than {}.\n",
            target, ceiling
        ));

        if !brief.keywords.is_empty() {
            let sections = outline.sections.len().max(1) as u32;
            user.push_str("Work these keywords in naturally, inside real sentences:\n");
            for (keyword, total) in brief.keywords {
                user.push_str(&format!(
                    "- {} (about {} times here)\n",
                    sanitize_for_prompt(keyword),
                    total.div_ceil(sections)
                ));
            }
        }

        if index == 0 && chunk_index == 0 {
            user.push_str("Open with the section heading, then the text.\n");
        } else {
            user.push_str(
                "This continues an article already in progress. Do not greet the reader, \
                 do not introduce yourself again and do not repeat earlier content.\n",
            );
        }
        if chunk_index > 0 {
            user.push_str("Do not repeat the section heading; continue the text directly.\n");
        }

        if index + 1 == outline.sections.len() {
            if let Some(offer) = brief.offer {
                user.push_str(&format!(
                    "Close by pointing the reader to: {}\n",
                    sanitize_for_prompt(offer)
                ));
            }
        }
        if let Some(remarks) = brief.remarks {
            user.push_str(&format!("Remarks: {}\n", sanitize_for_prompt(remarks)));
        }

        let tail = char_suffix(context, self.settings.trailing_context_chars);
        if !tail.is_empty() {
            user.push_str(&format!("\nThe text so far ends with:\n<<<\n{}\n>>>\n", tail));
        }

        CompletionRequest::new("write_section")
            .system(system)
            .user(user)
            .max_output_tokens(self.max_output_tokens(target))
    }
}

fn strip_title_line(text: &str) -> &str {
    let trimmed = text.trim_start();
    match trimmed.strip_prefix("# ") {
        Some(rest) => rest.split_once('\n').map(|(_, body)| body).unwrap_or(""),
        None => trimmed,
    }
}

fn strip_leading_headings(text: &str) -> &str {
    let mut rest = text.trim_start();
    while rest.starts_with("# ") || rest.starts_with("## ") {
        rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("").trim_start();
    }
    rest
}

/// Makes `heading` the first line, replacing a differently worded `##` line.
fn ensure_heading(body: &str, heading: &str) -> String {
    let body = body.trim();
    if body.starts_with("## ") {
        let rest = body.split_once('\n').map(|(_, r)| r).unwrap_or("").trim_start();
        if rest.is_empty() {
            return heading.to_string();
        }
        return format!("{}\n\n{}", heading, rest);
    }
    if body.is_empty() {
        return heading.to_string();
    }
    format!("{}\n\n{}", heading, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::Canned;
    use crate::planner::parse_structure;

    #[test]
    fn test_section_shares_last_absorbs_remainder() {
        assert_eq!(section_shares(6000, 5), vec![1200; 5]);
        assert_eq!(section_shares(1003, 4), vec![250, 250, 250, 253]);
        assert_eq!(section_shares(10, 0), Vec::<u32>::new());
        assert_eq!(section_shares(1003, 4).iter().sum::<u32>(), 1003);
    }

    #[test]
    fn test_assemble_document() {
        let doc = assemble_document(Some("T"), &["## A\n\na".into(), "## B\n\nb\n".into()]);
        assert_eq!(doc, "# T\n\n## A\n\na\n\n## B\n\nb");
        assert_eq!(assemble_document(None, &[]), "");
    }

    #[test]
    fn test_ensure_heading() {
        assert_eq!(ensure_heading("body", "## A"), "## A\n\nbody");
        assert_eq!(ensure_heading("## Wrong\nbody", "## A"), "## A\n\nbody");
        assert_eq!(ensure_heading("", "## A"), "## A");
    }

    #[test]
    fn test_strip_helpers() {
        assert_eq!(strip_title_line("# Title\nbody"), "body");
        assert_eq!(strip_title_line("body"), "body");
        assert_eq!(strip_leading_headings("## A\n## B\ntext"), "text");
    }

    #[tokio::test]
    async fn test_write_section_carries_trailing_context_and_no_greeting() {
        let outline = parse_structure("# T\n## One\n## Two");
        let llm = Canned::texts(&["Second section text."]);
        let writer = SectionWriter::new(WriterSettings {
            trailing_context_chars: 14,
            ..WriterSettings::default()
        });
        let brief = WritingBrief {
            theme: "X",
            outline: Some(&outline),
            target_word_count: 1000,
            ..Default::default()
        };

        let written = vec!["## One\n\nfirst body ends HERE".to_string()];
        let text = writer.write_section(&llm, &brief, 1, &written).await.unwrap();
        assert_eq!(text, "## Two\n\nSecond section text.");

        let requests = llm.requests.lock().unwrap();
        let user = requests[0].user_text();
        assert!(user.contains("<<<\nbody ends HERE\n>>>"));
        assert!(user.contains("Do not greet the reader"));
        assert!(user.contains("never more than 600"));
        assert_eq!(requests[0].max_output_tokens, Some(1200));
    }

    #[tokio::test]
    async fn test_oversized_section_is_split_into_chunks() {
        let outline = parse_structure("## Only");
        let llm = Canned::texts(&["## Only\npart one", "## Only\npart two", "part three"]);
        let writer = SectionWriter::new(WriterSettings {
            single_call_max_words: 1000,
            ..WriterSettings::default()
        });
        let brief = WritingBrief {
            theme: "X",
            outline: Some(&outline),
            target_word_count: 2500,
            ..Default::default()
        };

        let text = writer.write_section(&llm, &brief, 0, &[]).await.unwrap();
        assert_eq!(text, "## Only\n\npart one\n\npart two\n\npart three");
        assert_eq!(llm.calls(), 3);

        let requests = llm.requests.lock().unwrap();
        assert!(requests[0].user_text().contains("Write part 1 of 3"));
        assert!(requests[2].user_text().contains("part two"));
        assert!(requests[2].user_text().contains("about 834 words"));
    }

    #[tokio::test]
    async fn test_failure_carries_section_index() {
        let outline = parse_structure("## A\n## B\n## C");
        let llm = Canned::new(vec![Err(CompletionError::provider("down"))]);
        let writer = SectionWriter::new(WriterSettings::default());
        let brief = WritingBrief {
            outline: Some(&outline),
            target_word_count: 900,
            ..Default::default()
        };

        let err = writer.write_section(&llm, &brief, 2, &[]).await.unwrap_err();
        assert_eq!(err.index, 2);
    }
}
