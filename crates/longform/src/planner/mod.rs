//! Structure planner: theme and targets in, outline plus estimates out.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::{sanitize_for_prompt, CompletionError, CompletionRequest, TextCompletion};
use crate::style::StyleProfile;

pub mod outline;

pub use outline::{parse_structure, sanitize_outline_payload, Outline, Section, Subsection};

#[derive(Error, Debug)]
pub enum PlanningError {
    #[error("Planner call failed: {0}")]
    Completion(#[from] CompletionError),

    #[error("Planner output contained no top-level sections")]
    NoSections,

    #[error("Planner produced {got} top-level sections, expected {target} ± {tolerance}")]
    SectionCountOutOfRange { got: usize, target: u32, tolerance: u32 },
}

impl PlanningError {
    /// Note appended to the next planning prompt after this failure.
    pub fn correction_note(&self) -> String {
        match self {
            PlanningError::Completion(CompletionError::MalformedOutput(msg)) => format!(
                "Your previous answer could not be parsed ({}). Follow the output format exactly.",
                msg
            ),
            PlanningError::Completion(_) => String::new(),
            PlanningError::NoSections => "Your previous answer contained no `## ` sections. \
                 Every outline needs top-level `## ` headings."
                .to_string(),
            PlanningError::SectionCountOutOfRange { got, target, .. } => format!(
                "Your previous outline had {} top-level sections; produce about {}.",
                got, target
            ),
        }
    }
}

/// Heading-count targets derived from the requested length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanTargets {
    pub h2: u32,
    pub h3: u32,
}

/// How heading targets scale with word count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeadingDensity {
    pub words_per_h2: u32,
    pub min_h2: u32,
    pub words_per_h3: u32,
    pub min_h3: u32,
}

impl Default for HeadingDensity {
    fn default() -> Self {
        Self {
            words_per_h2: 3000,
            min_h2: 5,
            words_per_h3: 1000,
            min_h3: 15,
        }
    }
}

impl PlanTargets {
    pub fn for_word_count(words: u32, density: &HeadingDensity) -> Self {
        Self {
            h2: words.div_ceil(density.words_per_h2.max(1)).max(density.min_h2),
            h3: words.div_ceil(density.words_per_h3.max(1)).max(density.min_h3),
        }
    }
}

/// Planner's self-reported numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEstimates {
    #[serde(default, alias = "wordCount", alias = "totalWordCount")]
    pub total_words: u32,
    #[serde(default, alias = "h2")]
    pub h2_count: u32,
    #[serde(default, alias = "h3")]
    pub h3_count: u32,
    #[serde(default, alias = "keywords")]
    pub keyword_usage: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub outline: Outline,
    pub estimates: PlanEstimates,
}

/// Inputs for one planning call.
#[derive(Debug, Clone, Default)]
pub struct PlanRequest<'a> {
    pub theme: &'a str,
    pub target_word_count: u32,
    pub targets: Option<PlanTargets>,
    pub keywords: &'a [(String, u32)],
    pub remarks: Option<&'a str>,
    pub offer: Option<&'a str>,
    pub context: Option<&'a str>,
    pub persona: Option<&'a str>,
    pub style: Option<&'a StyleProfile>,
    /// Feedback from a previous failed attempt.
    pub correction: Option<&'a str>,
}

pub struct StructurePlanner {
    section_tolerance: u32,
}

impl StructurePlanner {
    pub fn new(section_tolerance: u32) -> Self {
        Self { section_tolerance }
    }

    pub async fn plan(
        &self,
        llm: &dyn TextCompletion,
        request: &PlanRequest<'_>,
    ) -> Result<Plan, PlanningError> {
        let targets = request.targets.unwrap_or_else(|| {
            PlanTargets::for_word_count(request.target_word_count, &HeadingDensity::default())
        });

        let completion = llm
            .complete(
                CompletionRequest::new("plan_structure")
                    .system(self.system_prompt(&targets))
                    .user(self.user_prompt(request, &targets)),
            )
            .await?;

        let plan = parse_plan(&completion.text, request)?;
        tracing::info!(
            h2 = plan.outline.h2_count(),
            h3 = plan.outline.h3_count(),
            estimated_words = plan.estimates.total_words,
            "Outline planned"
        );
        Ok(plan)
    }

    /// Checks the section count against the target band.
    pub fn validate(&self, plan: &Plan, targets: &PlanTargets) -> Result<(), PlanningError> {
        let got = plan.outline.h2_count();
        let low = targets.h2.saturating_sub(self.section_tolerance) as usize;
        let high = (targets.h2 + self.section_tolerance) as usize;
        if got < low.max(1) || got > high {
            return Err(PlanningError::SectionCountOutOfRange {
                got,
                target: targets.h2,
                tolerance: self.section_tolerance,
            });
        }
        Ok(())
    }

    fn system_prompt(&self, targets: &PlanTargets) -> String {
        format!(
            "You are an SEO content strategist who designs article outlines.\n\
             Rules:\n\
             - Use `# ` once for the title, `## ` for top-level sections, `### ` for subsections.\n\
             - Strict two-level hierarchy: every `### ` belongs to the `## ` above it. Never start with `### `.\n\
             - Produce {h2} top-level sections (acceptable range {low} to {high}) and about {h3} subsections in total.\n\
             - Under each heading add one short bullet describing its content, and a `- Keywords:` bullet when a keyword belongs there.\n\
             Output format:\n\
             [ESTIMATES]{{\"totalWords\": n, \"h2Count\": n, \"h3Count\": n, \"keywordUsage\": {{\"keyword\": n}}}}[/ESTIMATES]\n\
             [STRUCTURE]\n# Title\n## Section\n### Subsection\n[/STRUCTURE]",
            h2 = targets.h2,
            low = targets.h2.saturating_sub(self.section_tolerance).max(1),
            high = targets.h2 + self.section_tolerance,
            h3 = targets.h3,
        )
    }

    fn user_prompt(&self, request: &PlanRequest<'_>, targets: &PlanTargets) -> String {
        let mut prompt = format!(
            "Theme: {}\nTarget length: {} words\nTarget sections: {} top-level, {} subsections\n",
            sanitize_for_prompt(request.theme),
            request.target_word_count,
            targets.h2,
            targets.h3
        );

        if !request.keywords.is_empty() {
            prompt.push_str("Keywords (minimum uses in the full article):\n");
            for (keyword, target) in request.keywords {
                prompt.push_str(&format!("- {}: {}\n", sanitize_for_prompt(keyword), target));
            }
        }
        if let Some(persona) = request.persona {
            prompt.push_str(&format!("Author persona: {}\n", sanitize_for_prompt(persona)));
        }
        if let Some(style) = request.style {
            prompt.push_str(&format!("Author tone: {}\n", style.tone));
        }
        if let Some(remarks) = request.remarks {
            prompt.push_str(&format!("Remarks: {}\n", sanitize_for_prompt(remarks)));
        }
        if let Some(offer) = request.offer {
            prompt.push_str(&format!(
                "Lead the final section towards this offer: {}\n",
                sanitize_for_prompt(offer)
            ));
        }
        if let Some(context) = request.context {
            prompt.push_str(&format!(
                "\nCompetitor and background material:\n<<<\n{}\n>>>\n",
                sanitize_for_prompt(context)
            ));
        }
        if let Some(correction) = request.correction.filter(|c| !c.is_empty()) {
            prompt.push_str(&format!("\n{}\n", correction));
        }
        prompt
    }
}

fn between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let end = text[start..].find(close)? + start;
    Some(text[start..end].trim())
}

fn extract_estimates(raw: &str) -> Option<PlanEstimates> {
    if let Some(block) = between(raw, "[ESTIMATES]", "[/ESTIMATES]") {
        return crate::llm::json::parse_structured(block).ok();
    }
    let body = crate::llm::json::strip_code_fences(raw);
    if body.starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(body).ok()?;
        return serde_json::from_value(value.get("estimates")?.clone()).ok();
    }
    None
}

/// Turns raw planner output into a [`Plan`].
///
/// Estimates missing from the output are derived from the parsed outline
/// and the request.
pub fn parse_plan(raw: &str, request: &PlanRequest<'_>) -> Result<Plan, PlanningError> {
    let outline = parse_structure(&sanitize_outline_payload(raw));
    if outline.is_empty() {
        return Err(PlanningError::NoSections);
    }

    let estimates = match extract_estimates(raw) {
        Some(mut e) => {
            if e.h2_count == 0 {
                e.h2_count = outline.h2_count() as u32;
            }
            if e.h3_count == 0 {
                e.h3_count = outline.h3_count() as u32;
            }
            if e.total_words == 0 {
                e.total_words = request.target_word_count;
            }
            e
        }
        None => PlanEstimates {
            total_words: request.target_word_count,
            h2_count: outline.h2_count() as u32,
            h3_count: outline.h3_count() as u32,
            keyword_usage: request.keywords.iter().cloned().collect(),
        },
    };

    Ok(Plan { outline, estimates })
}
