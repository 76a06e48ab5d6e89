//! Outline model and markdown structure parsing.

use serde::{Deserialize, Serialize};

use crate::llm::json::strip_code_fences;

/// A nested (`###`) section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subsection {
    pub title: String,
    #[serde(default)]
    pub note: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword_hint: Option<String>,
}

/// A top-level (`##`) section and the subsections it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub title: String,
    #[serde(default)]
    pub note: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword_hint: Option<String>,
    #[serde(default)]
    pub subsections: Vec<Subsection>,
}

impl Section {
    fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            note: String::new(),
            keyword_hint: None,
            subsections: Vec::new(),
        }
    }

    /// The heading line as it must appear in the written document.
    pub fn heading(&self) -> String {
        format!("## {}", self.title)
    }

    /// Markdown plan for this section alone.
    pub fn to_markdown(&self) -> String {
        let mut out = self.heading();
        out.push('\n');
        push_details(&mut out, &self.note, self.keyword_hint.as_deref());
        for sub in &self.subsections {
            out.push_str(&format!("### {}\n", sub.title));
            push_details(&mut out, &sub.note, sub.keyword_hint.as_deref());
        }
        out
    }
}

fn push_details(out: &mut String, note: &str, hint: Option<&str>) {
    for line in note.lines().filter(|l| !l.trim().is_empty()) {
        out.push_str(&format!("- {}\n", line.trim()));
    }
    if let Some(hint) = hint {
        out.push_str(&format!("- Keywords: {}\n", hint));
    }
}

/// Ordered, two-level section plan for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outline {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub sections: Vec<Section>,
}

impl Outline {
    pub fn h2_count(&self) -> usize {
        self.sections.len()
    }

    pub fn h3_count(&self) -> usize {
        self.sections.iter().map(|s| s.subsections.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        if let Some(ref title) = self.title {
            out.push_str(&format!("# {}\n\n", title));
        }
        for section in &self.sections {
            out.push_str(&section.to_markdown());
            out.push('\n');
        }
        out.trim_end().to_string()
    }
}

enum Heading<'a> {
    Title(&'a str),
    H2(&'a str),
    H3(&'a str),
}

fn classify(line: &str) -> Option<Heading<'_>> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("### ") {
        Some(Heading::H3(rest.trim()))
    } else if let Some(rest) = line.strip_prefix("## ") {
        Some(Heading::H2(rest.trim()))
    } else if let Some(rest) = line.strip_prefix("# ") {
        Some(Heading::Title(rest.trim()))
    } else {
        None
    }
}

const KEYWORD_LABELS: [&str; 4] = ["keywords:", "keyword:", "キーワード:", "キーワード："];

fn keyword_hint(line: &str) -> Option<String> {
    let lower = line.to_lowercase();
    KEYWORD_LABELS.iter().find_map(|label| {
        lower
            .starts_with(label)
            .then(|| line.get(label.len()..).unwrap_or_default().trim().to_string())
    })
}

fn absorb_detail(note: &mut String, hint: &mut Option<String>, line: &str) {
    let body = line
        .trim()
        .trim_start_matches(['-', '*', '・'])
        .trim();
    if body.is_empty() {
        return;
    }
    if let Some(keywords) = keyword_hint(body) {
        if !keywords.is_empty() {
            *hint = Some(keywords);
        }
        return;
    }
    if !note.is_empty() {
        note.push('\n');
    }
    note.push_str(body);
}

/// Parses a markdown outline into sections.
///
/// A section spans from its heading to the next heading of equal or higher
/// level. The first `#` heading becomes the document title. A `###` that
/// appears before any `##` is promoted to a top-level section so that no
/// subsection is left without a parent.
pub fn parse_structure(markdown: &str) -> Outline {
    let mut title = None;
    let mut sections: Vec<Section> = Vec::new();

    for line in markdown.lines() {
        match classify(line) {
            Some(Heading::Title(text)) => {
                if title.is_none() && sections.is_empty() && !text.is_empty() {
                    title = Some(text.to_string());
                }
            }
            Some(Heading::H2(text)) => sections.push(Section::new(text)),
            Some(Heading::H3(text)) => match sections.last_mut() {
                Some(parent) => parent.subsections.push(Subsection {
                    title: text.to_string(),
                    note: String::new(),
                    keyword_hint: None,
                }),
                None => sections.push(Section::new(text)),
            },
            None => {
                let Some(section) = sections.last_mut() else {
                    continue;
                };
                match section.subsections.last_mut() {
                    Some(sub) => absorb_detail(&mut sub.note, &mut sub.keyword_hint, line),
                    None => absorb_detail(&mut section.note, &mut section.keyword_hint, line),
                }
            }
        }
    }

    Outline { title, sections }
}

const ENVELOPE_FIELDS: [&str; 4] = ["structure", "outline", "markdown", "content"];

/// Normalizes raw planner output into plain outline markdown.
///
/// In order: strips a code fence; unwraps a JSON envelope whose outline
/// sits in a string field (`structure`, `outline`, `markdown`, `content`);
/// extracts a `[STRUCTURE]...[/STRUCTURE]` block; otherwise starts at the
/// first heading line. Input matching none of these is returned trimmed.
pub fn sanitize_outline_payload(raw: &str) -> String {
    let text = strip_code_fences(raw);

    if text.starts_with('{') {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(text) {
            let nested = ENVELOPE_FIELDS
                .iter()
                .find_map(|field| map.get(*field).and_then(|v| v.as_str()));
            if let Some(inner) = nested {
                return sanitize_outline_payload(inner);
            }
        }
    }

    if let Some(start) = text.find("[STRUCTURE]") {
        let body = &text[start + "[STRUCTURE]".len()..];
        let body = match body.find("[/STRUCTURE]") {
            Some(end) => &body[..end],
            None => body,
        };
        return body.trim().to_string();
    }

    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim_start().starts_with('#') {
            return text[offset..].trim().to_string();
        }
        offset += line.len();
    }

    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_sections_with_one_subsection_each() {
        let outline = parse_structure(
            "# Guide\n## First\n- intro note\n### First child\n## Second\n### Second child\n",
        );

        assert_eq!(outline.title.as_deref(), Some("Guide"));
        assert_eq!(outline.sections.len(), 2);
        assert_eq!(outline.sections[0].title, "First");
        assert_eq!(outline.sections[1].title, "Second");
        assert_eq!(outline.sections[0].subsections.len(), 1);
        assert_eq!(outline.sections[1].subsections.len(), 1);
        assert_eq!(outline.sections[0].subsections[0].title, "First child");
        assert_eq!(outline.sections[1].subsections[0].title, "Second child");
        assert_eq!(outline.sections[0].note, "intro note");
        assert_eq!(outline.h3_count(), 2);
    }

    #[test]
    fn test_parse_captures_keyword_hints() {
        let outline = parse_structure(
            "## Basics\n- what it is\n- Keywords: foo, bar\n### Details\nKeywords: baz\n",
        );
        let section = &outline.sections[0];
        assert_eq!(section.keyword_hint.as_deref(), Some("foo, bar"));
        assert_eq!(section.note, "what it is");
        assert_eq!(section.subsections[0].keyword_hint.as_deref(), Some("baz"));
    }

    #[test]
    fn test_orphan_subsection_is_promoted() {
        let outline = parse_structure("### Stray\n## Real\n### Child\n");
        assert_eq!(outline.sections.len(), 2);
        assert_eq!(outline.sections[0].title, "Stray");
        assert!(outline.sections[0].subsections.is_empty());
        assert_eq!(outline.sections[1].subsections.len(), 1);
    }

    #[test]
    fn test_parse_without_headings_is_empty() {
        assert!(parse_structure("just some prose\nwith lines").is_empty());
    }

    #[test]
    fn test_sanitize_unwraps_json_envelope() {
        let raw = r##"{"structure": "# Title\n## A\n## B"}"##;
        let cleaned = sanitize_outline_payload(raw);
        assert_eq!(cleaned, "# Title\n## A\n## B");
        let outline = parse_structure(&cleaned);
        assert_eq!(outline.sections.len(), 2);
    }

    #[test]
    fn test_sanitize_extracts_structure_block() {
        let raw = "[ESTIMATES]{\"h2Count\":1}[/ESTIMATES]\n[STRUCTURE]\n## Only\n[/STRUCTURE]";
        assert_eq!(sanitize_outline_payload(raw), "## Only");
    }

    #[test]
    fn test_sanitize_skips_preamble_and_fences() {
        let raw = "```markdown\nSure, here is the outline:\n## One\n## Two\n```";
        assert_eq!(sanitize_outline_payload(raw), "## One\n## Two");
    }

    #[test]
    fn test_sanitize_leaves_invalid_json_alone() {
        let raw = "{not json at all\n## Heading";
        assert_eq!(sanitize_outline_payload(raw), "## Heading");
    }

    #[test]
    fn test_markdown_round_trip_keeps_shape() {
        let outline = parse_structure("# T\n## A\n- note\n### A1\n## B\n");
        let reparsed = parse_structure(&outline.to_markdown());
        assert_eq!(reparsed, outline);
    }
}
