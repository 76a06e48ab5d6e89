use crate::text::collapse_blank_lines;

use super::is_horizontal_rule;

const STRAY_TAGS: [&str; 4] = ["[ESTIMATES]", "[/ESTIMATES]", "[STRUCTURE]", "[/STRUCTURE]"];

/// Final cleanup before a document is persisted.
///
/// Drops horizontal rules and leftover planner tags, fills the concluding
/// keyword placeholder and collapses runs of blank lines.
pub fn tidy_document(text: &str, placeholder: Option<(&str, &str)>) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut in_estimates = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("[ESTIMATES]") {
            in_estimates = !trimmed.ends_with("[/ESTIMATES]");
            continue;
        }
        if in_estimates {
            in_estimates = !trimmed.ends_with("[/ESTIMATES]");
            continue;
        }
        if is_horizontal_rule(line) || STRAY_TAGS.contains(&trimmed) {
            continue;
        }
        lines.push(line);
    }

    let mut out = lines.join("\n");
    if let Some((marker, keyword)) = placeholder {
        if !marker.is_empty() {
            out = out.replace(marker, keyword);
        }
    }
    collapse_blank_lines(&out).trim().to_string()
}
