//! Lenient parsing of structured model output.

use serde::de::DeserializeOwned;

use super::CompletionError;

/// Removes a surrounding markdown code fence (```json ... ```), if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "markdown", ...) on the opening line.
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parses model output into `T`, tolerating code fences and prose around a
/// single top-level JSON object.
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T, CompletionError> {
    let body = strip_code_fences(text);
    match serde_json::from_str(body) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            let (Some(start), Some(end)) = (body.find('{'), body.rfind('}')) else {
                return Err(CompletionError::MalformedOutput(first_err.to_string()));
            };
            if end <= start {
                return Err(CompletionError::MalformedOutput(first_err.to_string()));
            }
            serde_json::from_str(&body[start..=end])
                .map_err(|e| CompletionError::MalformedOutput(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        tone: String,
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {\"a\":1}  "), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\nplain\n```"), "plain");
    }

    #[test]
    fn test_parse_structured_plain_and_fenced() {
        let plain: Sample = parse_structured(r#"{"tone":"warm"}"#).unwrap();
        assert_eq!(plain.tone, "warm");

        let fenced: Sample = parse_structured("```json\n{\"tone\":\"dry\"}\n```").unwrap();
        assert_eq!(fenced.tone, "dry");
    }

    #[test]
    fn test_parse_structured_with_surrounding_prose() {
        let parsed: Sample =
            parse_structured("Here you go:\n{\"tone\":\"calm\"}\nHope that helps.").unwrap();
        assert_eq!(parsed.tone, "calm");
    }

    #[test]
    fn test_parse_structured_rejects_garbage() {
        let result: Result<Sample, _> = parse_structured("no json here");
        assert!(matches!(result, Err(CompletionError::MalformedOutput(_))));
    }
}
