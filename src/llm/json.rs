//! Lenient JSON recovery from model output.
//!
//! Models asked for "ONLY JSON" still wrap it in prose or code fences
//! often enough that three extraction passes are needed:
//! 1. the whole body parses as JSON;
//! 2. the largest fenced code block parses;
//! 3. the outermost balanced-brace slice parses.

use serde_json::Value;

use crate::error::{PipelineError, Result};

pub fn extract_json(text: &str) -> Result<Value> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(block) = largest_fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(block.trim()) {
            return Ok(value);
        }
    }

    if let Some(slice) = outermost_braces(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(slice) {
            return Ok(value);
        }
    }

    Err(PipelineError::malformed(format!(
        "no parseable JSON in response ({} chars): {}",
        text.len(),
        &trimmed[..trimmed.len().min(200)]
    )))
}

/// Largest ``` fenced block, preferring ones tagged `json`.
fn largest_fenced_block(text: &str) -> Option<&str> {
    let mut best: Option<&str> = None;
    let mut rest = text;

    while let Some(start) = rest.find("```") {
        let after_fence = &rest[start + 3..];
        // Skip the language tag line.
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        let Some(end) = body.find("```") else { break };
        let candidate = &body[..end];

        let tagged_json = after_fence[..body_start].trim().eq_ignore_ascii_case("json");
        let better = match best {
            None => true,
            Some(current) => tagged_json || candidate.len() > current.len(),
        };
        if better {
            best = Some(candidate);
        }
        rest = &body[end + 3..];
    }

    best
}

/// Slice from the first `{` to its matching close brace, respecting
/// strings and escapes.
fn outermost_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_body() {
        let value = extract_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_fenced_block() {
        let text = "Here is the plan:\n```json\n{\"a\": [1, 2]}\n```\nDone.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["a"][1], 2);
    }

    #[test]
    fn test_untagged_fence() {
        let text = "```\n{\"ok\": true}\n```";
        let value = extract_json(text).unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn test_balanced_braces_in_prose() {
        let text = "The assignments are {\"files\": {\"a.txt\": \"/Docs\"}} as requested.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["files"]["a.txt"], "/Docs");
    }

    #[test]
    fn test_braces_inside_strings_do_not_confuse() {
        let text = r#"answer: {"note": "use {curly} braces", "n": 3} trailing"#;
        let value = extract_json(text).unwrap();
        assert_eq!(value["n"], 3);
    }

    #[test]
    fn test_no_json_is_malformed() {
        let err = extract_json("I cannot help with that.").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Malformed);
    }

    #[test]
    fn test_unbalanced_is_malformed() {
        let err = extract_json(r#"{"a": [1, 2"#).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Malformed);
    }
}
