//! Robust extraction of JSON values from noisy model output.
//!
//! Four strategies are applied in order: direct parse, fenced-code-block
//! extraction, brace-balanced segment extraction (string/escape aware),
//! and lenient recovery (strip comments, normalize quotes, drop trailing
//! commas). The method that succeeded is returned so downstream logs can
//! record how far from well-formed the model output was.

use serde::Serialize;
use serde_json::Value;

use rf_domain::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Direct,
    FencedBlock,
    BraceBalanced,
    LenientRecovery,
}

/// Extract the first JSON value found in `text`.
pub fn extract_json(text: &str) -> Result<(Value, ExtractionMethod)> {
    let trimmed = text.trim();

    // 1. Direct parse.
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok((value, ExtractionMethod::Direct));
    }

    // 2. Fenced code blocks (``` or ```json).
    let blocks = fenced_blocks(text);
    for block in &blocks {
        if let Ok(value) = serde_json::from_str::<Value>(block.trim()) {
            return Ok((value, ExtractionMethod::FencedBlock));
        }
    }

    // 3. Brace-balanced segments from the raw text.
    let segments = balanced_segments(text);
    for segment in &segments {
        if let Ok(value) = serde_json::from_str::<Value>(segment) {
            return Ok((value, ExtractionMethod::BraceBalanced));
        }
    }

    // 4. Lenient recovery over every candidate, most specific first.
    for candidate in segments
        .iter()
        .map(String::as_str)
        .chain(blocks.iter().map(String::as_str))
        .chain(std::iter::once(trimmed))
    {
        let repaired = repair(candidate);
        if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
            return Ok((value, ExtractionMethod::LenientRecovery));
        }
    }

    Err(Error::SchemaInvalid(
        "no JSON value could be extracted from model output".into(),
    ))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Strategy 2: fenced blocks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn fenced_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<String> = None;
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            match current.take() {
                Some(block) => blocks.push(block),
                None => current = Some(String::new()),
            }
        } else if let Some(block) = current.as_mut() {
            block.push_str(line);
            block.push('\n');
        }
    }
    blocks
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Strategy 3: brace-balanced segments
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const MAX_SEGMENT_CANDIDATES: usize = 8;

/// Scan for `{...}` / `[...]` segments, tracking string and escape state
/// so braces inside string literals do not confuse the depth counter.
fn balanced_segments(text: &str) -> Vec<String> {
    let bytes: Vec<char> = text.chars().collect();
    let mut segments = Vec::new();

    let mut i = 0;
    while i < bytes.len() && segments.len() < MAX_SEGMENT_CANDIDATES {
        let open = bytes[i];
        if open != '{' && open != '[' {
            i += 1;
            continue;
        }
        let close = if open == '{' { '}' } else { ']' };

        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        let mut end = None;
        for (j, &c) in bytes.iter().enumerate().skip(i) {
            if escaped {
                escaped = false;
                continue;
            }
            match c {
                '\\' if in_string => escaped = true,
                '"' => in_string = !in_string,
                c if c == open && !in_string => depth += 1,
                c if c == close && !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(j);
                        break;
                    }
                }
                _ => {}
            }
        }

        match end {
            Some(j) => {
                segments.push(bytes[i..=j].iter().collect());
                i = j + 1;
            }
            None => i += 1,
        }
    }
    segments
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Strategy 4: lenient repair
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn repair(text: &str) -> String {
    strip_trailing_commas(&normalize_quotes(&strip_comments(text)))
}

/// Drop `// ...` and `/* ... */` comments, string-aware.
fn strip_comments(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    let mut in_string = false;
    let mut escaped = false;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Convert single-quoted strings to double-quoted ones.
fn normalize_quotes(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    let mut in_double = false;
    let mut in_single = false;
    let mut escaped = false;

    while i < chars.len() {
        let c = chars[i];
        if escaped {
            out.push(c);
            escaped = false;
            i += 1;
            continue;
        }
        match c {
            '\\' if in_double || in_single => {
                out.push(c);
                escaped = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                out.push(c);
            }
            '"' if in_single => out.push_str("\\\""),
            '\'' if !in_double => {
                in_single = !in_single;
                out.push('"');
            }
            _ => out.push(c),
        }
        i += 1;
    }
    out
}

/// Remove commas that directly precede a closing brace or bracket.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next_significant = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next_significant, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_parse() {
        let (value, method) = extract_json(r#"{"ok": true}"#).unwrap();
        assert_eq!(method, ExtractionMethod::Direct);
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn direct_parse_array() {
        let (value, method) = extract_json("[1, 2, 3]").unwrap();
        assert_eq!(method, ExtractionMethod::Direct);
        assert_eq!(value.as_array().unwrap().len(), 3);
    }

    #[test]
    fn fenced_block() {
        let text = "Here is the plan:\n```json\n{\"phases\": []}\n```\nDone.";
        let (value, method) = extract_json(text).unwrap();
        assert_eq!(method, ExtractionMethod::FencedBlock);
        assert!(value["phases"].is_array());
    }

    #[test]
    fn fenced_block_without_language_tag() {
        let text = "```\n{\"a\": 1}\n```";
        let (value, method) = extract_json(text).unwrap();
        assert_eq!(method, ExtractionMethod::FencedBlock);
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn brace_balanced_in_prose() {
        let text = "The answer is {\"risk\": 42, \"note\": \"a {brace} inside\"} as computed.";
        let (value, method) = extract_json(text).unwrap();
        assert_eq!(method, ExtractionMethod::BraceBalanced);
        assert_eq!(value["risk"], 42);
        assert_eq!(value["note"], "a {brace} inside");
    }

    #[test]
    fn brace_balanced_with_escaped_quotes() {
        let text = r#"Output: {"msg": "say \"hi\""} end"#;
        let (value, method) = extract_json(text).unwrap();
        assert_eq!(method, ExtractionMethod::BraceBalanced);
        assert_eq!(value["msg"], "say \"hi\"");
    }

    #[test]
    fn lenient_trailing_comma() {
        let text = r#"{"a": 1, "b": [1, 2,],}"#;
        let (value, method) = extract_json(text).unwrap();
        assert_eq!(method, ExtractionMethod::LenientRecovery);
        assert_eq!(value["a"], 1);
        assert_eq!(value["b"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn lenient_single_quotes() {
        let text = "{'action': 'drift-remediate'}";
        let (value, method) = extract_json(text).unwrap();
        assert_eq!(method, ExtractionMethod::LenientRecovery);
        assert_eq!(value["action"], "drift-remediate");
    }

    #[test]
    fn lenient_comments() {
        let text = "{\n  // primary phase\n  \"name\": \"canary\", /* small */ \"pct\": 5\n}";
        let (value, method) = extract_json(text).unwrap();
        assert_eq!(method, ExtractionMethod::LenientRecovery);
        assert_eq!(value["name"], "canary");
        assert_eq!(value["pct"], 5);
    }

    #[test]
    fn lenient_does_not_touch_strings() {
        let text = r#"{"url": "https://example.com/x", "note": "a, b,", }"#;
        let (value, _) = extract_json(text).unwrap();
        assert_eq!(value["url"], "https://example.com/x");
        assert_eq!(value["note"], "a, b,");
    }

    #[test]
    fn no_json_at_all() {
        let err = extract_json("I could not produce a plan for that request.").unwrap_err();
        assert!(matches!(err, Error::SchemaInvalid(_)));
    }

    #[test]
    fn truncated_output_yields_inner_segment() {
        // The outer object never closes; the balanced inner one is used.
        let (value, method) = extract_json(r#"{"a": {"b": 1}"#).unwrap();
        assert_eq!(method, ExtractionMethod::BraceBalanced);
        assert_eq!(value["b"], 1);
    }

    #[test]
    fn picks_first_parsable_segment() {
        let text = "bad {not json] then {\"good\": 1} trailing";
        let (value, method) = extract_json(text).unwrap();
        assert_eq!(method, ExtractionMethod::BraceBalanced);
        assert_eq!(value["good"], 1);
    }
}
