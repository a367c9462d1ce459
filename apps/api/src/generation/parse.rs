//! Turns raw generator output into a JSON candidate.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("empty response")]
    Empty,

    #[error("unparseable response: {0}")]
    Unparseable(String),
}

/// Parses a candidate object, repairing common damage on the way.
pub fn parse_candidate(raw: &str) -> Result<Value, ParseFailure> {
    let text = strip_code_fence(raw);
    if text.is_empty() {
        return Err(ParseFailure::Empty);
    }

    let mut last_error = match serde_json::from_str::<Value>(text) {
        Ok(value) => return into_object(value),
        Err(e) => e.to_string(),
    };

    let outer = outer_object(text).unwrap_or(text);
    for attempt in [outer.to_string(), repair_json(outer)] {
        match serde_json::from_str::<Value>(&attempt) {
            Ok(value) => return into_object(value),
            Err(e) => last_error = e.to_string(),
        }
    }
    Err(ParseFailure::Unparseable(last_error))
}

/// Removes a surrounding markdown fence and its language tag, if any.
fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(body) = text.strip_prefix("```") else {
        return text;
    };
    // The language tag runs to the first newline; a fence without one has none.
    let body = match body.split_once('\n') {
        Some((tag, rest)) if !tag.trim_start().starts_with('{') => rest,
        _ => body,
    };
    body.trim().strip_suffix("```").unwrap_or(body).trim()
}

fn into_object(value: Value) -> Result<Value, ParseFailure> {
    match value {
        Value::Object(_) => Ok(value),
        Value::Array(mut items) if items.len() == 1 && items[0].is_object() => Ok(items.remove(0)),
        _ => Err(ParseFailure::Unparseable(
            "expected a JSON object".to_string(),
        )),
    }
}

/// From the first `{` to the last `}`; if nothing closes, to the end.
fn outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    match text.rfind('}') {
        Some(end) if end > start => Some(&text[start..=end]),
        _ => Some(&text[start..]),
    }
}

/// Best-effort syntax repair: trailing commas, raw control characters inside
/// strings, an unterminated string and unbalanced brackets.
pub fn repair_json(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut closers: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(c);
                continue;
            }
            match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => {}
                '\t' => out.push_str("\\t"),
                _ => out.push(c),
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' => {
                closers.push('}');
                out.push(c);
            }
            '[' => {
                closers.push(']');
                out.push(c);
            }
            '}' | ']' => {
                drop_trailing_comma(&mut out);
                if closers.last() == Some(&c) {
                    closers.pop();
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }
    drop_trailing_comma(&mut out);
    while let Some(closer) = closers.pop() {
        out.push(closer);
    }
    out
}

fn drop_trailing_comma(out: &mut String) {
    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
    if out.ends_with(',') {
        out.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_and_fenced_objects() {
        assert_eq!(parse_candidate(r#"{"a": 1}"#).unwrap(), json!({"a": 1}));
        assert_eq!(
            parse_candidate("```json\n{\"a\": 1}\n```").unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn test_code_fences_are_stripped() {
        assert_eq!(strip_code_fence("```json\n{\"k\": 1}\n```"), "{\"k\": 1}");
        assert_eq!(strip_code_fence("```JSON\n{\"k\": 1}\n```"), "{\"k\": 1}");
        assert_eq!(strip_code_fence("  ```\n{\"k\": 1}\n```  "), "{\"k\": 1}");
        assert_eq!(strip_code_fence("```{\"k\": 1}```"), "{\"k\": 1}");
        assert_eq!(strip_code_fence("```json\n{\"k\": 1"), "{\"k\": 1");
        assert_eq!(strip_code_fence("{\"k\": 1}"), "{\"k\": 1}");
    }

    #[test]
    fn test_prose_around_object() {
        let raw = "Here is the item:\n{\"question\": \"q\"}\nHope this helps!";
        assert_eq!(parse_candidate(raw).unwrap(), json!({"question": "q"}));
    }

    #[test]
    fn test_trailing_commas_and_newlines_in_strings() {
        let raw = "{\"options\": [\"a\", \"b\",], \"explanation\": \"line one\nline two\",}";
        assert_eq!(
            parse_candidate(raw).unwrap(),
            json!({"options": ["a", "b"], "explanation": "line one\nline two"})
        );
    }

    #[test]
    fn test_truncated_output_is_closed() {
        let raw = r#"{"question": "q", "options": ["a", "b"#;
        assert_eq!(
            parse_candidate(raw).unwrap(),
            json!({"question": "q", "options": ["a", "b"]})
        );
    }

    #[test]
    fn test_single_element_array_unwraps() {
        assert_eq!(parse_candidate(r#"[{"a": 1}]"#).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_failures() {
        assert_eq!(parse_candidate("   "), Err(ParseFailure::Empty));
        assert!(matches!(
            parse_candidate("I cannot help with that."),
            Err(ParseFailure::Unparseable(_))
        ));
        assert!(matches!(
            parse_candidate("[1, 2]"),
            Err(ParseFailure::Unparseable(_))
        ));
    }
}
