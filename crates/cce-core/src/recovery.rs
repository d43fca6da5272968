//! Recovery of JSON embedded in free-form model output.
//!
//! Parsing escalates through a fixed set of tiers and the first success wins:
//!
//! 1. The whole text, verbatim.
//! 2. A JSON substring (fenced block, inline code, or everything from the
//!    first `{`/`[`) after mechanical cleanup: byte-order mark, control
//!    characters, single-quoted keys, trailing commas.
//! 3. [`ParseMode::Lenient`] only: the same after stripping `//` and `/* */`
//!    comments and quoting bare object keys.
//!
//! Recovery never infers structure that is not in the text.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Number of leading characters of the input kept for diagnostics.
pub const SNIPPET_LEN: usize = 100;

lazy_static! {
    // Tried in order; the first matching pattern decides the candidate.
    static ref FENCE_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?s)```json\s*\n(.*?)\n```").unwrap(),
        Regex::new(r"(?s)```\s*\n(.*?)\n```").unwrap(),
        Regex::new(r"(?s)`(.*?)`").unwrap(),
    ];

    // Control characters other than tab, newline and carriage return
    static ref CONTROL_CHARS: Regex = Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]").unwrap();

    static ref SINGLE_QUOTE_KEY_CLOSE: Regex = Regex::new(r"(\w+)':").unwrap();
    static ref SINGLE_QUOTE_KEY_OPEN: Regex = Regex::new(r#"'(\w+)":"#).unwrap();
    static ref TRAILING_COMMA: Regex = Regex::new(r",(\s*[}\]])").unwrap();

    static ref LINE_COMMENT: Regex = Regex::new(r"(?m)//.*$").unwrap();
    static ref BLOCK_COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
    static ref BARE_KEY: Regex = Regex::new(r"(\s*)(\w+)(\s*):").unwrap();
}

/// How far recovery may go before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    /// Tiers 1 and 2.
    #[default]
    Strict,
    /// Tiers 1 to 3.
    Lenient,
}

/// Every recovery tier failed.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("failed to parse JSON: {message} (input starts with {snippet:?})")]
pub struct JsonParseError {
    /// Error from the last tier attempted.
    pub message: String,
    /// First [`SNIPPET_LEN`] characters of the original input.
    pub snippet: String,
}

impl JsonParseError {
    fn new(message: impl Into<String>, input: &str) -> Self {
        Self {
            message: message.into(),
            snippet: snippet(input),
        }
    }
}

/// First [`SNIPPET_LEN`] characters of `text`.
pub fn snippet(text: &str) -> String {
    text.chars().take(SNIPPET_LEN).collect()
}

/// Extract the most likely JSON substring from `text`.
///
/// Fenced ```` ```json ```` blocks win over generic fences, which win over
/// inline code. When the candidate does not start with `{` or `[` it is
/// sliced from the first occurrence of either.
pub fn extract_json(text: &str) -> Result<String, JsonParseError> {
    let trimmed = text.trim();

    let mut candidate = FENCE_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(trimmed).and_then(|c| c.get(1)))
        .map(|m| m.as_str().trim())
        .unwrap_or(trimmed);

    if !candidate.starts_with('{') && !candidate.starts_with('[') {
        if let Some(start) = candidate.find(|c: char| c == '{' || c == '[') {
            candidate = &candidate[start..];
        }
    }

    if candidate.is_empty() {
        return Err(JsonParseError::new("no JSON-like content found", text));
    }

    Ok(candidate.to_string())
}

/// Apply the tier-2 mechanical fixes to an extracted candidate.
pub fn clean_json_string(text: &str) -> String {
    let text = text.trim_start_matches('\u{feff}');
    let text = CONTROL_CHARS.replace_all(text, "");
    let text = SINGLE_QUOTE_KEY_CLOSE.replace_all(&text, "${1}\":");
    let text = SINGLE_QUOTE_KEY_OPEN.replace_all(&text, "\"${1}\":");
    TRAILING_COMMA.replace_all(&text, "${1}").into_owned()
}

fn strip_comments(text: &str) -> String {
    let text = LINE_COMMENT.replace_all(text, "");
    BLOCK_COMMENT.replace_all(&text, "").into_owned()
}

fn quote_bare_keys(text: &str) -> String {
    BARE_KEY
        .replace_all(text, "${1}\"${2}\"${3}:")
        .into_owned()
}

fn lenient_candidate(text: &str) -> Result<String, JsonParseError> {
    let extracted = extract_json(&strip_comments(text))?;
    Ok(quote_bare_keys(&clean_json_string(&extracted)))
}

/// Parse `text` through the recovery tiers allowed by `mode`.
pub fn parse(text: &str, mode: ParseMode) -> Result<JsonValue, JsonParseError> {
    if let Ok(value) = serde_json::from_str::<JsonValue>(text) {
        return Ok(value);
    }

    let mut message = match extract_json(text) {
        Ok(extracted) => match serde_json::from_str(&clean_json_string(&extracted)) {
            Ok(value) => {
                tracing::debug!(tier = 2, "recovered JSON from model output");
                return Ok(value);
            }
            Err(e) => e.to_string(),
        },
        Err(e) => e.message,
    };

    if mode == ParseMode::Lenient {
        message = match lenient_candidate(text) {
            Ok(candidate) => match serde_json::from_str(&candidate) {
                Ok(value) => {
                    tracing::debug!(tier = 3, "recovered JSON from model output");
                    return Ok(value);
                }
                Err(e) => e.to_string(),
            },
            Err(e) => e.message,
        };
    }

    Err(JsonParseError::new(message, text))
}

/// Lenient parse that falls back to `default` instead of failing.
pub fn safe_parse(text: &str, default: JsonValue) -> JsonValue {
    parse(text, ParseMode::Lenient).unwrap_or(default)
}

/// Strict parse that also requires `text` to be an object holding every key.
pub fn parse_with_required_keys(
    text: &str,
    required_keys: &[&str],
) -> Result<JsonValue, JsonParseError> {
    let value = parse(text, ParseMode::Strict)?;

    let Some(object) = value.as_object() else {
        return Err(JsonParseError::new("expected a JSON object", text));
    };

    let missing: Vec<&str> = required_keys
        .iter()
        .copied()
        .filter(|key| !object.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        return Err(JsonParseError::new(
            format!("missing required keys: {}", missing.join(", ")),
            text,
        ));
    }

    Ok(value)
}

/// Indented rendering of `value`.
pub fn pretty_print(value: &JsonValue) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Recover `text` and re-render it without insignificant whitespace.
pub fn minify(text: &str) -> Result<String, JsonParseError> {
    parse(text, ParseMode::Strict).map(|value| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_plain_json_parses_verbatim() {
        let value = parse(r#"{"vendor": "cisco"}"#, ParseMode::Strict).unwrap();
        assert_eq!(value, json!({"vendor": "cisco"}));
    }

    #[test]
    fn test_extract_json_fenced_block() {
        let inner = "{\n  \"hostname\": \"edge-01\",\n  \"vendor\": \"juniper\"\n}";
        let text = format!("Here is the analysis:\n```json\n{inner}\n```\nLet me know.");
        assert_eq!(extract_json(&text).unwrap(), inner);
    }

    #[test]
    fn test_extract_json_generic_fence() {
        let text = "Result:\n```\n[1, 2, 3]\n```";
        assert_eq!(extract_json(text).unwrap(), "[1, 2, 3]");
    }

    #[test]
    fn test_extract_json_slices_from_first_brace() {
        let text = "The device profile is {\"a\": 1} as requested";
        assert_eq!(extract_json(text).unwrap(), "{\"a\": 1} as requested");
        // Trailing prose is left for the parser to reject
        assert!(parse(text, ParseMode::Strict).is_err());
    }

    #[test]
    fn test_extract_json_empty_input() {
        assert!(extract_json("   \n ").is_err());
    }

    #[test]
    fn test_clean_fixes_quotes_and_trailing_commas() {
        let cleaned = clean_json_string("\u{feff}{'status': \"pass\", \"items\": [1, 2,],}");
        let value: JsonValue = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(value["items"], json!([1, 2]));
    }

    #[test]
    fn test_clean_removes_control_characters() {
        let cleaned = clean_json_string("{\"a\":\u{0007} 1}\n");
        assert_eq!(cleaned, "{\"a\": 1}\n");
    }

    #[test]
    fn test_strict_mode_rejects_comments() {
        let text = "{\n  // device vendor\n  vendor: \"arista\"\n}";
        assert!(parse(text, ParseMode::Strict).is_err());

        let value = parse(text, ParseMode::Lenient).unwrap();
        assert_eq!(value, json!({"vendor": "arista"}));
    }

    #[test]
    fn test_lenient_strips_block_comments() {
        let text = "{ /* generated */ \"score\": 80 }";
        assert_eq!(parse(text, ParseMode::Lenient).unwrap(), json!({"score": 80}));
    }

    #[test]
    fn test_error_carries_snippet() {
        let text = "x".repeat(300);
        let err = parse(&text, ParseMode::Lenient).unwrap_err();
        assert_eq!(err.snippet.len(), SNIPPET_LEN);
    }

    #[test]
    fn test_safe_parse_returns_default() {
        let fallback = json!({"fallback": true});
        assert_eq!(safe_parse("not json at all", fallback.clone()), fallback);
        assert_eq!(safe_parse("{a: 1}", fallback), json!({"a": 1}));
    }

    #[test]
    fn test_parse_with_required_keys() {
        let err = parse_with_required_keys(r#"{"a": 1}"#, &["a", "b", "c"]).unwrap_err();
        assert!(err.message.contains("b, c"));

        assert!(parse_with_required_keys(r#"{"a": 1}"#, &["a"]).is_ok());
        assert!(parse_with_required_keys("[1]", &["a"]).is_err());
    }

    #[test]
    fn test_minify() {
        assert_eq!(minify("```json\n{ \"a\" : [ 1 , 2 ] }\n```").unwrap(), r#"{"a":[1,2]}"#);
    }

    proptest! {
        #[test]
        fn fenced_object_extracts_exactly(
            entries in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 1..6),
            prose in "[A-Za-z ,.]{0,40}",
        ) {
            let inner = serde_json::to_string_pretty(&entries).unwrap();
            let text = format!("{prose}\n```json\n{inner}\n```\n{prose}");
            prop_assert_eq!(extract_json(&text).unwrap(), inner.clone());
            let parsed = parse(&text, ParseMode::Strict).unwrap();
            prop_assert_eq!(parsed, serde_json::to_value(&entries).unwrap());
        }

        #[test]
        fn parse_never_panics(text in "\\PC{0,200}") {
            let _ = parse(&text, ParseMode::Lenient);
        }
    }
}
