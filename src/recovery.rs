//! Response recovery: raw model text to a validated `AnalysisRecord`.
//!
//! Model output is supposed to be a single JSON object but arrives wrapped
//! in markdown fences, preceded by prose, or truncated mid-object. Recovery
//! is an ordered chain of stages, each a pure function producing a parse
//! candidate, tried only if the prior stage failed:
//!
//! 1. Strip outer code fences, direct parse
//! 2. Extract the outermost `{...}` substring
//! 3. Strip ALL fence markers and a leading `json` token
//! 4. Textual repairs (collapse newlines, drop trailing commas)
//! 5. Truncate at the parse-error offset, back up to the last comma,
//!    auto-close unbalanced brackets
//! 6. Terminal fallback: a degraded record carrying the diagnostics
//!
//! `recover` never fails; stage 6 guarantees a well-formed record.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::types::{
    AnalysisRecord, CrossCheckNotes, FALLBACK_CASE_NAME, FALLBACK_SUMMARY,
    PARSING_FAILED_CASE_NAME,
};

/// How much of the raw text the degraded record keeps for debugging.
const RAW_PREVIEW_CHARS: usize = 800;

static LEADING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^```\s*(?:json\s*)?").unwrap());
static TRAILING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*```\s*$").unwrap());
static LEADING_JSON_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^json\s*").unwrap());
static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").unwrap());

/// Parse raw model output into a validated record. Infallible: if every
/// recovery stage fails, the terminal fallback produces a degraded record
/// whose fields carry the parse diagnostics.
pub fn recover(raw: &str) -> AnalysisRecord {
    match parse_stages(raw) {
        Ok(value) => record_from_value(&value),
        Err(err) => {
            warn!(error = %err, raw_len = raw.len(), "all recovery stages failed, returning degraded record");
            degraded_record(raw, &err)
        }
    }
}

/// Run the staged parse chain. Returns the first successfully parsed JSON
/// object, or the last parse error message when every stage fails.
fn parse_stages(raw: &str) -> Result<Value, String> {
    // Stage 1: strip outer fences, direct parse.
    let stripped = strip_outer_fences(raw);
    let mut last_err = match try_parse_object(&stripped) {
        Ok(value) => {
            debug!("recovery: direct parse succeeded");
            return Ok(value);
        }
        Err(e) => e,
    };

    // Stage 2: outermost {...} substring of the stripped text.
    if let Some(braced) = extract_braced(&stripped) {
        match try_parse_object(braced) {
            Ok(value) => {
                debug!("recovery: braced extraction succeeded");
                return Ok(value);
            }
            Err(e) => last_err = e,
        }
    }

    // Stage 3: strip every fence marker and a leading "json" token.
    let ultra = strip_all_fences(raw);
    match try_parse_object(&ultra) {
        Ok(value) => {
            debug!("recovery: fence-stripped parse succeeded");
            return Ok(value);
        }
        Err(e) => last_err = e,
    }

    // Stages 4 and 5 work on the best braced candidate available.
    let candidate = extract_braced(&ultra)
        .or_else(|| extract_braced(&stripped))
        .unwrap_or(&stripped);

    // Stage 4: collapse embedded newlines, drop trailing commas.
    let repaired = repair_text(candidate);
    let parse_err = match serde_json::from_str::<Value>(&repaired) {
        Ok(value) if value.is_object() => {
            debug!("recovery: textual repair succeeded");
            return Ok(value);
        }
        Ok(_) => {
            return Err(last_err);
        }
        Err(e) => e,
    };

    // Stage 5: truncate at the error offset, back up to the last comma
    // outside any string, close unbalanced brackets.
    if let Some(closed) = truncate_and_close(&repaired, &parse_err) {
        match try_parse_object(&closed) {
            Ok(value) => {
                debug!("recovery: partial recovery of truncated JSON succeeded");
                return Ok(value);
            }
            Err(e) => last_err = e,
        }
    } else {
        last_err = parse_err.to_string();
    }

    Err(last_err)
}

/// Parse a candidate, requiring a JSON object at the top level.
fn try_parse_object(candidate: &str) -> Result<Value, String> {
    let value: Value = serde_json::from_str(candidate).map_err(|e| e.to_string())?;
    if value.is_object() {
        Ok(value)
    } else {
        Err("top-level JSON value is not an object".to_string())
    }
}

/// Remove a leading ```/```json fence and a trailing ``` fence.
fn strip_outer_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_lead = LEADING_FENCE.replace(trimmed, "");
    let without_tail = TRAILING_FENCE.replace(&without_lead, "");
    without_tail.trim().to_string()
}

/// Remove every triple-backtick marker anywhere, plus a leading `json`.
fn strip_all_fences(raw: &str) -> String {
    let no_ticks = raw.replace("```", "");
    let trimmed = no_ticks.trim();
    LEADING_JSON_TOKEN.replace(trimmed, "").trim().to_string()
}

/// Largest substring spanning the first `{` to the last `}`.
fn extract_braced(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start < end {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// Collapse embedded newlines to spaces and strip trailing commas before
/// closing brackets. Legal text pasted into JSON strings is the usual
/// source of both.
fn repair_text(candidate: &str) -> String {
    let flat = candidate.replace(['\n', '\r'], " ");
    TRAILING_COMMA.replace_all(&flat, "$1").into_owned()
}

/// Stage-5 candidate: cut the string at the reported parse-error offset,
/// back up to the last comma outside any string literal, and append the
/// closers for every still-open `{`/`[`.
fn truncate_and_close(text: &str, err: &serde_json::Error) -> Option<String> {
    let offset = error_byte_offset(text, err)?;
    let cut = floor_char_boundary(text, offset.min(text.len()));
    let truncated = &text[..cut];

    let comma = last_comma_outside_strings(truncated)?;
    let head = &truncated[..comma];

    let mut closed = head.to_string();
    for closer in open_delimiters(head).into_iter().rev() {
        closed.push(match closer {
            '{' => '}',
            _ => ']',
        });
    }
    Some(closed)
}

/// Byte offset of a serde_json error from its 1-based line/column.
fn error_byte_offset(text: &str, err: &serde_json::Error) -> Option<usize> {
    let line = err.line();
    let column = err.column();
    if line == 0 || column == 0 {
        return None;
    }
    let mut offset = 0usize;
    for (idx, l) in text.split('\n').enumerate() {
        if idx + 1 == line {
            return Some(offset + (column - 1).min(l.len()));
        }
        offset += l.len() + 1;
    }
    None
}

/// Largest index `<= idx` that lies on a UTF-8 char boundary.
fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Position of the last comma that is not inside a string literal.
fn last_comma_outside_strings(s: &str) -> Option<usize> {
    let mut in_string = false;
    let mut escaped = false;
    let mut last = None;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            ',' if !in_string => last = Some(i),
            _ => {}
        }
    }
    last
}

/// Stack of unclosed `{`/`[` delimiters, ignoring string contents.
fn open_delimiters(s: &str) -> Vec<char> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => stack.push(c),
            '}' | ']' if !in_string => {
                stack.pop();
            }
            _ => {}
        }
    }
    stack
}

/// Build a record from a parsed JSON object, filling defined fallbacks for
/// any absent or blank field. Six primary fields are always populated.
fn record_from_value(value: &Value) -> AnalysisRecord {
    let cross_check_notes = value
        .get("cross_check_notes")
        .filter(|v| v.is_object())
        .and_then(|v| serde_json::from_value::<CrossCheckNotes>(v.clone()).ok());

    AnalysisRecord {
        case_name: string_field(value, "case_name", FALLBACK_CASE_NAME),
        citation: string_field(value, "citation", ""),
        summary: string_field(value, "summary", FALLBACK_SUMMARY),
        key_issues: list_field(value, "key_issues"),
        notable_quotes: list_field(value, "notable_quotes"),
        significant_principles: list_field(value, "significant_principles"),
        cross_check_notes,
        verification_warnings: vec![],
    }
}

fn string_field(value: &Value, key: &str, fallback: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}

/// Array of strings, lenient: non-array values and non-string entries are
/// dropped rather than failing the whole record.
fn list_field(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Terminal fallback: a structurally valid record whose fields carry the
/// parse diagnostics and a prefix of the raw text.
fn degraded_record(raw: &str, err: &str) -> AnalysisRecord {
    AnalysisRecord {
        case_name: PARSING_FAILED_CASE_NAME.to_string(),
        citation: String::new(),
        summary: format!(
            "Unable to parse model response after multiple recovery attempts. Error: {err}"
        ),
        key_issues: vec![format!("Analysis failed - JSON parsing error: {err}")],
        notable_quotes: vec![format!(
            "Raw response for debugging (first {RAW_PREVIEW_CHARS} chars): {}",
            truncate_chars(raw, RAW_PREVIEW_CHARS)
        )],
        significant_principles: vec![
            "Full model response available in debug logs".to_string(),
        ],
        cross_check_notes: None,
        verification_warnings: vec![],
    }
}

/// Prefix of at most `max` characters, respecting char boundaries.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_JSON: &str = r#"{
        "case_name": "Teva UK Ltd v AstraZeneca AB",
        "citation": "[2014] EWHC 2873 (Pat)",
        "summary": "Patent dispute over formulation.",
        "key_issues": ["Obviousness", "Claim construction"],
        "notable_quotes": ["The skilled person would not have considered this obvious."],
        "significant_principles": ["The test for obviousness follows Pozzoli."]
    }"#;

    // ── Stage 1: fences ──

    #[test]
    fn parses_bare_json() {
        let record = recover(VALID_JSON);
        assert_eq!(record.case_name, "Teva UK Ltd v AstraZeneca AB");
        assert_eq!(record.key_issues.len(), 2);
    }

    #[test]
    fn fenced_json_equals_direct_parse() {
        let fenced = format!("```json\n{VALID_JSON}\n```");
        assert_eq!(recover(&fenced), recover(VALID_JSON));
    }

    #[test]
    fn fence_without_language_tag() {
        let fenced = format!("```\n{VALID_JSON}\n```");
        assert_eq!(recover(&fenced).citation, "[2014] EWHC 2873 (Pat)");
    }

    #[test]
    fn uppercase_json_tag() {
        let fenced = format!("```JSON\n{VALID_JSON}\n```");
        assert_eq!(recover(&fenced).case_name, "Teva UK Ltd v AstraZeneca AB");
    }

    // ── Stage 2: braced extraction ──

    #[test]
    fn json_with_surrounding_prose() {
        let text = format!("Here is the analysis you requested:\n\n{VALID_JSON}\n\nLet me know if you need more.");
        let record = recover(&text);
        assert_eq!(record.case_name, "Teva UK Ltd v AstraZeneca AB");
    }

    // ── Stage 3: embedded fences ──

    #[test]
    fn fence_markers_mid_text() {
        let text = format!("json\n```{VALID_JSON}```");
        let record = recover(&text);
        assert_eq!(record.summary, "Patent dispute over formulation.");
    }

    // ── Stage 4: textual repairs ──

    #[test]
    fn trailing_commas_repaired() {
        let text = r#"{"case_name": "A v B", "key_issues": ["i1", "i2",], "summary": "s",}"#;
        let record = recover(text);
        assert_eq!(record.case_name, "A v B");
        assert_eq!(record.key_issues, vec!["i1", "i2"]);
    }

    // ── Stage 5: truncated JSON ──

    #[test]
    fn truncated_response_partially_recovered() {
        // Cut off mid-way through a later field; earlier fields survive.
        let truncated = r#"{"case_name": "A v B", "citation": "[2020] ABC 1", "summary": "A dispute.", "key_issues": ["issue one", "issue two"], "notable_quotes": ["The court held th"#;
        let record = recover(truncated);
        assert_eq!(record.case_name, "A v B");
        assert_eq!(record.citation, "[2020] ABC 1");
        assert_eq!(record.key_issues.len(), 2);
    }

    #[test]
    fn truncated_mid_array_keeps_complete_entries() {
        let truncated = r#"{"case_name": "A v B", "key_issues": ["first issue", "second iss"#;
        let record = recover(truncated);
        assert_eq!(record.case_name, "A v B");
        assert_eq!(record.key_issues, vec!["first issue"]);
    }

    // ── Stage 6: terminal fallback ──

    #[test]
    fn unparseable_text_yields_degraded_record() {
        let record = recover("Sorry, I cannot help.");
        assert_eq!(record.case_name, PARSING_FAILED_CASE_NAME);
        assert!(record.summary.contains("Unable to parse"));
        assert_eq!(record.key_issues.len(), 1);
        assert_eq!(record.notable_quotes.len(), 1);
        assert!(record.notable_quotes[0].contains("Sorry, I cannot help."));
        assert_eq!(record.significant_principles.len(), 1);
    }

    #[test]
    fn empty_input_yields_degraded_record() {
        let record = recover("");
        assert_eq!(record.case_name, PARSING_FAILED_CASE_NAME);
    }

    #[test]
    fn top_level_array_is_not_accepted() {
        let record = recover(r#"["not", "an", "object"]"#);
        assert_eq!(record.case_name, PARSING_FAILED_CASE_NAME);
    }

    #[test]
    fn recover_never_panics_on_multibyte_truncation() {
        // Truncation offset landing inside a multibyte char must not slice
        // mid-boundary.
        let text = r#"{"case_name": "Müller v Société Générale", "summary": "Căse summary with ¶ märkers", "key_issues": ["ä"#;
        let record = recover(text);
        assert_eq!(record.case_name, "Müller v Société Générale");
    }

    // ── Post-parse validation ──

    #[test]
    fn missing_fields_filled_with_defaults() {
        let record = recover(r#"{"case_name": "A v B"}"#);
        assert_eq!(record.case_name, "A v B");
        assert_eq!(record.citation, "");
        assert_eq!(record.summary, FALLBACK_SUMMARY);
        assert!(record.key_issues.is_empty());
        assert!(record.notable_quotes.is_empty());
        assert!(record.significant_principles.is_empty());
    }

    #[test]
    fn blank_case_name_replaced() {
        let record = recover(r#"{"case_name": "  ", "summary": "s"}"#);
        assert_eq!(record.case_name, FALLBACK_CASE_NAME);
        assert_eq!(record.summary, "s");
    }

    #[test]
    fn non_string_list_entries_dropped() {
        let record = recover(r#"{"case_name": "A v B", "key_issues": ["ok", 42, null, "also ok"]}"#);
        assert_eq!(record.key_issues, vec!["ok", "also ok"]);
    }

    #[test]
    fn cross_check_notes_parsed_when_present() {
        let text = r#"{
            "case_name": "A v B",
            "cross_check_notes": {
                "primary_accuracy": "high",
                "quote_accuracy": ["Quote 1: Exact"],
                "quotes_checked": 1
            }
        }"#;
        let record = recover(text);
        let notes = record.cross_check_notes.expect("notes should parse");
        assert_eq!(notes.primary_accuracy.as_deref(), Some("high"));
        assert_eq!(notes.quotes_checked, Some(1));
    }

    #[test]
    fn malformed_cross_check_notes_dropped_not_fatal() {
        let record = recover(r#"{"case_name": "A v B", "cross_check_notes": "not an object"}"#);
        assert_eq!(record.case_name, "A v B");
        assert!(record.cross_check_notes.is_none());
    }

    // ── Helpers ──

    #[test]
    fn extract_braced_finds_outermost_pair() {
        assert_eq!(
            extract_braced("prose {\"a\": {\"b\": 1}} trailing"),
            Some("{\"a\": {\"b\": 1}}")
        );
        assert_eq!(extract_braced("no braces here"), None);
        assert_eq!(extract_braced("} reversed {"), None);
    }

    #[test]
    fn open_delimiters_ignores_string_contents() {
        assert_eq!(open_delimiters(r#"{"a": "{[", "b": ["#), vec!['{', '[']);
    }

    #[test]
    fn last_comma_skips_commas_inside_strings() {
        let s = r#"{"a": "x, y", "b": 1"#;
        let idx = last_comma_outside_strings(s).unwrap();
        assert_eq!(&s[idx..idx + 1], ",");
        assert!(idx > s.find("y\"").unwrap());
    }
}
