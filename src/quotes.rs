//! Quote verification: checks claimed quotations against the source text.
//!
//! Advisory only: verification annotates or rewrites individual quote
//! entries but never changes how many there are. A quote that cannot be
//! located is flagged as a likely hallucination, never silently dropped.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::types::AnalysisRecord;

/// Minimum fraction of a quote (words and characters) that must match for
/// a partial verdict.
const PARTIAL_MATCH_RATIO: f64 = 0.6;

/// Paragraph numbers above this are treated as implausible for a main
/// judgment and skipped.
const MAX_PLAUSIBLE_PARAGRAPH: u32 = 500;

/// How far back from a match position the paragraph scan looks.
const PARAGRAPH_CONTEXT_BYTES: usize = 2000;

/// Leading indent that marks a line as quoted material from another
/// judgment, whose paragraph numbering must be ignored.
const QUOTED_INDENT: usize = 4;

static QUOTE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^\s*["']?(?P<text>.+?)["']?\s*\[\s*(?:¶|para\.?\s*)?(?P<num>\d+|\?)\s*\]\s*$"#)
        .unwrap()
});
static QUOTE_AT_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^\s*["']?(?P<pre>.+?)\s+at\s+\[(?P<num>\d+)\](?P<post>.*)$"#).unwrap()
});
static ANNOTATION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*\[(?:paragraph corrected|paraphrased|not found in judgment)\]").unwrap()
});
static PARAGRAPH_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\.\s").unwrap());

/// How a quote matched against the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Exact,
    Partial,
    None,
}

/// Verification result for a single quote.
#[derive(Debug, Clone)]
pub struct QuoteVerification {
    /// Quote text with any paragraph reference and annotation stripped.
    pub quote_text: String,
    pub found: bool,
    pub match_type: MatchType,
    /// Paragraph of the main judgment the match was located in, if any.
    pub paragraph_number: Option<u32>,
    /// Paragraph number the model claimed in a trailing `[¶N]` reference.
    pub claimed_paragraph: Option<u32>,
}

/// Verifies quotes against judgment source text.
pub struct QuoteVerifier;

impl QuoteVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Verify each quote against the source. Output length always equals
    /// input length.
    pub fn verify(&self, quotes: &[String], source: &str) -> Vec<QuoteVerification> {
        let (norm_source, offset_map) = normalize_with_map(source);

        quotes
            .iter()
            .map(|quote| {
                let (text, claimed) = parse_quote_reference(quote);
                self.verify_one(&text, claimed, source, &norm_source, &offset_map)
            })
            .collect()
    }

    fn verify_one(
        &self,
        text: &str,
        claimed: Option<u32>,
        source: &str,
        norm_source: &str,
        offset_map: &[usize],
    ) -> QuoteVerification {
        let norm_quote = normalize(text);
        if norm_quote.is_empty() {
            return QuoteVerification {
                quote_text: text.to_string(),
                found: false,
                match_type: MatchType::None,
                paragraph_number: None,
                claimed_paragraph: claimed,
            };
        }

        let (position, match_type) = match norm_source.find(&norm_quote) {
            Some(pos) => (Some(pos), MatchType::Exact),
            None => match partial_match(&norm_quote, norm_source) {
                Some(pos) => (Some(pos), MatchType::Partial),
                None => (None, MatchType::None),
            },
        };

        let paragraph_number = position
            .and_then(|p| offset_map.get(p).copied())
            .and_then(|orig| find_paragraph_number(source, orig));

        debug!(
            found = position.is_some(),
            ?match_type,
            paragraph = ?paragraph_number,
            "quote verification"
        );

        QuoteVerification {
            quote_text: text.to_string(),
            found: position.is_some(),
            match_type,
            paragraph_number,
            claimed_paragraph: claimed,
        }
    }

    /// Verify a record's quotes in place: each entry is rewritten with its
    /// located paragraph reference or a warning marker, and warnings are
    /// appended to the record. Quote count is preserved.
    pub fn annotate(&self, record: &mut AnalysisRecord, source: &str) {
        if record.notable_quotes.is_empty() {
            return;
        }

        let verifications = self.verify(&record.notable_quotes, source);
        let mut rewritten = Vec::with_capacity(verifications.len());
        let mut warnings = Vec::new();

        for (i, v) in verifications.iter().enumerate() {
            let n = i + 1;
            match (v.found, v.match_type, v.paragraph_number) {
                (true, MatchType::Exact, Some(actual)) => {
                    match v.claimed_paragraph {
                        Some(claimed) if claimed != actual => {
                            rewritten.push(format!(
                                "{} [¶{actual}] [paragraph corrected]",
                                v.quote_text
                            ));
                            warnings.push(format!(
                                "Quote {n}: paragraph reference corrected from ¶{claimed} to ¶{actual}"
                            ));
                        }
                        _ => rewritten.push(format!("{} [¶{actual}]", v.quote_text)),
                    }
                }
                (true, MatchType::Partial, Some(actual)) => {
                    rewritten.push(format!("{} [¶{actual}] [paraphrased]", v.quote_text));
                    warnings.push(format!(
                        "Quote {n}: appears to be paraphrased; closest match at ¶{actual}"
                    ));
                }
                (true, MatchType::Exact, None) => {
                    // No paragraph could be located; keep whatever locator
                    // the model claimed rather than dropping it.
                    match v.claimed_paragraph {
                        Some(claimed) => {
                            rewritten.push(format!("{} [¶{claimed}]", v.quote_text))
                        }
                        None => rewritten.push(v.quote_text.clone()),
                    }
                }
                (true, MatchType::Partial, None) => {
                    rewritten.push(format!("{} [paraphrased]", v.quote_text));
                    warnings.push(format!("Quote {n}: appears to be paraphrased"));
                }
                _ => {
                    rewritten.push(format!("{} [¶?] [not found in judgment]", v.quote_text));
                    warnings.push(format!(
                        "Quote {n}: not found in source text - possible hallucination; do not rely on this quote"
                    ));
                }
            }
        }

        record.notable_quotes = rewritten;
        record.verification_warnings.extend(warnings);
    }
}

impl Default for QuoteVerifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a quote into its text and an optional trailing paragraph
/// reference. Accepts `[¶23]`, `[para 23]`, `[23]`, `[?]` and the
/// `... at [23]` citation style. Annotation markers from a previous
/// verification pass are stripped first.
fn parse_quote_reference(quote: &str) -> (String, Option<u32>) {
    let clean = ANNOTATION_MARKER.replace_all(quote, "");

    if let Some(caps) = QUOTE_REF.captures(&clean) {
        let num = caps["num"].parse::<u32>().ok();
        return (caps["text"].trim().to_string(), num);
    }

    if let Some(caps) = QUOTE_AT_REF.captures(&clean) {
        let num = caps["num"].parse::<u32>().ok();
        let text = format!("{} {}", &caps["pre"], caps["post"].trim());
        return (text.trim().to_string(), num);
    }

    (clean.trim().to_string(), None)
}

/// Collapse whitespace runs to single spaces and lowercase.
fn normalize(text: &str) -> String {
    normalize_with_map(text).0
}

/// Normalized form of `text` plus a per-byte map from normalized offsets
/// back to the corresponding byte offset in the original.
fn normalize_with_map(text: &str) -> (String, Vec<usize>) {
    let mut out = String::with_capacity(text.len());
    let mut map = Vec::with_capacity(text.len());
    let mut pending_space = false;
    let mut saw_content = false;

    for (orig_idx, c) in text.char_indices() {
        if c.is_whitespace() {
            pending_space = saw_content;
            continue;
        }
        if pending_space {
            out.push(' ');
            map.push(orig_idx);
            pending_space = false;
        }
        saw_content = true;
        for lower in c.to_lowercase() {
            for _ in 0..lower.len_utf8() {
                map.push(orig_idx);
            }
            out.push(lower);
        }
    }

    (out, map)
}

/// Progressive prefix matching: shorten the quote word by word from the
/// end, down to 60% of its word count, and accept the first prefix found
/// in the source that still covers 60% of the original character length.
fn partial_match(norm_quote: &str, norm_source: &str) -> Option<usize> {
    let words: Vec<&str> = norm_quote.split(' ').collect();
    let min_words = ((words.len() as f64) * PARTIAL_MATCH_RATIO).ceil() as usize;
    let min_chars = ((norm_quote.chars().count() as f64) * PARTIAL_MATCH_RATIO).floor() as usize;

    for word_count in (min_words..words.len()).rev() {
        let prefix = words[..word_count].join(" ");
        if prefix.chars().count() < min_chars {
            break;
        }
        if let Some(pos) = norm_source.find(&prefix) {
            return Some(pos);
        }
    }
    None
}

/// Locate the paragraph number of the main judgment governing `position`.
///
/// Scans backward from the match for a line beginning `N. `, skipping
/// lines indented four or more spaces (or a tab) and `>`-prefixed lines;
/// both indicate quoted material from another judgment whose numbering is
/// not this judgment's. Numbers above 500 are implausible and skipped.
fn find_paragraph_number(source: &str, position: usize) -> Option<u32> {
    let position = floor_char_boundary(source, position.min(source.len()));
    let start = floor_char_boundary(source, position.saturating_sub(PARAGRAPH_CONTEXT_BYTES));
    let context = &source[start..position];

    for line in context.lines().rev() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('>') {
            continue;
        }
        if line.starts_with('\t') || line.len() - trimmed.len() >= QUOTED_INDENT {
            continue;
        }
        if let Some(n) = paragraph_marker(line) {
            return Some(n);
        }
    }

    // Fallback: last plausible marker anywhere before the position.
    source[..position]
        .lines()
        .filter(|l| !l.starts_with(' ') && !l.starts_with('\t'))
        .filter_map(paragraph_marker)
        .last()
}

fn paragraph_marker(line: &str) -> Option<u32> {
    let caps = PARAGRAPH_LINE.captures(line)?;
    let n = caps[1].parse::<u32>().ok()?;
    (n <= MAX_PLAUSIBLE_PARAGRAPH).then_some(n)
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
