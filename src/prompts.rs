//! Prompt construction for the analysis and cross-check calls.
//!
//! Both prompts demand a strict JSON reply so the recovery pipeline has a
//! fighting chance even when the model drifts. Source text is capped to
//! keep requests inside model context windows.

use crate::types::AnalysisRecord;

/// Maximum judgment characters embedded in a prompt.
pub const MAX_PROMPT_SOURCE_CHARS: usize = 100_000;

const TRUNCATION_NOTICE: &str = "\n\n[Text truncated for length]";

/// Build the primary analysis prompt for a judgment.
pub fn build_analysis_prompt(title: &str, citation: &str, text: &str) -> String {
    let title = non_blank_or(title, "Not specified");
    let citation = non_blank_or(citation, "Not specified");
    let (body, truncated) = clip_source(text);
    let notice = if truncated { TRUNCATION_NOTICE } else { "" };

    format!(
        r#"You are a legal AI assistant specializing in analyzing commonwealth legal judgments. Analyze the provided document and extract key legal information in a structured JSON format.

FIRST: Determine if this is a legal judgment or court decision. If it is NOT a legal judgment (e.g., press releases, news articles, government announcements), set key_issues, notable_quotes, and significant_principles to ["Not applicable."] and provide a summary explaining what type of document it is.

ANALYSIS REQUIREMENTS (for legal judgments only):
1. Read through the ENTIRE judgment carefully
2. Identify the key legal issues (up to 5 most important issues)
3. Extract 3-5 notable quotes that show the court's reasoning
4. Identify 3-5 significant legal principles with general applicability
5. Provide a comprehensive 3-4 sentence summary covering the dispute, key findings, and legal significance

CRITICAL REQUIREMENTS - ACCURACY IS PARAMOUNT:
1. For notable_quotes: extract EXACT quotes from the judgment text - NO paraphrasing, NO summarizing
2. Do NOT include paragraph numbers or references in quotes - just the quote text itself
3. Only include quotes that appear VERBATIM in the provided judgment text
4. Keep quotes concise (1-3 sentences maximum)
5. Extract only information explicitly stated in the judgment - never infer facts not present in the text

CASE NAME: extract the actual parties' names (e.g., "Teva UK Ltd v AstraZeneca AB"). Exclude party designations like "1st Plaintiff", "Defendant", "Appellant", "Respondent". Do not use section headers; if the title is a section header, find the real case name in the judgment text.

CITATION: extract the citation exactly as it appears in the "Cite as:" or "Neutral Citation Number:" field, in neutral citation format "[year] COURT number" (e.g., "[2025] UKSC 22"). For Hong Kong judgments since 2018, output only the neutral citation (e.g., "[2020] HKCFA 32"), never the action number, and always include the year in square brackets.

Respond ONLY with valid JSON in this exact format, with no text outside the JSON object, and keep arrays to 3-5 items each:
{{
  "case_name": "Full case name as it appears",
  "citation": "Legal citation if found",
  "summary": "Comprehensive 3-4 sentence summary",
  "key_issues": ["Issue 1", "Issue 2", "Issue 3"],
  "notable_quotes": ["Exact quote from judgment", "Another exact quote"],
  "significant_principles": ["General principle applicable to other cases", "Another transferable principle"]
}}

Ensure proper JSON escaping: use \" for quotes within strings and avoid unescaped special characters.

Please analyze this legal judgment:

Title: {title}
Citation: {citation}

Judgment Text:
{body}{notice}"#
    )
}

/// Build the cross-check prompt asking a second model to independently
/// analyze the judgment and audit the primary record quote by quote.
pub fn build_cross_check_prompt(primary: &AnalysisRecord, source_text: &str) -> String {
    let quote_count = primary.notable_quotes.len();
    let primary_json =
        serde_json::to_string_pretty(primary).unwrap_or_else(|_| "{}".to_string());
    let (body, _) = clip_source(source_text);

    format!(
        r#"You are cross-checking another AI's analysis of a document. FIRST: Determine if this is a legal judgment or court decision. If it is NOT a legal judgment, set key_issues, notable_quotes, and significant_principles to ["Not applicable."] and provide a summary explaining what type of document it is. If it IS a legal judgment, perform your OWN independent analysis, then compare with the other AI's work.

JUDGMENT TEXT (first {MAX_PROMPT_SOURCE_CHARS} characters):
{body}

PRIMARY AI'S ANALYSIS TO CROSS-CHECK:
{primary_json}

TASK:
1. Verify EVERY SINGLE quote from the primary analysis - check all {quote_count} quotes
2. For each quote, determine if it is Exact/Paraphrased/Not found in the judgment
3. If a quote is inaccurate, provide the corrected exact quote
4. Perform your own independent analysis for comparison
5. Provide better quotes if the primary analysis quotes are inadequate

CITATION VERIFICATION: the FIRST citation near the top of the judgment (often in "Cite as:") is the current court's citation. Citations after "On appeal from:" belong to lower courts and are NOT the current citation. Do not flag the primary citation as incorrect just because lower court citations appear in the text. For Hong Kong judgments since 2018, the correct citation is the neutral citation only (e.g., "[2020] HKCFA 32"), always with the year in square brackets.

CASE NAME: exclude party designations like "1st Plaintiff", "Defendant", "Appellant", "Respondent"; include only the actual party names.

Respond with JSON containing YOUR analysis and comparison:
{{
  "case_name": "Your extraction of case name",
  "citation": "Your extraction of citation",
  "summary": "Your 3-4 sentence summary",
  "key_issues": ["Your identified issues (3-5)"],
  "notable_quotes": ["Your corrected/verified exact quotes (same count as primary: {quote_count})"],
  "significant_principles": ["Your extracted general principles (3-5)"],
  "cross_check_notes": {{
    "primary_accuracy": "high/medium/low",
    "citation_accuracy": "Correct/Incorrect - explain if incorrect, include the correct citation",
    "case_name_accuracy": "Correct/Incorrect - explain if incorrect",
    "quote_accuracy": ["Quote 1: Exact/Paraphrased/Not found", "Quote 2: ..."],
    "issues_found": ["List any inaccuracies in primary analysis"],
    "improvements": ["Specific improvements made to quotes or principles"],
    "quotes_checked": {quote_count}
  }}
}}

IMPORTANT:
- quote_accuracy MUST have {quote_count} entries, one for each primary quote
- notable_quotes MUST have {quote_count} items, either verified or corrected versions
- citation_accuracy and case_name_accuracy are REQUIRED fields

CRITICAL: all your quotes must be EXACT word-for-word from the judgment. No paraphrasing. Ensure proper JSON escaping for quotes within strings."#
    )
}

fn non_blank_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

/// Clip to the prompt source cap without splitting a multibyte character.
fn clip_source(text: &str) -> (&str, bool) {
    if text.chars().count() <= MAX_PROMPT_SOURCE_CHARS {
        return (text, false);
    }
    let end = text
        .char_indices()
        .nth(MAX_PROMPT_SOURCE_CHARS)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    (&text[..end], true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_prompt_embeds_metadata_and_text() {
        let prompt = build_analysis_prompt(
            "Smith v Jones",
            "[2020] UKSC 1",
            "IN THE SUPREME COURT\n1. The appeal concerns a contract.",
        );
        assert!(prompt.contains("Title: Smith v Jones"));
        assert!(prompt.contains("Citation: [2020] UKSC 1"));
        assert!(prompt.contains("The appeal concerns a contract."));
        assert!(prompt.contains("\"case_name\""));
        assert!(!prompt.contains("[Text truncated for length]"));
    }

    #[test]
    fn blank_metadata_becomes_not_specified() {
        let prompt = build_analysis_prompt("", "  ", "judgment text");
        assert!(prompt.contains("Title: Not specified"));
        assert!(prompt.contains("Citation: Not specified"));
    }

    #[test]
    fn long_source_is_clipped_with_notice() {
        let text = "a".repeat(MAX_PROMPT_SOURCE_CHARS + 500);
        let prompt = build_analysis_prompt("T", "C", &text);
        assert!(prompt.contains("[Text truncated for length]"));
        assert!(prompt.len() < text.len() + 6_000);
    }

    #[test]
    fn clip_source_respects_char_boundaries() {
        let text = "é".repeat(MAX_PROMPT_SOURCE_CHARS + 10);
        let (clipped, truncated) = clip_source(&text);
        assert!(truncated);
        assert_eq!(clipped.chars().count(), MAX_PROMPT_SOURCE_CHARS);
    }

    #[test]
    fn cross_check_prompt_embeds_primary_and_counts() {
        let primary = AnalysisRecord {
            case_name: "Smith v Jones".to_string(),
            notable_quotes: vec!["first quote".to_string(), "second quote".to_string()],
            ..Default::default()
        };
        let prompt = build_cross_check_prompt(&primary, "1. The judgment text.");
        assert!(prompt.contains("check all 2 quotes"));
        assert!(prompt.contains("\"quotes_checked\": 2"));
        assert!(prompt.contains("Smith v Jones"));
        assert!(prompt.contains("The judgment text."));
    }

    #[test]
    fn cross_check_prompt_handles_zero_quotes() {
        let primary = AnalysisRecord::default();
        let prompt = build_cross_check_prompt(&primary, "text");
        assert!(prompt.contains("check all 0 quotes"));
    }
}
