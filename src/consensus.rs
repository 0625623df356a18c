//! Consensus merging: combines a primary and a secondary (cross-check)
//! analysis into one record.
//!
//! Pure and deterministic: no I/O, identical inputs always produce the
//! identical merged record.

use crate::types::{AnalysisRecord, CrossCheckNotes, MAX_LIST_ITEMS};

/// Sentinel marking a placeholder value; the other side wins when only one
/// of the two candidates carries it.
const UNKNOWN_MARKER: &str = "Unknown";

/// Merge two analyses of the same judgment field by field.
///
/// Scalars are resolved via [`choose_best`]; issue and principle lists are
/// concatenated secondary-first, deduplicated and capped; the secondary's
/// verified quotes replace the primary's wholesale.
pub fn merge(primary: &AnalysisRecord, secondary: &AnalysisRecord) -> AnalysisRecord {
    let notable_quotes = if secondary.notable_quotes.is_empty() {
        primary.notable_quotes.clone()
    } else {
        secondary.notable_quotes.clone()
    };

    let mut verification_warnings = primary.verification_warnings.clone();
    verification_warnings.extend(secondary.verification_warnings.iter().cloned());

    AnalysisRecord {
        case_name: choose_best(&primary.case_name, &secondary.case_name),
        citation: choose_best(&primary.citation, &secondary.citation),
        summary: choose_best(&primary.summary, &secondary.summary),
        key_issues: merge_lists(&primary.key_issues, &secondary.key_issues, MAX_LIST_ITEMS),
        notable_quotes,
        significant_principles: merge_lists(
            &primary.significant_principles,
            &secondary.significant_principles,
            MAX_LIST_ITEMS,
        ),
        cross_check_notes: Some(consensus_notes(primary, secondary)),
        verification_warnings,
    }
}

/// Pick the better of two scalar values.
///
/// Non-empty beats empty; a value without the "Unknown" placeholder beats
/// one with it; otherwise length stands in for detail and the longer string
/// wins, with the primary keeping ties.
pub fn choose_best(primary: &str, secondary: &str) -> String {
    if primary.is_empty() {
        return secondary.to_string();
    }
    if secondary.is_empty() {
        return primary.to_string();
    }

    let primary_unknown = primary.contains(UNKNOWN_MARKER);
    let secondary_unknown = secondary.contains(UNKNOWN_MARKER);
    if primary_unknown && !secondary_unknown {
        return secondary.to_string();
    }
    if secondary_unknown && !primary_unknown {
        return primary.to_string();
    }

    if secondary.len() > primary.len() {
        secondary.to_string()
    } else {
        primary.to_string()
    }
}

/// Concatenate secondary's entries before primary's, deduplicate by
/// case-insensitive trimmed equality (first occurrence wins), cap at `max`.
fn merge_lists(primary: &[String], secondary: &[String], max: usize) -> Vec<String> {
    let mut seen = Vec::new();
    let mut merged = Vec::new();

    for item in secondary.iter().chain(primary.iter()) {
        if merged.len() >= max {
            break;
        }
        let normalized = item.trim().to_lowercase();
        if normalized.is_empty() || seen.contains(&normalized) {
            continue;
        }
        seen.push(normalized);
        merged.push(item.clone());
    }

    merged
}

/// Cross-check notes for the consensus record: the secondary's verification
/// metadata, with a synthetic note appended whenever it covered fewer
/// quotes than the primary supplied.
fn consensus_notes(primary: &AnalysisRecord, secondary: &AnalysisRecord) -> CrossCheckNotes {
    let mut notes = secondary.cross_check_notes.clone().unwrap_or_else(|| {
        CrossCheckNotes {
            issues_found: vec![
                "Cross-check response incomplete - missing verification structure".to_string(),
            ],
            quotes_checked: Some(0),
            ..Default::default()
        }
    });

    let supplied = primary.notable_quotes.len();
    let checked = notes.quote_accuracy.len();
    if checked < supplied {
        notes.issues_found.push(format!(
            "Note: cross-check verified {checked} of {supplied} quotes"
        ));
        notes.quotes_checked = Some(checked as u32);
    }

    notes
}
