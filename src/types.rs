//! Core data model for judgment analysis.
//!
//! `AnalysisRecord` is the output that crosses the library boundary; the
//! rest configures or carries intermediate state for one `analyze` call.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fallback case name when the model omits or blanks the field.
pub const FALLBACK_CASE_NAME: &str = "Unknown Case";

/// Fallback summary when the model omits or blanks the field.
pub const FALLBACK_SUMMARY: &str = "No summary available";

/// Sentinel case name for a record produced by the terminal parse fallback.
pub const PARSING_FAILED_CASE_NAME: &str = "Parsing Failed";

/// Maximum entries kept in each list field after a consensus merge.
pub const MAX_LIST_ITEMS: usize = 5;

/// Canonical output of an analysis run.
///
/// All six primary fields are always present; missing or blank values are
/// replaced with defined fallbacks during recovery, never left empty-handed.
/// Wire names match the JSON contract the models are prompted to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    #[serde(default)]
    pub case_name: String,
    #[serde(default)]
    pub citation: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_issues: Vec<String>,
    #[serde(default)]
    pub notable_quotes: Vec<String>,
    #[serde(default)]
    pub significant_principles: Vec<String>,
    /// Verification metadata from a cross-check pass, if one ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_check_notes: Option<CrossCheckNotes>,
    /// Warnings attached by quote verification (paraphrase, wrong paragraph,
    /// suspected hallucination).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verification_warnings: Vec<String>,
}

impl Default for AnalysisRecord {
    fn default() -> Self {
        Self {
            case_name: FALLBACK_CASE_NAME.to_string(),
            citation: String::new(),
            summary: FALLBACK_SUMMARY.to_string(),
            key_issues: vec![],
            notable_quotes: vec![],
            significant_principles: vec![],
            cross_check_notes: None,
            verification_warnings: vec![],
        }
    }
}

/// Verification metadata produced by the secondary model during cross-check.
///
/// All fields are lenient; a model that returns a partial structure still
/// deserializes, with the gaps defaulted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossCheckNotes {
    #[serde(default)]
    pub primary_accuracy: Option<String>,
    #[serde(default)]
    pub citation_accuracy: Option<String>,
    #[serde(default)]
    pub case_name_accuracy: Option<String>,
    /// Per-quote verdicts ("Quote 1: Exact", "Quote 2: Not found", ...).
    #[serde(default)]
    pub quote_accuracy: Vec<String>,
    #[serde(default)]
    pub issues_found: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[serde(default)]
    pub quotes_checked: Option<u32>,
}

/// How a model call finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Model completed its output normally.
    Normal,
    /// Output was cut off at the token limit; the raw text is likely
    /// mid-object JSON and goes through the recovery chain.
    Truncated,
    /// Provider returned no content at all.
    Empty,
}

/// Raw result of a single model call. Created per call, consumed by
/// recovery, discarded.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub text: String,
    pub finish_reason: FinishReason,
    pub elapsed: Duration,
}

/// A judgment document supplied by an external scraper. The library never
/// fetches documents itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgmentDocument {
    pub title: String,
    pub citation: String,
    pub text: String,
}

/// API provider behind a model identifier. Used for credential lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    Grok,
}

/// Selectable analysis models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelId {
    GeminiPro,
    GeminiFlash,
    GeminiFlashLite,
    Grok,
}

impl ModelId {
    /// Wire-level model name sent to the provider API.
    pub fn wire_name(&self) -> &'static str {
        match self {
            ModelId::GeminiPro => "gemini-2.5-pro",
            ModelId::GeminiFlash => "gemini-2.5-flash",
            ModelId::GeminiFlashLite => "gemini-2.5-flash-lite",
            ModelId::Grok => "grok-4-fast-reasoning",
        }
    }

    pub fn provider(&self) -> Provider {
        match self {
            ModelId::GeminiPro | ModelId::GeminiFlash | ModelId::GeminiFlashLite => {
                Provider::Gemini
            }
            ModelId::Grok => Provider::Grok,
        }
    }
}

/// API credentials, passed explicitly at call time. No global key state.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub gemini_api_key: Option<String>,
    pub grok_api_key: Option<String>,
}

impl Credentials {
    /// Look up the key for a provider, treating blank strings as absent.
    pub fn for_provider(&self, provider: Provider) -> Option<&str> {
        let key = match provider {
            Provider::Gemini => self.gemini_api_key.as_deref(),
            Provider::Grok => self.grok_api_key.as_deref(),
        };
        key.filter(|k| !k.trim().is_empty())
    }
}

/// Per-call analysis configuration.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub primary_model: ModelId,
    pub enable_cross_check: bool,
    pub secondary_model: ModelId,
    pub credentials: Credentials,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            primary_model: ModelId::GeminiPro,
            enable_cross_check: false,
            secondary_model: ModelId::GeminiFlash,
            credentials: Credentials::default(),
        }
    }
}
