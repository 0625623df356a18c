//! Error taxonomy for the analysis pipeline.
//!
//! Errors on the mandatory primary path propagate to the caller; errors on
//! the optional cross-check path are caught by the orchestrator and demoted
//! to warnings while the primary result is preserved.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    /// A required API credential for the selected model is missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source text is below the minimum length for a meaningful analysis.
    /// Never retried.
    #[error("Insufficient text content for analysis: {length} chars (minimum {minimum})")]
    InsufficientInput { length: usize, minimum: usize },

    /// Network/HTTP failure or a content-filter rejection from a provider.
    #[error("Model call failed: {0}")]
    ModelCall(String),
}
