//! casebrief: dual-model analysis of commonwealth legal judgments.
//!
//! Sends a judgment to a hosted LLM, recovers a structured record from
//! whatever JSON the model managed to emit, verifies every claimed quote
//! against the source text, and optionally cross-checks the result with a
//! second model before merging the two analyses.
//!
//! ```no_run
//! use std::time::Duration;
//! use casebrief::{
//!     AnalysisConfig, Credentials, HttpModelClient, JudgmentAnalyzer, JudgmentDocument,
//! };
//!
//! # async fn run() -> Result<(), casebrief::AnalysisError> {
//! let client = HttpModelClient::new(Duration::from_secs(120))?;
//! let analyzer = JudgmentAnalyzer::new(client);
//!
//! let document = JudgmentDocument {
//!     title: "Smith v Jones".to_string(),
//!     citation: "[2020] UKSC 1".to_string(),
//!     text: std::fs::read_to_string("judgment.txt")
//!         .map_err(|e| casebrief::AnalysisError::Config(e.to_string()))?,
//! };
//! let config = AnalysisConfig {
//!     credentials: Credentials {
//!         gemini_api_key: Some("...".to_string()),
//!         grok_api_key: None,
//!     },
//!     ..Default::default()
//! };
//!
//! let record = analyzer.analyze(&document, &config).await?;
//! println!("{}: {}", record.case_name, record.summary);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod consensus;
pub mod error;
pub mod orchestrator;
pub mod prompts;
pub mod quotes;
pub mod recovery;
pub mod types;

pub use client::{HttpModelClient, ModelClient};
pub use error::AnalysisError;
pub use orchestrator::JudgmentAnalyzer;
pub use quotes::{MatchType, QuoteVerification, QuoteVerifier};
pub use types::{
    AnalysisConfig, AnalysisRecord, Credentials, CrossCheckNotes, FinishReason, JudgmentDocument,
    ModelId, ModelResponse, Provider,
};
