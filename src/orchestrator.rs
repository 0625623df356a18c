//! Top-level analysis flow: prompt the primary model, recover its JSON,
//! verify quotes against the judgment text, and optionally cross-check the
//! result with a second model.

use tracing::{info, warn};

use crate::client::ModelClient;
use crate::consensus;
use crate::error::AnalysisError;
use crate::prompts;
use crate::quotes::QuoteVerifier;
use crate::recovery::recover;
use crate::types::{
    AnalysisConfig, AnalysisRecord, Credentials, FinishReason, JudgmentDocument, ModelId,
};

/// Minimum judgment length worth sending to a model.
pub const MIN_TEXT_CHARS: usize = 100;

/// Runs the end-to-end judgment analysis pipeline.
pub struct JudgmentAnalyzer<C: ModelClient> {
    client: C,
    verifier: QuoteVerifier,
}

impl<C: ModelClient> JudgmentAnalyzer<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            verifier: QuoteVerifier::new(),
        }
    }

    /// Analyze a judgment with the configured primary model.
    ///
    /// When cross-checking is enabled the secondary model audits the primary
    /// record and the two are merged; a cross-check failure never fails the
    /// analysis, the primary record is returned instead.
    pub async fn analyze(
        &self,
        document: &JudgmentDocument,
        config: &AnalysisConfig,
    ) -> Result<AnalysisRecord, AnalysisError> {
        let length = document.text.trim().chars().count();
        if length < MIN_TEXT_CHARS {
            return Err(AnalysisError::InsufficientInput {
                length,
                minimum: MIN_TEXT_CHARS,
            });
        }

        let api_key = require_key(&config.credentials, config.primary_model)?;

        info!(
            model = config.primary_model.wire_name(),
            chars = length,
            cross_check = config.enable_cross_check,
            "starting judgment analysis"
        );

        let prompt =
            prompts::build_analysis_prompt(&document.title, &document.citation, &document.text);
        let response = self
            .client
            .generate(config.primary_model, api_key, &prompt)
            .await?;

        if response.finish_reason == FinishReason::Truncated {
            warn!(
                model = config.primary_model.wire_name(),
                "primary response was truncated, recovery may degrade"
            );
        }

        let mut record = recover(&response.text);
        self.verifier.annotate(&mut record, &document.text);

        if config.enable_cross_check {
            let audit = self
                .cross_check(
                    &record,
                    &document.text,
                    config.secondary_model,
                    &config.credentials,
                )
                .await;
            match audit {
                Ok(merged) => record = merged,
                Err(e) => {
                    warn!(
                        model = config.secondary_model.wire_name(),
                        error = %e,
                        "cross-check failed, keeping primary analysis"
                    );
                }
            }
        }

        Ok(record)
    }

    /// Audit an existing record with a second model and merge the two
    /// analyses into a consensus record.
    ///
    /// Also callable directly, to cross-check a previously produced record
    /// after the fact.
    pub async fn cross_check(
        &self,
        primary: &AnalysisRecord,
        source_text: &str,
        model: ModelId,
        credentials: &Credentials,
    ) -> Result<AnalysisRecord, AnalysisError> {
        let api_key = require_key(credentials, model)?;

        info!(
            model = model.wire_name(),
            quotes = primary.notable_quotes.len(),
            "starting cross-check"
        );

        let prompt = prompts::build_cross_check_prompt(primary, source_text);
        let response = self.client.generate(model, api_key, &prompt).await?;

        if response.finish_reason == FinishReason::Truncated {
            warn!(
                model = model.wire_name(),
                "cross-check response was truncated"
            );
        }

        let mut secondary = recover(&response.text);
        self.verifier.annotate(&mut secondary, source_text);

        Ok(consensus::merge(primary, &secondary))
    }
}

fn require_key(credentials: &Credentials, model: ModelId) -> Result<&str, AnalysisError> {
    credentials
        .for_provider(model.provider())
        .ok_or_else(|| {
            AnalysisError::Config(format!("No API key configured for {}", model.wire_name()))
        })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::types::{Credentials, ModelResponse, PARSING_FAILED_CASE_NAME};

    /// Replays a scripted sequence of responses in call order.
    struct MockModelClient {
        script: Mutex<VecDeque<Result<ModelResponse, AnalysisError>>>,
    }

    impl MockModelClient {
        fn new(script: Vec<Result<ModelResponse, AnalysisError>>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl ModelClient for MockModelClient {
        async fn generate(
            &self,
            _model: ModelId,
            _api_key: &str,
            _prompt: &str,
        ) -> Result<ModelResponse, AnalysisError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AnalysisError::ModelCall("script exhausted".to_string())))
        }
    }

    fn ok_response(text: &str) -> Result<ModelResponse, AnalysisError> {
        Ok(ModelResponse {
            text: text.to_string(),
            finish_reason: FinishReason::Normal,
            elapsed: Duration::from_millis(10),
        })
    }

    fn document() -> JudgmentDocument {
        JudgmentDocument {
            title: "A v B".to_string(),
            citation: "[2020] UKSC 1".to_string(),
            text: "1. The claimant brought proceedings for breach of contract against \
                   the defendant arising from a supply agreement.\n\n\
                   2. The duty of good faith requires honesty in performance.\n\n\
                   3. The appeal is dismissed with costs.\n"
                .to_string(),
        }
    }

    fn config(enable_cross_check: bool) -> AnalysisConfig {
        AnalysisConfig {
            enable_cross_check,
            credentials: Credentials {
                gemini_api_key: Some("test-key".to_string()),
                grok_api_key: Some("test-key-2".to_string()),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn short_documents_are_rejected() {
        let analyzer = JudgmentAnalyzer::new(MockModelClient::new(vec![]));
        let mut doc = document();
        doc.text = "Too short to analyze.".to_string();

        let err = analyzer.analyze(&doc, &config(false)).await.unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientInput { .. }));
    }

    #[tokio::test]
    async fn missing_primary_credential_is_config_error() {
        let analyzer = JudgmentAnalyzer::new(MockModelClient::new(vec![]));
        let mut cfg = config(false);
        cfg.credentials.gemini_api_key = None;

        let err = analyzer.analyze(&document(), &cfg).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Config(_)));
    }

    #[tokio::test]
    async fn fenced_json_response_produces_record() {
        let raw = "```json\n{\"case_name\": \"A v B\", \"citation\": \"[2020] UKSC 1\", \
                   \"summary\": \"Contract dispute.\", \"key_issues\": [\"Good faith\"], \
                   \"notable_quotes\": [\"The duty of good faith requires honesty in performance.\"], \
                   \"significant_principles\": [\"Good faith in contract\"]}\n```";
        let analyzer = JudgmentAnalyzer::new(MockModelClient::new(vec![ok_response(raw)]));

        let record = analyzer.analyze(&document(), &config(false)).await.unwrap();
        assert_eq!(record.case_name, "A v B");
        assert_eq!(record.key_issues, vec!["Good faith"]);
        // The quote exists verbatim at paragraph 2 and gets its marker.
        assert!(record.notable_quotes[0].contains("[¶2]"));
        assert!(record.verification_warnings.is_empty());
    }

    #[tokio::test]
    async fn unparseable_response_yields_degraded_record() {
        let analyzer =
            JudgmentAnalyzer::new(MockModelClient::new(vec![ok_response("Sorry, I cannot help.")]));

        let record = analyzer.analyze(&document(), &config(false)).await.unwrap();
        assert_eq!(record.case_name, PARSING_FAILED_CASE_NAME);
        assert!(!record.notable_quotes.is_empty());
    }

    #[tokio::test]
    async fn primary_model_failure_propagates() {
        let analyzer = JudgmentAnalyzer::new(MockModelClient::new(vec![Err(
            AnalysisError::ModelCall("boom".to_string()),
        )]));

        let err = analyzer.analyze(&document(), &config(false)).await.unwrap_err();
        assert!(matches!(err, AnalysisError::ModelCall(_)));
    }

    #[tokio::test]
    async fn cross_check_failure_keeps_primary_record() {
        let primary_raw = "{\"case_name\": \"A v B\", \"summary\": \"Contract dispute.\", \
                           \"key_issues\": [\"Good faith\"], \"notable_quotes\": [], \
                           \"significant_principles\": []}";
        let analyzer = JudgmentAnalyzer::new(MockModelClient::new(vec![
            ok_response(primary_raw),
            Err(AnalysisError::ModelCall("network down".to_string())),
        ]));

        let record = analyzer.analyze(&document(), &config(true)).await.unwrap();
        assert_eq!(record.case_name, "A v B");
        assert!(record.cross_check_notes.is_none());
    }

    #[tokio::test]
    async fn cross_check_merges_secondary_analysis() {
        let primary_raw = "{\"case_name\": \"Unknown Case\", \"citation\": \"[2020] UKSC 1\", \
                           \"summary\": \"Short.\", \"key_issues\": [\"Good faith\"], \
                           \"notable_quotes\": [], \"significant_principles\": []}";
        let secondary_raw = "{\"case_name\": \"A v B\", \"citation\": \"\", \
                             \"summary\": \"A longer and more complete summary of the dispute.\", \
                             \"key_issues\": [\"good faith\", \"Remedies\"], \
                             \"notable_quotes\": [], \"significant_principles\": [], \
                             \"cross_check_notes\": {\"primary_accuracy\": \"medium\", \
                             \"quote_accuracy\": [], \"issues_found\": [], \
                             \"improvements\": [], \"quotes_checked\": 0}}";
        let analyzer = JudgmentAnalyzer::new(MockModelClient::new(vec![
            ok_response(primary_raw),
            ok_response(secondary_raw),
        ]));

        let record = analyzer.analyze(&document(), &config(true)).await.unwrap();
        assert_eq!(record.case_name, "A v B");
        assert_eq!(record.citation, "[2020] UKSC 1");
        assert_eq!(record.key_issues, vec!["good faith", "Remedies"]);
        let notes = record.cross_check_notes.unwrap();
        assert_eq!(notes.primary_accuracy.as_deref(), Some("medium"));
    }

    #[tokio::test]
    async fn cross_check_callable_directly() {
        let secondary_raw = "{\"case_name\": \"A v B\", \"summary\": \"Independent analysis.\", \
                             \"key_issues\": [], \"notable_quotes\": [], \
                             \"significant_principles\": [], \
                             \"cross_check_notes\": {\"primary_accuracy\": \"high\", \
                             \"quote_accuracy\": [], \"issues_found\": [], \
                             \"improvements\": [], \"quotes_checked\": 0}}";
        let analyzer = JudgmentAnalyzer::new(MockModelClient::new(vec![ok_response(secondary_raw)]));
        let primary = AnalysisRecord {
            case_name: "Unknown Case".to_string(),
            summary: "Primary summary for merging.".to_string(),
            ..Default::default()
        };
        let creds = Credentials {
            gemini_api_key: Some("test-key".to_string()),
            grok_api_key: None,
        };

        let merged = analyzer
            .cross_check(&primary, &document().text, ModelId::GeminiFlash, &creds)
            .await
            .unwrap();
        assert_eq!(merged.case_name, "A v B");
        assert!(merged.cross_check_notes.is_some());
    }

    #[tokio::test]
    async fn missing_secondary_credential_demoted_to_primary_result() {
        let primary_raw = "{\"case_name\": \"A v B\", \"summary\": \"Contract dispute.\", \
                           \"key_issues\": [], \"notable_quotes\": [], \
                           \"significant_principles\": []}";
        let analyzer = JudgmentAnalyzer::new(MockModelClient::new(vec![ok_response(primary_raw)]));
        let mut cfg = config(true);
        cfg.secondary_model = ModelId::Grok;
        cfg.credentials.grok_api_key = None;

        let record = analyzer.analyze(&document(), &cfg).await.unwrap();
        assert_eq!(record.case_name, "A v B");
        assert!(record.cross_check_notes.is_none());
    }
}
