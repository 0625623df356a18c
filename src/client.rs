//! HTTP clients for the hosted model providers.
//!
//! [`ModelClient`] is the seam the orchestrator calls through, so tests can
//! substitute a mock. [`HttpModelClient`] is the production implementation
//! covering the Gemini and Grok REST APIs.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AnalysisError;
use crate::types::{FinishReason, ModelId, ModelResponse, Provider};

const DEFAULT_GEMINI_BASE: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_GROK_BASE: &str = "https://api.x.ai";

const TEMPERATURE: f64 = 0.3;
const MAX_OUTPUT_TOKENS: u32 = 8192;

/// A model backend that turns a prompt into generated text.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(
        &self,
        model: ModelId,
        api_key: &str,
        prompt: &str,
    ) -> Result<ModelResponse, AnalysisError>;
}

/// Production client speaking to the Gemini and Grok HTTP APIs.
pub struct HttpModelClient {
    http: reqwest::Client,
    gemini_base: String,
    grok_base: String,
}

impl HttpModelClient {
    /// Create a client with the given per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, AnalysisError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalysisError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            gemini_base: DEFAULT_GEMINI_BASE.to_string(),
            grok_base: DEFAULT_GROK_BASE.to_string(),
        })
    }

    /// Override the provider base URLs, for tests or proxies.
    pub fn with_base_urls(mut self, gemini_base: &str, grok_base: &str) -> Self {
        self.gemini_base = gemini_base.trim_end_matches('/').to_string();
        self.grok_base = grok_base.trim_end_matches('/').to_string();
        self
    }

    async fn call_gemini(
        &self,
        model: ModelId,
        api_key: &str,
        prompt: &str,
    ) -> Result<ModelResponse, AnalysisError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.gemini_base,
            model.wire_name(),
            api_key
        );
        let body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                top_k: 40,
                top_p: 0.95,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        let started = Instant::now();
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalysisError::ModelCall(format!("Gemini request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::ModelCall(format!(
                "Gemini API error {}: {}",
                status.as_u16(),
                snippet(&body)
            )));
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::ModelCall(format!("Gemini response parsing failed: {e}")))?;
        let elapsed = started.elapsed();

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| AnalysisError::ModelCall("Gemini returned no candidates".to_string()))?;

        let finish = candidate.finish_reason.as_deref().unwrap_or("STOP");
        if finish == "SAFETY" {
            return Err(AnalysisError::ModelCall(
                "Gemini blocked the response for safety reasons".to_string(),
            ));
        }

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join(""))
            .unwrap_or_default();

        let finish_reason = if text.is_empty() {
            warn!(model = model.wire_name(), finish, "Gemini returned empty content");
            FinishReason::Empty
        } else if matches!(finish, "MAX_TOKENS" | "LENGTH") {
            warn!(
                model = model.wire_name(),
                chars = text.len(),
                "Gemini response truncated at token limit"
            );
            FinishReason::Truncated
        } else {
            FinishReason::Normal
        };

        debug!(
            model = model.wire_name(),
            chars = text.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Gemini call complete"
        );

        Ok(ModelResponse {
            text,
            finish_reason,
            elapsed,
        })
    }

    async fn call_grok(
        &self,
        api_key: &str,
        prompt: &str,
    ) -> Result<ModelResponse, AnalysisError> {
        let url = format!("{}/v1/chat/completions", self.grok_base);
        let body = GrokRequest {
            model: ModelId::Grok.wire_name(),
            messages: vec![GrokMessage {
                role: "user",
                content: prompt,
            }],
            temperature: TEMPERATURE,
            max_tokens: MAX_OUTPUT_TOKENS,
        };

        let started = Instant::now();
        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalysisError::ModelCall(format!("Grok request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::ModelCall(format!(
                "Grok API error {}: {}",
                status.as_u16(),
                snippet(&body)
            )));
        }

        let parsed: GrokResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::ModelCall(format!("Grok response parsing failed: {e}")))?;
        let elapsed = started.elapsed();

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AnalysisError::ModelCall("Grok returned no choices".to_string()))?;

        let finish = choice.finish_reason.as_deref().unwrap_or("stop");
        if finish == "content_filter" {
            return Err(AnalysisError::ModelCall(
                "Grok blocked the response via content filter".to_string(),
            ));
        }

        let text = choice.message.map(|m| m.content).unwrap_or_default();
        let finish_reason = if text.is_empty() {
            warn!(finish, "Grok returned empty content");
            FinishReason::Empty
        } else if finish == "length" {
            warn!(chars = text.len(), "Grok response truncated at token limit");
            FinishReason::Truncated
        } else {
            FinishReason::Normal
        };

        debug!(
            chars = text.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Grok call complete"
        );

        Ok(ModelResponse {
            text,
            finish_reason,
            elapsed,
        })
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn generate(
        &self,
        model: ModelId,
        api_key: &str,
        prompt: &str,
    ) -> Result<ModelResponse, AnalysisError> {
        match model.provider() {
            Provider::Gemini => self.call_gemini(model, api_key, prompt).await,
            Provider::Grok => self.call_grok(api_key, prompt).await,
        }
    }
}

/// First part of an error body, enough for diagnostics without flooding logs.
fn snippet(body: &str) -> String {
    const MAX: usize = 300;
    if body.chars().count() <= MAX {
        return body.to_string();
    }
    let end = body
        .char_indices()
        .nth(MAX)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    format!("{}...", &body[..end])
}

// Gemini generateContent wire format.

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "topK")]
    top_k: u32,
    #[serde(rename = "topP")]
    top_p: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: String,
}

// Grok chat completions wire format.

#[derive(Serialize)]
struct GrokRequest<'a> {
    model: &'a str,
    messages: Vec<GrokMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct GrokMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct GrokResponse {
    #[serde(default)]
    choices: Vec<GrokChoice>,
}

#[derive(Deserialize)]
struct GrokChoice {
    message: Option<GrokResponseMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GrokResponseMessage {
    #[serde(default)]
    content: String,
}
