//! AI advisory client.
//!
//! Two operations, both delegating to a text-generation endpoint:
//! `classify_incident` turns an incident description into a coarse severity
//! and one-sentence summary, `get_advice` answers a road-safety question.
//! Neither ever returns an error to the caller. Without a credential they
//! return a fixed fallback without touching the network; on any failure they
//! log and return a different fixed fallback.

use crate::config::AdvisoryConfig;
use crate::types::Severity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

pub const UNKNOWN_SEVERITY: &str = "Unknown";
pub const UNAVAILABLE_SUMMARY: &str = "AI service unavailable";
pub const FAILED_SUMMARY: &str = "Could not analyze.";
pub const UNAVAILABLE_ADVICE: &str = "AI service unavailable. Please check official traffic rules.";
pub const FAILED_ADVICE: &str = "Always follow traffic signals and signs.";
pub const EMPTY_ADVICE: &str = "Drive safely.";

#[derive(Debug, Error)]
pub enum AdvisoryError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("service returned no text")]
    EmptyResponse,

    #[error("malformed response: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    Json,
}

/// A text-completion endpoint.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, format: ResponseFormat) -> Result<String, AdvisoryError>;
}

/// Severity label plus summary. The label is whatever the model said and is
/// not checked against [`Severity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub severity: String,
    pub summary: String,
}

impl Assessment {
    pub fn unavailable() -> Self {
        Self {
            severity: UNKNOWN_SEVERITY.to_string(),
            summary: UNAVAILABLE_SUMMARY.to_string(),
        }
    }

    pub fn failed() -> Self {
        Self {
            severity: UNKNOWN_SEVERITY.to_string(),
            summary: FAILED_SUMMARY.to_string(),
        }
    }

    pub fn suggested_severity(&self) -> Option<Severity> {
        self.severity.parse().ok()
    }
}

#[derive(Clone, Default)]
pub struct AdvisoryClient {
    generator: Option<Arc<dyn TextGenerator>>,
}

impl AdvisoryClient {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>) -> Self {
        Self { generator }
    }

    /// A client that always answers with the "unavailable" fallbacks.
    pub fn disabled() -> Self {
        Self { generator: None }
    }

    /// Builds a Gemini-backed client when the configured credential is present.
    pub fn from_config(config: &AdvisoryConfig) -> Self {
        match config.api_key() {
            Some(key) => {
                let generator: Arc<dyn TextGenerator> =
                    Arc::new(GeminiClient::new(&config.endpoint, &config.model, key));
                Self::new(Some(generator))
            }
            None => {
                warn!(
                    env = %config.api_key_env,
                    "no API key configured, AI advisory features will use fallbacks"
                );
                Self::disabled()
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.generator.is_some()
    }

    pub async fn classify_incident(&self, description: &str) -> Assessment {
        let Some(generator) = &self.generator else {
            return Assessment::unavailable();
        };

        let prompt = format!(
            "Analyze the following accident description and provide a JSON response with a \
             predicted severity (Low, Medium, High, Critical) and a short one-sentence summary. \
             Description: \"{}\"",
            description
        );

        let result = generator
            .generate(&prompt, ResponseFormat::Json)
            .await
            .and_then(|text| parse_assessment(&text));

        match result {
            Ok(assessment) => {
                debug!(severity = %assessment.severity, "incident classified");
                assessment
            }
            Err(e) => {
                error!(error = %e, "incident analysis failed");
                Assessment::failed()
            }
        }
    }

    pub async fn get_advice(&self, topic: &str) -> String {
        let Some(generator) = &self.generator else {
            return UNAVAILABLE_ADVICE.to_string();
        };

        let prompt = format!(
            "Provide a short, concise, and helpful road safety tip regarding: \"{}\". \
             Keep it under 50 words.",
            topic
        );

        match generator.generate(&prompt, ResponseFormat::Text).await {
            Ok(text) if text.trim().is_empty() => EMPTY_ADVICE.to_string(),
            Ok(text) => text,
            Err(AdvisoryError::EmptyResponse) => EMPTY_ADVICE.to_string(),
            Err(e) => {
                error!(error = %e, "safety advice request failed");
                FAILED_ADVICE.to_string()
            }
        }
    }
}

fn parse_assessment(text: &str) -> Result<Assessment, AdvisoryError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AdvisoryError::EmptyResponse);
    }
    Ok(serde_json::from_str(text)?)
}

/// `generateContent` client for the Gemini REST API.
pub struct GeminiClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

impl GeminiClient {
    pub fn new(endpoint: &str, model: &str, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: format!(
                "{}/models/{}:generateContent",
                endpoint.trim_end_matches('/'),
                model
            ),
            api_key,
        }
    }

    fn request_body(prompt: &str, format: ResponseFormat) -> serde_json::Value {
        let mut body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });
        if format == ResponseFormat::Json {
            body["generationConfig"] = json!({ "responseMimeType": "application/json" });
        }
        body
    }

    fn extract_text(response: GenerateResponse) -> Result<String, AdvisoryError> {
        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(AdvisoryError::EmptyResponse);
        }
        Ok(text)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str, format: ResponseFormat) -> Result<String, AdvisoryError> {
        let response = self
            .http
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(prompt, format))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdvisoryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        Self::extract_text(parsed)
    }
}
