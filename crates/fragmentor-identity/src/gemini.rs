//! Gemini `generateContent` client with structured JSON output.

use crate::prompt::{build_prompt, response_schema, DEFAULT_ALTERNATIVES};
use crate::{fallback_identity, IdentityGenerator};
use fragmentor_core::types::{AiResponse, GenerationOutcome, IdentityInput};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
/// High temperature for wildly varied alternatives.
pub const DEFAULT_TEMPERATURE: f32 = 1.3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("GEMINI_API_KEY not configured")]
    MissingApiKey,
    /// Built with the URL stripped so request details never reach logs.
    #[error("gemini request failed: {0}")]
    Http(reqwest::Error),
    #[error("gemini returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("no text in gemini response")]
    Empty,
    #[error("failed to parse identity JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        GenerationError::Http(e.without_url())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    /// Alternatives requested in the prompt. The response may contain any number.
    pub alternatives: usize,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            alternatives: DEFAULT_ALTERNATIVES,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: serde_json::Value,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

pub struct GeminiClient {
    config: GeminiConfig,
    client: Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, GenerationError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    /// One generation call; every failure is returned to the caller.
    pub async fn try_generate(&self, input: &IdentityInput) -> Result<AiResponse, GenerationError> {
        if self.config.api_key.is_empty() {
            return Err(GenerationError::MissingApiKey);
        }

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: build_prompt(input, self.config.alternatives),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: response_schema(self.config.alternatives),
                temperature: self.config.temperature,
            },
        };

        info!(model = %self.config.model, age = input.age, gender = %input.gender, "requesting identity");

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, self.config.api_key.as_str())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let parsed: GeminiResponse = serde_json::from_str(&body)?;
        let text = parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.text)
            .filter(|t| !t.trim().is_empty())
            .ok_or(GenerationError::Empty)?;

        let identity: AiResponse = serde_json::from_str(strip_code_fence(&text))?;
        info!(
            match_score = identity.primary_identity.match_score,
            alternatives = identity.alternatives.len(),
            "identity generated"
        );
        Ok(identity)
    }
}

impl IdentityGenerator for GeminiClient {
    async fn generate(&self, input: &IdentityInput) -> GenerationOutcome {
        match self.try_generate(input).await {
            Ok(response) => GenerationOutcome::success(response),
            Err(e) => {
                warn!(error = %e, "identity generation failed; using fallback");
                GenerationOutcome::failed(fallback_identity(), e.to_string())
            }
        }
    }
}

/// Drop a surrounding markdown code fence (```json ... ```), if any.
fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}
