use crate::config::Config;
use crate::error::{Result, TrustLayerError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Fixed low temperature for reproducible analysis output
const GENERATION_TEMPERATURE: f32 = 0.2;
/// Output-token ceiling for a single analysis
const MAX_OUTPUT_TOKENS: u32 = 2048;
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Client for the Gemini `generateContent` endpoint
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
}

impl GeminiClient {
    /// Creates a client for the configured model and base URL
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            model: config.gemini_model.clone(),
        })
    }

    /// Submits `prompt` and returns the generated text.
    ///
    /// Joins all parts of the first candidate, so single- and multi-part
    /// responses decode the same way. A response that decodes but carries no
    /// candidate content is a [`TrustLayerError::MalformedResponse`], never a
    /// silent empty string.
    pub async fn generate(&self, api_key: &str, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: GENERATION_TEMPERATURE,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        info!(model = %self.model, prompt_chars = prompt.chars().count(), "submitting prompt to Gemini");

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let details = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error response".to_string());
            return Err(TrustLayerError::Provider { status, details });
        }

        let decoded: GenerateResponse = response
            .json()
            .await
            .map_err(|e| TrustLayerError::MalformedResponse(format!("provider JSON: {e}")))?;
        extract_text(decoded)
    }
}

fn extract_text(response: GenerateResponse) -> Result<String> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| TrustLayerError::MalformedResponse("response has no candidates".into()))?;
    let content = candidate
        .content
        .ok_or_else(|| TrustLayerError::MalformedResponse("candidate has no content".into()))?;
    if content.parts.is_empty() {
        return Err(TrustLayerError::MalformedResponse(
            "candidate content has no parts".into(),
        ));
    }
    Ok(content
        .parts
        .into_iter()
        .filter_map(|part| part.text)
        .collect::<Vec<_>>()
        .join(""))
}

// Gemini wire types

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}
