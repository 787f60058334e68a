//! Gemini `generateContent` client

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{GenerationClient, GenerationResult};
use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::types::{PromptMessage, Role};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Models the client accepts in configuration
pub const ALLOWED_MODELS: &[&str] = &[
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite",
];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationSettings,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationSettings {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
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

/// HTTP client for Google's Gemini API
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl GeminiClient {
    /// Build a client from the generation section of the config
    pub fn new(config: &GenerationConfig) -> GenerationResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GenerationError::Request(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: config.model_name.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    fn build_request(
        &self,
        messages: &[PromptMessage],
        schema: Option<&serde_json::Value>,
    ) -> GenerateRequest {
        let system: Vec<Part> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| Part {
                text: m.content.clone(),
            })
            .collect();

        let contents = messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: m.content.clone(),
                }],
            })
            .collect();

        GenerateRequest {
            system_instruction: (!system.is_empty()).then_some(Content {
                role: None,
                parts: system,
            }),
            contents,
            generation_config: GenerationSettings {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
                response_mime_type: schema.map(|_| "application/json"),
                response_schema: schema.cloned(),
            },
        }
    }

    async fn send(&self, api_key: &SecretString, body: &GenerateRequest) -> GenerationResult<String> {
        let url = self.endpoint();
        debug!("Sending request to Gemini: {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout(REQUEST_TIMEOUT.as_secs())
                } else {
                    GenerationError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| GenerationError::Request(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(map_status(status.as_u16(), &response_text));
        }

        extract_text(&response_text)
    }
}

/// Map a non-success HTTP status to the error kind recorded against the key
fn map_status(status: u16, body: &str) -> GenerationError {
    let preview: String = body.chars().take(256).collect();
    match status {
        401 | 403 => GenerationError::Authentication(format!("HTTP {}: {}", status, preview)),
        429 => GenerationError::RateLimited(format!("HTTP {}: {}", status, preview)),
        _ => GenerationError::Request(format!("HTTP {}: {}", status, preview)),
    }
}

/// Concatenate the text parts of the first candidate
fn extract_text(body: &str) -> GenerationResult<String> {
    let parsed: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| GenerationError::InvalidResponse(format!("JSON parse error: {}", e)))?;

    let content = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .ok_or_else(|| GenerationError::InvalidResponse("Response has no candidates".to_string()))?;

    let text: String = content.parts.into_iter().map(|p| p.text).collect();
    if text.trim().is_empty() {
        return Err(GenerationError::InvalidResponse(
            "Response contained no text".to_string(),
        ));
    }
    Ok(text)
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn generate(
        &self,
        api_key: &SecretString,
        messages: &[PromptMessage],
    ) -> GenerationResult<String> {
        let body = self.build_request(messages, None);
        self.send(api_key, &body).await
    }

    async fn generate_structured(
        &self,
        api_key: &SecretString,
        messages: &[PromptMessage],
        schema: &serde_json::Value,
    ) -> GenerationResult<serde_json::Value> {
        let body = self.build_request(messages, Some(schema));
        let text = self.send(api_key, &body).await?;
        serde_json::from_str(&text).map_err(|e| {
            GenerationError::InvalidResponse(format!("Structured output is not valid JSON: {}", e))
        })
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
