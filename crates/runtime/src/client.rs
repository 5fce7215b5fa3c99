//! Abstract model client: the single interface between the executor and an
//! LLM backend.
//!
//! The executor builds a structured `ModelRequest` (system instructions
//! from persona + context + anchors, user content from the step, an output
//! schema from the declared type) and consumes a normalized
//! `ModelResponse`. Tests use `MockModelClient` with a scripted response
//! queue; a reference Anthropic implementation is available behind the
//! `anthropic` feature.

use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// The prior attempt and why it was rejected, threaded into the next
/// attempt of a refining step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureContext {
    pub previous_attempt: serde_json::Value,
    pub why_rejected: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// Schema derived from the declared step output type.
    pub output_schema: serde_json::Value,
    pub max_tokens: Option<u32>,
    pub effort: Option<String>,
    pub failure_context: Option<FailureContext>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<serde_json::Value>,
    /// Backend-reported confidence, when the backend supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub usage: TokenUsage,
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        ModelResponse {
            content: content.into(),
            ..ModelResponse::default()
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_structured(mut self, value: serde_json::Value) -> Self {
        self.structured = Some(value);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    Network(String),
    Api { status: u16, message: String },
    Parse(String),
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Network(msg) => write!(f, "model network error: {}", msg),
            ModelError::Api { status, message } => {
                write!(f, "model API error ({}): {}", status, message)
            }
            ModelError::Parse(msg) => write!(f, "model parse error: {}", msg),
        }
    }
}

impl std::error::Error for ModelError {}

/// The abstract completion contract. Implementations handle provider
/// formatting, authentication, and response normalization.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;
}

// ──────────────────────────────────────────────
// Mock client
// ──────────────────────────────────────────────

/// Test client that pops scripted responses from a queue and captures every
/// request it receives.
pub struct MockModelClient {
    responses: Mutex<Vec<Result<ModelResponse, ModelError>>>,
    captured: Mutex<Vec<ModelRequest>>,
}

impl MockModelClient {
    pub fn new(responses: Vec<Result<ModelResponse, ModelError>>) -> Self {
        MockModelClient {
            responses: Mutex::new(responses),
            captured: Mutex::new(Vec::new()),
        }
    }

    /// Every request this client has served, in order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.captured.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        self.captured
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        let mut queue = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        if queue.is_empty() {
            return Err(ModelError::Network("mock queue exhausted".to_string()));
        }
        queue.remove(0)
    }
}

// ──────────────────────────────────────────────
// Anthropic reference client (feature-gated)
// ──────────────────────────────────────────────

#[cfg(feature = "anthropic")]
/// Reference implementation against the Anthropic Messages API.
///
/// Uses `ureq` for HTTP from a blocking task. Reads the API key from the
/// `ANTHROPIC_API_KEY` environment variable.
pub struct AnthropicClient {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[cfg(feature = "anthropic")]
impl AnthropicClient {
    pub fn from_env(model: impl Into<String>) -> Result<Self, ModelError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            ModelError::Network("ANTHROPIC_API_KEY environment variable not set".to_string())
        })?;
        Ok(AnthropicClient {
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
            model: model.into(),
        })
    }
}

#[cfg(feature = "anthropic")]
#[async_trait]
impl ModelClient for AnthropicClient {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let api_key = self.api_key.clone();
        let url = format!("{}/v1/messages", self.base_url);
        let model = self.model.clone();

        let mut user_content = request.user_prompt.clone();
        if let Some(fc) = &request.failure_context {
            user_content.push_str(&format!(
                "\n\nprevious_attempt: {}\nwhy_rejected: {}",
                fc.previous_attempt, fc.why_rejected
            ));
        }
        if !request.output_schema.is_null() {
            user_content.push_str(&format!(
                "\n\nRespond with JSON matching this schema: {}",
                request.output_schema
            ));
        }

        let body = serde_json::json!({
            "model": model,
            "max_tokens": request.max_tokens.unwrap_or(1024),
            "system": request.system_prompt,
            "messages": [{ "role": "user", "content": user_content }],
        });

        tokio::task::spawn_blocking(move || {
            let agent = ureq::Agent::new_with_defaults();
            let response = agent
                .post(&url)
                .header("x-api-key", &api_key)
                .header("anthropic-version", "2023-06-01")
                .header("content-type", "application/json")
                .send_json(body);

            match response {
                Ok(resp) => {
                    let json: serde_json::Value = resp
                        .into_body()
                        .read_json()
                        .map_err(|e| ModelError::Parse(format!("bad response body: {}", e)))?;
                    let text = json["content"]
                        .as_array()
                        .and_then(|arr| arr.first())
                        .and_then(|c| c["text"].as_str())
                        .map(|s| s.to_string())
                        .ok_or_else(|| ModelError::Parse("no text content".to_string()))?;
                    let structured = serde_json::from_str(&text).ok();
                    let usage = TokenUsage {
                        input_tokens: json["usage"]["input_tokens"].as_u64().unwrap_or(0),
                        output_tokens: json["usage"]["output_tokens"].as_u64().unwrap_or(0),
                    };
                    Ok(ModelResponse {
                        content: text,
                        structured,
                        confidence: None,
                        usage,
                    })
                }
                Err(e) => Err(ModelError::Network(e.to_string())),
            }
        })
        .await
        .map_err(|e| ModelError::Network(format!("task join error: {}", e)))?
    }
}
