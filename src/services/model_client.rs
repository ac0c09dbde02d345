use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;

use crate::config::SamplingConfig;
use crate::services::prompt_builder::GenerationRequest;

const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("response error: {0}")]
    Response(String),
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() || err.is_status() {
            ModelError::Response(err.to_string())
        } else {
            ModelError::Connection(err.to_string())
        }
    }
}

/// A text-generation backend. Implementations do not retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Lightweight list-models request. Never fails; `false` on any problem.
    async fn check_availability(&self) -> bool;

    /// One generation round-trip, returning the raw generated text.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ModelError>;
}

/// Pulls the generated text out of either a local-inference envelope
/// (`{"response": "..."}`) or a chat-completion envelope (`choices[0]`).
pub fn extract_generated_text(body: &JsonValue) -> Option<String> {
    if let Some(text) = body.get("response").and_then(|v| v.as_str()) {
        return Some(text.to_string());
    }

    let choice = body.get("choices").and_then(|c| c.get(0))?;
    choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .or_else(|| choice.get("text").and_then(|t| t.as_str()))
        .map(|s| s.to_string())
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

async fn read_envelope(res: reqwest::Response) -> Result<String, ModelError> {
    let status = res.status();
    if !status.is_success() {
        let text = res.text().await.unwrap_or_default();
        return Err(ModelError::Response(format!(
            "backend returned {}: {}",
            status,
            text.chars().take(200).collect::<String>()
        )));
    }

    let body: JsonValue = res
        .json()
        .await
        .map_err(|e| ModelError::Response(format!("unparsable envelope: {}", e)))?;

    extract_generated_text(&body)
        .ok_or_else(|| ModelError::Response("envelope carries no generated text".to_string()))
}

/// Local Ollama-style inference server. When the configured model is not
/// installed, the first installed model reported by `/api/tags` is used.
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    resolved_model: Arc<RwLock<Option<String>>>,
    sampling: SamplingConfig,
    timeout: Duration,
}

impl OllamaClient {
    pub fn new(
        client: Client,
        base_url: String,
        model: String,
        sampling: SamplingConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url,
            model,
            resolved_model: Arc::new(RwLock::new(None)),
            sampling,
            timeout,
        }
    }

    /// Model name sent with generation requests.
    pub fn active_model(&self) -> String {
        self.resolved_model
            .read()
            .ok()
            .and_then(|m| m.clone())
            .unwrap_or_else(|| self.model.clone())
    }

    fn resolve_model(&self, model: &str) {
        if let Ok(mut slot) = self.resolved_model.write() {
            *slot = Some(model.to_string());
        }
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    async fn check_availability(&self) -> bool {
        let res = self
            .client
            .get(endpoint(&self.base_url, "api/tags"))
            .timeout(AVAILABILITY_TIMEOUT)
            .send()
            .await;

        let body: JsonValue = match res {
            Ok(r) if r.status().is_success() => match r.json().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(error = %e, "Ollama tags response was not JSON");
                    return false;
                }
            },
            Ok(r) => {
                tracing::warn!(status = %r.status(), "Ollama availability check failed");
                return false;
            }
            Err(e) => {
                tracing::warn!(error = %e, url = %self.base_url, "Cannot connect to Ollama");
                return false;
            }
        };

        let names: Vec<&str> = body
            .get("models")
            .and_then(|m| m.as_array())
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                    .collect()
            })
            .unwrap_or_default();

        if names.is_empty() {
            tracing::warn!("Ollama is running but has no models installed");
            return false;
        }
        if names.iter().any(|n| *n == self.model) {
            self.resolve_model(&self.model);
        } else {
            tracing::warn!(
                model = %self.model,
                fallback = names[0],
                available = ?names,
                "Configured model is not installed, using the first installed model"
            );
            self.resolve_model(names[0]);
        }
        true
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ModelError> {
        let payload = serde_json::json!({
            "model": self.active_model(),
            "system": request.system,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": self.sampling.temperature,
                "top_p": self.sampling.top_p,
                "num_predict": request.max_tokens,
                "repeat_penalty": 1.05,
            }
        });

        let res = self
            .client
            .post(endpoint(&self.base_url, "api/generate"))
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await?;

        read_envelope(res).await
    }
}

/// Hosted OpenAI-compatible chat-completion API.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    sampling: SamplingConfig,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(
        client: Client,
        base_url: String,
        api_key: String,
        model: String,
        sampling: SamplingConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url,
            api_key,
            model,
            sampling,
            timeout,
        }
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn check_availability(&self) -> bool {
        match self
            .client
            .get(endpoint(&self.base_url, "models"))
            .bearer_auth(&self.api_key)
            .timeout(AVAILABILITY_TIMEOUT)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => true,
            Ok(r) => {
                tracing::warn!(status = %r.status(), "OpenAI availability check failed");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot connect to OpenAI API");
                false
            }
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ModelError> {
        let payload = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt}
            ],
            "temperature": self.sampling.temperature,
            "top_p": self.sampling.top_p,
            "max_tokens": request.max_tokens,
        });

        let res = self
            .client
            .post(endpoint(&self.base_url, "chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await?;

        read_envelope(res).await
    }
}
