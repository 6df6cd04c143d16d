//! Completion backend abstraction and the Ollama implementation.

use crate::config::LlmConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, instrument, trace};

/// Simple LLM client interface
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generates a text completion for the given prompt.
    async fn complete(&self, prompt_text: &str) -> Result<String>;
}

/// Client for Ollama's `/api/generate` endpoint.
///
/// Sampling temperature is pinned to zero: the same prompt has to produce
/// the same plan.
pub struct OllamaLlmClient {
    base_url: String,
    model: String,
    max_tokens: u32,
    num_ctx: u32,
    timeout: Duration,
    client: reqwest::Client,
}

impl OllamaLlmClient {
    pub fn new(config: &LlmConfig, client: reqwest::Client) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            num_ctx: config.num_ctx,
            timeout: Duration::from_secs(config.timeout_secs),
            client,
        }
    }

    fn payload(&self, prompt_text: &str) -> Value {
        json!({
            "model": self.model,
            "prompt": prompt_text,
            "options": {
                "temperature": 0.0,
                "max_tokens": self.max_tokens,
                "num_ctx": self.num_ctx,
            },
            "stream": false
        })
    }
}

#[async_trait]
impl LlmClient for OllamaLlmClient {
    #[instrument(skip(self, prompt_text), fields(model = %self.model, prompt_len = prompt_text.len()))]
    async fn complete(&self, prompt_text: &str) -> Result<String> {
        debug!("Sending request to completion backend.");
        trace!(?prompt_text, "LLM prompt content.");

        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&self.payload(prompt_text))
            .send()
            .await
            .context("Failed to send request to completion backend")?;
        debug!(status = %response.status(), "Received response from completion backend.");

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(%status, error_body = %error_text, "Completion backend request failed.");
            return Err(anyhow!("Completion backend error ({}): {}", status, error_text));
        }

        let body = response
            .text()
            .await
            .context("Failed to read completion backend response")?;
        let response_json: Value = serde_json::from_str(&body).map_err(|e| {
            error!(error = %e, raw_body = %body, "Completion backend returned non-JSON body.");
            anyhow!("Completion backend response was not valid JSON: {}", e)
        })?;

        let completion = response_json
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        debug!(completion_len = completion.len(), "Extracted completion text.");
        trace!(completion = %completion, "Completion content.");

        Ok(completion)
    }
}
