//! Ollama-compatible LLM client (`POST {base}/api/generate`).

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::LlmClient;
use crate::config::LlmConfig;

pub struct OllamaClient {
    http: Client,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OllamaClient {
    pub fn new(cfg: &LlmConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(5))
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("Failed to build LLM HTTP client")?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            temperature: cfg.temperature,
        })
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn generate(&self, prompt: &str, json_mode: bool) -> Result<String> {
        let endpoint = format!("{}/api/generate", self.base_url);
        let mut body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": self.temperature },
        });
        if json_mode {
            body["format"] = json!("json");
        }

        tracing::debug!(
            endpoint = %endpoint,
            model = %self.model,
            json_mode,
            prompt_len = prompt.len(),
            "Sending LLM request"
        );

        let response = self
            .http
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow!("LLM request to {} timed out", endpoint)
                } else if e.is_connect() {
                    anyhow!("Failed to connect to LLM at {}: {}", endpoint, e)
                } else {
                    anyhow!("LLM request to {} failed: {}", endpoint, e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let preview: String = text.chars().take(200).collect();
            return Err(anyhow!("LLM returned HTTP {}: {}", status, preview));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse LLM response from {}", endpoint))?;

        parsed
            .get("response")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("LLM response is missing the `response` field"))
    }
}
