//! Elasticsearch REST client for the `findings` and `chunks` indices.
//!
//! Search and aggregation requests go through `_search`; single documents
//! are fetched via `_doc/{id}`. Requests that time out are retried up to the
//! configured count; other failures surface immediately and are recovered by
//! the caller.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use super::{LexicalHit, LexicalSearch};
use crate::config::LexicalConfig;

pub struct ElasticClient {
    http: Client,
    base_url: String,
    user: String,
    password: Option<String>,
    retries: u32,
}

impl ElasticClient {
    pub fn new(cfg: &LexicalConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(5))
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("Failed to build lexical HTTP client")?;

        Ok(Self {
            http,
            base_url: cfg.url.trim_end_matches('/').to_string(),
            user: cfg.user.clone(),
            password: cfg.password.clone(),
            retries: cfg.retries,
        })
    }

    async fn post_search(&self, index: &str, body: &Value) -> Result<Value> {
        let endpoint = format!("{}/{}/_search", self.base_url, index);

        for attempt in 0..=self.retries {
            let result = self
                .http
                .post(&endpoint)
                .basic_auth(&self.user, self.password.as_deref())
                .json(body)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        let text = response.text().await.unwrap_or_default();
                        let preview: String = text.chars().take(200).collect();
                        return Err(anyhow!(
                            "Lexical search on {} returned HTTP {}: {}",
                            index,
                            status,
                            preview
                        ));
                    }
                    return response.json().await.with_context(|| {
                        format!("Failed to parse lexical response from {}", endpoint)
                    });
                }
                Err(e) if e.is_timeout() && attempt < self.retries => {
                    tracing::warn!(
                        index,
                        attempt = attempt + 1,
                        max = self.retries,
                        "Lexical search timed out, retrying"
                    );
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Lexical request to {} failed", endpoint));
                }
            }
        }

        Err(anyhow!(
            "Lexical search on {} timed out after {} retries",
            index,
            self.retries
        ))
    }
}

#[async_trait]
impl LexicalSearch for ElasticClient {
    async fn search(&self, index: &str, body: Value) -> Result<Vec<LexicalHit>> {
        let response = self.post_search(index, &body).await?;
        let hits = response["hits"]["hits"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                let id = hit["_id"].as_str()?.to_string();
                let score = hit["_score"].as_f64().unwrap_or(0.0) as f32;
                let source = hit.get("_source").cloned().unwrap_or(Value::Null);
                Some(LexicalHit { id, score, source })
            })
            .collect())
    }

    async fn aggregate(&self, index: &str, body: Value) -> Result<Value> {
        let response = self.post_search(index, &body).await?;
        response
            .get("aggregations")
            .cloned()
            .ok_or_else(|| anyhow!("Aggregation response from {} has no aggregations", index))
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<Value>> {
        let endpoint = format!("{}/{}/_doc/{}", self.base_url, index, id);
        let response = self
            .http
            .get(&endpoint)
            .basic_auth(&self.user, self.password.as_deref())
            .send()
            .await
            .with_context(|| format!("Lexical get from {} failed", endpoint))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Lexical get on {} returned HTTP {}", index, status));
        }

        let parsed: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse lexical get response from {}", endpoint))?;
        Ok(parsed.get("_source").cloned())
    }
}
