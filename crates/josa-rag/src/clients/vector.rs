//! Qdrant REST client (`POST {base}/collections/{name}/points/search`).

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{VectorHit, VectorSearch};
use crate::config::VectorConfig;

pub struct QdrantClient {
    http: Client,
    base_url: String,
    hnsw_ef: usize,
}

impl QdrantClient {
    pub fn new(cfg: &VectorConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(3))
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("Failed to build vector HTTP client")?;

        Ok(Self {
            http,
            base_url: cfg.url.trim_end_matches('/').to_string(),
            hnsw_ef: cfg.hnsw_ef,
        })
    }
}

#[async_trait]
impl VectorSearch for QdrantClient {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<Value>,
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<VectorHit>> {
        let endpoint = format!("{}/collections/{}/points/search", self.base_url, collection);
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "score_threshold": score_threshold,
            "with_payload": true,
            "params": { "hnsw_ef": self.hnsw_ef },
        });
        if let Some(filter) = filter {
            body["filter"] = filter;
        }

        let response = self
            .http
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow!("Vector search on {} timed out", collection)
                } else {
                    anyhow!("Vector request to {} failed: {}", endpoint, e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let preview: String = text.chars().take(200).collect();
            return Err(anyhow!(
                "Vector search on {} returned HTTP {}: {}",
                collection,
                status,
                preview
            ));
        }

        let parsed: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse vector response from {}", endpoint))?;
        let points = parsed["result"].as_array().cloned().unwrap_or_default();

        Ok(points
            .into_iter()
            .map(|point| {
                // Point ids may be integers or UUID strings.
                let id = match &point["id"] {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let score = point["score"].as_f64().unwrap_or(0.0) as f32;
                let payload = point.get("payload").cloned().unwrap_or(Value::Null);
                VectorHit { id, score, payload }
            })
            .collect())
    }
}

/// Build a Qdrant filter from equality and set-membership conditions.
///
/// `must_match` yields `{key, match:{value}}` clauses; `must_any` yields
/// `{key, match:{any}}` clauses. Returns `None` when both are empty.
pub fn build_filter(must_match: &[(&str, &str)], must_any: &[(&str, &[String])]) -> Option<Value> {
    let mut must = Vec::new();
    for (key, value) in must_match {
        must.push(json!({ "key": key, "match": { "value": value } }));
    }
    for (key, values) in must_any {
        if !values.is_empty() {
            must.push(json!({ "key": key, "match": { "any": values } }));
        }
    }

    if must.is_empty() {
        None
    } else {
        Some(json!({ "must": must }))
    }
}
