//! Embedding-runner client plus the process-wide query-embedding cache.

use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::RwLock;
use reqwest::Client;
use serde_json::json;

use super::Embedder;
use crate::config::EmbeddingConfig;

pub struct OllamaEmbedder {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(cfg: &EmbeddingConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(5))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build embedding HTTP client")?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let endpoint = format!("{}/api/embeddings", self.base_url);
        let body = json!({ "model": self.model, "prompt": text });

        let response = self
            .http
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow!("Embedding request to {} timed out", endpoint)
                } else {
                    anyhow!("Embedding request to {} failed: {}", endpoint, e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Embedding runner returned HTTP {}", status));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse embedding response")?;
        let vector = parsed["embedding"]
            .as_array()
            .ok_or_else(|| anyhow!("Embedding response is missing the `embedding` field"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect::<Vec<f32>>();

        if vector.is_empty() {
            return Err(anyhow!("Embedding runner returned an empty vector"));
        }
        Ok(vector)
    }
}

/// LRU cache in front of any [`Embedder`], keyed by the query string.
///
/// Reads take only the cache lock; a miss performs the embedding call outside
/// the lock and installs the result afterwards, so concurrent misses may
/// duplicate one call but never block each other.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: RwLock<LruCache<String, Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is non-zero");
        Self {
            inner,
            cache: RwLock::new(LruCache::new(capacity)),
        }
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(vector) = self.cache.write().get(text).cloned() {
            return Ok(vector);
        }

        let vector = self.inner.embed(text).await?;
        self.cache.write().put(text.to_string(), vector.clone());
        Ok(vector)
    }
}
