//! External collaborators: lexical store, vector store, LLM, embedder.
//!
//! Each collaborator is a trait so the engine can be driven against
//! in-memory fakes in tests; the production implementations are thin HTTP
//! clients over the respective REST APIs.

pub mod embedding;
pub mod lexical;
pub mod llm;
pub mod vector;

pub use embedding::{CachedEmbedder, OllamaEmbedder};
pub use lexical::ElasticClient;
pub use llm::OllamaClient;
pub use vector::QdrantClient;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// One hit from the lexical store (`_id`, `_score`, `_source`).
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub id: String,
    pub score: f32,
    pub source: Value,
}

/// One scored point from the vector store.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub payload: Value,
}

#[async_trait]
pub trait LexicalSearch: Send + Sync {
    /// Run a `_search` request and return the hit list.
    async fn search(&self, index: &str, body: Value) -> Result<Vec<LexicalHit>>;

    /// Run a `size: 0` aggregation `_search` and return the `aggregations`
    /// object of the response.
    async fn aggregate(&self, index: &str, body: Value) -> Result<Value>;

    /// Fetch a single document's `_source` by id. `Ok(None)` when absent.
    async fn get(&self, index: &str, id: &str) -> Result<Option<Value>>;
}

#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<Value>,
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<VectorHit>>;
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Single non-streaming generation. With `json_mode` the backend is asked
    /// to constrain its output to a JSON value.
    async fn generate(&self, prompt: &str, json_mode: bool) -> Result<String>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dense embedding of a query string.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}
