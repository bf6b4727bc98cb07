//! Two-stage hybrid retrieval: lexical BM25 and dense-vector search fused
//! with Reciprocal Rank Fusion.

pub mod chunks;
pub mod findings;
pub mod fusion;

pub use chunks::ChunksRetrieval;
pub use findings::FindingsRetrieval;
pub use fusion::{reciprocal_rank_fusion, FusedHit};

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;

use crate::clients::{Embedder, LexicalSearch, VectorSearch};
use crate::config::AgentConfig;

/// Owns the store/embedder handles and the keyword-frequency cache. All
/// methods take `&self`; the retriever is shared across concurrent queries.
pub struct HybridRetriever {
    pub(crate) lexical: Arc<dyn LexicalSearch>,
    pub(crate) vector: Arc<dyn VectorSearch>,
    pub(crate) embedder: Arc<dyn Embedder>,
    pub(crate) config: Arc<AgentConfig>,
    keyword_freq_cache: Mutex<LruCache<String, HashMap<String, u64>>>,
}

impl HybridRetriever {
    pub fn new(
        lexical: Arc<dyn LexicalSearch>,
        vector: Arc<dyn VectorSearch>,
        embedder: Arc<dyn Embedder>,
        config: Arc<AgentConfig>,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.retrieval.keyword_freq_cache_size.max(1))
            .expect("capacity is non-zero");
        Self {
            lexical,
            vector,
            embedder,
            config,
            keyword_freq_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub(crate) fn freq_cache_get(&self, key: &str) -> Option<HashMap<String, u64>> {
        self.keyword_freq_cache.lock().get(key).cloned()
    }

    pub(crate) fn freq_cache_put(&self, key: String, value: HashMap<String, u64>) {
        self.keyword_freq_cache.lock().put(key, value);
    }

    /// The hybrid retrieval primitive: issue the lexical and vector
    /// sub-searches concurrently, recover each to an empty ranking on error,
    /// and fuse with RRF. When `use_vector` is false the vector side is
    /// skipped entirely and the fused ranking equals the lexical one.
    pub(crate) async fn hybrid_search(&self, req: HybridRequest<'_>) -> HybridOutcome {
        let lexical_fut = self.lexical.search(req.index, req.lexical_body);
        let vector_fut = async {
            if !req.use_vector {
                return Ok(Vec::new());
            }
            let query_vector = self.embedder.embed(req.query_text).await?;
            self.vector
                .search(
                    req.collection,
                    &query_vector,
                    req.vector_filter,
                    req.k_vec,
                    req.score_threshold,
                )
                .await
        };

        let (lexical_result, vector_result) = tokio::join!(lexical_fut, vector_fut);

        let (lexical_hits, lexical_failed) = match lexical_result {
            Ok(hits) => (hits, false),
            Err(e) => {
                tracing::warn!(index = req.index, error = %e, "Lexical sub-search failed, degrading to vector-only");
                (Vec::new(), true)
            }
        };
        let (mut vector_hits, vector_failed) = match vector_result {
            Ok(hits) => (hits, false),
            Err(e) => {
                tracing::warn!(collection = req.collection, error = %e, "Vector sub-search failed, degrading to lexical-only");
                (Vec::new(), true)
            }
        };

        // Point ids are store-internal; fusion identity is the domain id
        // carried in the payload when present.
        for hit in &mut vector_hits {
            if let Some(domain_id) = hit.payload.get(req.vector_id_field).and_then(|v| v.as_str())
            {
                hit.id = domain_id.to_string();
            }
        }

        let hits = reciprocal_rank_fusion(lexical_hits, vector_hits, req.rrf_k, req.top_n);
        HybridOutcome {
            hits,
            lexical_failed,
            vector_failed,
        }
    }
}

pub(crate) struct HybridRequest<'a> {
    pub index: &'a str,
    pub collection: &'a str,
    pub lexical_body: Value,
    pub query_text: &'a str,
    pub vector_filter: Option<Value>,
    pub use_vector: bool,
    pub k_vec: usize,
    pub score_threshold: f32,
    pub rrf_k: usize,
    pub top_n: usize,
    /// Payload field that carries the domain identity of a point.
    pub vector_id_field: &'a str,
}

pub(crate) struct HybridOutcome {
    pub hits: Vec<FusedHit>,
    pub lexical_failed: bool,
    pub vector_failed: bool,
}

pub(crate) fn json_str(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

pub(crate) fn json_i64(value: &Value, key: &str) -> Option<i64> {
    value.get(key).and_then(|v| v.as_i64())
}
