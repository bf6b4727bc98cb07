use serde::{Deserialize, Serialize};

/// Full tuning surface of the pipeline. Defaults match the production
/// deployment; every documented key can be overridden from the environment
/// via [`AgentConfig::from_env`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub llm: LlmConfig,
    pub lexical: LexicalConfig,
    pub vector: VectorConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub blocks: BlockConfig,
    pub context: ContextConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalConfig {
    pub url: String,
    pub user: String,
    pub password: Option<String>,
    pub findings_index: String,
    pub chunks_index: String,
    pub timeout_secs: u64,
    pub retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    pub url: String,
    pub findings_collection: String,
    pub chunks_collection: String,
    pub dimension: usize,
    pub timeout_secs: u64,
    pub score_threshold: f32,
    /// Tightened threshold applied when two or more must-have keywords are
    /// present, to curb semantic over-matching inside the domain.
    pub score_threshold_multi: f32,
    pub hnsw_ef: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub findings_top_k_lex: usize,
    pub findings_top_k_vec: usize,
    pub findings_rrf_k: usize,
    pub findings_final_top_n: usize,
    pub chunks_top_k_lex: usize,
    pub chunks_top_k_vec: usize,
    pub chunks_rrf_k: usize,
    pub chunks_final_top_n: usize,
    /// Per-keyword document lookup size in the stage-1 prefilter.
    pub doc_filter_top_n: usize,
    /// At most this many must-have keywords participate in the prefilter.
    pub doc_filter_max_keywords: usize,
    /// Cap on the union fallback when the keyword intersection is empty.
    pub doc_union_cap: usize,
    /// Keyword frequencies are aggregated over at most this many documents.
    pub keyword_freq_doc_cap: usize,
    pub keyword_freq_cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockConfig {
    pub top_k_chunks: usize,
    pub intersection_min: usize,
    pub final_top_n: usize,
    pub max_blocks_per_doc: usize,
    pub weight_findings: f32,
    pub weight_technique: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    pub token_budget: usize,
    pub chunks_per_block: usize,
    pub merge_adjacent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub confidence_threshold: f32,
    pub query_deadline_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                base_url: "http://localhost:11434".to_string(),
                model: "gemma3:12b".to_string(),
                temperature: 0.1,
                timeout_secs: 60,
            },
            lexical: LexicalConfig {
                url: "http://localhost:9200".to_string(),
                user: "elastic".to_string(),
                password: None,
                findings_index: "findings".to_string(),
                chunks_index: "chunks".to_string(),
                timeout_secs: 30,
                retries: 3,
            },
            vector: VectorConfig {
                url: "http://localhost:6333".to_string(),
                findings_collection: "findings_vectors".to_string(),
                chunks_collection: "chunks_vectors".to_string(),
                dimension: 1024,
                timeout_secs: 10,
                score_threshold: 0.35,
                score_threshold_multi: 0.65,
                hnsw_ef: 96,
            },
            embedding: EmbeddingConfig {
                base_url: "http://localhost:11434".to_string(),
                model: "bge-m3".to_string(),
                cache_size: 100,
            },
            retrieval: RetrievalConfig {
                findings_top_k_lex: 150,
                findings_top_k_vec: 150,
                findings_rrf_k: 60,
                findings_final_top_n: 30,
                chunks_top_k_lex: 300,
                chunks_top_k_vec: 300,
                chunks_rrf_k: 60,
                chunks_final_top_n: 300,
                doc_filter_top_n: 50,
                doc_filter_max_keywords: 3,
                doc_union_cap: 30,
                keyword_freq_doc_cap: 5,
                keyword_freq_cache_size: 1000,
            },
            blocks: BlockConfig {
                top_k_chunks: 3,
                intersection_min: 2,
                final_top_n: 3,
                max_blocks_per_doc: 2,
                weight_findings: 0.5,
                weight_technique: 0.5,
            },
            context: ContextConfig {
                token_budget: 4000,
                chunks_per_block: 3,
                merge_adjacent: true,
            },
            runtime: RuntimeConfig {
                confidence_threshold: 0.4,
                query_deadline_secs: 90,
            },
        }
    }
}

impl AgentConfig {
    /// Defaults overridden by the documented environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        read_str("LLM_BASE_URL", &mut cfg.llm.base_url);
        read_str("LLM_MODEL", &mut cfg.llm.model);
        read_num("LLM_TEMPERATURE", &mut cfg.llm.temperature);

        read_str("LEXICAL_URL", &mut cfg.lexical.url);
        read_str("LEXICAL_USER", &mut cfg.lexical.user);
        if let Ok(pass) = std::env::var("LEXICAL_PASS") {
            if !pass.is_empty() {
                cfg.lexical.password = Some(pass);
            }
        }

        read_str("VECTOR_URL", &mut cfg.vector.url);
        read_num("VECTOR_SCORE_THRESHOLD", &mut cfg.vector.score_threshold);
        read_num(
            "VECTOR_SCORE_THRESHOLD_MULTI",
            &mut cfg.vector.score_threshold_multi,
        );
        read_num("VECTOR_HNSW_EF", &mut cfg.vector.hnsw_ef);

        read_str("EMBEDDING_BASE_URL", &mut cfg.embedding.base_url);
        read_str("EMBEDDING_MODEL", &mut cfg.embedding.model);

        read_num("FINDINGS_TOP_K_LEX", &mut cfg.retrieval.findings_top_k_lex);
        read_num("FINDINGS_TOP_K_VEC", &mut cfg.retrieval.findings_top_k_vec);
        read_num("FINDINGS_RRF_K", &mut cfg.retrieval.findings_rrf_k);
        read_num(
            "FINDINGS_FINAL_TOP_N",
            &mut cfg.retrieval.findings_final_top_n,
        );
        read_num("CHUNKS_TOP_K_LEX", &mut cfg.retrieval.chunks_top_k_lex);
        read_num("CHUNKS_TOP_K_VEC", &mut cfg.retrieval.chunks_top_k_vec);

        read_num("BLOCK_TOP_K_CHUNKS", &mut cfg.blocks.top_k_chunks);
        read_num("BLOCK_INTERSECTION_MIN", &mut cfg.blocks.intersection_min);
        read_num("BLOCK_FINAL_TOP_N", &mut cfg.blocks.final_top_n);
        read_num("MAX_BLOCKS_PER_DOC", &mut cfg.blocks.max_blocks_per_doc);
        read_num("SECTION_WEIGHT_FINDINGS", &mut cfg.blocks.weight_findings);
        read_num("SECTION_WEIGHT_TECHNIQUE", &mut cfg.blocks.weight_technique);

        read_num("CONTEXT_TOKEN_BUDGET", &mut cfg.context.token_budget);
        if let Ok(raw) = std::env::var("CONTEXT_MERGE_ADJACENT") {
            if let Ok(value) = raw.parse::<bool>() {
                cfg.context.merge_adjacent = value;
            }
        }

        read_num(
            "CONFIDENCE_THRESHOLD",
            &mut cfg.runtime.confidence_threshold,
        );
        read_num("QUERY_DEADLINE_SECS", &mut cfg.runtime.query_deadline_secs);

        cfg
    }

    /// Reject clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.vector.dimension == 0 {
            return Err("vector.dimension must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.vector.score_threshold)
            || !(0.0..=1.0).contains(&self.vector.score_threshold_multi)
        {
            return Err("vector score thresholds must be in [0.0, 1.0]".into());
        }
        if !(0.0..=1.0).contains(&self.runtime.confidence_threshold) {
            return Err("runtime.confidence_threshold must be in [0.0, 1.0]".into());
        }
        if self.retrieval.findings_final_top_n == 0 || self.blocks.final_top_n == 0 {
            return Err("final top-n values must be > 0".into());
        }
        if self.blocks.max_blocks_per_doc == 0 {
            return Err("blocks.max_blocks_per_doc must be > 0".into());
        }
        if self.context.token_budget == 0 {
            return Err("context.token_budget must be > 0".into());
        }
        if self.runtime.query_deadline_secs == 0 {
            return Err("runtime.query_deadline_secs must be > 0".into());
        }
        Ok(())
    }
}

fn read_str(key: &str, target: &mut String) {
    if let Ok(value) = std::env::var(key) {
        if !value.is_empty() {
            *target = value;
        }
    }
}

fn read_num<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        if let Ok(value) = raw.parse::<T>() {
            *target = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AgentConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.llm.model, "gemma3:12b");
        assert_eq!(cfg.retrieval.findings_rrf_k, 60);
        assert_eq!(cfg.blocks.final_top_n, 3);
        assert_eq!(cfg.vector.score_threshold_multi, 0.65);
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut cfg = AgentConfig::default();
        cfg.vector.score_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let mut cfg = AgentConfig::default();
        cfg.context.token_budget = 0;
        assert!(cfg.validate().is_err());
    }
}
