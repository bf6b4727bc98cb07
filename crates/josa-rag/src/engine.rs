//! Pipeline orchestration: one `QueryContext` threaded through the stages,
//! with the per-query deadline wrapped around the retrieval span.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::timeout;

use crate::clients::{
    CachedEmbedder, ElasticClient, Embedder, LexicalSearch, LlmClient, OllamaClient,
    OllamaEmbedder, QdrantClient, VectorSearch,
};
use crate::config::AgentConfig;
use crate::pipeline::{composer, expander, normalizer, packer, parser, promoter, router, validator};
use crate::retrieval::HybridRetriever;
use crate::types::{Intent, QueryContext, Route};

/// The query-answering engine. Fully re-entrant: all methods take `&self`
/// and per-query state lives in the `QueryContext`.
pub struct AgentEngine {
    config: Arc<AgentConfig>,
    llm: Arc<dyn LlmClient>,
    retriever: HybridRetriever,
}

impl AgentEngine {
    /// Build the engine with the production HTTP clients.
    pub fn new(config: AgentConfig) -> Result<Self> {
        config.validate().map_err(anyhow::Error::msg)?;
        let config = Arc::new(config);

        let lexical: Arc<dyn LexicalSearch> = Arc::new(
            ElasticClient::new(&config.lexical).context("Failed to initialize lexical client")?,
        );
        let vector: Arc<dyn VectorSearch> = Arc::new(
            QdrantClient::new(&config.vector).context("Failed to initialize vector client")?,
        );
        let runner: Arc<dyn Embedder> = Arc::new(
            OllamaEmbedder::new(&config.embedding)
                .context("Failed to initialize embedding client")?,
        );
        let embedder: Arc<dyn Embedder> = Arc::new(CachedEmbedder::new(
            runner,
            config.embedding.cache_size,
        ));
        let llm: Arc<dyn LlmClient> =
            Arc::new(OllamaClient::new(&config.llm).context("Failed to initialize LLM client")?);

        Ok(Self::with_clients(config, lexical, vector, embedder, llm))
    }

    /// Build the engine over explicit collaborator handles (the test seam).
    pub fn with_clients(
        config: Arc<AgentConfig>,
        lexical: Arc<dyn LexicalSearch>,
        vector: Arc<dyn VectorSearch>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        let retriever = HybridRetriever::new(lexical, vector, embedder, config.clone());
        Self {
            config,
            llm,
            retriever,
        }
    }

    /// Answer one query. Every collaborator failure is recovered into a
    /// degraded-but-valid answer; `Err` is reserved for unusable input.
    pub async fn run_query(&self, text: &str) -> Result<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            anyhow::bail!("empty query");
        }

        let mut ctx = QueryContext::new(trimmed);
        ctx.normalized_query = normalizer::normalize(trimmed);
        tracing::info!(normalized = %ctx.normalized_query, "Query received");

        let parsed = parser::parse_query(self.llm.as_ref(), &ctx.normalized_query).await;
        ctx.intent = parsed.intent;
        ctx.slots = parsed.slots;
        ctx.llm_degraded |= parsed.used_fallback;

        if ctx.intent == Intent::CaseLookup {
            let expanded =
                expander::expand_query(self.llm.as_ref(), &ctx.normalized_query, &ctx.slots).await;
            ctx.llm_degraded |= expanded.used_fallback;
            let expansion_confidence = expander::expansion_confidence(&expanded.expansion);
            ctx.slots.confidence = ctx.slots.confidence.max(expansion_confidence);
            ctx.expansion = Some(expanded.expansion);
        }

        let route = router::decide_route(
            ctx.intent,
            &ctx.slots,
            ctx.expansion.as_ref(),
            self.config.runtime.confidence_threshold,
        );
        ctx.route = Some(route);
        tracing::info!(?route, confidence = ctx.slots.confidence, "Route decided");

        match route {
            Route::Clarify => {
                ctx.answer = Some(router::clarification_message(&ctx.slots));
            }
            Route::Explain => {
                composer::compose_explain(self.llm.as_ref(), &mut ctx).await;
            }
            Route::Search => {
                let deadline = Duration::from_secs(self.config.runtime.query_deadline_secs);
                if timeout(deadline, self.run_search(&mut ctx)).await.is_err() {
                    ctx.deadline_hit = true;
                }
            }
        }

        validator::validate(&mut ctx);
        Ok(ctx.answer.unwrap_or_default())
    }

    async fn run_search(&self, ctx: &mut QueryContext) {
        let stage1 = self
            .retriever
            .retrieve_findings(&ctx.normalized_query, &ctx.slots, ctx.expansion.as_ref())
            .await;
        ctx.lexical_degraded |= stage1.lexical_failed;
        ctx.vector_degraded |= stage1.vector_failed;
        ctx.target_doc_ids = stage1.target_doc_ids;
        ctx.keyword_freq = stage1.keyword_freq;
        ctx.findings = stage1.findings;

        if ctx.findings.is_empty() {
            return;
        }

        let finding_ids: Vec<String> = ctx
            .findings
            .iter()
            .map(|f| f.finding_id.clone())
            .collect();
        let required_sections = ctx.required_sections();

        let stage2 = self
            .retriever
            .retrieve_chunks(
                &ctx.slots,
                &finding_ids,
                ctx.target_doc_ids.as_deref(),
                &required_sections,
            )
            .await;
        ctx.lexical_degraded |= stage2.lexical_failed;
        ctx.vector_degraded |= stage2.vector_failed;
        ctx.section_groups = stage2.section_groups;

        let must_have: Vec<String> = ctx
            .expansion
            .as_ref()
            .map(|e| e.must_have.clone())
            .unwrap_or_default();
        let promotion = promoter::promote_blocks(
            &ctx.section_groups,
            &required_sections,
            &must_have,
            &self.config.blocks,
        );
        ctx.block_ranking = promotion.block_ranking;
        ctx.excluded_blocks = promotion.excluded_blocks;
        ctx.keyword_block_counts = promotion.keyword_block_counts;

        ctx.context = packer::pack_context(
            &ctx.block_ranking,
            &self.config.context,
            packer::default_token_estimate,
        );

        composer::compose_answer(self.llm.as_ref(), ctx).await;
    }
}
