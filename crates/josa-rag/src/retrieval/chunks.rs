//! Stage-2 retrieval: per-section hybrid search over chunks, restricted to
//! the stage-1 findings.

use std::collections::BTreeMap;

use futures::future::join_all;
use serde_json::{json, Value};

use super::{json_i64, json_str, HybridRequest, HybridRetriever};
use crate::types::{ChunkHit, Section, Slots};

#[derive(Debug, Default)]
pub struct ChunksRetrieval {
    pub section_groups: BTreeMap<Section, Vec<ChunkHit>>,
    pub lexical_failed: bool,
    pub vector_failed: bool,
}

impl HybridRetriever {
    /// Run one hybrid search per required section, concurrently. Chunk order
    /// within each group preserves the fused ranking.
    pub async fn retrieve_chunks(
        &self,
        slots: &Slots,
        finding_ids: &[String],
        target_doc_ids: Option<&[String]>,
        required_sections: &[Section],
    ) -> ChunksRetrieval {
        let mut out = ChunksRetrieval::default();
        if finding_ids.is_empty() {
            return out;
        }

        let searches = join_all(required_sections.iter().map(|section| {
            self.retrieve_section_chunks(*section, slots, finding_ids, target_doc_ids)
        }))
        .await;

        for (section, chunks, lexical_failed, vector_failed) in searches {
            tracing::info!(section = section.label(), chunks = chunks.len(), "Stage-2 section retrieval");
            out.section_groups.insert(section, chunks);
            out.lexical_failed |= lexical_failed;
            out.vector_failed |= vector_failed;
        }
        out
    }

    async fn retrieve_section_chunks(
        &self,
        section: Section,
        slots: &Slots,
        finding_ids: &[String],
        target_doc_ids: Option<&[String]>,
    ) -> (Section, Vec<ChunkHit>, bool, bool) {
        let cfg = &self.config;

        let hints = slots
            .section_hints
            .get(&section)
            .map(|hints| hints.join(" "))
            .unwrap_or_default();
        let query_text = format!("{} {}", hints, slots.free_text)
            .trim()
            .to_string();

        let mut must: Vec<Value> = vec![
            json!({
                "multi_match": {
                    "query": query_text,
                    "fields": ["text^2", "text_norm", "item^0.5"],
                }
            }),
            json!({ "term": { "section": section.label() } }),
            json!({ "terms": { "finding_id": finding_ids } }),
        ];
        if !slots.code.is_empty() {
            must.push(json!({ "terms": { "code": slots.code } }));
        }
        if let Some(doc_ids) = target_doc_ids {
            must.push(json!({ "terms": { "doc_id": doc_ids } }));
        }
        let lexical_body = json!({
            "query": { "bool": { "must": must } },
            "size": cfg.retrieval.chunks_top_k_lex,
        });

        let vector_filter = crate::clients::vector::build_filter(
            &[("section", section.label())],
            &[
                ("finding_id", finding_ids),
                ("code", &slots.code),
                ("doc_id", target_doc_ids.unwrap_or(&[])),
            ],
        );

        let outcome = self
            .hybrid_search(HybridRequest {
                index: &cfg.lexical.chunks_index,
                collection: &cfg.vector.chunks_collection,
                lexical_body,
                query_text: &query_text,
                vector_filter,
                use_vector: true,
                k_vec: cfg.retrieval.chunks_top_k_vec,
                score_threshold: cfg.vector.score_threshold,
                rrf_k: cfg.retrieval.chunks_rrf_k,
                top_n: cfg.retrieval.chunks_final_top_n,
                vector_id_field: "chunk_id",
            })
            .await;

        let mut chunks = Vec::with_capacity(outcome.hits.len());
        for hit in &outcome.hits {
            let from_vector_only = hit.lexical.is_none();
            let source = hit
                .lexical
                .as_ref()
                .map(|l| &l.source)
                .or(hit.vector.as_ref().map(|v| &v.payload))
                .cloned()
                .unwrap_or(Value::Null);

            let chunk_id = json_str(&source, "chunk_id").unwrap_or_else(|| hit.id.clone());
            let mut text = json_str(&source, "text").unwrap_or_default();

            // The vector store may carry metadata-only payloads; fetch the
            // body from the lexical store on demand, dropping the chunk when
            // both are unavailable.
            if from_vector_only && text.trim().is_empty() {
                match self.lexical.get(&cfg.lexical.chunks_index, &chunk_id).await {
                    Ok(Some(doc)) => {
                        text = json_str(&doc, "text").unwrap_or_default();
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(chunk_id = %chunk_id, error = %e, "Chunk text backfill failed");
                    }
                }
                if text.trim().is_empty() {
                    tracing::warn!(chunk_id = %chunk_id, "Dropping chunk without retrievable text");
                    continue;
                }
            }

            let chunk_section = json_str(&source, "section")
                .and_then(|label| Section::from_label(&label))
                .unwrap_or(section);

            chunks.push(ChunkHit {
                chunk_id,
                finding_id: json_str(&source, "finding_id").unwrap_or_default(),
                doc_id: json_str(&source, "doc_id").unwrap_or_default(),
                section: chunk_section,
                section_order: json_i64(&source, "section_order").unwrap_or(0),
                chunk_order: json_i64(&source, "chunk_order").unwrap_or(0),
                code: json_str(&source, "code"),
                item: json_str(&source, "item"),
                page: json_i64(&source, "page"),
                start_line: json_i64(&source, "start_line"),
                end_line: json_i64(&source, "end_line"),
                text,
                score_combined: hit.rrf_score,
            });
        }

        (section, chunks, outcome.lexical_failed, outcome.vector_failed)
    }
}
