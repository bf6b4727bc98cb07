//! Stage-1 retrieval over finding-level records: keyword document prefilter,
//! keyword-frequency aggregation, and boosted hybrid search.

use std::collections::{HashMap, HashSet};

use futures::future::join_all;
use serde_json::{json, Value};

use super::{json_str, HybridRequest, HybridRetriever};
use crate::types::{Expansion, FindingHit, Slots};

/// Stage-1 output: ranked findings plus the document filter and keyword
/// frequencies derived along the way.
#[derive(Debug, Default)]
pub struct FindingsRetrieval {
    pub findings: Vec<FindingHit>,
    pub target_doc_ids: Option<Vec<String>>,
    pub keyword_freq: Option<HashMap<String, u64>>,
    pub lexical_failed: bool,
    pub vector_failed: bool,
}

impl HybridRetriever {
    pub async fn retrieve_findings(
        &self,
        query: &str,
        slots: &Slots,
        expansion: Option<&Expansion>,
    ) -> FindingsRetrieval {
        let cfg = &self.config;
        let must_have: &[String] = expansion.map_or(&[], |e| e.must_have.as_slice());
        let mut out = FindingsRetrieval::default();

        // Step 1: document-set prefilter from the must-have keywords.
        let search_keywords = &must_have[..must_have.len().min(cfg.retrieval.doc_filter_max_keywords)];
        let mut primary_ranked_docs: Vec<(String, f32)> = Vec::new();
        if !search_keywords.is_empty() {
            let lookups = join_all(
                search_keywords
                    .iter()
                    .map(|kw| self.find_docs_by_keyword(kw)),
            )
            .await;

            let mut doc_sets: Vec<HashSet<String>> = Vec::with_capacity(lookups.len());
            let mut doc_best_score: HashMap<String, f32> = HashMap::new();
            for (i, ranked) in lookups.into_iter().enumerate() {
                let ranked = match ranked {
                    Ok(ranked) => ranked,
                    Err(e) => {
                        tracing::warn!(keyword = %search_keywords[i], error = %e, "Keyword document lookup failed");
                        out.lexical_failed = true;
                        Vec::new()
                    }
                };
                tracing::debug!(keyword = %search_keywords[i], docs = ranked.len(), "Keyword document lookup");
                for (doc_id, score) in &ranked {
                    let entry = doc_best_score.entry(doc_id.clone()).or_insert(0.0);
                    *entry = entry.max(*score);
                }
                doc_sets.push(ranked.iter().map(|(doc_id, _)| doc_id.clone()).collect());
                if i == 0 {
                    primary_ranked_docs = ranked;
                }
            }

            let chosen: Vec<String> = if search_keywords.len() >= 2 {
                let mut intersection = doc_sets[0].clone();
                for set in &doc_sets[1..] {
                    intersection.retain(|doc| set.contains(doc));
                }
                if intersection.is_empty() {
                    let mut union: Vec<String> = doc_sets
                        .iter()
                        .flatten()
                        .cloned()
                        .collect::<HashSet<_>>()
                        .into_iter()
                        .collect();
                    sort_docs_by_score(&mut union, &doc_best_score);
                    union.truncate(cfg.retrieval.doc_union_cap);
                    tracing::info!(docs = union.len(), "Empty keyword intersection, relaxed to union");
                    union
                } else {
                    let mut docs: Vec<String> = intersection.into_iter().collect();
                    sort_docs_by_score(&mut docs, &doc_best_score);
                    tracing::info!(docs = docs.len(), "Keyword intersection document filter");
                    docs
                }
            } else {
                let mut docs: Vec<String> = doc_sets[0].iter().cloned().collect();
                sort_docs_by_score(&mut docs, &doc_best_score);
                docs
            };

            if chosen.is_empty() {
                // The union itself was empty: no document mentions any
                // must-have keyword. Flagged for operational monitoring.
                tracing::warn!(keywords = ?search_keywords, "No documents match any must-have keyword");
                out.target_doc_ids = Some(chosen);
                return out;
            }

            // Keyword frequencies over the strongest documents for the
            // primary keyword, restricted to the chosen set.
            let freq_docs: Vec<String> = primary_ranked_docs
                .iter()
                .map(|(doc_id, _)| doc_id.clone())
                .filter(|doc_id| chosen.contains(doc_id))
                .take(cfg.retrieval.keyword_freq_doc_cap)
                .collect();
            if !freq_docs.is_empty() {
                out.keyword_freq = self.keyword_frequency(&freq_docs, must_have).await;
            }

            out.target_doc_ids = Some(chosen);
        }

        // Step 2: hybrid search within the filtered document set.
        let use_vector = must_have.len() >= 2;
        let lexical_body = build_findings_query(
            query,
            slots,
            expansion,
            out.target_doc_ids.as_deref(),
            cfg.retrieval.findings_top_k_lex,
        );
        let vector_filter = crate::clients::vector::build_filter(
            &[],
            &[
                ("code", &slots.code),
                ("doc_id", out.target_doc_ids.as_deref().unwrap_or(&[])),
            ],
        );

        let outcome = self
            .hybrid_search(HybridRequest {
                index: &cfg.lexical.findings_index,
                collection: &cfg.vector.findings_collection,
                lexical_body,
                query_text: query,
                vector_filter,
                use_vector,
                k_vec: cfg.retrieval.findings_top_k_vec,
                score_threshold: cfg.vector.score_threshold_multi,
                rrf_k: cfg.retrieval.findings_rrf_k,
                top_n: cfg.retrieval.findings_final_top_n,
                vector_id_field: "finding_id",
            })
            .await;
        out.lexical_failed |= outcome.lexical_failed;
        out.vector_failed |= outcome.vector_failed;

        let mut findings: Vec<FindingHit> = outcome
            .hits
            .iter()
            .map(|hit| {
                let source = hit
                    .lexical
                    .as_ref()
                    .map(|l| &l.source)
                    .or(hit.vector.as_ref().map(|v| &v.payload))
                    .cloned()
                    .unwrap_or(Value::Null);
                // BM25-only mode reports the raw lexical score; fused mode
                // reports the RRF sum.
                let score_combined = if use_vector {
                    hit.rrf_score
                } else {
                    hit.bm25_score()
                };
                FindingHit {
                    finding_id: json_str(&source, "finding_id").unwrap_or_else(|| hit.id.clone()),
                    doc_id: json_str(&source, "doc_id").unwrap_or_default(),
                    item: json_str(&source, "item"),
                    item_detail: json_str(&source, "item_detail"),
                    code: json_str(&source, "code"),
                    score_bm25: hit.bm25_score(),
                    score_vector: hit.vector_score(),
                    score_combined,
                }
            })
            .collect();

        // Score cutoff inside a document filter: keep hits within half of the
        // top score.
        if out.target_doc_ids.is_some() && !findings.is_empty() {
            let cutoff = findings[0].score_combined * 0.5;
            findings.retain(|f| f.score_combined >= cutoff);
        }
        findings.truncate(cfg.retrieval.findings_final_top_n);

        tracing::info!(
            findings = findings.len(),
            filtered_docs = out.target_doc_ids.as_ref().map(|d| d.len()),
            hybrid = use_vector,
            "Stage-1 retrieval complete"
        );
        out.findings = findings;
        out
    }

    /// Top documents mentioning one keyword, by best hit score.
    async fn find_docs_by_keyword(&self, keyword: &str) -> anyhow::Result<Vec<(String, f32)>> {
        let cfg = &self.config;
        let body = json!({
            "query": {
                "bool": {
                    "should": [
                        { "match": { "item": { "query": keyword, "boost": 2.0 } } },
                        { "match": { "reason_kw_norm": { "query": keyword, "boost": 1.5 } } },
                        { "match": { "item_detail": { "query": keyword, "boost": 1.0 } } },
                    ]
                }
            },
            "size": cfg.retrieval.doc_filter_top_n,
            "_source": ["doc_id"],
        });

        let hits = self.lexical.search(&cfg.lexical.findings_index, body).await?;
        let mut best: HashMap<String, f32> = HashMap::new();
        for hit in hits {
            if let Some(doc_id) = json_str(&hit.source, "doc_id") {
                let entry = best.entry(doc_id).or_insert(0.0);
                *entry = entry.max(hit.score);
            }
        }

        let mut ranked: Vec<(String, f32)> = best.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(ranked)
    }

    /// Total per-keyword hit counts over `doc_ids`, fetched with a single
    /// filters aggregation and cached process-wide.
    async fn keyword_frequency(
        &self,
        doc_ids: &[String],
        keywords: &[String],
    ) -> Option<HashMap<String, u64>> {
        let mut sorted_docs = doc_ids.to_vec();
        sorted_docs.sort();
        let mut sorted_keywords = keywords.to_vec();
        sorted_keywords.sort();
        let cache_key = format!("{}|{}", sorted_docs.join(","), sorted_keywords.join(","));
        if let Some(cached) = self.freq_cache_get(&cache_key) {
            return Some(cached);
        }

        let mut filters = serde_json::Map::new();
        for keyword in keywords {
            filters.insert(
                keyword.clone(),
                json!({ "match": { "item_detail": keyword } }),
            );
        }
        let body = json!({
            "size": 0,
            "query": { "terms": { "doc_id": doc_ids } },
            "aggs": { "keyword_counts": { "filters": { "filters": Value::Object(filters) } } },
        });

        let aggregations = match self
            .lexical
            .aggregate(&self.config.lexical.findings_index, body)
            .await
        {
            Ok(aggregations) => aggregations,
            Err(e) => {
                tracing::warn!(error = %e, "Keyword frequency aggregation failed");
                return None;
            }
        };

        let buckets = &aggregations["keyword_counts"]["buckets"];
        let mut freq: HashMap<String, u64> = HashMap::new();
        for keyword in keywords {
            let count = buckets
                .get(keyword)
                .and_then(|b| b["doc_count"].as_u64())
                .unwrap_or(0);
            freq.insert(keyword.clone(), count);
        }

        self.freq_cache_put(cache_key, freq.clone());
        Some(freq)
    }
}

fn sort_docs_by_score(docs: &mut [String], best_score: &HashMap<String, f32>) {
    docs.sort_by(|a, b| {
        let sa = best_score.get(a).copied().unwrap_or(0.0);
        let sb = best_score.get(b).copied().unwrap_or(0.0);
        sb.partial_cmp(&sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(b))
    });
}

/// Bool query for the stage-1 search: boosted multi-match per expansion
/// keyword, slot meta-filters, and the document filter.
fn build_findings_query(
    query: &str,
    slots: &Slots,
    expansion: Option<&Expansion>,
    target_doc_ids: Option<&[String]>,
    size: usize,
) -> Value {
    let mut must: Vec<Value> = Vec::new();
    let mut should: Vec<Value> = Vec::new();

    match expansion {
        Some(exp) if !exp.must_have.is_empty() => {
            for keyword in &exp.must_have {
                should.push(boosted_multi_match(keyword, exp.boost(keyword, 3.0)));
            }
            for keyword in exp.should_have.iter().chain(exp.related_terms.iter()) {
                should.push(boosted_multi_match(keyword, exp.boost(keyword, 1.5)));
            }
        }
        _ => {
            must.push(json!({
                "multi_match": {
                    "query": query,
                    "fields": ["item^2", "reason_kw_norm", "item_detail"],
                }
            }));
        }
    }

    let has_doc_filter = match target_doc_ids {
        Some(doc_ids) => {
            must.push(json!({ "terms": { "doc_id": doc_ids } }));
            true
        }
        None => false,
    };
    if !slots.code.is_empty() {
        must.push(json!({ "terms": { "code": slots.code } }));
    }
    if !slots.industry_sub.is_empty() {
        must.push(json!({ "terms": { "industry_sub": slots.industry_sub } }));
    }
    if !slots.domain_tags.is_empty() {
        must.push(json!({ "terms": { "domain_tags": slots.domain_tags } }));
    }

    let mut bool_query = serde_json::Map::new();
    if !must.is_empty() {
        bool_query.insert("must".to_string(), Value::Array(must));
    }
    if !should.is_empty() {
        bool_query.insert("should".to_string(), Value::Array(should));
        // Without a document filter the should-clauses are the match
        // condition; with one they only contribute to ranking.
        if !has_doc_filter {
            bool_query.insert("minimum_should_match".to_string(), json!(1));
        }
    }

    json!({
        "query": { "bool": Value::Object(bool_query) },
        "size": size,
    })
}

fn boosted_multi_match(keyword: &str, boost: f32) -> Value {
    json!({
        "multi_match": {
            "query": keyword,
            "fields": [
                format!("item^{}", boost),
                format!("reason_kw_norm^{}", boost * 0.8),
                format!("item_detail^{}", boost * 0.5),
            ],
        }
    })
}
