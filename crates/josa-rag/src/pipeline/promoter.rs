//! Block promotion: aggregate stage-2 chunks back to findings, rank them,
//! and apply the positional keyword filter.

use std::collections::{BTreeMap, HashMap};

use crate::config::BlockConfig;
use crate::types::{ChunkHit, RankedBlock, Section};

#[derive(Debug, Default)]
pub struct PromotionOutcome {
    pub block_ranking: Vec<RankedBlock>,
    pub excluded_blocks: Vec<RankedBlock>,
    pub keyword_block_counts: HashMap<String, usize>,
}

/// Promote chunks to ranked blocks.
///
/// Intersection mode (findings covered in every required section) is
/// preferred when it holds enough candidates; otherwise the union is scored
/// with the section-weight blend, missing sections contributing zero. With
/// two or more must-have keywords the positional filter applies:
/// `must_have[0]` is assumed satisfied at document level, and a block must
/// contain at least one of `must_have[1..]` to stay in the main ranking.
pub fn promote_blocks(
    section_groups: &BTreeMap<Section, Vec<ChunkHit>>,
    required_sections: &[Section],
    must_have: &[String],
    cfg: &BlockConfig,
) -> PromotionOutcome {
    let mut out = PromotionOutcome::default();

    let total_chunks: usize = section_groups.values().map(Vec::len).sum();
    if total_chunks == 0 {
        return out;
    }

    // Per-section grouping by finding, keeping only the top-scored chunks.
    let mut per_section: BTreeMap<Section, HashMap<String, Vec<&ChunkHit>>> = BTreeMap::new();
    for (section, chunks) in section_groups {
        let grouped = per_section.entry(*section).or_default();
        for chunk in chunks {
            grouped
                .entry(chunk.finding_id.clone())
                .or_default()
                .push(chunk);
        }
        for kept in grouped.values_mut() {
            kept.sort_by(|a, b| {
                b.score_combined
                    .partial_cmp(&a.score_combined)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            kept.truncate(cfg.top_k_chunks);
        }
    }

    let intersection: Vec<String> = match required_sections.first() {
        Some(first) => per_section
            .get(first)
            .map(|grouped| {
                let mut ids: Vec<String> = grouped
                    .keys()
                    .filter(|fid| {
                        required_sections.iter().all(|section| {
                            per_section
                                .get(section)
                                .is_some_and(|g| g.contains_key(*fid))
                        })
                    })
                    .cloned()
                    .collect();
                ids.sort();
                ids
            })
            .unwrap_or_default(),
        None => Vec::new(),
    };

    let use_intersection = intersection.len() >= cfg.intersection_min;
    let candidates: Vec<String> = if use_intersection {
        tracing::info!(size = intersection.len(), "Block promotion: intersection mode");
        intersection
    } else {
        let mut union: Vec<String> = per_section
            .values()
            .flat_map(|grouped| grouped.keys().cloned())
            .collect();
        union.sort();
        union.dedup();
        tracing::info!(
            intersection = intersection.len(),
            union = union.len(),
            "Block promotion: blended union mode"
        );
        union
    };

    let mut ranked: Vec<RankedBlock> = candidates
        .into_iter()
        .filter_map(|finding_id| {
            let mut chunks: Vec<ChunkHit> = Vec::new();
            for section in required_sections {
                if let Some(kept) = per_section
                    .get(section)
                    .and_then(|grouped| grouped.get(&finding_id))
                {
                    chunks.extend(kept.iter().map(|c| (*c).clone()));
                }
            }
            if chunks.is_empty() {
                return None;
            }

            let score = if use_intersection {
                top_k_mean(&chunks, cfg.top_k_chunks)
            } else {
                blended_score(&per_section, &finding_id, cfg)
            };

            chunks.sort_by(|a, b| {
                b.score_combined
                    .partial_cmp(&a.score_combined)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let mut source_sections: Vec<Section> =
                chunks.iter().map(|c| c.section).collect();
            source_sections.sort();
            source_sections.dedup();

            Some(RankedBlock {
                doc_id: chunks[0].doc_id.clone(),
                item: chunks[0].item.clone(),
                code: chunks[0].code.clone(),
                finding_id,
                score,
                chunks,
                source_sections,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.finding_id.cmp(&b.finding_id))
    });

    // Positional keyword filter, active only with two or more keywords.
    let doc_level_keyword = must_have.first();
    let block_level_keywords: &[String] = if must_have.len() >= 2 {
        &must_have[1..]
    } else {
        &[]
    };
    let filter_active = must_have.len() >= 2;

    for keyword in must_have {
        out.keyword_block_counts.insert(keyword.clone(), 0);
    }
    for block in &ranked {
        let block_text: String = block
            .chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        for keyword in must_have {
            if block_text.contains(keyword.as_str()) {
                *out.keyword_block_counts.entry(keyword.clone()).or_insert(0) += 1;
            }
        }
    }

    let mut doc_counts: HashMap<String, usize> = HashMap::new();
    for block in ranked {
        if out.block_ranking.len() >= cfg.final_top_n {
            break;
        }

        if !filter_active {
            let count = doc_counts.entry(block.doc_id.clone()).or_insert(0);
            if *count >= cfg.max_blocks_per_doc {
                continue;
            }
            *count += 1;
            out.block_ranking.push(block);
            continue;
        }

        let block_text: String = block
            .chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let full_match = block_level_keywords
            .iter()
            .any(|kw| block_text.contains(kw.as_str()));
        let partial_match = doc_level_keyword
            .map(|kw| block_text.contains(kw.as_str()))
            .unwrap_or(false);

        if full_match {
            let count = doc_counts.entry(block.doc_id.clone()).or_insert(0);
            if *count >= cfg.max_blocks_per_doc {
                out.excluded_blocks.push(block);
                continue;
            }
            *count += 1;
            out.block_ranking.push(block);
        } else if partial_match {
            // Only the document-level keyword matched: kept aside as
            // supplementary material.
            out.excluded_blocks.push(block);
        }
        // No match at all: dropped.
    }

    tracing::info!(
        blocks = out.block_ranking.len(),
        excluded = out.excluded_blocks.len(),
        "Block promotion complete"
    );
    out
}

fn top_k_mean(chunks: &[ChunkHit], k: usize) -> f32 {
    let mut scores: Vec<f32> = chunks.iter().map(|c| c.score_combined).collect();
    scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    scores.truncate(k);
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f32>() / scores.len() as f32
}

/// Weighted mean of per-section block scores; a section without chunks for
/// this finding contributes zero.
fn blended_score(
    per_section: &BTreeMap<Section, HashMap<String, Vec<&ChunkHit>>>,
    finding_id: &str,
    cfg: &BlockConfig,
) -> f32 {
    let mut score = 0.0;
    for (section, grouped) in per_section {
        let weight = match section {
            Section::Findings => cfg.weight_findings,
            Section::Technique => cfg.weight_technique,
            _ => 0.0,
        };
        if let Some(kept) = grouped.get(finding_id) {
            let owned: Vec<ChunkHit> = kept.iter().map(|c| (*c).clone()).collect();
            score += weight * top_k_mean(&owned, cfg.top_k_chunks);
        }
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> BlockConfig {
        BlockConfig {
            top_k_chunks: 3,
            intersection_min: 2,
            final_top_n: 3,
            max_blocks_per_doc: 2,
            weight_findings: 0.5,
            weight_technique: 0.5,
        }
    }

    fn chunk(finding: &str, doc: &str, section: Section, score: f32, text: &str) -> ChunkHit {
        ChunkHit {
            chunk_id: format!("{}-{}-{}", finding, section.label(), text.len()),
            finding_id: finding.to_string(),
            doc_id: doc.to_string(),
            section,
            section_order: 0,
            chunk_order: 0,
            code: Some("10501".to_string()),
            item: Some("항목".to_string()),
            page: Some(1),
            start_line: Some(1),
            end_line: Some(2),
            text: text.to_string(),
            score_combined: score,
        }
    }

    fn groups(chunks: Vec<ChunkHit>) -> BTreeMap<Section, Vec<ChunkHit>> {
        let mut grouped: BTreeMap<Section, Vec<ChunkHit>> = BTreeMap::new();
        for chunk in chunks {
            grouped.entry(chunk.section).or_default().push(chunk);
        }
        grouped
    }

    const BOTH: [Section; 2] = [Section::Findings, Section::Technique];

    #[test]
    fn test_intersection_mode_requires_full_coverage() {
        let grouped = groups(vec![
            chunk("F1", "D1", Section::Findings, 0.9, "매출누락 정황"),
            chunk("F1", "D1", Section::Technique, 0.8, "현금흐름 추적"),
            chunk("F2", "D2", Section::Findings, 0.7, "매출누락 단서"),
            chunk("F2", "D2", Section::Technique, 0.6, "장부 대조"),
            chunk("F3", "D3", Section::Findings, 0.95, "착안만 있는 적출"),
        ]);
        let out = promote_blocks(&grouped, &BOTH, &[], &cfg());
        // F3 lacks the technique section and is excluded by intersection mode.
        let ids: Vec<&str> = out
            .block_ranking
            .iter()
            .map(|b| b.finding_id.as_str())
            .collect();
        assert_eq!(ids, vec!["F1", "F2"]);
        for block in &out.block_ranking {
            assert!(block.source_sections.contains(&Section::Findings));
            assert!(block.source_sections.contains(&Section::Technique));
        }
    }

    #[test]
    fn test_blend_mode_when_intersection_small() {
        let grouped = groups(vec![
            chunk("F1", "D1", Section::Findings, 0.8, "본문"),
            chunk("F1", "D1", Section::Technique, 0.6, "기법"),
            chunk("F2", "D2", Section::Findings, 0.9, "본문"),
        ]);
        let out = promote_blocks(&grouped, &BOTH, &[], &cfg());
        assert_eq!(out.block_ranking.len(), 2);

        let f1 = out
            .block_ranking
            .iter()
            .find(|b| b.finding_id == "F1")
            .unwrap();
        let f2 = out
            .block_ranking
            .iter()
            .find(|b| b.finding_id == "F2")
            .unwrap();
        // F1: 0.5*0.8 + 0.5*0.6 = 0.7; F2: 0.5*0.9 + 0 = 0.45.
        assert!((f1.score - 0.7).abs() < 1e-6);
        assert!((f2.score - 0.45).abs() < 1e-6);
        assert!(f1.score > f2.score);
    }

    #[test]
    fn test_keyword_filter_classification() {
        let must = vec!["합병법인".to_string(), "미환류소득".to_string()];
        let grouped = groups(vec![
            chunk("F1", "D1", Section::Findings, 0.9, "미환류소득 과소신고"),
            chunk("F1", "D1", Section::Technique, 0.8, "세무검증"),
            chunk("F2", "D2", Section::Findings, 0.7, "합병법인 일반 현황"),
            chunk("F2", "D2", Section::Technique, 0.6, "장부 검토"),
            chunk("F3", "D3", Section::Findings, 0.5, "무관한 내용"),
            chunk("F3", "D3", Section::Technique, 0.4, "무관한 기법"),
        ]);
        let out = promote_blocks(&grouped, &BOTH, &must, &cfg());

        // Full match stays, partial match is demoted, no-match is dropped.
        assert_eq!(out.block_ranking.len(), 1);
        assert_eq!(out.block_ranking[0].finding_id, "F1");
        assert_eq!(out.excluded_blocks.len(), 1);
        assert_eq!(out.excluded_blocks[0].finding_id, "F2");
        assert_eq!(out.keyword_block_counts["미환류소득"], 1);
        assert_eq!(out.keyword_block_counts["합병법인"], 1);
    }

    #[test]
    fn test_diversity_cap_per_doc() {
        let grouped = groups(vec![
            chunk("F1", "D1", Section::Findings, 0.9, "매출누락 a"),
            chunk("F1", "D1", Section::Technique, 0.9, "기법 a"),
            chunk("F2", "D1", Section::Findings, 0.8, "매출누락 b"),
            chunk("F2", "D1", Section::Technique, 0.8, "기법 b"),
            chunk("F3", "D1", Section::Findings, 0.7, "매출누락 c"),
            chunk("F3", "D1", Section::Technique, 0.7, "기법 c"),
            chunk("F4", "D2", Section::Findings, 0.6, "매출누락 d"),
            chunk("F4", "D2", Section::Technique, 0.6, "기법 d"),
        ]);
        let out = promote_blocks(&grouped, &BOTH, &[], &cfg());
        let from_d1 = out
            .block_ranking
            .iter()
            .filter(|b| b.doc_id == "D1")
            .count();
        assert_eq!(from_d1, 2);
        assert_eq!(out.block_ranking.len(), 3);
        assert_eq!(out.block_ranking[2].finding_id, "F4");
    }

    #[test]
    fn test_block_chunk_invariant() {
        let grouped = groups(vec![
            chunk("F1", "D1", Section::Findings, 0.9, "본문"),
            chunk("F1", "D1", Section::Technique, 0.8, "기법"),
            chunk("F2", "D2", Section::Findings, 0.7, "본문"),
            chunk("F2", "D2", Section::Technique, 0.6, "기법"),
        ]);
        let out = promote_blocks(&grouped, &BOTH, &[], &cfg());
        for block in &out.block_ranking {
            assert!(!block.chunks.is_empty());
            for chunk in &block.chunks {
                assert_eq!(chunk.finding_id, block.finding_id);
            }
        }
    }

    #[test]
    fn test_empty_input_yields_no_blocks() {
        let out = promote_blocks(&BTreeMap::new(), &BOTH, &[], &cfg());
        assert!(out.block_ranking.is_empty());
        assert!(out.excluded_blocks.is_empty());
    }

    #[test]
    fn test_top_k_chunks_per_section_limit() {
        let mut chunks = Vec::new();
        for i in 0..5 {
            let mut c = chunk("F1", "D1", Section::Findings, 0.9 - i as f32 * 0.1, "본문");
            c.chunk_id = format!("c{}", i);
            chunks.push(c);
        }
        chunks.push(chunk("F1", "D1", Section::Technique, 0.9, "기법"));
        chunks.push(chunk("F2", "D2", Section::Findings, 0.5, "본문"));
        chunks.push(chunk("F2", "D2", Section::Technique, 0.5, "기법"));
        let grouped = groups(chunks);
        let out = promote_blocks(&grouped, &BOTH, &[], &cfg());
        let f1 = out
            .block_ranking
            .iter()
            .find(|b| b.finding_id == "F1")
            .unwrap();
        let findings_chunks = f1
            .chunks
            .iter()
            .filter(|c| c.section == Section::Findings)
            .count();
        assert_eq!(findings_chunks, 3);
    }
}
