//! Context packing: render the ranked blocks into a bounded prompt context
//! with inline citation tags.

use std::collections::BTreeMap;

use crate::config::ContextConfig;
use crate::types::{ChunkHit, ContextData, RankedBlock, Section};

/// Token estimator signature; the default is whitespace tokens × 1.3.
pub type TokenEstimator = fn(&str) -> usize;

pub fn default_token_estimate(text: &str) -> usize {
    (text.split_whitespace().count() as f32 * 1.3) as usize
}

/// Render blocks in rank order until the token budget is reached. Chunks are
/// grouped by section in fixed presentation order, sorted by
/// `(section_order, chunk_order)`, optionally merged when adjacent, and each
/// emitted body is followed by its citation tag.
pub fn pack_context(
    blocks: &[RankedBlock],
    cfg: &ContextConfig,
    estimate: TokenEstimator,
) -> ContextData {
    let mut packed = String::new();
    let mut citations = Vec::new();
    let mut token_count = 0usize;

    'blocks: for (index, block) in blocks.iter().enumerate() {
        let header = format!(
            "\n## 적출 블록 {}\n- 문서: {}\n- 적출ID: {}\n- 항목: {}\n- 코드: {}\n- 섹션: {}\n\n",
            index + 1,
            block.doc_id,
            block.finding_id,
            block.item.as_deref().unwrap_or("-"),
            block.code.as_deref().unwrap_or("-"),
            block
                .source_sections
                .iter()
                .map(|s| s.label())
                .collect::<Vec<_>>()
                .join(", "),
        );
        if token_count + estimate(&header) > cfg.token_budget {
            break;
        }
        token_count += estimate(&header);
        packed.push_str(&header);

        let mut by_section: BTreeMap<Section, Vec<ChunkHit>> = BTreeMap::new();
        for chunk in &block.chunks {
            by_section.entry(chunk.section).or_default().push(chunk.clone());
        }

        // BTreeMap iteration follows the fixed presentation order of
        // `Section` (technique, taxation logic, evidence, findings).
        for (section, mut chunks) in by_section {
            chunks.sort_by_key(|c| (c.section_order, c.chunk_order));
            chunks.truncate(cfg.chunks_per_block);
            let chunks = if cfg.merge_adjacent {
                merge_adjacent_chunks(chunks)
            } else {
                chunks
            };

            let section_header = format!("### {}\n", section.label());
            if token_count + estimate(&section_header) > cfg.token_budget {
                break 'blocks;
            }
            token_count += estimate(&section_header);
            packed.push_str(&section_header);

            for chunk in chunks {
                let citation = chunk.citation();
                let body = format!("{}\n{}\n\n", chunk.text, citation.tag());
                if token_count + estimate(&body) > cfg.token_budget {
                    break 'blocks;
                }
                token_count += estimate(&body);
                packed.push_str(&body);
                citations.push(citation);
            }
        }
    }

    tracing::debug!(
        tokens = token_count,
        citations = citations.len(),
        "Context packed"
    );
    ContextData {
        packed_text: packed,
        citations,
    }
}

/// Concatenate chunks with consecutive `(section_order, chunk_order)` in the
/// same finding and section, extending the citation line range.
fn merge_adjacent_chunks(chunks: Vec<ChunkHit>) -> Vec<ChunkHit> {
    let mut iter = chunks.into_iter();
    let Some(mut current) = iter.next() else {
        return Vec::new();
    };

    let mut merged = Vec::new();
    for next in iter {
        let adjacent = current.finding_id == next.finding_id
            && current.section == next.section
            && current.section_order == next.section_order
            && current.chunk_order + 1 == next.chunk_order;
        if adjacent {
            current.text.push('\n');
            current.text.push_str(&next.text);
            current.end_line = next.end_line;
            current.chunk_order = next.chunk_order;
        } else {
            merged.push(current);
            current = next;
        }
    }
    merged.push(current);
    merged
}
