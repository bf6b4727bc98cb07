//! Reciprocal Rank Fusion over a lexical and a vector ranking.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::clients::{LexicalHit, VectorHit};

/// An item present in at least one of the two fused rankings.
#[derive(Debug, Clone)]
pub struct FusedHit {
    pub id: String,
    pub rrf_score: f32,
    /// Higher of the two original scores, used for tie-breaking.
    pub best_source_score: f32,
    pub lexical: Option<LexicalHit>,
    pub vector: Option<VectorHit>,
}

impl FusedHit {
    pub fn bm25_score(&self) -> f32 {
        self.lexical.as_ref().map_or(0.0, |h| h.score)
    }

    pub fn vector_score(&self) -> f32 {
        self.vector.as_ref().map_or(0.0, |h| h.score)
    }
}

/// Fuse the two rankings with `rrf_score = Σ_r 1/(k + rank_r)` over 1-based
/// ranks; items absent from a ranking contribute nothing for it. When one
/// ranking is empty the fusion degenerates to the other. Ordering is fully
/// deterministic: fused score descending, then the higher original score,
/// then id ascending.
pub fn reciprocal_rank_fusion(
    lexical: Vec<LexicalHit>,
    vector: Vec<VectorHit>,
    k: usize,
    top_n: usize,
) -> Vec<FusedHit> {
    let mut merged: HashMap<String, FusedHit> = HashMap::new();

    for (rank, hit) in lexical.into_iter().enumerate() {
        let rrf = 1.0 / (k as f32 + rank as f32 + 1.0);
        let entry = merged.entry(hit.id.clone()).or_insert_with(|| FusedHit {
            id: hit.id.clone(),
            rrf_score: 0.0,
            best_source_score: 0.0,
            lexical: None,
            vector: None,
        });
        entry.rrf_score += rrf;
        entry.best_source_score = entry.best_source_score.max(hit.score);
        entry.lexical = Some(hit);
    }

    for (rank, hit) in vector.into_iter().enumerate() {
        let rrf = 1.0 / (k as f32 + rank as f32 + 1.0);
        let entry = merged.entry(hit.id.clone()).or_insert_with(|| FusedHit {
            id: hit.id.clone(),
            rrf_score: 0.0,
            best_source_score: 0.0,
            lexical: None,
            vector: None,
        });
        entry.rrf_score += rrf;
        entry.best_source_score = entry.best_source_score.max(hit.score);
        entry.vector = Some(hit);
    }

    let mut fused: Vec<FusedHit> = merged.into_values().collect();
    fused.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.best_source_score
                    .partial_cmp(&a.best_source_score)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.id.cmp(&b.id))
    });
    fused.truncate(top_n);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn lex(id: &str, score: f32) -> LexicalHit {
        LexicalHit {
            id: id.to_string(),
            score,
            source: Value::Null,
        }
    }

    fn vec_hit(id: &str, score: f32) -> VectorHit {
        VectorHit {
            id: id.to_string(),
            score,
            payload: Value::Null,
        }
    }

    #[test]
    fn test_item_in_both_rankings_scores_sum() {
        let fused = reciprocal_rank_fusion(
            vec![lex("a", 10.0), lex("b", 5.0)],
            vec![vec_hit("a", 0.9)],
            60,
            10,
        );
        assert_eq!(fused[0].id, "a");
        let expected = 1.0 / 61.0 + 1.0 / 61.0;
        assert!((fused[0].rrf_score - expected).abs() < 1e-6);
        assert!(fused[0].lexical.is_some() && fused[0].vector.is_some());
    }

    #[test]
    fn test_degenerates_to_single_ranking() {
        let fused = reciprocal_rank_fusion(vec![lex("a", 3.0), lex("b", 2.0)], vec![], 60, 10);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].id, "a");
        assert!((fused[0].rrf_score - 1.0 / 61.0).abs() < 1e-6);
        assert!((fused[1].rrf_score - 1.0 / 62.0).abs() < 1e-6);
    }

    #[test]
    fn test_monotone_under_added_ranking() {
        // Adding an item to the vector ranking can only raise its fused score.
        let before = reciprocal_rank_fusion(vec![lex("a", 3.0), lex("b", 2.0)], vec![], 60, 10);
        let after = reciprocal_rank_fusion(
            vec![lex("a", 3.0), lex("b", 2.0)],
            vec![vec_hit("b", 0.8)],
            60,
            10,
        );
        let score_before = before.iter().find(|h| h.id == "b").unwrap().rrf_score;
        let score_after = after.iter().find(|h| h.id == "b").unwrap().rrf_score;
        assert!(score_after > score_before);
        let a_before = before.iter().find(|h| h.id == "a").unwrap().rrf_score;
        let a_after = after.iter().find(|h| h.id == "a").unwrap().rrf_score;
        assert_eq!(a_before, a_after);
    }

    #[test]
    fn test_tie_break_by_source_score_then_id() {
        // Same ranks on opposite sides: identical rrf, resolved by raw score.
        let fused = reciprocal_rank_fusion(
            vec![lex("low", 1.0)],
            vec![vec_hit("high", 0.95)],
            60,
            10,
        );
        assert_eq!(fused[0].id, "low");

        // Identical everything except id: lexicographic order.
        let fused = reciprocal_rank_fusion(
            vec![lex("bbb", 1.0)],
            vec![vec_hit("aaa", 1.0)],
            60,
            10,
        );
        assert_eq!(fused[0].id, "aaa");
    }

    #[test]
    fn test_truncates_to_top_n() {
        let lexical: Vec<LexicalHit> = (0..10).map(|i| lex(&format!("h{}", i), 1.0)).collect();
        let fused = reciprocal_rank_fusion(lexical, vec![], 60, 3);
        assert_eq!(fused.len(), 3);
    }
}
