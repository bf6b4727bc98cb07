//! LLM-driven keyword expansion for case-lookup queries.
//!
//! Produces the must/should/related keyword sets and per-keyword boost
//! weights that drive stage-1 retrieval and block filtering. The first
//! must-have keyword is the document-level context keyword; the rest are
//! block-level filters.

use serde::Deserialize;
use std::collections::HashMap;

use super::extract_json_object;
use crate::clients::LlmClient;
use crate::types::{Expansion, Slots};

const BOOST_MIN: f32 = 1.0;
const BOOST_MAX: f32 = 3.0;
const BOOST_DEFAULT: f32 = 1.5;
const BOOST_MUST_DEFAULT: f32 = 3.0;

const VOCAB_PROMPT: &str = r#"세무조사 도메인 용어 사전:

주제 분야:
  - 매출누락: 수입금액 누락, 현금매출 누락
  - 가공경비: 가공원가, 허위경비
  - 인건비: 가공인건비, 급여 허위계상
  - 감가상각비: 상각비 과대계상
  - 접대비: 접대비 한도초과
  - 기부금: 허위 기부금
  - 미환류소득: 기업소득 환류세제
  - 대손준비금: 대손충당금

행위 유형:
  - 과대계상: 비용 부풀리기
  - 과소신고: 수입 축소
  - 허위계상: 가공 거래"#;

const EXPANSION_PROMPT: &str = r#"{vocab}

사용자 질문: {query}

위 도메인 사전을 참고하여 다음을 수행하세요:

1. 핵심 키워드 (must_have): 사용자가 명시한 모든 중요 키워드
2. 보조 키워드 (should_have): 직접 언급하지 않았지만 관련될 수 있는 키워드 (0-2개, 없어도 됨)
3. 관련 용어 (related_terms): 동의어, 유사어, 관련 개념 (3-5개)
4. 부스팅 가중치 (boost_weights): 각 키워드의 중요도 점수 (1.0-3.0)

핵심 원칙:
- must_have는 세무 관련 핵심 명사만 추출하세요 (예: 감가상각비, 접대비, 기부금)
- 일반 용어는 절대 추가하지 마세요: 세무조사, 조사, 사례, 적출사례, 사건, 적발, 관련, 검색
- boost_weights 기본값: must_have=3.0, should_have=1.5, related_terms=1.0-1.3

JSON 형식으로만 응답하세요:
{"must_have": [...], "should_have": [...], "related_terms": [...], "boost_weights": {...}}"#;

#[derive(Debug, Default, Deserialize)]
struct RawExpansion {
    #[serde(default)]
    must_have: Vec<String>,
    #[serde(default)]
    should_have: Vec<String>,
    #[serde(default)]
    related_terms: Vec<String>,
    #[serde(default)]
    boost_weights: HashMap<String, f32>,
}

#[derive(Debug)]
pub struct ExpandOutcome {
    pub expansion: Expansion,
    pub used_fallback: bool,
}

/// Expand the query with the LLM, post-process, and fall back to the
/// domain-tag slots on any failure.
pub async fn expand_query(llm: &dyn LlmClient, normalized: &str, slots: &Slots) -> ExpandOutcome {
    match expand_with_llm(llm, normalized).await {
        Ok(raw) => {
            let expansion = post_process(raw);
            tracing::info!(
                must = ?expansion.must_have,
                should = ?expansion.should_have,
                related = expansion.related_terms.len(),
                "Query expansion complete"
            );
            ExpandOutcome {
                expansion,
                used_fallback: false,
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "LLM expansion failed, using domain-tag fallback");
            ExpandOutcome {
                expansion: fallback_expansion(slots),
                used_fallback: true,
            }
        }
    }
}

async fn expand_with_llm(llm: &dyn LlmClient, query: &str) -> anyhow::Result<RawExpansion> {
    let prompt = EXPANSION_PROMPT
        .replace("{vocab}", VOCAB_PROMPT)
        .replace("{query}", query);
    let raw = llm.generate(&prompt, true).await?;
    let parsed: RawExpansion = serde_json::from_str(extract_json_object(&raw))?;
    Ok(parsed)
}

/// Deduplicate preserving order, clamp boosts to [1.0, 3.0], and guarantee a
/// boost for every must-have keyword.
fn post_process(raw: RawExpansion) -> Expansion {
    let must_have = dedup_preserving_order(raw.must_have);
    let should_have = dedup_preserving_order(raw.should_have);
    let related_terms = dedup_preserving_order(raw.related_terms);

    let mut boost_weights: HashMap<String, f32> = raw
        .boost_weights
        .into_iter()
        .map(|(keyword, weight)| {
            let weight = if weight.is_finite() {
                weight.clamp(BOOST_MIN, BOOST_MAX)
            } else {
                BOOST_DEFAULT
            };
            (keyword, weight)
        })
        .collect();
    for keyword in &must_have {
        boost_weights
            .entry(keyword.clone())
            .or_insert(BOOST_MUST_DEFAULT);
    }

    Expansion {
        must_have,
        should_have,
        related_terms,
        boost_weights,
    }
}

fn fallback_expansion(slots: &Slots) -> Expansion {
    let must_have: Vec<String> = slots.domain_tags.iter().take(1).cloned().collect();
    let should_have: Vec<String> = slots.domain_tags.iter().skip(1).cloned().collect();
    let mut boost_weights = HashMap::new();
    for keyword in &must_have {
        boost_weights.insert(keyword.clone(), BOOST_MUST_DEFAULT);
    }

    Expansion {
        must_have,
        should_have,
        related_terms: Vec::new(),
        boost_weights,
    }
}

/// Confidence contributed by the expansion itself: two or more must-have
/// keywords signal a well-understood query.
pub fn expansion_confidence(expansion: &Expansion) -> f32 {
    let mut score: f32 = match expansion.must_have.len() {
        0 => 0.0,
        1 => 0.5,
        _ => 0.7,
    };
    if !expansion.should_have.is_empty() {
        score += 0.1;
    }
    if expansion.related_terms.len() >= 3 {
        score += 0.1;
    }
    score.min(1.0)
}

fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty() && seen.insert(item.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;

    struct ScriptedLlm(Option<String>);

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate(&self, _prompt: &str, _json_mode: bool) -> anyhow::Result<String> {
            self.0.clone().ok_or_else(|| anyhow!("llm unreachable"))
        }
    }

    #[tokio::test]
    async fn test_expansion_post_processing() {
        let llm = ScriptedLlm(Some(
            r#"{"must_have":["합병법인","미환류소득","합병법인"],
                "should_have":["자산"],
                "related_terms":["인수합병","M&A"],
                "boost_weights":{"합병법인":5.0,"자산":0.2}}"#
                .to_string(),
        ));
        let outcome = expand_query(&llm, "합병법인 미환류소득", &Slots::default()).await;
        assert!(!outcome.used_fallback);
        let exp = outcome.expansion;
        assert_eq!(exp.must_have, vec!["합병법인", "미환류소득"]);
        assert_eq!(exp.boost(&"합병법인".to_string(), 0.0), 3.0);
        assert_eq!(exp.boost(&"자산".to_string(), 0.0), 1.0);
        // Every must-have entry carries a boost.
        assert_eq!(exp.boost(&"미환류소득".to_string(), 0.0), 3.0);
    }

    #[tokio::test]
    async fn test_fallback_uses_domain_tags() {
        let llm = ScriptedLlm(None);
        let slots = Slots {
            domain_tags: vec!["매출누락".into(), "가공경비".into()],
            ..Slots::default()
        };
        let outcome = expand_query(&llm, "질의", &slots).await;
        assert!(outcome.used_fallback);
        assert_eq!(outcome.expansion.must_have, vec!["매출누락"]);
        assert_eq!(outcome.expansion.should_have, vec!["가공경비"]);
        assert!(outcome.expansion.related_terms.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json_falls_back() {
        let llm = ScriptedLlm(Some("키워드는 매출누락입니다".to_string()));
        let outcome = expand_query(&llm, "질의", &Slots::default()).await;
        assert!(outcome.used_fallback);
        assert!(outcome.expansion.must_have.is_empty());
    }

    #[test]
    fn test_expansion_confidence_tiers() {
        let empty = Expansion::default();
        assert_eq!(expansion_confidence(&empty), 0.0);

        let single = Expansion {
            must_have: vec!["접대비".into()],
            ..Expansion::default()
        };
        assert!((expansion_confidence(&single) - 0.5).abs() < 1e-6);

        let full = Expansion {
            must_have: vec!["합병법인".into(), "미환류소득".into()],
            should_have: vec!["자산".into()],
            related_terms: vec!["a".into(), "b".into(), "c".into()],
            ..Expansion::default()
        };
        assert!((expansion_confidence(&full) - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_dedup_preserves_order_and_trims() {
        let items = vec![
            " 접대비 ".to_string(),
            "기부금".to_string(),
            "접대비".to_string(),
            "".to_string(),
        ];
        assert_eq!(dedup_preserving_order(items), vec!["접대비", "기부금"]);
    }
}
