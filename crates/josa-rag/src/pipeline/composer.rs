//! Answer composition: the final LLM call plus the deterministic framing
//! around it (strategy preamble, references footer, supplementary blocks).

use crate::clients::LlmClient;
use crate::types::{Citation, Expansion, QueryContext, RankedBlock};

const ANSWER_PROMPT: &str = r###"당신은 세무조사 전문가입니다. 아래 컨텍스트를 참고하여 사용자 질문에 답변하세요.

# 사용자 질문
{query}

# 검색된 사례 컨텍스트
{context}

# 답변 지침
1. 컨텍스트에 제공된 모든 적출 블록을 빠짐없이 답변에 포함하세요. 일부만 선택하지 마세요.
2. 블록별로 카드 형식으로 정리하고, 각 블록을 "## Block N" 제목으로 시작하세요.
3. 각 블록마다 코드, 항목명, 문서 ID, 조사착안(어떻게 발견했는지), 조사기법(어떻게 확인했는지)을 포함하세요.
4. 근거는 반드시 컨텍스트에 제공된 인용 태그([문서ID:페이지:라인] 형식)로 표시하세요.
5. 컨텍스트에 없는 내용은 답변에 넣지 마세요.

답변:"###;

const EXPLAIN_PROMPT: &str = r#"당신은 세무 전문가입니다. 아래 용어 또는 개념을 간결하게 설명하세요.
정의, 과세상 의미, 세무조사에서의 쟁점을 3-5문장으로 정리하세요.

질문: {query}

답변:"#;

/// Compose the final answer for the search path. On LLM failure the error is
/// recorded and a deterministic block listing is emitted instead.
pub async fn compose_answer(llm: &dyn LlmClient, ctx: &mut QueryContext) {
    if ctx.block_ranking.is_empty() {
        // Nothing to narrate; the validator owns the empty-result message.
        return;
    }

    let prompt = ANSWER_PROMPT
        .replace("{query}", &ctx.raw_query)
        .replace("{context}", &ctx.context.packed_text);

    let body = match llm.generate(&prompt, false).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "Answer generation failed, emitting deterministic fallback");
            ctx.error = Some(format!("answer generation failed: {}", e));
            ctx.llm_degraded = true;
            fallback_body(&ctx.block_ranking)
        }
    };

    let mut answer = String::new();
    if let Some(preamble) = strategy_preamble(ctx) {
        answer.push_str(&preamble);
        answer.push('\n');
    }
    answer.push_str(body.trim());
    answer.push_str(&references_footer(&ctx.context.citations));
    if let Some(additional) = additional_section(&ctx.excluded_blocks) {
        answer.push_str(&additional);
    }

    ctx.answer = Some(answer);
}

/// Direct definitional answer for the explain route; no retrieval involved.
pub async fn compose_explain(llm: &dyn LlmClient, ctx: &mut QueryContext) {
    let prompt = EXPLAIN_PROMPT.replace("{query}", &ctx.raw_query);
    match llm.generate(&prompt, false).await {
        Ok(body) => ctx.answer = Some(body.trim().to_string()),
        Err(e) => {
            tracing::warn!(error = %e, "Explain generation failed");
            ctx.error = Some(format!("explain generation failed: {}", e));
            ctx.llm_degraded = true;
            ctx.answer = Some(
                "용어 설명을 생성할 수 없습니다. 잠시 후 다시 시도해주세요.".to_string(),
            );
        }
    }
}

/// Human-readable search-strategy note, rendered only for multi-keyword
/// queries: which keyword filtered documents, which filtered blocks, and how
/// many blocks each matched.
fn strategy_preamble(ctx: &QueryContext) -> Option<String> {
    let expansion: &Expansion = ctx.expansion.as_ref()?;
    if expansion.must_have.len() < 2 {
        return None;
    }

    let doc_keyword = expansion.doc_level_keyword()?;
    let block_keywords = expansion.block_level_keywords();

    let mut preamble = String::from("> 💡 **검색 전략**:\n");
    preamble.push_str(&format!("> - 조사 대상/배경: '{}'\n", doc_keyword));
    preamble.push_str(&format!(
        "> - 적출 항목: '{}'\n",
        block_keywords.join("' 또는 '")
    ));
    preamble.push_str(&format!(
        "> - '{}' 문서 내에서 '{}' 포함 사례를 검색했습니다.\n",
        doc_keyword,
        block_keywords.join("', '")
    ));

    if !ctx.keyword_block_counts.is_empty() {
        preamble.push_str(">\n> **검색된 사례 건수**:\n");
        for keyword in &expansion.must_have {
            let count = ctx.keyword_block_counts.get(keyword).copied().unwrap_or(0);
            let role = if keyword == doc_keyword {
                "조사대상"
            } else {
                "적출항목"
            };
            preamble.push_str(&format!("> - [{}] '{}': {}건\n", role, keyword, count));
        }
    }

    Some(preamble)
}

/// One reference line per distinct citation tag, in first-appearance order.
fn references_footer(citations: &[Citation]) -> String {
    if citations.is_empty() {
        return String::new();
    }

    let mut footer = String::from("\n\n## References\n");
    let mut seen = std::collections::HashSet::new();
    for citation in citations {
        let tag = citation.tag();
        if seen.insert(tag.clone()) {
            footer.push_str(&format!("- {} {}\n", tag, citation.finding_id));
        }
    }
    footer
}

/// Supplementary section for blocks excluded by the keyword filter, grouped
/// by document.
fn additional_section(excluded: &[RankedBlock]) -> Option<String> {
    if excluded.is_empty() {
        return None;
    }

    let mut by_doc: Vec<(String, Vec<&RankedBlock>)> = Vec::new();
    for block in excluded {
        match by_doc.iter_mut().find(|(doc_id, _)| doc_id == &block.doc_id) {
            Some((_, blocks)) => blocks.push(block),
            None => by_doc.push((block.doc_id.clone(), vec![block])),
        }
    }

    let mut section = String::from("\n\n## Additional\n\n");
    section.push_str(&format!(
        "검색된 문서에는 위 사례 외에도 {}건의 다른 적출 사례가 포함되어 있습니다:\n\n",
        excluded.len()
    ));
    for (doc_id, blocks) in by_doc.iter().take(2) {
        section.push_str(&format!("**문서 {}**:\n", doc_id));
        for (index, block) in blocks.iter().take(3).enumerate() {
            section.push_str(&format!(
                "{}. {} (코드: {})\n",
                index + 1,
                block.item.as_deref().unwrap_or("-"),
                block.code.as_deref().unwrap_or("-"),
            ));
        }
        if blocks.len() > 3 {
            section.push_str(&format!("... 외 {}건\n", blocks.len() - 3));
        }
        section.push('\n');
    }
    section.push_str("*더 자세한 정보가 필요하시면 구체적인 키워드로 재질의해주세요.*\n");

    Some(section)
}

/// Deterministic answer body used when the LLM is unavailable: every block's
/// header and citation tags, no narrative.
fn fallback_body(blocks: &[RankedBlock]) -> String {
    let mut body = String::from("LLM 응답을 생성할 수 없어 검색된 사례를 요약 없이 제공합니다.\n");
    for (index, block) in blocks.iter().enumerate() {
        body.push_str(&format!(
            "\n## Block {}\n- 문서: {}\n- 적출ID: {}\n- 항목: {}\n- 코드: {}\n",
            index + 1,
            block.doc_id,
            block.finding_id,
            block.item.as_deref().unwrap_or("-"),
            block.code.as_deref().unwrap_or("-"),
        ));
        for chunk in &block.chunks {
            body.push_str(&format!("- {}\n", chunk.citation().tag()));
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkHit, ContextData, Section};
    use anyhow::anyhow;
    use async_trait::async_trait;

    struct ScriptedLlm(Option<String>);

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate(&self, _prompt: &str, _json_mode: bool) -> anyhow::Result<String> {
            self.0.clone().ok_or_else(|| anyhow!("llm unreachable"))
        }
    }

    fn chunk() -> ChunkHit {
        ChunkHit {
            chunk_id: "C1".to_string(),
            finding_id: "F1".to_string(),
            doc_id: "D1".to_string(),
            section: Section::Findings,
            section_order: 1,
            chunk_order: 1,
            code: Some("10501".to_string()),
            item: Some("매출누락".to_string()),
            page: Some(3),
            start_line: Some(10),
            end_line: Some(15),
            text: "현금매출 누락".to_string(),
            score_combined: 0.8,
        }
    }

    fn ranked_block(finding: &str, doc: &str) -> RankedBlock {
        let mut c = chunk();
        c.finding_id = finding.to_string();
        c.doc_id = doc.to_string();
        RankedBlock {
            finding_id: finding.to_string(),
            doc_id: doc.to_string(),
            item: Some("매출누락".to_string()),
            code: Some("10501".to_string()),
            score: 0.9,
            chunks: vec![c],
            source_sections: vec![Section::Findings],
        }
    }

    fn search_ctx(must_have: Vec<String>) -> QueryContext {
        let mut ctx = QueryContext::new("제조업 매출누락 조사기법");
        ctx.block_ranking = vec![ranked_block("F1", "D1")];
        ctx.context = ContextData {
            packed_text: "## 적출 블록 1\n현금매출 누락\n[D1:3:10-15]\n".to_string(),
            citations: vec![chunk().citation()],
        };
        if !must_have.is_empty() {
            for kw in &must_have {
                ctx.keyword_block_counts.insert(kw.clone(), 1);
            }
            ctx.expansion = Some(Expansion {
                must_have,
                ..Expansion::default()
            });
        }
        ctx
    }

    #[tokio::test]
    async fn test_multi_keyword_answer_has_preamble_and_footer() {
        let llm = ScriptedLlm(Some("## Block 1\n사례 설명 [D1:3:10-15]".to_string()));
        let mut ctx = search_ctx(vec!["제조업".into(), "매출누락".into()]);
        compose_answer(&llm, &mut ctx).await;

        let answer = ctx.answer.unwrap();
        assert!(answer.contains("검색 전략"));
        assert!(answer.contains("'제조업'"));
        assert!(answer.contains("'매출누락'"));
        assert!(answer.contains("## References"));
        assert!(answer.contains("[D1:3:10-15]"));
        assert!(ctx.error.is_none());
    }

    #[tokio::test]
    async fn test_single_keyword_has_no_preamble() {
        let llm = ScriptedLlm(Some("## Block 1\n사례 설명".to_string()));
        let mut ctx = search_ctx(vec!["매출누락".into()]);
        compose_answer(&llm, &mut ctx).await;
        assert!(!ctx.answer.unwrap().contains("검색 전략"));
    }

    #[tokio::test]
    async fn test_llm_failure_emits_deterministic_fallback() {
        let llm = ScriptedLlm(None);
        let mut ctx = search_ctx(vec!["제조업".into(), "매출누락".into()]);
        compose_answer(&llm, &mut ctx).await;

        assert!(ctx.error.is_some());
        let answer = ctx.answer.unwrap();
        assert!(answer.contains("## Block 1"));
        assert!(answer.contains("- 문서: D1"));
        assert!(answer.contains("[D1:3:10-15]"));
    }

    #[tokio::test]
    async fn test_excluded_blocks_render_additional_section() {
        let llm = ScriptedLlm(Some("본문".to_string()));
        let mut ctx = search_ctx(vec!["제조업".into(), "매출누락".into()]);
        ctx.excluded_blocks = vec![ranked_block("F2", "D2"), ranked_block("F3", "D2")];
        compose_answer(&llm, &mut ctx).await;

        let answer = ctx.answer.unwrap();
        assert!(answer.contains("## Additional"));
        assert!(answer.contains("문서 D2"));
        assert!(answer.contains("2건의 다른 적출 사례"));
    }

    #[tokio::test]
    async fn test_no_blocks_leaves_answer_unset() {
        let llm = ScriptedLlm(Some("본문".to_string()));
        let mut ctx = QueryContext::new("질의");
        compose_answer(&llm, &mut ctx).await;
        assert!(ctx.answer.is_none());
    }

    #[tokio::test]
    async fn test_explain_path() {
        let llm = ScriptedLlm(Some("미환류소득이란 ...".to_string()));
        let mut ctx = QueryContext::new("미환류소득 의미");
        compose_explain(&llm, &mut ctx).await;
        assert!(ctx.answer.unwrap().starts_with("미환류소득이란"));

        let failing = ScriptedLlm(None);
        let mut ctx = QueryContext::new("미환류소득 의미");
        compose_explain(&failing, &mut ctx).await;
        assert!(ctx.error.is_some());
        assert!(ctx.answer.is_some());
    }

    #[test]
    fn test_references_footer_dedups_by_tag() {
        let citations = vec![chunk().citation(), chunk().citation()];
        let footer = references_footer(&citations);
        assert_eq!(footer.matches("[D1:3:10-15]").count(), 1);
    }
}
