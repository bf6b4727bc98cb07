//! Final sanity checks over the assembled answer.

use regex::Regex;
use std::sync::LazyLock;

use crate::types::{QueryContext, Route};

static CITATION_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[[^\[\]:]+:[^\[\]:]+:[^\[\]]+\]").expect("citation tag regex is valid")
});

const NO_RESULTS_MESSAGE: &str = "관련된 세무조사 사례를 찾을 수 없습니다.\n\n다음을 확인해주세요:\n- 업종, 코드, 키워드를 더 구체적으로 입력\n- 유사한 용어로 재검색";

const TIMEOUT_MESSAGE: &str =
    "질의 처리 시간이 초과되었습니다. 잠시 후 다시 시도하거나 질문을 더 구체적으로 작성해주세요.";

/// Validate and finalize the answer in place: timeout and empty-result
/// messages, a citation-presence check, and degradation notices.
pub fn validate(ctx: &mut QueryContext) {
    if ctx.deadline_hit {
        tracing::warn!("Query deadline exceeded");
        ctx.answer = Some(TIMEOUT_MESSAGE.to_string());
        return;
    }

    if let Some(error) = &ctx.error {
        // Recovered upstream; the composer already produced a fallback body.
        tracing::warn!(error = %error, "Answer produced through a degraded path");
    }

    if ctx.route == Some(Route::Search) && ctx.block_ranking.is_empty() {
        let mut message = NO_RESULTS_MESSAGE.to_string();
        if let Some(expansion) = &ctx.expansion {
            if !expansion.must_have.is_empty() {
                message.push_str(&format!(
                    "\n\n시도한 검색 키워드: {}",
                    expansion.must_have.join(", ")
                ));
            }
        }
        ctx.answer = Some(message);
        return;
    }

    let Some(answer) = ctx.answer.as_mut() else {
        ctx.answer = Some("죄송합니다. 답변을 생성할 수 없습니다. 다시 시도해주세요.".to_string());
        return;
    };

    if !ctx.block_ranking.is_empty() && !CITATION_TAG_RE.is_match(answer) {
        answer.push_str("\n\n(주의: 답변에 출처 인용이 누락되었습니다. 검색 결과를 직접 확인해주세요.)");
    }

    if ctx.vector_degraded {
        answer.push_str("\n\n(참고: 벡터 검색이 일시적으로 불가하여 키워드 검색 결과만 사용했습니다.)");
    }
    if ctx.lexical_degraded {
        answer.push_str("\n\n(참고: 키워드 검색이 일시적으로 불가하여 의미 검색 결과만 사용했습니다.)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Expansion, RankedBlock, Section};

    fn block() -> RankedBlock {
        RankedBlock {
            finding_id: "F1".to_string(),
            doc_id: "D1".to_string(),
            item: None,
            code: None,
            score: 1.0,
            chunks: Vec::new(),
            source_sections: vec![Section::Findings],
        }
    }

    #[test]
    fn test_timeout_wins_over_everything() {
        let mut ctx = QueryContext::new("질의");
        ctx.deadline_hit = true;
        ctx.answer = Some("부분 답변".to_string());
        validate(&mut ctx);
        assert!(ctx.answer.unwrap().contains("시간이 초과"));
    }

    #[test]
    fn test_no_results_echoes_keywords() {
        let mut ctx = QueryContext::new("질의");
        ctx.route = Some(Route::Search);
        ctx.expansion = Some(Expansion {
            must_have: vec!["우주선".into(), "매출누락".into()],
            ..Expansion::default()
        });
        validate(&mut ctx);
        let answer = ctx.answer.unwrap();
        assert!(answer.contains("찾을 수 없습니다"));
        assert!(answer.contains("우주선, 매출누락"));
    }

    #[test]
    fn test_missing_citation_warning() {
        let mut ctx = QueryContext::new("질의");
        ctx.route = Some(Route::Search);
        ctx.block_ranking = vec![block()];
        ctx.answer = Some("인용 태그가 없는 답변".to_string());
        validate(&mut ctx);
        assert!(ctx.answer.unwrap().contains("출처 인용이 누락"));
    }

    #[test]
    fn test_answer_with_citation_passes_clean() {
        let mut ctx = QueryContext::new("질의");
        ctx.route = Some(Route::Search);
        ctx.block_ranking = vec![block()];
        ctx.answer = Some("사례 설명 [D1:3:10-15]".to_string());
        validate(&mut ctx);
        assert!(!ctx.answer.unwrap().contains("누락되었습니다"));
    }

    #[test]
    fn test_vector_degradation_note() {
        let mut ctx = QueryContext::new("질의");
        ctx.route = Some(Route::Search);
        ctx.block_ranking = vec![block()];
        ctx.vector_degraded = true;
        ctx.answer = Some("사례 설명 [D1:3:10-15]".to_string());
        validate(&mut ctx);
        assert!(ctx.answer.unwrap().contains("키워드 검색 결과만"));
    }

    #[test]
    fn test_clarify_answer_untouched() {
        let mut ctx = QueryContext::new("세금");
        ctx.route = Some(Route::Clarify);
        ctx.answer = Some("## 추가 정보가 필요합니다".to_string());
        validate(&mut ctx);
        assert_eq!(ctx.answer.unwrap(), "## 추가 정보가 필요합니다");
    }
}
