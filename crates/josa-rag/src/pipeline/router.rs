//! Routing: clarify, search, or explain.

use crate::types::{Expansion, Intent, Route, Slots};

/// Decide the pipeline branch. A non-empty must-have set always proceeds;
/// otherwise the query is sent back for clarification when confidence is low
/// or no key slot was extracted.
pub fn decide_route(
    intent: Intent,
    slots: &Slots,
    expansion: Option<&Expansion>,
    confidence_threshold: f32,
) -> Route {
    let has_keywords = expansion.is_some_and(|e| !e.must_have.is_empty());

    if !has_keywords && (slots.confidence < confidence_threshold || !slots.has_key_slot()) {
        return Route::Clarify;
    }

    match intent {
        Intent::CaseLookup => Route::Search,
        Intent::Explain => Route::Explain,
    }
}

/// Templated clarification question naming the missing slot categories.
pub fn clarification_message(slots: &Slots) -> String {
    let mut missing = Vec::new();
    if slots.industry_sub.is_empty() {
        missing.push("업종(제조업, 도소매업 등)");
    }
    if slots.domain_tags.is_empty() {
        missing.push("주제(매출누락, 가공경비, 인건비 등)");
    }
    if slots.code.is_empty() {
        missing.push("항목코드(예: 10501, 11209)");
    }

    if missing.is_empty() {
        return "## 추가 정보가 필요합니다\n\n질문이 명확하지 않습니다. 다음 중 하나를 선택해주세요:\n1. 특정 세무조사 사례를 찾고 싶으신가요?\n2. 세법 규정 설명을 듣고 싶으신가요?\n3. 조사 기법/절차를 알고 싶으신가요?"
            .to_string();
    }

    format!(
        "## 추가 정보가 필요합니다\n\n질문을 더 구체적으로 해주세요. 다음 정보를 포함해주시면 더 정확한 답변이 가능합니다:\n- {}",
        missing.join("\n- ")
    )
}
