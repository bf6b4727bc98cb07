//! Intent classification and slot extraction.
//!
//! Slot extraction is LLM-first with a rule-based fallback: a gazetteer for
//! industries and domain tags, a 5-digit pattern for item codes, and
//! quoted/capitalized spans for entities. Either path feeds the same
//! confidence formula.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use super::extract_json_object;
use crate::clients::LlmClient;
use crate::types::{Intent, Section, Slots};

static CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{5})\b").expect("code regex is valid"));

static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)"|'([^']+)'"#).expect("quoted span regex is valid"));

static CAPITALIZED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z][A-Za-z]{2,})\b").expect("capitalized regex is valid"));

const EXPLAIN_MARKERS: &[&str] = &[
    "설명해",
    "뭐야",
    "무엇인지",
    "정의",
    "의미",
    "what is",
    "explain",
];

const INDUSTRY_VOCAB: &[&str] = &[
    "제조업",
    "도소매업",
    "건설업",
    "음식점업",
    "서비스업",
    "부동산업",
];

const DOMAIN_VOCAB: &[&str] = &[
    "매출누락",
    "가공경비",
    "인건비",
    "감가상각비",
    "접대비",
    "기부금",
    "미환류소득",
    "대손준비금",
];

const FINDINGS_HINTS: &[&str] = &[
    "착안",
    "발견",
    "적발",
    "확인",
    "검토",
    "문제점",
    "의혹",
    "혐의",
];

const TECHNIQUE_HINTS: &[&str] = &[
    "조사기법",
    "기법",
    "방법",
    "절차",
    "확인방법",
    "검증",
    "조사방법",
    "접근",
];

const SLOT_PROMPT: &str = r#"질문에서 명시된 정보만 JSON으로 추출하세요. 추측 금지.

질문: {query}

JSON 형식:
{
  "industry_sub": [],  // 제조업, 도소매업 등 명시된 업종만
  "domain_tags": [],   // 매출누락, 접대비 등 명시된 세무 주제만
  "code": [],          // 5자리 숫자 코드만 (예: 10501)
  "entities": [],      // 회사명, 인명 등
  "section_hints": {"착안": [], "기법": []}  // "조사착안", "조사기법", "방법" 등이 있으면 추가
}

규칙:
- 질문에 직접 등장한 값만 추출하세요
- code는 5자리 숫자만 허용합니다
- JSON만 반환하세요."#;

#[derive(Debug)]
pub struct ParseOutcome {
    pub intent: Intent,
    pub slots: Slots,
    pub used_fallback: bool,
}

/// Parse the normalized query: classify intent, extract slots via the LLM
/// (falling back to rules), and score confidence.
pub async fn parse_query(llm: &dyn LlmClient, normalized: &str) -> ParseOutcome {
    let intent = classify_intent(normalized);

    let (mut slots, llm_json_ok, used_fallback) = match extract_slots_with_llm(llm, normalized).await
    {
        Ok(slots) => (slots, true, false),
        Err(e) => {
            tracing::warn!(error = %e, "LLM slot extraction failed, using rule-based fallback");
            (extract_slots_rule_based(normalized), false, true)
        }
    };

    let llm_populated = !used_fallback
        && (!slots.industry_sub.is_empty()
            || !slots.domain_tags.is_empty()
            || !slots.code.is_empty()
            || !slots.entities.is_empty());

    slots.free_text = normalized.to_string();
    slots.confidence = confidence(&slots, llm_json_ok, llm_populated, used_fallback);

    tracing::info!(
        ?intent,
        confidence = slots.confidence,
        fallback = used_fallback,
        "Query parsed"
    );

    ParseOutcome {
        intent,
        slots,
        used_fallback,
    }
}

/// Definitional markers route to `explain`; everything else is a case lookup.
pub fn classify_intent(query: &str) -> Intent {
    let lower = query.to_lowercase();
    if EXPLAIN_MARKERS.iter().any(|m| lower.contains(m)) {
        Intent::Explain
    } else {
        Intent::CaseLookup
    }
}

async fn extract_slots_with_llm(llm: &dyn LlmClient, query: &str) -> anyhow::Result<Slots> {
    let prompt = SLOT_PROMPT.replace("{query}", query);
    let raw = llm.generate(&prompt, true).await?;
    let parsed: Value = serde_json::from_str(extract_json_object(&raw))?;
    if !parsed.is_object() {
        anyhow::bail!("Slot extraction response is not a JSON object");
    }

    let mut section_hints = BTreeMap::new();
    if let Some(hints) = parsed.get("section_hints") {
        for (key, section) in [("착안", Section::Findings), ("기법", Section::Technique)] {
            let values = value_to_list(hints.get(key).unwrap_or(&Value::Null));
            if !values.is_empty() {
                section_hints.insert(section, values);
            }
        }
    }

    Ok(Slots {
        industry_sub: value_to_list(parsed.get("industry_sub").unwrap_or(&Value::Null)),
        domain_tags: value_to_list(parsed.get("domain_tags").unwrap_or(&Value::Null)),
        code: value_to_list(parsed.get("code").unwrap_or(&Value::Null))
            .into_iter()
            .filter(|code| CODE_RE.is_match(code))
            .collect(),
        entities: value_to_list(parsed.get("entities").unwrap_or(&Value::Null)),
        section_hints,
        free_text: String::new(),
        confidence: 0.0,
    })
}

/// Gazetteer + pattern extraction when the LLM is unavailable.
pub fn extract_slots_rule_based(query: &str) -> Slots {
    let mut slots = Slots::default();

    for capture in CODE_RE.captures_iter(query) {
        let code = capture[1].to_string();
        if !slots.code.contains(&code) {
            slots.code.push(code);
        }
    }

    for industry in INDUSTRY_VOCAB {
        if query.contains(industry) {
            slots.industry_sub.push(industry.to_string());
        }
    }
    for tag in DOMAIN_VOCAB {
        if query.contains(tag) {
            slots.domain_tags.push(tag.to_string());
        }
    }

    for capture in QUOTED_RE.captures_iter(query) {
        if let Some(span) = capture.get(1).or_else(|| capture.get(2)) {
            slots.entities.push(span.as_str().to_string());
        }
    }
    for capture in CAPITALIZED_RE.captures_iter(query) {
        let span = capture[1].to_string();
        if !slots.entities.contains(&span) {
            slots.entities.push(span);
        }
    }

    let mut findings_hints: Vec<String> = Vec::new();
    for hint in FINDINGS_HINTS {
        if query.contains(hint) {
            findings_hints.push(hint.to_string());
        }
    }
    if !findings_hints.is_empty() {
        slots
            .section_hints
            .insert(Section::Findings, findings_hints);
    }
    let mut technique_hints: Vec<String> = Vec::new();
    for hint in TECHNIQUE_HINTS {
        if query.contains(hint) {
            technique_hints.push(hint.to_string());
        }
    }
    if !technique_hints.is_empty() {
        slots
            .section_hints
            .insert(Section::Technique, technique_hints);
    }

    slots
}

/// Weighted confidence signals, clipped to [0, 1]; the rule-based fallback
/// caps the result at 0.5.
fn confidence(slots: &Slots, llm_json_ok: bool, llm_populated: bool, used_fallback: bool) -> f32 {
    let mut score: f32 = 0.0;
    if llm_populated {
        score += 0.3;
    }
    if !slots.code.is_empty() || !slots.industry_sub.is_empty() {
        score += 0.2;
    }
    if !slots.domain_tags.is_empty() {
        score += 0.2;
    }
    if llm_json_ok {
        score += 0.3;
    }
    if used_fallback {
        score -= 0.2;
    }

    let clipped = score.clamp(0.0, 1.0);
    if used_fallback {
        clipped.min(0.5)
    } else {
        clipped
    }
}

fn value_to_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Value::String(s) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}
