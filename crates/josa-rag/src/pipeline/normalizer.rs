//! Query normalization: PII redaction, whitespace and punctuation cleanup,
//! abbreviation expansion, and stopword removal.
//!
//! This stage never fails; any internal problem leaves the original input
//! untouched.

use regex::Regex;
use std::sync::LazyLock;

// Redaction order matters: the card-number pattern must run before the
// phone-number pattern, which would otherwise eat its prefix.
static REDACTIONS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"\b\d{6}-\d{7}\b").expect("resident number regex is valid"),
            "[주민번호]",
        ),
        (
            Regex::new(r"\b\d{3}-\d{2}-\d{5}\b").expect("business number regex is valid"),
            "[사업자번호]",
        ),
        (
            Regex::new(r"\b\d{4}-\d{4}-\d{4}-\d{4}\b").expect("card number regex is valid"),
            "[카드번호]",
        ),
        (
            Regex::new(r"\b\d{2,3}-\d{3,4}-\d{4}\b").expect("phone number regex is valid"),
            "[전화번호]",
        ),
    ]
});

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));

static PUNCTUATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("punctuation regex is valid"));

static HANGUL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[가-힣]").expect("hangul regex is valid"));

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w").expect("word regex is valid"));

// Trailing grammatical particles after a Hangul syllable.
static PARTICLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([가-힣])(?:시|에|의|를|을|가|이|와|과|도)\s+").expect("particle regex is valid")
});

const ABBREVIATIONS: &[(&str, &str)] = &[
    ("부가세", "부가가치세"),
    ("종소세", "종합소득세"),
    ("양도세", "양도소득세"),
    ("VAT", "부가가치세"),
    ("vat", "부가가치세"),
];

// Compound noise removed before single nouns so that e.g. "적출사례" does
// not survive as "사례".
const COMPOUND_NOISE: &[&str] = &["적출사례", "조사사례", "적발사례", "세무조사", "세무사례"];

const NOISE_KEYWORDS: &[&str] = &[
    "사례",
    "사건",
    "적발",
    "적출",
    "조사",
    "예시",
    "예제",
    "알려줘",
    "알려주세요",
    "찾아줘",
    "검색",
    "보여줘",
    "관련",
    "있어",
    "있나요",
    "있습니까",
    "케이스",
];

/// Full normalization pass over the raw user query.
pub fn normalize(raw: &str) -> String {
    let masked = mask_sensitive(raw);

    if detect_language(&masked) != "ko" {
        tracing::warn!("Non-Korean query detected, proceeding anyway");
    }

    let cleaned = normalize_text(&masked);
    let expanded = expand_abbreviations(&cleaned);
    let result = remove_stopwords(&expanded);

    if result.trim().is_empty() {
        // Everything was stripped as noise: fall back to the cleaned form so
        // downstream stages still have something to work with.
        tracing::warn!("Normalization stripped the entire query, keeping cleaned input");
        return cleaned;
    }
    result
}

/// Replace identification-number patterns with fixed placeholders.
pub fn mask_sensitive(text: &str) -> String {
    let mut masked = text.to_string();
    for (pattern, replacement) in REDACTIONS.iter() {
        masked = pattern.replace_all(&masked, *replacement).into_owned();
    }
    masked
}

/// Hangul-ratio language heuristic.
pub fn detect_language(text: &str) -> &'static str {
    let hangul = HANGUL_RE.find_iter(text).count();
    let total = WORD_RE.find_iter(text).count();
    if total == 0 {
        return "unknown";
    }
    if hangul as f32 / total as f32 > 0.3 {
        "ko"
    } else {
        "en"
    }
}

fn normalize_text(text: &str) -> String {
    let without_punct = PUNCTUATION_RE.replace_all(text.trim(), " ");
    let collapsed = WHITESPACE_RE.replace_all(&without_punct, " ");
    collapsed
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii() {
                c.to_ascii_lowercase()
            } else {
                c
            }
        })
        .collect()
}

fn expand_abbreviations(text: &str) -> String {
    let mut expanded = text.to_string();
    for (abbr, full) in ABBREVIATIONS {
        let pattern = format!(r"\b{}\b", regex::escape(abbr));
        if let Ok(re) = Regex::new(&pattern) {
            expanded = re.replace_all(&expanded, *full).into_owned();
        }
    }
    expanded
}

fn remove_stopwords(text: &str) -> String {
    let mut cleaned = text.to_string();

    for compound in COMPOUND_NOISE {
        cleaned = cleaned.replace(compound, "");
    }

    for noise in NOISE_KEYWORDS {
        let pattern = format!(r"\b{}\b", regex::escape(noise));
        if let Ok(re) = Regex::new(&pattern) {
            cleaned = re.replace_all(&cleaned, "").into_owned();
        }
    }

    cleaned = PARTICLE_RE.replace_all(&cleaned, "$1 ").into_owned();

    WHITESPACE_RE
        .replace_all(&cleaned, " ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks_resident_number() {
        assert_eq!(
            mask_sensitive("850101-1234567 관련 사례"),
            "[주민번호] 관련 사례"
        );
    }

    #[test]
    fn test_masks_card_before_phone() {
        // Without ordering, the phone pattern would partially match the card.
        assert_eq!(mask_sensitive("1234-5678-9012-3456"), "[카드번호]");
        assert_eq!(mask_sensitive("02-1234-5678"), "[전화번호]");
    }

    #[test]
    fn test_masks_business_number() {
        assert_eq!(mask_sensitive("123-45-67890"), "[사업자번호]");
    }

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("제조업 매출누락 조사기법"), "ko");
        assert_eq!(detect_language("manufacturing revenue omission"), "en");
        assert_eq!(detect_language("!!!"), "unknown");
    }

    #[test]
    fn test_expands_abbreviations() {
        assert_eq!(expand_abbreviations("부가세 신고"), "부가가치세 신고");
        assert_eq!(expand_abbreviations("vat 신고"), "부가가치세 신고");
    }

    #[test]
    fn test_removes_compound_noise_first() {
        let result = remove_stopwords("제조업 적출사례");
        assert_eq!(result, "제조업");
    }

    #[test]
    fn test_removes_noise_and_particles() {
        let result = remove_stopwords("매출누락 사례 알려줘");
        assert_eq!(result, "매출누락");
    }

    #[test]
    fn test_normalize_end_to_end() {
        let result = normalize("제조업 매출누락 적출사례 알려줘!");
        assert_eq!(result, "제조업 매출누락");
    }

    #[test]
    fn test_normalize_lowercases_ascii_only() {
        let result = normalize("IT서비스 매출누락");
        assert!(result.contains("it서비스"));
    }

    #[test]
    fn test_normalize_never_returns_empty_for_nonempty_input() {
        // A query made entirely of noise falls back to the cleaned form.
        let result = normalize("조사 사례");
        assert!(!result.trim().is_empty());
    }
}
