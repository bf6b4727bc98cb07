//! The query-processing stages, in pipeline order.

pub mod composer;
pub mod expander;
pub mod normalizer;
pub mod packer;
pub mod parser;
pub mod promoter;
pub mod router;
pub mod validator;

/// Slice out the JSON object from an LLM response, tolerating markdown
/// fences and surrounding prose.
pub(crate) fn extract_json_object(raw: &str) -> &str {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => &cleaned[start..=end],
        _ => cleaned,
    }
}
