use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Rhetorical category of a chunk within a finding.
///
/// `Findings` (조사착안) and `Technique` (조사기법) are the two primary
/// sections driving retrieval; `TaxationLogic` and `EvidenceRisk` appear only
/// in presentation ordering. Variant order is the fixed rendering order of
/// the context packer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Section {
    Technique,
    TaxationLogic,
    EvidenceRisk,
    Findings,
}

impl Section {
    pub const PRIMARY: [Section; 2] = [Section::Findings, Section::Technique];

    /// Wire label as stored in the lexical index and vector payloads.
    pub fn label(&self) -> &'static str {
        match self {
            Section::Technique => "조사기법",
            Section::TaxationLogic => "과세논리",
            Section::EvidenceRisk => "증빙 및 리스크",
            Section::Findings => "조사착안",
        }
    }

    pub fn from_label(label: &str) -> Option<Section> {
        match label {
            "조사기법" => Some(Section::Technique),
            "과세논리" => Some(Section::TaxationLogic),
            "증빙 및 리스크" => Some(Section::EvidenceRisk),
            "조사착안" => Some(Section::Findings),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    #[default]
    CaseLookup,
    Explain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Clarify,
    Search,
    Explain,
}

/// Structured slots extracted from the normalized query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Slots {
    pub industry_sub: Vec<String>,
    pub domain_tags: Vec<String>,
    pub code: Vec<String>,
    pub entities: Vec<String>,
    pub section_hints: BTreeMap<Section, Vec<String>>,
    pub free_text: String,
    pub confidence: f32,
}

impl Slots {
    /// True when any of the slots that gate routing is populated.
    pub fn has_key_slot(&self) -> bool {
        !self.industry_sub.is_empty() || !self.domain_tags.is_empty() || !self.code.is_empty()
    }
}

/// Keyword expansion produced for `case_lookup` queries.
///
/// Ordering contract: `must_have[0]` is the document-level context keyword;
/// `must_have[1..]` are block-level filters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Expansion {
    pub must_have: Vec<String>,
    pub should_have: Vec<String>,
    pub related_terms: Vec<String>,
    pub boost_weights: HashMap<String, f32>,
}

impl Expansion {
    pub fn doc_level_keyword(&self) -> Option<&str> {
        if self.must_have.len() >= 2 {
            self.must_have.first().map(|s| s.as_str())
        } else {
            None
        }
    }

    pub fn block_level_keywords(&self) -> &[String] {
        if self.must_have.len() >= 2 {
            &self.must_have[1..]
        } else {
            &self.must_have
        }
    }

    pub fn boost(&self, keyword: &str, default: f32) -> f32 {
        self.boost_weights.get(keyword).copied().unwrap_or(default)
    }
}

/// Stage-1 hit: one finding-level record with its retrieval scores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindingHit {
    pub finding_id: String,
    pub doc_id: String,
    pub item: Option<String>,
    pub item_detail: Option<String>,
    pub code: Option<String>,
    pub score_bm25: f32,
    pub score_vector: f32,
    pub score_combined: f32,
}

/// Stage-2 hit: one chunk with its citation fields and fused score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkHit {
    pub chunk_id: String,
    pub finding_id: String,
    pub doc_id: String,
    pub section: Section,
    pub section_order: i64,
    pub chunk_order: i64,
    pub code: Option<String>,
    pub item: Option<String>,
    pub page: Option<i64>,
    pub start_line: Option<i64>,
    pub end_line: Option<i64>,
    pub text: String,
    pub score_combined: f32,
}

impl ChunkHit {
    pub fn citation(&self) -> Citation {
        Citation {
            doc_id: self.doc_id.clone(),
            finding_id: self.finding_id.clone(),
            chunk_id: self.chunk_id.clone(),
            page: self.page,
            start_line: self.start_line,
            end_line: self.end_line,
            section: self.section,
        }
    }
}

/// A finding promoted to a presentation unit with its chosen top chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedBlock {
    pub finding_id: String,
    pub doc_id: String,
    pub item: Option<String>,
    pub code: Option<String>,
    pub score: f32,
    pub chunks: Vec<ChunkHit>,
    pub source_sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub doc_id: String,
    pub finding_id: String,
    pub chunk_id: String,
    pub page: Option<i64>,
    pub start_line: Option<i64>,
    pub end_line: Option<i64>,
    pub section: Section,
}

impl Citation {
    /// Inline citation tag: `[doc_id:page:start-end]`, `-` for absent fields.
    pub fn tag(&self) -> String {
        let page = self.page.map_or_else(|| "-".to_string(), |p| p.to_string());
        let start = self
            .start_line
            .map_or_else(|| "-".to_string(), |l| l.to_string());
        let end = self
            .end_line
            .map_or_else(|| "-".to_string(), |l| l.to_string());
        format!("[{}:{}:{}-{}]", self.doc_id, page, start, end)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextData {
    pub packed_text: String,
    pub citations: Vec<Citation>,
}

/// The single value threaded through the pipeline. Created at request entry,
/// mutated only by the stage currently executing, discarded after the answer
/// is returned.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub raw_query: String,
    pub normalized_query: String,
    pub intent: Intent,
    pub slots: Slots,
    pub expansion: Option<Expansion>,
    pub route: Option<Route>,
    pub target_doc_ids: Option<Vec<String>>,
    pub keyword_freq: Option<HashMap<String, u64>>,
    pub keyword_block_counts: HashMap<String, usize>,
    pub findings: Vec<FindingHit>,
    pub section_groups: BTreeMap<Section, Vec<ChunkHit>>,
    pub block_ranking: Vec<RankedBlock>,
    pub excluded_blocks: Vec<RankedBlock>,
    pub context: ContextData,
    pub answer: Option<String>,
    pub error: Option<String>,
    pub lexical_degraded: bool,
    pub vector_degraded: bool,
    pub llm_degraded: bool,
    pub deadline_hit: bool,
}

impl QueryContext {
    pub fn new(raw_query: &str) -> Self {
        Self {
            raw_query: raw_query.to_string(),
            ..Self::default()
        }
    }

    /// Sections that stage-2 must cover: those with explicit hints, else both
    /// primary sections.
    pub fn required_sections(&self) -> Vec<Section> {
        let hinted: Vec<Section> = Section::PRIMARY
            .into_iter()
            .filter(|s| {
                self.slots
                    .section_hints
                    .get(s)
                    .is_some_and(|hints| !hints.is_empty())
            })
            .collect();
        if hinted.is_empty() {
            Section::PRIMARY.to_vec()
        } else {
            hinted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_citation_tag_full() {
        let cite = Citation {
            doc_id: "2025(상)-1-(23)".to_string(),
            finding_id: "F-001".to_string(),
            chunk_id: "C-001".to_string(),
            page: Some(12),
            start_line: Some(340),
            end_line: Some(361),
            section: Section::Findings,
        };
        assert_eq!(cite.tag(), "[2025(상)-1-(23):12:340-361]");
    }

    #[test]
    fn test_citation_tag_missing_fields() {
        let cite = Citation {
            doc_id: "D1".to_string(),
            finding_id: "F1".to_string(),
            chunk_id: "C1".to_string(),
            page: None,
            start_line: None,
            end_line: None,
            section: Section::Technique,
        };
        assert_eq!(cite.tag(), "[D1:-:---]");
    }

    #[test]
    fn test_section_label_round_trip() {
        for section in [
            Section::Findings,
            Section::Technique,
            Section::TaxationLogic,
            Section::EvidenceRisk,
        ] {
            assert_eq!(Section::from_label(section.label()), Some(section));
        }
        assert_eq!(Section::from_label("없는섹션"), None);
    }

    #[test]
    fn test_section_presentation_order() {
        let mut sections = vec![
            Section::Findings,
            Section::EvidenceRisk,
            Section::Technique,
            Section::TaxationLogic,
        ];
        sections.sort();
        assert_eq!(
            sections,
            vec![
                Section::Technique,
                Section::TaxationLogic,
                Section::EvidenceRisk,
                Section::Findings,
            ]
        );
    }

    #[test]
    fn test_expansion_keyword_roles() {
        let exp = Expansion {
            must_have: vec!["합병법인".into(), "미환류소득".into(), "대리납부".into()],
            ..Expansion::default()
        };
        assert_eq!(exp.doc_level_keyword(), Some("합병법인"));
        assert_eq!(
            exp.block_level_keywords(),
            &["미환류소득".to_string(), "대리납부".to_string()]
        );

        let single = Expansion {
            must_have: vec!["접대비".into()],
            ..Expansion::default()
        };
        assert_eq!(single.doc_level_keyword(), None);
        assert_eq!(single.block_level_keywords(), &["접대비".to_string()]);
    }

    #[test]
    fn test_required_sections_default_and_hinted() {
        let ctx = QueryContext::new("질의");
        assert_eq!(ctx.required_sections(), Section::PRIMARY.to_vec());

        let mut hinted = QueryContext::new("질의");
        hinted
            .slots
            .section_hints
            .insert(Section::Technique, vec!["조사기법".into()]);
        assert_eq!(hinted.required_sections(), vec![Section::Technique]);
    }
}
