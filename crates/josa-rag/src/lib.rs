//! josa-rag: hybrid-retrieval question answering over Korean tax-audit case
//! documents.
//!
//! The crate is a single query pipeline: normalize → parse → expand → route,
//! then two-stage hybrid retrieval (lexical + vector fused with RRF),
//! section-aware block promotion, context packing, and LLM answer
//! composition with cascading fallbacks when any collaborator is down.

pub mod clients;
pub mod config;
pub mod engine;
pub mod pipeline;
pub mod retrieval;
pub mod types;

// Re-export primary types for convenience
pub use config::AgentConfig;
pub use engine::AgentEngine;
pub use types::{
    ChunkHit, Citation, Expansion, FindingHit, Intent, QueryContext, RankedBlock, Route, Section,
    Slots,
};

// Re-export common types
pub use anyhow::{Error, Result};
