pub mod drift;
pub mod global;
pub mod local;

use std::collections::HashMap;

use serde_json::Value;

/// Common result shape for all three strategies (spec.md §6), grounded on the
/// `SearchResult` dataclass returned by every structured-search implementation.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SearchResult {
    pub response: String,
    /// `{reports, entities, relationships, claims, sources} -> list-of-row-records`.
    pub context_records: HashMap<String, Value>,
    /// The exact prompt blocks fed to the model, for audit.
    pub context_text: String,
    pub completion_time_seconds: f64,
    pub llm_calls: u32,
    pub prompt_tokens: u32,
    pub output_tokens: u32,
}

/// One event of a streamed search. The context payload is always emitted exactly
/// once, strictly before the first response token (spec.md §4.5, §8 invariant 6).
#[derive(Debug, Clone)]
pub enum SearchEvent {
    Context(HashMap<String, Value>),
    Token(String),
}
