use std::sync::Arc;

use crate::citation::extract_citations;
use crate::data_model::{ConversationHistory, DataModel};
use crate::errors::{QueryCoreError, QueryCoreResult};
use crate::search::drift::DriftSearch;
use crate::search::global::GlobalSearch;
use crate::search::local::LocalSearch;
use crate::search::SearchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Local,
    Global,
    Drift,
}

impl Strategy {
    /// Strict parsing (spec.md §4.8): only the three named strategies are accepted.
    pub fn parse(s: &str) -> QueryCoreResult<Self> {
        match s {
            "local" => Ok(Strategy::Local),
            "global" => Ok(Strategy::Global),
            "drift" => Ok(Strategy::Drift),
            other => Err(QueryCoreError::Config(format!("unknown search engine: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratedResponse {
    pub result: SearchResult,
    pub citations: std::collections::HashMap<String, Vec<String>>,
}

/// Strategy selection, immutable conversation-history handling, and citation
/// extraction (spec.md §4.8). The engine consumes `ConversationHistory` by shared
/// reference only -- it is never mutated.
pub struct Orchestrator {
    pub local: Arc<LocalSearch>,
    pub global: Arc<GlobalSearch>,
    pub drift: Arc<DriftSearch>,
}

impl Orchestrator {
    pub fn new(local: Arc<LocalSearch>, global: Arc<GlobalSearch>, drift: Arc<DriftSearch>) -> Self {
        Self { local, global, drift }
    }

    pub async fn query(
        &self,
        engine: &str,
        query: &str,
        data_model: &DataModel,
        conversation_history: Option<&ConversationHistory>,
        max_context_tokens: usize,
    ) -> QueryCoreResult<OrchestratedResponse> {
        let strategy = Strategy::parse(engine)?;
        let result = match strategy {
            Strategy::Local => {
                self.local
                    .search(query, data_model, conversation_history, None, max_context_tokens)
                    .await?
            }
            Strategy::Global => self.global.search(query, data_model).await?,
            Strategy::Drift => self.drift.search(query, data_model).await?,
        };
        let citations = extract_citations(&result.response);
        Ok(OrchestratedResponse { result, citations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_parsing_is_strict() {
        assert!(Strategy::parse("local").is_ok());
        assert!(Strategy::parse("LOCAL").is_err());
        assert!(Strategy::parse("bogus").is_err());
    }
}
