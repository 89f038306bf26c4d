use crate::errors::{QueryCoreError, QueryCoreResult};

/// Runtime configuration for a `QueryEngine`, read the way `conhub_config::AppConfig::from_env`
/// reads service configuration: env vars with string defaults, collected once at startup.
#[derive(Debug, Clone)]
pub struct QueryCoreConfig {
    pub token_encoding: String,
    pub community_prop: f64,
    pub text_unit_prop: f64,
    pub top_k_mapped_entities: usize,
    pub top_k_relationships: usize,
    pub concurrent_coroutines: usize,
    pub max_data_tokens: usize,
    pub primer_folds: usize,
    pub search_primer_k: usize,
    pub drift_iterations: usize,
    pub conversation_history_max_turns: usize,
    /// Whether GlobalSearch's reduce step may fall back to the model's own
    /// knowledge when no report data supports an answer. Matches
    /// `GlobalSearchEngine`'s `allow_general_knowledge` construction parameter,
    /// which defaults to `false`.
    pub allow_general_knowledge: bool,
    /// Whether `build_community_context` renders a weight column.
    pub include_community_weight: bool,
    /// Whether that weight column is rescaled into `[0, max]` rather than left
    /// as a raw distinct-text-unit count.
    pub normalize_community_weight: bool,
}

impl Default for QueryCoreConfig {
    fn default() -> Self {
        Self {
            token_encoding: "cl100k_base".to_string(),
            community_prop: 0.25,
            text_unit_prop: 0.5,
            top_k_mapped_entities: 10,
            top_k_relationships: 10,
            concurrent_coroutines: 32,
            max_data_tokens: 8000,
            primer_folds: 5,
            search_primer_k: 3,
            drift_iterations: 2,
            conversation_history_max_turns: 5,
            allow_general_knowledge: false,
            include_community_weight: true,
            normalize_community_weight: true,
        }
    }
}

impl QueryCoreConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            token_encoding: std::env::var("QUERY_CORE_TOKEN_ENCODING")
                .unwrap_or(default.token_encoding),
            community_prop: std::env::var("QUERY_CORE_COMMUNITY_PROP")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.community_prop),
            text_unit_prop: std::env::var("QUERY_CORE_TEXT_UNIT_PROP")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.text_unit_prop),
            top_k_mapped_entities: std::env::var("QUERY_CORE_TOP_K_MAPPED_ENTITIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.top_k_mapped_entities),
            top_k_relationships: std::env::var("QUERY_CORE_TOP_K_RELATIONSHIPS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.top_k_relationships),
            concurrent_coroutines: std::env::var("QUERY_CORE_CONCURRENT_COROUTINES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.concurrent_coroutines),
            max_data_tokens: std::env::var("QUERY_CORE_MAX_DATA_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_data_tokens),
            primer_folds: std::env::var("QUERY_CORE_PRIMER_FOLDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.primer_folds),
            search_primer_k: std::env::var("QUERY_CORE_SEARCH_PRIMER_K")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.search_primer_k),
            drift_iterations: std::env::var("QUERY_CORE_DRIFT_ITERATIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.drift_iterations),
            conversation_history_max_turns: default.conversation_history_max_turns,
            allow_general_knowledge: std::env::var("QUERY_CORE_ALLOW_GENERAL_KNOWLEDGE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.allow_general_knowledge),
            include_community_weight: std::env::var("QUERY_CORE_INCLUDE_COMMUNITY_WEIGHT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.include_community_weight),
            normalize_community_weight: std::env::var("QUERY_CORE_NORMALIZE_COMMUNITY_WEIGHT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.normalize_community_weight),
        }
    }

    /// Validated at engine construction: community_prop + text_unit_prop must not exceed 1.0.
    pub fn validate(&self) -> QueryCoreResult<()> {
        if self.community_prop + self.text_unit_prop > 1.0 {
            return Err(QueryCoreError::Config(
                "community_prop + text_unit_prop must not exceed 1.0".to_string(),
            ));
        }
        if self.community_prop < 0.0 || self.text_unit_prop < 0.0 {
            return Err(QueryCoreError::Config(
                "community_prop and text_unit_prop must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}
