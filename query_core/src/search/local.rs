use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::BoxStream;
use serde_json::json;

use crate::citation::CITATION_KINDS;
use crate::config::QueryCoreConfig;
use crate::context_packer::{
    build_community_context, build_covariate_context, build_entity_context,
    build_relationship_context, build_text_unit_context, compute_community_weights,
};
use crate::data_model::{ConversationHistory, DataModel};
use crate::errors::QueryCoreResult;
use crate::llm::{ChatMessage, ChatModel, ChatParams, EmbeddingModel};
use crate::retrieval::{map_query_to_entities, select_relationships};
use crate::token_counter::TokenCounter;
use crate::vector_store::VectorStore;

use super::{SearchEvent, SearchResult};

pub const LOCAL_SEARCH_SYSTEM_PROMPT: &str = "\
---Role---
You are a helpful assistant responding to questions about data in the tables provided.

---Context---
{context}

---Goal---
Generate a response of the target length and format ({response_type}) that responds to \
the user's question, summarizing all information in the input context tables appropriate \
for the response length and format. Points supported by data should list their data \
references, e.g. \"[Data: Entities (1, 2, 3)]\". Do not fabricate information not present \
in the context; if the context is empty, say so.";

/// System prompt used when `LocalSearch` answers a DRIFT sub-question. Unlike the
/// plain-text `LOCAL_SEARCH_SYSTEM_PROMPT`, this instructs a JSON response so
/// `DriftSearch` can parse out a follow-up score and the next round's sub-questions
/// (spec.md §4.7 DRIFT step contract).
pub const DRIFT_LOCAL_SEARCH_SYSTEM_PROMPT: &str = "\
---Role---
You are a helpful assistant answering a sub-question that supports investigation of a \
larger overall question, using data in the tables provided.

---Context---
{context}

---Overall question being investigated---
{drift_query}

---Goal---
Answer the sub-question using only the context tables above, citing data references the \
same way as \"[Data: Entities (1, 2, 3)]\" where supported. Then rate how completely your \
answer resolves the overall question on a 0-100 scale, and propose follow-up sub-questions \
that would help investigate the overall question further. Respond with a single JSON object \
of the form {\"response\": string, \"score\": number, \"follow_up_queries\": [string, ...]} \
and nothing else.";

/// Single-query, single-LLM-call search (spec.md §4.5), grounded on
/// `LocalSearch.asearch`/`astream_search`. `drift_query` is a first-class parameter
/// (per spec.md's Design Notes) rather than a side-channel kwarg -- DRIFTSearch passes
/// the original user question through it so sub-question answers stay anchored.
pub struct LocalSearch {
    pub chat: Arc<dyn ChatModel>,
    pub embedder: Arc<dyn EmbeddingModel>,
    pub vector_store: Arc<dyn VectorStore>,
    pub token_counter: Arc<dyn TokenCounter>,
    pub config: QueryCoreConfig,
    pub system_prompt: String,
    pub response_type: String,
}

struct BuiltContext {
    context_text: String,
    context_records: HashMap<String, serde_json::Value>,
}

impl LocalSearch {
    pub fn new(
        chat: Arc<dyn ChatModel>,
        embedder: Arc<dyn EmbeddingModel>,
        vector_store: Arc<dyn VectorStore>,
        token_counter: Arc<dyn TokenCounter>,
        config: QueryCoreConfig,
    ) -> Self {
        Self {
            chat,
            embedder,
            vector_store,
            token_counter,
            config,
            system_prompt: LOCAL_SEARCH_SYSTEM_PROMPT.to_string(),
            response_type: "multiple paragraphs".to_string(),
        }
    }

    async fn build_context(
        &self,
        query: &str,
        data_model: &DataModel,
        conversation_history: Option<&ConversationHistory>,
        max_context_tokens: usize,
    ) -> QueryCoreResult<BuiltContext> {
        // Conversation history is prepended to the semantic query ONLY -- the final
        // user message sent to Chat stays the original query (spec.md §9 Design Notes).
        let semantic_query = match conversation_history {
            Some(history) => {
                let prior = history.user_turns(self.config.conversation_history_max_turns).join("\n");
                if prior.is_empty() {
                    query.to_string()
                } else {
                    format!("{query}\n{prior}")
                }
            }
            None => query.to_string(),
        };

        let selected = map_query_to_entities(
            &semantic_query,
            data_model,
            self.vector_store.as_ref(),
            self.embedder.as_ref(),
            self.config.top_k_mapped_entities,
            2,
            &[],
            &[],
        )
        .await?;

        let community_budget =
            (max_context_tokens as f64 * self.config.community_prop).max(0.0) as usize;
        let text_unit_budget =
            (max_context_tokens as f64 * self.config.text_unit_prop).max(0.0) as usize;
        let local_budget = max_context_tokens
            .saturating_sub(community_budget)
            .saturating_sub(text_unit_budget);

        let all_reports: Vec<_> = data_model.community_reports.values().cloned().collect();
        let community_weights = self
            .config
            .include_community_weight
            .then(|| compute_community_weights(&all_reports, data_model, self.config.normalize_community_weight));
        let community_block = build_community_context(
            &selected,
            &all_reports,
            data_model,
            community_budget,
            self.token_counter.as_ref(),
            false,
            0.0,
            false,
            "Reports",
            community_weights.as_ref().map(|w| (w, "occurrence weight")),
        );

        // Entities get first call on the local budget; relationships and claims pack
        // into whatever remains, in that order -- a row-granular approximation of the
        // spec's entity-by-entity incremental commit that still guarantees the overall
        // block never exceeds `local_budget` (Testable Property 1).
        let entity_block = build_entity_context(
            &selected,
            local_budget,
            self.token_counter.as_ref(),
            true,
            "number of relationships",
        );
        let entity_tokens = self.token_counter.count(&entity_block.text);
        let relationship_budget = local_budget.saturating_sub(entity_tokens);
        let relationships = select_relationships(
            &selected,
            data_model,
            "rank",
            self.config.top_k_relationships,
        );
        let relationship_block =
            build_relationship_context(&relationships, relationship_budget, self.token_counter.as_ref(), true);
        let relationship_tokens = self.token_counter.count(&relationship_block.text);
        let covariate_budget = relationship_budget.saturating_sub(relationship_tokens);
        let covariate_block =
            build_covariate_context(&selected, data_model, covariate_budget, self.token_counter.as_ref());

        // Text-unit context: walk each selected entity's text units in order, dedupe,
        // and sort by (entity_order asc, num_relationships desc).
        let mut seen_text_units = std::collections::HashSet::new();
        let mut rows: Vec<(usize, usize, String, String)> = Vec::new(); // (entity_order, -num_rel, id, text)
        for (entity_order, entity) in selected.iter().enumerate() {
            for tid in &entity.text_unit_ids {
                if !seen_text_units.insert(tid.clone()) {
                    continue;
                }
                if let Some(unit) = data_model.text_unit(tid) {
                    let num_relationships = relationships
                        .iter()
                        .filter(|r| {
                            (r.source == entity.title || r.target == entity.title)
                                && r.text_unit_ids.contains(tid)
                        })
                        .count();
                    rows.push((entity_order, num_relationships, unit.id.0.clone(), unit.text.clone()));
                }
            }
        }
        rows.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1)));
        let text_unit_rows: Vec<(String, String)> =
            rows.into_iter().map(|(_, _, id, text)| (id, text)).collect();
        let text_unit_block =
            build_text_unit_context(&text_unit_rows, text_unit_budget, self.token_counter.as_ref());

        let context_text = [
            &community_block.text,
            &entity_block.text,
            &relationship_block.text,
            &covariate_block.text,
            &text_unit_block.text,
        ]
        .iter()
        .filter(|t| !t.trim().is_empty())
        .cloned()
        .cloned()
        .collect::<Vec<_>>()
        .join("\n\n");

        let mut context_records = HashMap::new();
        context_records.insert(
            "reports".to_string(),
            json!(community_block.rows.iter().map(|r| r.short_id.clone()).collect::<Vec<_>>()),
        );
        context_records.insert(
            "entities".to_string(),
            json!(entity_block.rows.iter().map(|e| e.short_id.clone()).collect::<Vec<_>>()),
        );
        context_records.insert(
            "relationships".to_string(),
            json!(relationship_block.rows.iter().map(|r| r.short_id.clone()).collect::<Vec<_>>()),
        );
        context_records.insert("claims".to_string(), json!(covariate_block.rows));
        context_records.insert("sources".to_string(), json!(text_unit_block.rows));
        let _ = CITATION_KINDS; // kinds are validated at the orchestrator boundary

        Ok(BuiltContext { context_text, context_records })
    }

    pub async fn search(
        &self,
        query: &str,
        data_model: &DataModel,
        conversation_history: Option<&ConversationHistory>,
        drift_query: Option<&str>,
        max_context_tokens: usize,
    ) -> QueryCoreResult<SearchResult> {
        let start = Instant::now();
        let built = self
            .build_context(query, data_model, conversation_history, max_context_tokens)
            .await?;

        let (prompt, response_format) = match drift_query {
            Some(global_query) => (
                DRIFT_LOCAL_SEARCH_SYSTEM_PROMPT
                    .replace("{context}", &built.context_text)
                    .replace("{drift_query}", global_query),
                Some("json_object".to_string()),
            ),
            None => (
                self.system_prompt
                    .replace("{context}", &built.context_text)
                    .replace("{response_type}", &self.response_type),
                None,
            ),
        };

        let messages = vec![ChatMessage::system(prompt.clone()), ChatMessage::user(query)];
        let params = ChatParams {
            max_tokens: Some(1500),
            temperature: Some(0.0),
            response_format,
            ..Default::default()
        };

        match self.chat.generate(&messages, &params).await {
            Ok(response) => {
                let prompt_tokens = self.token_counter.count(&prompt) as u32;
                let output_tokens = self.token_counter.count(&response) as u32;
                Ok(SearchResult {
                    response,
                    context_records: built.context_records,
                    context_text: built.context_text,
                    completion_time_seconds: start.elapsed().as_secs_f64(),
                    llm_calls: 1,
                    prompt_tokens,
                    output_tokens,
                })
            }
            Err(e) => {
                tracing::error!(error = %e, "local search llm call failed");
                Ok(SearchResult {
                    response: String::new(),
                    context_records: built.context_records,
                    context_text: built.context_text,
                    completion_time_seconds: start.elapsed().as_secs_f64(),
                    llm_calls: 1,
                    prompt_tokens: self.token_counter.count(&prompt) as u32,
                    output_tokens: 0,
                })
            }
        }
    }

    /// Yields the context-records payload first, then token deltas, without buffering
    /// the full model output (spec.md §4.5 streaming / §8 invariant 6).
    pub async fn stream_search(
        &self,
        query: &str,
        data_model: &DataModel,
        conversation_history: Option<&ConversationHistory>,
        max_context_tokens: usize,
    ) -> QueryCoreResult<BoxStream<'static, SearchEvent>> {
        let built = self
            .build_context(query, data_model, conversation_history, max_context_tokens)
            .await?;
        let prompt = self
            .system_prompt
            .replace("{context}", &built.context_text)
            .replace("{response_type}", &self.response_type);
        let messages = vec![ChatMessage::system(prompt), ChatMessage::user(query)];
        let params = ChatParams { max_tokens: Some(1500), temperature: Some(0.0), ..Default::default() };

        let token_stream = self.chat.stream_generate(&messages, &params).await?;
        let context_records = built.context_records;

        use futures::StreamExt;
        let stream = futures::stream::once(async move { SearchEvent::Context(context_records) })
            .chain(token_stream.map(|chunk| SearchEvent::Token(chunk.unwrap_or_default())));
        Ok(Box::pin(stream))
    }
}
