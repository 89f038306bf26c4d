use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Semaphore;

use crate::config::QueryCoreConfig;
use crate::context_packer::pack_batched;
use crate::data_model::DataModel;
use crate::errors::QueryCoreResult;
use crate::llm::{ChatMessage, ChatModel, ChatParams};
use crate::token_counter::TokenCounter;

use super::SearchResult;

pub const MAP_SYSTEM_PROMPT: &str =
    "You are a helpful assistant responding to questions about data in the tables provided.";

pub const MAP_USER_PROMPT_TEMPLATE: &str = "\
Generate a response consisting of a list of key points that responds to the user's \
question, summarizing all relevant information in the input data tables.

Each key point must have a Description and an Importance Score (0-100). The response \
MUST be JSON formatted as follows:
{{\"points\": [{{\"description\": \"...\", \"score\": score_value}}]}}

user question: {question}

---Data tables---
{context_data}";

pub const REDUCE_SYSTEM_PROMPT: &str = "\
You are a helpful assistant responding to a question using a list of reports ranked by \
helpfulness, generated by analysts who each focused on a different part of the dataset. \
Synthesize the reports into a single {response_type} answer, removing irrelevant \
information and merging insights. {grounding_rule}";

/// Appended to `REDUCE_SYSTEM_PROMPT` when `allow_general_knowledge` is `false`
/// (the default, matching `GlobalSearchEngine(allow_general_knowledge=False)`).
const GROUNDED_ONLY_RULE: &str = "\
Do not include information not supported by the reports. If the reports provide no \
relevant information, respond with exactly this sentence and nothing else: \
\"{no_data_answer}\"";

/// Appended instead when `allow_general_knowledge` is `true`: the model may
/// supplement the reports with its own knowledge.
const GENERAL_KNOWLEDGE_RULE: &str = "\
You may supplement the reports with general knowledge where they are insufficient, but \
prefer the reports whenever they conflict with it.";

/// Fixed refusal returned when the reduce step has no report data to work from and
/// `allow_general_knowledge` is `false`. In that case the model is never called.
pub const NO_DATA_ANSWER: &str =
    "I am unable to answer this question using the data currently available.";

#[derive(Debug, Deserialize)]
struct MapPoint {
    description: String,
    score: i32,
}

#[derive(Debug, Deserialize)]
struct MapPoints {
    points: Vec<MapPoint>,
}

struct MapBatchResult {
    points: Vec<MapPoint>,
    llm_calls: u32,
    prompt_tokens: u32,
}

/// Map/reduce over community-report batches with bounded concurrency (spec.md §4.6),
/// grounded on `GlobalSearch.asearch`/`_map_response_single_batch`/`_reduce_response`,
/// with the JSON `{"points": [...]}` schema from `map_system_prompt.py` authoritative
/// over that file's older `ranking_delimiter` string-split format.
pub struct GlobalSearch {
    pub chat: Arc<dyn ChatModel>,
    pub token_counter: Arc<dyn TokenCounter>,
    pub config: QueryCoreConfig,
    pub response_type: String,
}

impl GlobalSearch {
    pub fn new(chat: Arc<dyn ChatModel>, token_counter: Arc<dyn TokenCounter>, config: QueryCoreConfig) -> Self {
        Self { chat, token_counter, config, response_type: "multiple paragraphs".to_string() }
    }

    pub async fn search(&self, query: &str, data_model: &DataModel) -> QueryCoreResult<SearchResult> {
        let start = Instant::now();

        let all_reports: Vec<_> = data_model.community_reports.values().cloned().collect();
        if all_reports.is_empty() {
            // S1: empty graph issues zero LLM calls for the map phase.
            return Ok(SearchResult {
                response: String::new(),
                context_records: HashMap::new(),
                context_text: String::new(),
                completion_time_seconds: start.elapsed().as_secs_f64(),
                llm_calls: 0,
                prompt_tokens: 0,
                output_tokens: 0,
            });
        }

        // Build community context as a LIST of chunks (not a single blob).
        let columns = ["id", "title", "content"];
        let rows: Vec<(String, Vec<String>)> = all_reports
            .iter()
            .map(|r| (r.id.0.clone(), vec![r.short_id.clone(), r.title.clone(), r.full_content.clone()]))
            .collect();
        let batches = pack_batched("Reports", &columns, &rows, self.config.max_data_tokens, self.token_counter.as_ref(), "|");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrent_coroutines));
        let map_futures = batches.into_iter().map(|batch| {
            let semaphore = semaphore.clone();
            let chat = self.chat.clone();
            let token_counter = self.token_counter.clone();
            let query = query.to_string();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                Self::map_single_batch(chat.as_ref(), token_counter.as_ref(), &batch.text, &query).await
            }
        });
        let map_results: Vec<MapBatchResult> = join_all(map_futures).await;

        let map_llm_calls: u32 = map_results.iter().map(|r| r.llm_calls).sum();
        let map_prompt_tokens: u32 = map_results.iter().map(|r| r.prompt_tokens).sum();

        // Flatten, drop score == 0, sort by score descending -- scheduling-order invariant.
        let mut all_points: Vec<MapPoint> = map_results.into_iter().flat_map(|r| r.points).collect();
        all_points.retain(|p| p.score > 0);
        all_points.sort_by(|a, b| b.score.cmp(&a.score));

        let mut blocks = Vec::new();
        let mut used = 0usize;
        for (i, point) in all_points.iter().enumerate() {
            let block = format!("-----Analyst {}-----\nHelpfulness Score: {}\n{}", i + 1, point.score, point.description);
            let cost = self.token_counter.count(&block);
            if used + cost > self.config.max_data_tokens {
                break;
            }
            blocks.push(block);
            used += cost;
        }
        let reduce_context_text = blocks.join("\n\n");

        let grounding_rule = if self.config.allow_general_knowledge {
            GENERAL_KNOWLEDGE_RULE.to_string()
        } else {
            GROUNDED_ONLY_RULE.replace("{no_data_answer}", NO_DATA_ANSWER)
        };
        let reduce_system_prompt = REDUCE_SYSTEM_PROMPT
            .replace("{response_type}", &self.response_type)
            .replace("{grounding_rule}", &grounding_rule);

        // When there is no report data and the engine isn't allowed to fall back to
        // general knowledge, skip the reduce call entirely and return the fixed
        // no-data answer -- this must not be counted as an LLM call.
        let (response, reduce_llm_calls, reduce_prompt_tokens) =
            if reduce_context_text.trim().is_empty() && !self.config.allow_general_knowledge {
                (NO_DATA_ANSWER.to_string(), 0u32, 0u32)
            } else {
                let messages = vec![
                    ChatMessage::system(format!("{reduce_system_prompt}\n\n---Reports---\n{reduce_context_text}")),
                    ChatMessage::user(query),
                ];
                let params = ChatParams { max_tokens: Some(1500), temperature: Some(0.0), ..Default::default() };
                let response = self.chat.generate(&messages, &params).await.unwrap_or_default();
                (response, 1u32, self.token_counter.count(&reduce_system_prompt) as u32)
            };

        let mut context_records = HashMap::new();
        context_records.insert("reports".to_string(), json!(all_points.iter().map(|p| &p.description).collect::<Vec<_>>()));

        Ok(SearchResult {
            response,
            context_records,
            context_text: reduce_context_text.clone(),
            completion_time_seconds: start.elapsed().as_secs_f64(),
            llm_calls: map_llm_calls + reduce_llm_calls,
            prompt_tokens: map_prompt_tokens + reduce_prompt_tokens,
            output_tokens: 0,
        })
    }

    async fn map_single_batch(
        chat: &dyn ChatModel,
        token_counter: &dyn TokenCounter,
        context_data: &str,
        query: &str,
    ) -> MapBatchResult {
        let user_prompt = MAP_USER_PROMPT_TEMPLATE
            .replace("{question}", query)
            .replace("{context_data}", context_data);
        let messages = vec![ChatMessage::system(MAP_SYSTEM_PROMPT), ChatMessage::user(user_prompt.clone())];
        let params = ChatParams {
            max_tokens: Some(500),
            temperature: Some(0.0),
            response_format: Some("json_object".to_string()),
            ..Default::default()
        };
        let prompt_tokens = token_counter.count(&user_prompt) as u32;

        match chat.generate(&messages, &params).await {
            Ok(text) => match serde_json::from_str::<MapPoints>(&text) {
                Ok(parsed) => MapBatchResult { points: parsed.points, llm_calls: 1, prompt_tokens },
                Err(e) => {
                    // Parse failure degrades to an empty point list with a diagnostic,
                    // never fails the whole query (spec.md §4.6 point 3 / §7 ParseError).
                    tracing::warn!(error = %e, "global search map response failed to parse as JSON");
                    MapBatchResult { points: Vec::new(), llm_calls: 1, prompt_tokens }
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "global search map llm call failed");
                MapBatchResult { points: Vec::new(), llm_calls: 1, prompt_tokens }
            }
        }
    }
}
