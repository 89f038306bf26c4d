use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use petgraph::graph::{DiGraph, NodeIndex};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::QueryCoreConfig;
use crate::data_model::DataModel;
use crate::errors::QueryCoreResult;
use crate::llm::{ChatMessage, ChatModel, ChatParams, EmbeddingModel};
use crate::search::local::LocalSearch;
use crate::vector_store::VectorStore;

use super::SearchResult;

/// A node in the DRIFT action graph: a sub-question, its answer (once resolved),
/// its score, and the follow-up questions it spawned. Grounded on `DriftAction`
/// (`query`, `answer`, `follow_ups`, `is_complete`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftAction {
    pub query: String,
    pub answer: Option<String>,
    pub score: Option<f64>,
    pub follow_ups: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl DriftAction {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), answer: None, score: None, follow_ups: Vec::new(), metadata: HashMap::new() }
    }

    pub fn is_complete(&self) -> bool {
        self.answer.is_some()
    }
}

#[derive(Deserialize)]
struct DriftStepResponse {
    response: Option<String>,
    score: Option<f64>,
    follow_up_queries: Option<Vec<String>>,
}

/// Shape of a primer fold's decompose response -- distinct from `DriftStepResponse`
/// because the primer prompt asks for `intermediate_answer`, not `response`.
#[derive(Deserialize)]
struct PrimerFoldResponse {
    intermediate_answer: Option<String>,
    score: Option<f64>,
    follow_up_queries: Option<Vec<String>>,
}

/// Directed action graph over `DriftAction` nodes, edges encoding parent->child
/// refinement. Backed by `petgraph::DiGraph` rather than `networkx.MultiDiGraph`
/// (petgraph is already a teacher dependency, via `graph_rag`'s entity resolution).
pub struct QueryState {
    pub graph: DiGraph<DriftAction, f64>,
    index_by_query: HashMap<String, NodeIndex>,
}

impl Default for QueryState {
    fn default() -> Self {
        Self { graph: DiGraph::new(), index_by_query: HashMap::new() }
    }
}

impl QueryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_action(&mut self, action: DriftAction, parent: Option<NodeIndex>) -> NodeIndex {
        let query = action.query.clone();
        let idx = self.graph.add_node(action);
        self.index_by_query.insert(query, idx);
        if let Some(parent) = parent {
            self.graph.add_edge(parent, idx, 1.0);
        }
        idx
    }

    pub fn add_all_follow_ups(&mut self, parent: NodeIndex, follow_ups: &[String]) {
        for follow_up in follow_ups {
            if self.index_by_query.contains_key(follow_up) {
                continue;
            }
            self.add_action(DriftAction::new(follow_up.clone()), Some(parent));
        }
    }

    pub fn find_incomplete_actions(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&i| !self.graph[i].is_complete())
            .collect()
    }

    /// Ranks incomplete actions by stored score descending, or shuffles when no
    /// action has a score yet (spec.md §4.7 point 4).
    pub fn rank_incomplete_actions(&self) -> Vec<NodeIndex> {
        let mut incomplete = self.find_incomplete_actions();
        if incomplete.iter().any(|&i| self.graph[i].score.is_some()) {
            incomplete.sort_by(|&a, &b| {
                let sa = self.graph[a].score.unwrap_or(f64::NEG_INFINITY);
                let sb = self.graph[b].score.unwrap_or(f64::NEG_INFINITY);
                sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
            });
        } else {
            incomplete.shuffle(&mut rand::thread_rng());
        }
        incomplete
    }

    pub fn complete_count(&self) -> usize {
        self.graph.node_indices().filter(|&i| self.graph[i].is_complete()).count()
    }

    pub fn serialize(&self) -> serde_json::Value {
        let nodes: Vec<_> = self
            .graph
            .node_indices()
            .map(|i| {
                let idx = i.index();
                let action = &self.graph[i];
                json!({
                    "id": idx,
                    "query": action.query,
                    "answer": action.answer,
                    "score": action.score,
                })
            })
            .collect();
        let edges: Vec<_> = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                self.graph.edge_endpoints(e).map(|(a, b)| json!({"source": a.index(), "target": b.index()}))
            })
            .collect();
        json!({"nodes": nodes, "edges": edges})
    }
}

/// Iterative, tree-structured refinement for open-ended questions (spec.md §4.7),
/// grounded on `DRIFTSearch.asearch`/`PrimerQueryProcessor`/`DRIFTPrimer`.
pub struct DriftSearch {
    pub chat: Arc<dyn ChatModel>,
    pub embedder: Arc<dyn EmbeddingModel>,
    pub report_vector_store: Arc<dyn VectorStore>,
    pub local_search: Arc<LocalSearch>,
    pub config: QueryCoreConfig,
}

impl DriftSearch {
    pub async fn search(&self, query: &str, data_model: &DataModel) -> QueryCoreResult<SearchResult> {
        let start = Instant::now();
        let mut state = QueryState::new();
        let mut llm_calls = 0u32;

        // Primer step 1: HyDE -- mirror the style of a random community report.
        let reports: Vec<_> = data_model.community_reports.values().cloned().collect();
        let style_template = reports
            .choose(&mut rand::thread_rng())
            .map(|r| r.full_content.clone())
            .unwrap_or_default();
        let hyde_prompt = format!(
            "Write a hypothetical answer to the question below, in the style of the \
             following example, without inventing new named entities.\n\nExample style:\n{style_template}\n\nQuestion: {query}"
        );
        let hyde_text = self
            .chat
            .generate(&[ChatMessage::user(hyde_prompt)], &ChatParams::default())
            .await
            .unwrap_or_default();
        llm_calls += 1;

        let hyde_embedding = self.embedder.embed(&hyde_text).await?;
        let top_reports = self
            .report_vector_store
            .similar_by_vector(&hyde_embedding, self.config.search_primer_k, None)
            .await?;
        let top_report_ids: std::collections::HashSet<String> =
            top_reports.into_iter().map(|s| s.id).collect();
        let primer_reports: Vec<_> = reports
            .iter()
            .filter(|r| top_report_ids.contains(&r.id.0))
            .cloned()
            .collect();

        // Primer step 2: split into folds, decompose concurrently.
        let fold_count = self.config.primer_folds.max(1).min(primer_reports.len().max(1));
        let mut folds: Vec<Vec<_>> = vec![Vec::new(); fold_count];
        for (i, report) in primer_reports.iter().enumerate() {
            folds[i % fold_count].push(report.clone());
        }

        let decompose_futures = folds.into_iter().filter(|f| !f.is_empty()).map(|fold| {
            let chat = self.chat.clone();
            let query = query.to_string();
            async move {
                let context = fold.iter().map(|r| r.full_content.clone()).collect::<Vec<_>>().join("\n\n");
                let prompt = format!(
                    "Decompose the question into an intermediate answer, a confidence score \
                     (0-100), and follow-up sub-questions, grounded only in the reports below. \
                     Respond as JSON: {{\"intermediate_answer\": str, \"score\": number, \"follow_up_queries\": [str]}}\n\n\
                     Question: {query}\n\n---Reports---\n{context}"
                );
                let params = ChatParams { response_format: Some("json_object".to_string()), ..Default::default() };
                chat.generate(&[ChatMessage::user(prompt)], &params).await
            }
        });
        let fold_results = join_all(decompose_futures).await;
        llm_calls += fold_results.len() as u32;

        let mut intermediate_answers = Vec::new();
        let mut follow_ups: Vec<String> = Vec::new();
        let mut scores = Vec::new();
        for result in fold_results.into_iter().flatten() {
            if let Ok(parsed) = serde_json::from_str::<PrimerFoldResponse>(&result) {
                if let Some(answer) = parsed.intermediate_answer {
                    intermediate_answers.push(answer);
                }
                if let Some(score) = parsed.score {
                    scores.push(score);
                }
                if let Some(fu) = parsed.follow_up_queries {
                    follow_ups.extend(fu);
                }
            }
        }
        follow_ups.sort();
        follow_ups.dedup();

        let mut root = DriftAction::new(query);
        root.answer = Some(intermediate_answers.join(" "));
        root.score = if scores.is_empty() { None } else { Some(scores.iter().sum::<f64>() / scores.len() as f64) };
        root.follow_ups = follow_ups.clone();
        let root_idx = state.add_action(root, None);
        state.add_all_follow_ups(root_idx, &follow_ups);

        // Main loop: rank incomplete actions, expand the top `search_primer_k` via
        // LocalSearch with `drift_query` anchoring each sub-question to the original.
        for _ in 0..self.config.drift_iterations {
            let incomplete = state.rank_incomplete_actions();
            if incomplete.is_empty() {
                break;
            }
            let batch: Vec<NodeIndex> = incomplete.into_iter().take(self.config.search_primer_k).collect();

            let step_futures = batch.iter().map(|&idx| {
                let sub_query = state.graph[idx].query.clone();
                let local_search = self.local_search.clone();
                let original_query = query.to_string();
                async move {
                    let result = local_search
                        .search(&sub_query, data_model, None, Some(&original_query), 4000)
                        .await;
                    (idx, result)
                }
            });
            let results = join_all(step_futures).await;
            llm_calls += results.len() as u32;

            for (idx, result) in results {
                let response_text = match result {
                    Ok(r) => r.response,
                    Err(_) => String::new(),
                };
                let (answer, score, step_follow_ups) = match serde_json::from_str::<DriftStepResponse>(&response_text) {
                    Ok(parsed) => (
                        parsed.response.unwrap_or_default(),
                        parsed.score,
                        parsed.follow_up_queries.unwrap_or_default(),
                    ),
                    Err(_) => (response_text, None, Vec::new()),
                };
                state.graph[idx].answer = Some(answer);
                state.graph[idx].score = score;
                state.graph[idx].follow_ups = step_follow_ups.clone();
                state.add_all_follow_ups(idx, &step_follow_ups);
            }
        }

        Ok(SearchResult {
            response: state.serialize().to_string(),
            context_records: HashMap::new(),
            context_text: String::new(),
            completion_time_seconds: start.elapsed().as_secs_f64(),
            llm_calls,
            prompt_tokens: 0,
            output_tokens: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_all_follow_ups_dedupes_repeated_queries() {
        let mut state = QueryState::new();
        let root = state.add_action(DriftAction::new("root"), None);
        state.add_all_follow_ups(root, &["a".to_string(), "b".to_string()]);
        state.add_all_follow_ups(root, &["a".to_string(), "c".to_string()]);
        assert_eq!(state.graph.node_count(), 4);
        assert_eq!(state.find_incomplete_actions().len(), 3);
    }

    #[test]
    fn rank_incomplete_actions_sorts_by_score_descending_when_scored() {
        let mut state = QueryState::new();
        let mut low = DriftAction::new("low");
        low.score = Some(10.0);
        let mut high = DriftAction::new("high");
        high.score = Some(90.0);
        let low_idx = state.add_action(low, None);
        let high_idx = state.add_action(high, None);
        assert_eq!(state.rank_incomplete_actions(), vec![high_idx, low_idx]);
    }

    #[test]
    fn rank_incomplete_actions_shuffles_when_unscored() {
        let mut state = QueryState::new();
        let a = state.add_action(DriftAction::new("a"), None);
        let b = state.add_action(DriftAction::new("b"), None);
        let ranked = state.rank_incomplete_actions();
        assert_eq!(ranked.len(), 2);
        assert!(ranked.contains(&a) && ranked.contains(&b));
    }

    #[test]
    fn complete_count_reflects_answered_actions_only() {
        let mut state = QueryState::new();
        let mut answered = DriftAction::new("q1");
        answered.answer = Some("a1".to_string());
        state.add_action(answered, None);
        state.add_action(DriftAction::new("q2"), None);
        assert_eq!(state.complete_count(), 1);
    }
}
