use async_trait::async_trait;
use dashmap::DashMap;

use crate::data_model::Embedding;
use crate::errors::{QueryCoreError, QueryCoreResult};
use crate::llm::EmbeddingModel;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredId {
    pub id: String,
    /// `1 + cosine` convention: range [0, 2], higher is better.
    pub score: f32,
}

/// k-NN over a named embedding collection. `filter` is passed per-call (not installed
/// as mutable state) so a single store instance is safe to share across concurrent
/// queries -- per spec.md §4.2's requirement that the filter form be non-stateful.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn similar_by_vector(
        &self,
        vector: &[f32],
        k: usize,
        filter_ids: Option<&[String]>,
    ) -> QueryCoreResult<Vec<ScoredId>>;

    async fn similar_by_text(
        &self,
        text: &str,
        k: usize,
        filter_ids: Option<&[String]>,
        embedder: &dyn EmbeddingModel,
    ) -> QueryCoreResult<Vec<ScoredId>> {
        let vector = embedder.embed(text).await?;
        self.similar_by_vector(&vector, k, filter_ids).await
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// Brute-force, in-memory reference implementation -- used by tests and as the
/// deterministic backend spec.md's Design Notes call for ("a single VectorStore
/// interface, plus a deterministic in-memory implementation for tests").
#[derive(Default)]
pub struct InMemoryVectorStore {
    vectors: DashMap<String, Embedding>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, vector: Embedding) {
        self.vectors.insert(id.into(), vector);
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn similar_by_vector(
        &self,
        vector: &[f32],
        k: usize,
        filter_ids: Option<&[String]>,
    ) -> QueryCoreResult<Vec<ScoredId>> {
        if let Some(filter) = filter_ids {
            for id in filter {
                if !self.vectors.contains_key(id) {
                    // Filters reference ids the caller expects to exist; a mismatch is a
                    // data inconsistency, not a query failure, so we simply skip rather than error.
                    continue;
                }
            }
        }

        let mut scored: Vec<ScoredId> = self
            .vectors
            .iter()
            .filter(|entry| {
                filter_ids
                    .map(|ids| ids.iter().any(|id| id == entry.key()))
                    .unwrap_or(true)
            })
            .map(|entry| {
                if entry.value().len() != vector.len() && !vector.is_empty() && !entry.value().is_empty() {
                    tracing::warn!(
                        expected = vector.len(),
                        actual = entry.value().len(),
                        "embedding dimension mismatch in similarity search"
                    );
                }
                ScoredId {
                    id: entry.key().clone(),
                    score: 1.0 + cosine(vector, entry.value()),
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

pub fn require_same_dimension(a: &Embedding, b: &Embedding) -> QueryCoreResult<()> {
    if !a.is_empty() && !b.is_empty() && a.len() != b.len() {
        return Err(QueryCoreError::Data(format!(
            "embedding dimension mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ranks_by_cosine_similarity() {
        let store = InMemoryVectorStore::new();
        store.insert("a", vec![1.0, 0.0]);
        store.insert("b", vec![0.0, 1.0]);
        let results = store.similar_by_vector(&[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(results[0].id, "a");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn filter_ids_restricts_candidates() {
        let store = InMemoryVectorStore::new();
        store.insert("a", vec![1.0, 0.0]);
        store.insert("b", vec![0.0, 1.0]);
        let filter = vec!["b".to_string()];
        let results = store.similar_by_vector(&[1.0, 0.0], 2, Some(&filter)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "b");
    }
}
