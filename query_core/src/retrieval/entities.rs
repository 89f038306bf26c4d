use std::collections::HashSet;

use crate::data_model::{DataModel, Entity};
use crate::errors::QueryCoreResult;
use crate::llm::EmbeddingModel;
use crate::vector_store::VectorStore;

/// `MapQueryToEntities` (spec.md §4.3): embed the query, retrieve `k*oversample_scaler`
/// candidates from the entity vector store, resolve to full entities by id, drop
/// excluded titles, then prepend entities forced in by name. If `query` is empty,
/// skip retrieval entirely and return the top-`k` entities by rank descending.
pub async fn map_query_to_entities(
    query: &str,
    data_model: &DataModel,
    vector_store: &dyn VectorStore,
    embedder: &dyn EmbeddingModel,
    k: usize,
    oversample_scaler: usize,
    include_names: &[String],
    exclude_names: &[String],
) -> QueryCoreResult<Vec<Entity>> {
    let exclude: HashSet<&str> = exclude_names.iter().map(|s| s.as_str()).collect();

    let matched_entities: Vec<Entity> = if query.trim().is_empty() {
        let mut all: Vec<&Entity> = data_model.entities.values().collect();
        all.sort_by(|a, b| b.rank.cmp(&a.rank));
        all.into_iter()
            .filter(|e| !exclude.contains(e.title.as_str()))
            .take(k)
            .cloned()
            .collect()
    } else {
        let candidates = vector_store
            .similar_by_text(query, k * oversample_scaler.max(1), None, embedder)
            .await?;
        let mut resolved = Vec::with_capacity(candidates.len());
        for c in candidates {
            if let Some(entity) = data_model.entities.get(&c.id.clone().into()) {
                if !exclude.contains(entity.title.as_str()) {
                    resolved.push(entity.clone());
                }
            }
        }
        resolved
    };

    let mut seen: HashSet<String> = matched_entities.iter().map(|e| e.title.clone()).collect();
    let mut included_entities = Vec::new();
    for name in include_names {
        if seen.contains(name) {
            continue;
        }
        if let Some(entity) = data_model.entity_by_title(name) {
            included_entities.push(entity.clone());
            seen.insert(name.clone());
        }
    }

    included_entities.extend(matched_entities);
    Ok(included_entities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::{Community, Covariate, CommunityReport, EntityId, Relationship, TextUnit};
    use crate::vector_store::InMemoryVectorStore;
    use async_trait::async_trait;

    struct StubEmbedder;

    #[async_trait]
    impl EmbeddingModel for StubEmbedder {
        async fn embed(&self, _text: &str) -> QueryCoreResult<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    fn entity(id: &str, title: &str, rank: i64) -> Entity {
        Entity {
            id: EntityId(id.to_string()),
            short_id: id.to_string(),
            title: title.to_string(),
            entity_type: None,
            description: None,
            description_embedding: None,
            community_ids: vec![],
            text_unit_ids: vec![],
            rank,
            attributes: Default::default(),
        }
    }

    fn empty_model(entities: Vec<Entity>) -> DataModel {
        DataModel::build(entities, vec![], vec![], vec![], vec![], vec![]).unwrap()
    }

    #[tokio::test]
    async fn empty_query_falls_back_to_rank_order() {
        let model = empty_model(vec![entity("1", "Alice", 5), entity("2", "Bob", 9)]);
        let store = InMemoryVectorStore::new();
        let result = map_query_to_entities("", &model, &store, &StubEmbedder, 1, 2, &[], &[])
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].title, "Bob");
    }

    #[tokio::test]
    async fn included_names_are_prepended() {
        let model = empty_model(vec![entity("1", "Alice", 5), entity("2", "Bob", 9)]);
        let store = InMemoryVectorStore::new();
        let result = map_query_to_entities(
            "",
            &model,
            &store,
            &StubEmbedder,
            1,
            2,
            &["Alice".to_string()],
            &[],
        )
        .await
        .unwrap();
        assert_eq!(result[0].title, "Alice");
        assert_eq!(result[1].title, "Bob");
    }

    #[allow(dead_code)]
    fn _unused(_: Relationship, _: Covariate, _: TextUnit, _: CommunityReport, _: Community) {}
}
