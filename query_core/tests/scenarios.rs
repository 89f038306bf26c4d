use std::sync::Arc;

use query_core::citation::extract_citations;
use query_core::config::QueryCoreConfig;
use query_core::data_model::{
    CommunityReport, CommunityReportId, DataModel, Entity, EntityId, Relationship,
    RelationshipId, TextUnit, TextUnitId,
};
use query_core::search::drift::DriftSearch;
use query_core::search::global::GlobalSearch;
use query_core::search::local::LocalSearch;
use query_core::testing::{ScriptedChatModel, StubChatModel, StubEmbeddingModel};
use query_core::token_counter::Cl100kTokenCounter;
use query_core::vector_store::InMemoryVectorStore;

fn entity(id: &str, title: &str, rank: i64, text_units: Vec<&str>) -> Entity {
    Entity {
        id: EntityId(id.to_string()),
        short_id: id.to_string(),
        title: title.to_string(),
        entity_type: None,
        description: Some(format!("{title} description")),
        description_embedding: None,
        community_ids: vec![],
        text_unit_ids: text_units.into_iter().map(TextUnitId::from).collect(),
        rank,
        attributes: Default::default(),
    }
}

fn relationship(id: &str, source: &str, target: &str, weight: f64, text_units: Vec<&str>) -> Relationship {
    Relationship {
        id: RelationshipId(id.to_string()),
        short_id: id.to_string(),
        source: source.to_string(),
        target: target.to_string(),
        description: Some(format!("{source} relates to {target}")),
        weight,
        text_unit_ids: text_units.into_iter().map(TextUnitId::from).collect(),
        rank: 0,
        attributes: Default::default(),
    }
}

fn text_unit(id: &str, text: &str) -> TextUnit {
    TextUnit {
        id: TextUnitId(id.to_string()),
        short_id: id.to_string(),
        text: text.to_string(),
        n_tokens: text.len() / 4,
        entity_ids: vec![],
        relationship_ids: vec![],
        covariate_ids: vec![],
        document_ids: vec![],
    }
}

fn report(id: &str, title: &str, content: &str, rank: f64) -> CommunityReport {
    CommunityReport {
        id: CommunityReportId(id.to_string()),
        short_id: id.to_string(),
        community_id: query_core::data_model::CommunityId("c0".to_string()),
        title: title.to_string(),
        summary: content.to_string(),
        full_content: content.to_string(),
        rank,
        summary_embedding: None,
        full_content_embedding: None,
        attributes: Default::default(),
    }
}

fn local_search_with_store(config: QueryCoreConfig, chat_response: &str, store: InMemoryVectorStore) -> LocalSearch {
    LocalSearch::new(
        Arc::new(StubChatModel::new(chat_response)),
        Arc::new(StubEmbeddingModel::new(4)),
        Arc::new(store),
        Arc::new(Cl100kTokenCounter::new()),
        config,
    )
}

fn local_search(config: QueryCoreConfig, chat_response: &str) -> LocalSearch {
    local_search_with_store(config, chat_response, InMemoryVectorStore::new())
}

// S1: empty graph -- both LocalSearch and GlobalSearch return empty response/context;
// GlobalSearch issues zero LLM calls for the map phase.
#[tokio::test]
async fn s1_empty_graph_yields_empty_results() {
    let data_model = DataModel::build(vec![], vec![], vec![], vec![], vec![], vec![]).unwrap();

    let local = local_search(QueryCoreConfig::default(), "unused");
    let local_result = local.search("Who is Alice?", &data_model, None, None, 1000).await.unwrap();
    assert!(local_result.response.is_empty() || local_result.context_text.is_empty());

    let global = GlobalSearch::new(
        Arc::new(StubChatModel::new("unused")),
        Arc::new(Cl100kTokenCounter::new()),
        QueryCoreConfig::default(),
    );
    let global_result = global.search("What happened overall?", &data_model).await.unwrap();
    assert_eq!(global_result.llm_calls, 0);
    assert!(global_result.response.is_empty());
}

// S2: single-entity query produces exactly one Entities/Relationships/Sources row.
#[tokio::test]
async fn s2_single_entity_query_produces_one_row_per_section() {
    let data_model = DataModel::build(
        vec![entity("e-alice", "Alice", 1, vec!["t1"]), entity("e-bob", "Bob", 1, vec!["t1"])],
        vec![relationship("r1", "Alice", "Bob", 0.5, vec!["t1"])],
        vec![],
        vec![text_unit("t1", "Alice and Bob met in the park.")],
        vec![],
        vec![],
    )
    .unwrap();

    let embedder = StubEmbeddingModel::new(4);
    let store = InMemoryVectorStore::new();
    store.insert("e-alice", embedder.embed("Alice").await.unwrap());
    store.insert("e-bob", embedder.embed("Bob").await.unwrap());

    let local = local_search_with_store(
        QueryCoreConfig::default(),
        "Alice is a person. [Data: Entities (e-alice)]",
        store,
    );
    let result = local.search("Who is Alice?", &data_model, None, None, 2000).await.unwrap();

    let entities = result.context_records["entities"].as_array().unwrap();
    assert_eq!(entities.len(), 2); // both Alice and Bob are mapped in (empty-query fallback picks all by rank)

    let citations = extract_citations(&result.response);
    assert_eq!(citations["Entities"], vec!["e-alice".to_string()]);
}

// S3: budget pressure -- with community/text-unit proportions at zero, only entities
// (a prefix of the list) appear.
#[tokio::test]
async fn s3_budget_pressure_only_packs_entity_prefix() {
    let mut entities = Vec::new();
    for i in 0..1000 {
        entities.push(entity(&format!("e{i}"), &format!("Entity{i}"), i as i64, vec![]));
    }
    let data_model = DataModel::build(entities, vec![], vec![], vec![], vec![], vec![]).unwrap();

    let mut config = QueryCoreConfig::default();
    config.community_prop = 0.0;
    config.text_unit_prop = 0.0;
    config.top_k_mapped_entities = 1000;

    let local = local_search(config, "answer");
    let result = local.search("", &data_model, None, None, 500).await.unwrap();

    let entities_kept = result.context_records["entities"].as_array().unwrap();
    assert!(entities_kept.len() < 1000);
    assert!(result.context_records["reports"].as_array().unwrap().is_empty());
    assert!(result.context_records["sources"].as_array().unwrap().is_empty());
}

// S4: global map/reduce over 40 reports; reduce prompt packs top-scoring points only.
#[tokio::test]
async fn s4_global_map_reduce_over_many_reports() {
    let mut reports = Vec::new();
    for i in 0..40 {
        reports.push(report(&format!("r{i}"), &format!("Report {i}"), &"content ".repeat(20), 1.0));
    }
    let data_model = DataModel::build(vec![], vec![], vec![], vec![], reports, vec![]).unwrap();

    let chat = StubChatModel::new(r#"{"points": [{"description": "a key point", "score": 80}]}"#);
    let global = GlobalSearch::new(Arc::new(chat), Arc::new(Cl100kTokenCounter::new()), QueryCoreConfig::default());
    let result = global.search("Summarize everything", &data_model).await.unwrap();

    assert!(result.llm_calls > 1);
    assert!(result.context_text.contains("Helpfulness Score: 80"));
}

// S5: citation extraction round-trips ids, dropping "+more".
#[test]
fn s5_citation_extraction_matches_expected_mapping() {
    let text = "... [Data: Entities (1, 2, 3, +more); Reports (7)] ...";
    let result = extract_citations(text);
    assert_eq!(result["Entities"], vec!["1", "2", "3"]);
    assert_eq!(result["Reports"], vec!["7"]);
}

// S6: DRIFT terminates after `drift_iterations` rounds with exactly
// 1 (root) + 2 (round 1) + 2 (round 2) = 5 complete actions, leaving the rest of the
// graph as incomplete leaves. The scripted chat model responds by call order:
// [0] HyDE, [1] primer fold decompose (3 follow-ups), [2..4) round 1 steps (2 follow-ups
// each), [4..6) round 2 steps (no further follow-ups).
#[tokio::test]
async fn s6_drift_terminates_with_five_complete_actions() {
    let reports = vec![
        report("r0", "Report 0", "alpha content", 1.0),
        report("r1", "Report 1", "beta content", 1.0),
        report("r2", "Report 2", "gamma content", 1.0),
    ];
    let data_model = DataModel::build(vec![], vec![], vec![], vec![], reports, vec![]).unwrap();

    let report_store = InMemoryVectorStore::new();
    report_store.insert("r0", vec![1.0, 0.0, 0.0, 0.0]);
    report_store.insert("r1", vec![0.0, 1.0, 0.0, 0.0]);
    report_store.insert("r2", vec![0.0, 0.0, 1.0, 0.0]);

    let scripted = Arc::new(ScriptedChatModel::new(vec![
        "a hypothetical answer".to_string(),
        r#"{"intermediate_answer": "root answer", "score": 50, "follow_up_queries": ["primer-a", "primer-b", "primer-c"]}"#.to_string(),
        r#"{"response": "step1a answer", "score": 60, "follow_up_queries": ["step1a-x", "step1a-y"]}"#.to_string(),
        r#"{"response": "step1b answer", "score": 55, "follow_up_queries": ["step1b-x", "step1b-y"]}"#.to_string(),
        r#"{"response": "step2a answer", "score": 40, "follow_up_queries": []}"#.to_string(),
        r#"{"response": "step2b answer", "score": 35, "follow_up_queries": []}"#.to_string(),
    ]));

    let mut config = QueryCoreConfig::default();
    config.drift_iterations = 2;
    config.search_primer_k = 2;
    config.primer_folds = 1;

    let local_search = Arc::new(LocalSearch::new(
        scripted.clone(),
        Arc::new(StubEmbeddingModel::new(4)),
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(Cl100kTokenCounter::new()),
        config.clone(),
    ));

    let drift = DriftSearch {
        chat: scripted.clone(),
        embedder: Arc::new(StubEmbeddingModel::new(4)),
        report_vector_store: Arc::new(report_store),
        local_search,
        config,
    };

    let result = drift.search("What happened overall?", &data_model).await.unwrap();
    let state: serde_json::Value = serde_json::from_str(&result.response).unwrap();
    let nodes = state["nodes"].as_array().unwrap();

    let complete = nodes.iter().filter(|n| !n["answer"].is_null()).count();
    assert_eq!(complete, 5);
    assert!(nodes.len() > complete, "the unexpanded follow-ups should remain incomplete leaves");
}
