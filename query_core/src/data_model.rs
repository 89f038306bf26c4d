use std::collections::HashMap;
use serde::{Deserialize, Serialize};

use crate::errors::{QueryCoreError, QueryCoreResult};

macro_rules! newtype_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

newtype_id!(EntityId);
newtype_id!(RelationshipId);
newtype_id!(CovariateId);
newtype_id!(TextUnitId);
newtype_id!(CommunityId);
newtype_id!(CommunityReportId);

pub type Embedding = Vec<f32>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub short_id: String,
    pub title: String,
    pub entity_type: Option<String>,
    pub description: Option<String>,
    pub description_embedding: Option<Embedding>,
    pub community_ids: Vec<CommunityId>,
    /// Order carries retrieval priority.
    pub text_unit_ids: Vec<TextUnitId>,
    pub rank: i64,
    pub attributes: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub short_id: String,
    /// Entity titles, not ids -- the join key against `Entity::title`.
    pub source: String,
    pub target: String,
    pub description: Option<String>,
    pub weight: f64,
    pub text_unit_ids: Vec<TextUnitId>,
    pub rank: i64,
    pub attributes: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Covariate {
    pub id: CovariateId,
    pub short_id: String,
    /// Entity title.
    pub subject_id: String,
    pub covariate_type: String,
    pub attributes: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextUnit {
    pub id: TextUnitId,
    pub short_id: String,
    pub text: String,
    pub n_tokens: usize,
    pub entity_ids: Vec<EntityId>,
    pub relationship_ids: Vec<RelationshipId>,
    pub covariate_ids: Vec<CovariateId>,
    pub document_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityReport {
    pub id: CommunityReportId,
    pub short_id: String,
    pub community_id: CommunityId,
    pub title: String,
    pub summary: String,
    pub full_content: String,
    pub rank: f64,
    pub summary_embedding: Option<Embedding>,
    pub full_content_embedding: Option<Embedding>,
    pub attributes: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Community {
    pub id: CommunityId,
    pub title: String,
    pub level: String,
    pub entity_ids: Vec<EntityId>,
    pub relationship_ids: Vec<RelationshipId>,
    pub sub_community_ids: Vec<CommunityId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Immutable turn buffer; consumed but never mutated by a search engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationHistory {
    pub turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    /// Last `max_turns` user-authored turns, oldest first.
    pub fn user_turns(&self, max_turns: usize) -> Vec<&str> {
        self.turns
            .iter()
            .filter(|t| t.role == Role::User)
            .rev()
            .take(max_turns)
            .map(|t| t.content.as_str())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }
}

/// The read-only graph loaded once at engine construction. Indexes entities by both
/// id (vector-store join key) and title (relationship/covariate join key) so callers
/// never need to scan linearly; per spec.md's Design Notes, both maps are built once
/// and never mutated.
#[derive(Debug, Clone, Default)]
pub struct DataModel {
    pub entities: HashMap<EntityId, Entity>,
    pub entities_by_title: HashMap<String, EntityId>,
    pub relationships: HashMap<RelationshipId, Relationship>,
    pub covariates: HashMap<String, Vec<Covariate>>,
    pub text_units: HashMap<TextUnitId, TextUnit>,
    pub community_reports: HashMap<CommunityReportId, CommunityReport>,
    pub communities: HashMap<CommunityId, Community>,
}

impl DataModel {
    pub fn build(
        entities: Vec<Entity>,
        relationships: Vec<Relationship>,
        covariates: Vec<Covariate>,
        text_units: Vec<TextUnit>,
        community_reports: Vec<CommunityReport>,
        communities: Vec<Community>,
    ) -> QueryCoreResult<Self> {
        let mut entities_by_id = HashMap::new();
        let mut entities_by_title = HashMap::new();
        for e in entities {
            entities_by_title.insert(e.title.clone(), e.id.clone());
            entities_by_id.insert(e.id.clone(), e);
        }

        let mut embedding_dim: Option<usize> = None;
        for e in entities_by_id.values() {
            if let Some(v) = &e.description_embedding {
                match embedding_dim {
                    None => embedding_dim = Some(v.len()),
                    Some(d) if d != v.len() => {
                        return Err(QueryCoreError::Data(format!(
                            "entity {} description_embedding dimension {} does not match expected {}",
                            e.id, v.len(), d
                        )));
                    }
                    _ => {}
                }
            }
        }

        let mut relationships_by_id = HashMap::new();
        for r in relationships {
            relationships_by_id.insert(r.id.clone(), r);
        }

        let mut covariates_by_subject: HashMap<String, Vec<Covariate>> = HashMap::new();
        for c in covariates {
            covariates_by_subject
                .entry(c.subject_id.clone())
                .or_default()
                .push(c);
        }

        let mut text_units_by_id = HashMap::new();
        for t in text_units {
            text_units_by_id.insert(t.id.clone(), t);
        }

        let mut summary_embedding_dim: Option<usize> = None;
        let mut full_content_embedding_dim: Option<usize> = None;
        for r in &community_reports {
            if let Some(v) = &r.summary_embedding {
                match summary_embedding_dim {
                    None => summary_embedding_dim = Some(v.len()),
                    Some(d) if d != v.len() => {
                        return Err(QueryCoreError::Data(format!(
                            "community report {} summary_embedding dimension {} does not match expected {}",
                            r.id, v.len(), d
                        )));
                    }
                    _ => {}
                }
            }
            if let Some(v) = &r.full_content_embedding {
                match full_content_embedding_dim {
                    None => full_content_embedding_dim = Some(v.len()),
                    Some(d) if d != v.len() => {
                        return Err(QueryCoreError::Data(format!(
                            "community report {} full_content_embedding dimension {} does not match expected {}",
                            r.id, v.len(), d
                        )));
                    }
                    _ => {}
                }
            }
        }

        let mut reports_by_id = HashMap::new();
        for r in community_reports {
            reports_by_id.insert(r.id.clone(), r);
        }

        let mut communities_by_id = HashMap::new();
        for c in communities {
            communities_by_id.insert(c.id.clone(), c);
        }

        Ok(Self {
            entities: entities_by_id,
            entities_by_title,
            relationships: relationships_by_id,
            covariates: covariates_by_subject,
            text_units: text_units_by_id,
            community_reports: reports_by_id,
            communities: communities_by_id,
        })
    }

    pub fn entity_by_title(&self, title: &str) -> Option<&Entity> {
        self.entities_by_title.get(title).and_then(|id| self.entities.get(id))
    }

    /// Resolve a text unit id, silently skipping ids that don't resolve (per spec.md §3 invariant).
    pub fn text_unit(&self, id: &TextUnitId) -> Option<&TextUnit> {
        self.text_units.get(id)
    }
}
