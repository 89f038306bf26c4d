use std::collections::{HashMap, HashSet};

use crate::data_model::{DataModel, Entity, Relationship};

/// `InNetworkRelationships` (spec.md §4.3): relationships with both endpoints in `selected`.
pub fn in_network_relationships(selected: &[Entity], data_model: &DataModel) -> Vec<Relationship> {
    let titles: HashSet<&str> = selected.iter().map(|e| e.title.as_str()).collect();
    data_model
        .relationships
        .values()
        .filter(|r| titles.contains(r.source.as_str()) && titles.contains(r.target.as_str()))
        .cloned()
        .collect()
}

/// `OutNetworkRelationships` (spec.md §4.3): relationships with exactly one endpoint in `selected`.
pub fn out_network_relationships(selected: &[Entity], data_model: &DataModel) -> Vec<Relationship> {
    let titles: HashSet<&str> = selected.iter().map(|e| e.title.as_str()).collect();
    data_model
        .relationships
        .values()
        .filter(|r| titles.contains(r.source.as_str()) ^ titles.contains(r.target.as_str()))
        .cloned()
        .collect()
}

/// `RankRelationships` (spec.md §4.3). Mutates `attributes[attr]` in place when the
/// combined-rank fallback is computed, then sorts `relationships` descending by the
/// resolved key.
pub fn rank_relationships(relationships: &mut Vec<Relationship>, attr: &str, data_model: &DataModel) {
    for r in relationships.iter_mut() {
        if r.attributes.contains_key(attr) {
            continue;
        }
        if attr == "weight" {
            continue;
        }
        let combined = data_model.entity_by_title(&r.source).map(|e| e.rank).unwrap_or(0)
            + data_model.entity_by_title(&r.target).map(|e| e.rank).unwrap_or(0);
        r.attributes.insert(attr.to_string(), serde_json::json!(combined));
    }

    relationships.sort_by(|a, b| {
        let key = |r: &Relationship| -> f64 {
            if attr == "weight" && !r.attributes.contains_key(attr) {
                return r.weight;
            }
            r.attributes
                .get(attr)
                .and_then(|v| v.as_f64())
                .unwrap_or(r.weight)
        };
        key(b).partial_cmp(&key(a)).unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// `MutualRanking` (spec.md §4.3): for each out-network relationship, compute the
/// "links" score -- the count of distinct selected entities its non-selected endpoint
/// connects to across the whole out-network set -- then sort by (links, attr) descending
/// and truncate to `top_k_relationships * selected.len()`.
///
/// Combines `InNetworkRelationships` (returned unbounded, always first) with the
/// ranked-and-truncated out-network set, matching `_filter_relationships` in the
/// original implementation.
pub fn select_relationships(
    selected: &[Entity],
    data_model: &DataModel,
    ranking_attribute: &str,
    top_k_relationships: usize,
) -> Vec<Relationship> {
    let titles: HashSet<&str> = selected.iter().map(|e| e.title.as_str()).collect();

    let mut in_network = in_network_relationships(selected, data_model);
    rank_relationships(&mut in_network, ranking_attribute, data_model);

    let mut out_network = out_network_relationships(selected, data_model);
    rank_relationships(&mut out_network, ranking_attribute, data_model);

    // "links": count of distinct selected titles the out-network entity (the endpoint
    // NOT in `selected`) connects to, across the whole out-network relationship set.
    let mut links_by_outside_entity: HashMap<String, HashSet<String>> = HashMap::new();
    for r in &out_network {
        let (outside, inside) = if titles.contains(r.source.as_str()) {
            (r.target.clone(), r.source.clone())
        } else {
            (r.source.clone(), r.target.clone())
        };
        links_by_outside_entity.entry(outside).or_default().insert(inside);
    }

    out_network.sort_by(|a, b| {
        let outside_of = |r: &Relationship| -> &str {
            if titles.contains(r.source.as_str()) { &r.target } else { &r.source }
        };
        let links_a = links_by_outside_entity.get(outside_of(a)).map(|s| s.len()).unwrap_or(0);
        let links_b = links_by_outside_entity.get(outside_of(b)).map(|s| s.len()).unwrap_or(0);
        if links_a != links_b {
            return links_b.cmp(&links_a);
        }
        let attr_key = |r: &Relationship| -> f64 {
            r.attributes.get(ranking_attribute).and_then(|v| v.as_f64()).unwrap_or(r.weight)
        };
        attr_key(b).partial_cmp(&attr_key(a)).unwrap_or(std::cmp::Ordering::Equal)
    });

    let budget = top_k_relationships.saturating_mul(selected.len().max(1));
    out_network.truncate(budget);

    in_network.extend(out_network);
    in_network
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::{EntityId, RelationshipId};

    fn entity(title: &str, rank: i64) -> Entity {
        Entity {
            id: EntityId(title.to_string()),
            short_id: title.to_string(),
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

    fn relationship(id: &str, source: &str, target: &str, weight: f64) -> Relationship {
        Relationship {
            id: RelationshipId(id.to_string()),
            short_id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            description: None,
            weight,
            text_unit_ids: vec![],
            rank: 0,
            attributes: Default::default(),
        }
    }

    #[test]
    fn in_network_requires_both_endpoints_selected() {
        let model = DataModel::build(
            vec![entity("Alice", 1), entity("Bob", 1)],
            vec![
                relationship("r1", "Alice", "Bob", 1.0),
                relationship("r2", "Alice", "Carol", 1.0),
            ],
            vec![],
            vec![],
            vec![],
            vec![],
        )
        .unwrap();
        let selected = vec![entity("Alice", 1), entity("Bob", 1)];
        let in_net = in_network_relationships(&selected, &model);
        assert_eq!(in_net.len(), 1);
        assert_eq!(in_net[0].id.0, "r1");

        let out_net = out_network_relationships(&selected, &model);
        assert_eq!(out_net.len(), 1);
        assert_eq!(out_net[0].id.0, "r2");
    }

    #[test]
    fn select_relationships_bounds_out_network_by_budget() {
        let entities = vec![entity("Alice", 1)];
        let mut rels = vec![];
        for i in 0..5 {
            rels.push(relationship(&format!("r{i}"), "Alice", &format!("Other{i}"), 1.0));
        }
        let model = DataModel::build(entities.clone(), rels, vec![], vec![], vec![], vec![]).unwrap();
        let result = select_relationships(&entities, &model, "rank", 2);
        // in-network is empty (no pure in-network edges), out-network bounded by 2*1=2
        assert_eq!(result.len(), 2);
    }
}
