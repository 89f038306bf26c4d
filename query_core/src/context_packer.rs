use std::collections::{HashMap, HashSet};

use crate::data_model::{CommunityReport, DataModel, Entity, Relationship};
use crate::token_counter::TokenCounter;

pub const DEFAULT_DELIMITER: &str = "|";

/// Result of a single greedy pack: the rendered text block plus the rows that made it
/// in, for caller observability (spec.md §4.4 point 3).
pub struct PackedBlock<Row> {
    pub text: String,
    pub rows: Vec<Row>,
}

/// The single greedy packer (spec.md §4.4): emit a section header, a column header
/// line, then append rows one at a time, stopping before the first row that would
/// exceed `budget`. A row is never emitted partially.
pub fn pack_rows<Row: Clone>(
    context_name: &str,
    columns: &[&str],
    rows: &[(Row, Vec<String>)],
    budget: usize,
    counter: &dyn TokenCounter,
    delimiter: &str,
) -> PackedBlock<Row> {
    let header = format!("-----{context_name}-----");
    let column_line = columns.join(delimiter);
    let mut text = format!("{header}\n{column_line}\n");
    let mut used = counter.count(&text);
    let mut kept = Vec::new();

    for (row, fields) in rows {
        let line = format!("{}\n", fields.join(delimiter));
        let cost = counter.count(&line);
        if used + cost > budget {
            break;
        }
        text.push_str(&line);
        used += cost;
        kept.push(row.clone());
    }

    PackedBlock { text, rows: kept }
}

/// `PackBatched` (spec.md §4.4): when the budget is tight, return a list of chunks
/// rather than truncating. Each chunk repeats the section header.
pub fn pack_batched<Row: Clone>(
    context_name: &str,
    columns: &[&str],
    rows: &[(Row, Vec<String>)],
    budget_per_batch: usize,
    counter: &dyn TokenCounter,
    delimiter: &str,
) -> Vec<PackedBlock<Row>> {
    if rows.is_empty() {
        return Vec::new();
    }
    let mut batches = Vec::new();
    let mut remaining = rows;
    while !remaining.is_empty() {
        let block = pack_rows(context_name, columns, remaining, budget_per_batch, counter, delimiter);
        let consumed = block.rows.len().max(1);
        batches.push(block);
        remaining = &remaining[consumed..];
    }
    batches
}

/// Entity table context: `id,entity,description[,rank]`.
pub fn build_entity_context(
    selected: &[Entity],
    budget: usize,
    counter: &dyn TokenCounter,
    include_rank: bool,
    rank_description: &str,
) -> PackedBlock<Entity> {
    let mut columns = vec!["id", "entity", "description"];
    if include_rank {
        columns.push(rank_description);
    }
    let rows: Vec<(Entity, Vec<String>)> = selected
        .iter()
        .map(|e| {
            let mut fields = vec![
                e.short_id.clone(),
                e.title.clone(),
                e.description.clone().unwrap_or_default(),
            ];
            if include_rank {
                fields.push(e.rank.to_string());
            }
            (e.clone(), fields)
        })
        .collect();
    pack_rows("Entities", &columns, &rows, budget, counter, DEFAULT_DELIMITER)
}

/// Relationship table context: `id,source,target,description[,weight]`.
pub fn build_relationship_context(
    relationships: &[Relationship],
    budget: usize,
    counter: &dyn TokenCounter,
    include_weight: bool,
) -> PackedBlock<Relationship> {
    let mut columns = vec!["id", "source", "target", "description"];
    if include_weight {
        columns.push("weight");
    }
    let rows: Vec<(Relationship, Vec<String>)> = relationships
        .iter()
        .map(|r| {
            let mut fields = vec![
                r.short_id.clone(),
                r.source.clone(),
                r.target.clone(),
                r.description.clone().unwrap_or_default(),
            ];
            if include_weight {
                fields.push(r.weight.to_string());
            }
            (r.clone(), fields)
        })
        .collect();
    pack_rows("Relationships", &columns, &rows, budget, counter, DEFAULT_DELIMITER)
}

/// Covariate table context for the selected entities, grouped by `subject_id == entity.title`.
pub fn build_covariate_context(
    selected: &[Entity],
    data_model: &DataModel,
    budget: usize,
    counter: &dyn TokenCounter,
) -> PackedBlock<String> {
    let columns = ["id", "entity", "type", "description"];
    let mut rows = Vec::new();
    for e in selected {
        if let Some(covariates) = data_model.covariates.get(&e.title) {
            for c in covariates {
                let fields = vec![
                    c.short_id.clone(),
                    e.title.clone(),
                    c.covariate_type.clone(),
                    c.attributes
                        .get("description")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                ];
                rows.push((c.id.0.clone(), fields));
            }
        }
    }
    pack_rows("Claims", &columns, &rows, budget, counter, DEFAULT_DELIMITER)
}

/// Text-unit table context: `id,text`. Rows must already be pre-sorted by the caller
/// (LocalSearch sorts by `entity_order` asc, `num_relationships` desc per spec.md §4.5).
pub fn build_text_unit_context(
    rows_in_order: &[(String, String)],
    budget: usize,
    counter: &dyn TokenCounter,
) -> PackedBlock<String> {
    let columns = ["id", "text"];
    let rows: Vec<(String, Vec<String>)> = rows_in_order
        .iter()
        .map(|(id, text)| (id.clone(), vec![id.clone(), text.clone()]))
        .collect();
    pack_rows("Sources", &columns, &rows, budget, counter, DEFAULT_DELIMITER)
}

/// Community report weight: count of distinct text units attributed to the report's
/// member entities (spec.md §3 / §4.4). The spec's Open Question resolves in favor of
/// this on-demand normalized variant only -- no raw-count variant is carried forward.
pub fn compute_community_weights(
    reports: &[CommunityReport],
    data_model: &DataModel,
    normalize: bool,
) -> HashMap<String, f64> {
    let mut raw: HashMap<String, f64> = HashMap::new();
    for report in reports {
        let community = data_model.communities.get(&report.community_id);
        let mut text_units: HashSet<&str> = HashSet::new();
        if let Some(community) = community {
            for entity_id in &community.entity_ids {
                if let Some(entity) = data_model.entities.get(entity_id) {
                    for tid in &entity.text_unit_ids {
                        text_units.insert(tid.0.as_str());
                    }
                }
            }
        }
        raw.insert(report.id.0.clone(), text_units.len() as f64);
    }

    if !normalize {
        return raw;
    }

    // Rescale into [0, max] relative to the batch's own maximum, matching spec.md's
    // "normalize_community_weight" option: weights become comparable across batches
    // of differing total text-unit counts rather than reflecting raw corpus size.
    let max = raw.values().cloned().fold(0.0_f64, f64::max);
    if max == 0.0 {
        return raw;
    }
    let scale = raw.len() as f64;
    raw.into_iter().map(|(k, v)| (k, (v / max) * scale)).collect()
}

/// Community-report context (spec.md §4.4): augments each candidate report with a
/// transient `matches` counter (selected entities belonging to the report's community),
/// sorts by `(matches desc, rank desc)`, then packs. The `matches` transient never
/// appears in the returned rows -- only in the sort. When `weights` is `Some`, each
/// report's `compute_community_weights` value is rendered as a `weight_column_name`
/// column (spec.md §4.4's optional weight column; `None` omits it entirely).
#[allow(clippy::too_many_arguments)]
pub fn build_community_context(
    selected: &[Entity],
    all_reports: &[CommunityReport],
    data_model: &DataModel,
    budget: usize,
    counter: &dyn TokenCounter,
    use_summary: bool,
    min_community_rank: f64,
    include_rank: bool,
    context_name: &str,
    weights: Option<(&HashMap<String, f64>, &str)>,
) -> PackedBlock<CommunityReport> {
    let mut matches_by_community: HashMap<&str, u32> = HashMap::new();
    for e in selected {
        for c in &e.community_ids {
            *matches_by_community.entry(c.0.as_str()).or_insert(0) += 1;
        }
    }

    let mut candidates: Vec<(u32, &CommunityReport)> = all_reports
        .iter()
        .filter(|r| r.rank >= min_community_rank)
        .map(|r| {
            let matches = matches_by_community.get(r.community_id.0.as_str()).copied().unwrap_or(0);
            (matches, r)
        })
        .collect();

    candidates.sort_by(|(matches_a, a), (matches_b, b)| {
        matches_b
            .cmp(matches_a)
            .then_with(|| b.rank.partial_cmp(&a.rank).unwrap_or(std::cmp::Ordering::Equal))
    });

    let mut columns = vec!["id", "title"];
    if include_rank {
        columns.push("rank");
    }
    if let Some((_, column_name)) = weights {
        columns.push(column_name);
    }
    columns.push(if use_summary { "summary" } else { "content" });

    let rows: Vec<(CommunityReport, Vec<String>)> = candidates
        .into_iter()
        .map(|(_, r)| {
            let mut fields = vec![r.short_id.clone(), r.title.clone()];
            if include_rank {
                fields.push(r.rank.to_string());
            }
            if let Some((weights, _)) = weights {
                fields.push(weights.get(&r.id.0).copied().unwrap_or(0.0).to_string());
            }
            fields.push(if use_summary {
                r.summary.clone()
            } else {
                r.full_content.clone()
            });
            (r.clone(), fields)
        })
        .collect();

    pack_rows(context_name, &columns, &rows, budget, counter, DEFAULT_DELIMITER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_counter::Cl100kTokenCounter;

    #[test]
    fn pack_rows_never_exceeds_budget() {
        let counter = Cl100kTokenCounter::new();
        let rows: Vec<(usize, Vec<String>)> = (0..1000)
            .map(|i| (i, vec![i.to_string(), "x".repeat(20)]))
            .collect();
        let block = pack_rows("Entities", &["id", "pad"], &rows, 50, &counter, "|");
        let total = counter.count(&block.text);
        assert!(total <= 50 + counter.count("-----Entities-----\nid|pad\n"));
        assert!(block.rows.len() < rows.len());
    }

    #[test]
    fn pack_batched_splits_into_multiple_chunks() {
        let counter = Cl100kTokenCounter::new();
        let rows: Vec<(usize, Vec<String>)> = (0..50)
            .map(|i| (i, vec![i.to_string(), "x".repeat(10)]))
            .collect();
        let batches = pack_batched("Reports", &["id", "pad"], &rows, 40, &counter, "|");
        assert!(batches.len() > 1);
        let total_rows: usize = batches.iter().map(|b| b.rows.len()).sum();
        assert_eq!(total_rows, rows.len());
    }
}
