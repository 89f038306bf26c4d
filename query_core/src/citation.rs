use std::collections::{BTreeSet, HashMap};

use lazy_static::lazy_static;
use regex::Regex;

pub const CITATION_KINDS: [&str; 5] =
    ["Entities", "Relationships", "Sources", "Claims", "Reports"];

lazy_static! {
    static ref CITATION_BLOCK: Regex = Regex::new(r"\[Data:\s*([^\]]*)\]").unwrap();
    static ref KIND_GROUP: Regex =
        Regex::new(r"(Entities|Relationships|Sources|Claims|Reports)\s*\(([^)]*)\)").unwrap();
}

/// Orchestrator citation extraction (spec.md §4.8 / §6). Scans `text` for the
/// reference grammar `[Data: <Kind> (<id>(, <id>)*(, +more)?)(; <Kind> (...))*]` and
/// returns a mapping `{kind -> sorted distinct ids}` aggregated across every
/// occurrence in the text. Tolerant of whitespace variation; `+more` is dropped.
pub fn extract_citations(text: &str) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, BTreeSet<String>> = HashMap::new();

    for block in CITATION_BLOCK.captures_iter(text) {
        let inner = &block[1];
        for group in inner.split(';') {
            if let Some(caps) = KIND_GROUP.captures(group.trim()) {
                let kind = caps[1].to_string();
                let ids = &caps[2];
                for raw_id in ids.split(',') {
                    let id = raw_id.trim();
                    if id.is_empty() || id == "+more" {
                        continue;
                    }
                    out.entry(kind.clone()).or_default().insert(id.to_string());
                }
            }
        }
    }

    out.into_iter().map(|(k, v)| (k, v.into_iter().collect())).collect()
}

/// Render a citation mapping back into the wire grammar, for round-trip testing.
/// At most 5 ids per kind are rendered; beyond that, `+more` is appended.
pub fn render_citation(kind_to_ids: &HashMap<String, Vec<String>>) -> String {
    let mut kinds: Vec<&str> = kind_to_ids.keys().map(|s| s.as_str()).collect();
    kinds.sort();
    let parts: Vec<String> = kinds
        .into_iter()
        .map(|kind| {
            let ids = &kind_to_ids[kind];
            let mut rendered: Vec<String> = ids.iter().take(5).cloned().collect();
            if ids.len() > 5 {
                rendered.push("+more".to_string());
            }
            format!("{kind} ({})", rendered.join(", "))
        })
        .collect();
    format!("[Data: {}]", parts.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_kind_with_more_suffix() {
        let text = "... [Data: Entities (1, 2, 3, +more); Reports (7)] ...";
        let result = extract_citations(text);
        assert_eq!(result["Entities"], vec!["1", "2", "3"]);
        assert_eq!(result["Reports"], vec!["7"]);
    }

    #[test]
    fn tolerates_whitespace_variation() {
        let text = "[Data:Entities(1,2) ; Relationships ( 9 ) ]";
        let result = extract_citations(text);
        assert_eq!(result["Entities"], vec!["1", "2"]);
        assert_eq!(result["Relationships"], vec!["9"]);
    }

    #[test]
    fn dedupes_and_sorts_ids_across_multiple_occurrences() {
        let text = "[Data: Entities (3, 1)] later [Data: Entities (1, 2)]";
        let result = extract_citations(text);
        assert_eq!(result["Entities"], vec!["1", "2", "3"]);
    }

    #[test]
    fn empty_text_yields_empty_map() {
        assert!(extract_citations("no citations here").is_empty());
    }
}
