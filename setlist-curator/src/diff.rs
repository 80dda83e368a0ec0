//! Diff stage: explain what a curation run changed
//!
//! Pure function of the before-state, the filter survivors and the final
//! order. Removals compare multiplicities so duplicated entries produce one
//! record per removed copy.

use crate::types::{
    CandidateItem, CatalogItem, DiffEntry, DiffResult, PinnedItem, RemovalReason, RemovedEntry,
    SurvivingItem,
};
use std::collections::{HashMap, HashSet};

/// Placeholder for metadata that cannot be resolved
pub const UNKNOWN: &str = "Unknown";

/// Compute added, removed and kept-pinned entries
pub fn compute_diff(
    before: &[CatalogItem],
    survivors: &[SurvivingItem],
    final_ids: &[String],
    pinned: &[PinnedItem],
    suggested: &[CandidateItem],
    reasons: Option<&HashMap<String, RemovalReason>>,
) -> DiffResult {
    let survivor_ids: HashSet<&str> = survivors.iter().map(|s| s.item.id.as_str()).collect();
    let suggested_by_id: HashMap<&str, &CandidateItem> =
        suggested.iter().map(|c| (c.id.as_str(), c)).collect();
    let pinned_by_id: HashMap<&str, &PinnedItem> =
        pinned.iter().map(|p| (p.id.as_str(), p)).collect();

    let added = final_ids
        .iter()
        .filter(|id| !survivor_ids.contains(id.as_str()))
        .map(|id| {
            if let Some(candidate) = suggested_by_id.get(id.as_str()) {
                DiffEntry {
                    id: id.clone(),
                    title: candidate.title.clone(),
                    author: candidate.primary_author.clone(),
                }
            } else {
                pinned_entry(id, pinned_by_id.get(id.as_str()).copied())
            }
        })
        .collect();

    let mut final_counts: HashMap<&str, usize> = HashMap::new();
    for id in final_ids {
        *final_counts.entry(id.as_str()).or_insert(0) += 1;
    }

    let mut before_counts: HashMap<&str, usize> = HashMap::new();
    let mut first_seen: Vec<&CatalogItem> = Vec::new();
    for item in before {
        let count = before_counts.entry(item.id.as_str()).or_insert(0);
        if *count == 0 {
            first_seen.push(item);
        }
        *count += 1;
    }

    let mut removed = Vec::new();
    for item in first_seen {
        let had = before_counts[item.id.as_str()];
        let kept = final_counts.get(item.id.as_str()).copied().unwrap_or(0);
        let reason = reasons
            .and_then(|r| r.get(&item.id))
            .copied()
            .unwrap_or(RemovalReason::Other);
        for _ in 0..had.saturating_sub(kept) {
            removed.push(RemovedEntry {
                id: item.id.clone(),
                title: item.title.clone(),
                author: item.author_display(),
                reason,
            });
        }
    }

    let kept_pinned = pinned
        .iter()
        .filter(|p| final_counts.contains_key(p.id.as_str()))
        .map(|p| pinned_entry(&p.id, Some(p)))
        .collect();

    DiffResult {
        added,
        removed,
        kept_pinned,
    }
}

fn pinned_entry(id: &str, pin: Option<&PinnedItem>) -> DiffEntry {
    DiffEntry {
        id: id.to_string(),
        title: pin
            .and_then(|p| p.title.clone())
            .unwrap_or_else(|| UNKNOWN.to_string()),
        author: pin
            .and_then(|p| p.author.clone())
            .unwrap_or_else(|| UNKNOWN.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PositionRange;

    fn catalog(id: &str) -> CatalogItem {
        CatalogItem::new(id, format!("Title {}", id), format!("Author {}", id))
    }

    fn survivor(id: &str) -> SurvivingItem {
        SurvivingItem {
            item: catalog(id),
            is_pinned: false,
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_removed_counts_multiplicity() {
        let before = vec![catalog("x"), catalog("y"), catalog("x")];
        let survivors = vec![survivor("y")];
        let diff = compute_diff(&before, &survivors, &ids(&["y"]), &[], &[], None);

        let removed_x: Vec<_> = diff.removed.iter().filter(|r| r.id == "x").collect();
        assert_eq!(removed_x.len(), 2);
        assert!(removed_x.iter().all(|r| r.reason == RemovalReason::Other));
        assert!(diff.added.is_empty());
    }

    #[test]
    fn test_partial_duplicate_removal_uses_reason_map() {
        let before = vec![catalog("x"), catalog("x"), catalog("z")];
        let survivors = vec![survivor("x")];
        let reasons: HashMap<String, RemovalReason> = [
            ("x".to_string(), RemovalReason::Duplicate),
            ("z".to_string(), RemovalReason::Expired),
        ]
        .into_iter()
        .collect();

        let diff = compute_diff(&before, &survivors, &ids(&["x"]), &[], &[], Some(&reasons));

        assert_eq!(diff.removed.len(), 2);
        assert_eq!(diff.removed[0].id, "x");
        assert_eq!(diff.removed[0].reason, RemovalReason::Duplicate);
        assert_eq!(diff.removed[1].reason, RemovalReason::Expired);
    }

    #[test]
    fn test_added_metadata_priority() {
        let suggested = vec![CandidateItem::suggested(&catalog("new"))];
        let pinned = vec![
            PinnedItem::new("pin", PositionRange::fixed(1)).with_metadata("Pinned Song", "Pinned Author"),
        ];
        let diff = compute_diff(
            &[],
            &[],
            &ids(&["pin", "new", "mystery"]),
            &pinned,
            &suggested,
            None,
        );

        assert_eq!(diff.added.len(), 3);
        assert_eq!(diff.added[0].title, "Pinned Song");
        assert_eq!(diff.added[1].title, "Title new");
        assert_eq!(diff.added[1].author, "Author new");
        assert_eq!(diff.added[2].title, UNKNOWN);
        assert_eq!(diff.added[2].author, UNKNOWN);
    }

    #[test]
    fn test_kept_pinned_only_when_present() {
        let pinned = vec![
            PinnedItem::new("in", PositionRange::fixed(1)),
            PinnedItem::new("out", PositionRange::fixed(2)),
        ];
        let diff = compute_diff(&[], &[], &ids(&["in"]), &pinned, &[], None);
        assert_eq!(diff.kept_pinned.len(), 1);
        assert_eq!(diff.kept_pinned[0].id, "in");
        assert_eq!(diff.kept_pinned[0].title, UNKNOWN);
    }

    #[test]
    fn test_carried_items_are_not_added() {
        let before = vec![catalog("a"), catalog("b")];
        let survivors = vec![survivor("a"), survivor("b")];
        let diff = compute_diff(&before, &survivors, &ids(&["b", "a"]), &[], &[], None);
        assert_eq!(diff, DiffResult::default());
    }
}
