//! Filter stage: decide which existing entries survive
//!
//! Single pass over the current collection, in order. Each entry is checked
//! for duplication, then age, then the per-author cap; the first rule that
//! fires decides the removal reason. Pinned entries are exempt from the age
//! and author rules but not from duplicate removal.

use crate::types::{CatalogItem, RemovalReason, RemovedItem, SurvivingItem, VARIOUS_AUTHORS};
use chrono::{DateTime, Utc};
use setlist_common::config::CollectionConfig;
use setlist_common::time::age_in_days;
use std::collections::{HashMap, HashSet};

/// Rules the filter applies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRules {
    pub max_age_days: Option<u32>,
    pub remove_duplicates: bool,
    pub max_per_author: Option<usize>,
}

impl From<&CollectionConfig> for FilterRules {
    fn from(config: &CollectionConfig) -> Self {
        Self {
            max_age_days: config.max_age_days,
            remove_duplicates: config.remove_duplicates,
            max_per_author: config.max_per_author,
        }
    }
}

/// Filter output: survivors in original order plus removals with reasons
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    pub survivors: Vec<SurvivingItem>,
    pub removed: Vec<RemovedItem>,
}

impl FilterOutcome {
    /// Number of removals with the given reason
    pub fn count(&self, reason: RemovalReason) -> usize {
        self.removed.iter().filter(|r| r.reason == reason).count()
    }

    /// First removal reason recorded for each id
    pub fn reason_map(&self) -> HashMap<String, RemovalReason> {
        let mut reasons = HashMap::new();
        for removed in &self.removed {
            reasons
                .entry(removed.item.id.clone())
                .or_insert(removed.reason);
        }
        reasons
    }

    /// Survivors that are not pinned
    pub fn unpinned_survivors(&self) -> impl Iterator<Item = &SurvivingItem> {
        self.survivors.iter().filter(|s| !s.is_pinned)
    }
}

/// Run the filter stage over the current collection contents
pub fn filter_items(
    items: &[CatalogItem],
    rules: &FilterRules,
    pinned_ids: &HashSet<String>,
    now: DateTime<Utc>,
) -> FilterOutcome {
    let mut seen_ids: HashSet<&str> = HashSet::new();
    let mut seen_signatures: HashSet<String> = HashSet::new();
    let mut author_counts: HashMap<String, usize> = HashMap::new();
    let mut outcome = FilterOutcome::default();

    for item in items {
        let is_pinned = pinned_ids.contains(&item.id);

        if rules.remove_duplicates {
            let signature = item.signature();
            if seen_ids.contains(item.id.as_str()) || seen_signatures.contains(&signature) {
                outcome.removed.push(RemovedItem {
                    item: item.clone(),
                    reason: RemovalReason::Duplicate,
                });
                continue;
            }
            seen_ids.insert(item.id.as_str());
            seen_signatures.insert(signature);
        }

        if !is_pinned && is_expired(item, rules.max_age_days, now) {
            outcome.removed.push(RemovedItem {
                item: item.clone(),
                reason: RemovalReason::Expired,
            });
            continue;
        }

        if !is_pinned {
            if let Some(cap) = rules.max_per_author {
                let author = item.primary_author();
                if author != VARIOUS_AUTHORS {
                    let count = author_counts.entry(author).or_insert(0);
                    if *count >= cap {
                        outcome.removed.push(RemovedItem {
                            item: item.clone(),
                            reason: RemovalReason::AuthorLimit,
                        });
                        continue;
                    }
                    *count += 1;
                }
            }
        }

        outcome.survivors.push(SurvivingItem {
            item: item.clone(),
            is_pinned,
        });
    }

    outcome
}

fn is_expired(item: &CatalogItem, max_age_days: Option<u32>, now: DateTime<Utc>) -> bool {
    match (max_age_days, item.added_at) {
        (Some(max_days), Some(added_at)) => age_in_days(added_at, now) > f64::from(max_days),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn item(id: &str, title: &str, author: &str, days_old: i64, now: DateTime<Utc>) -> CatalogItem {
        let mut item = CatalogItem::new(id, title, author);
        item.container = format!("{} album", author);
        item.added_at = Some(now - Duration::days(days_old));
        item
    }

    fn rules(max_age: Option<u32>, dedupe: bool, cap: Option<usize>) -> FilterRules {
        FilterRules {
            max_age_days: max_age,
            remove_duplicates: dedupe,
            max_per_author: cap,
        }
    }

    fn ids(outcome: &FilterOutcome) -> Vec<&str> {
        outcome.survivors.iter().map(|s| s.item.id.as_str()).collect()
    }

    #[test]
    fn test_duplicate_by_id_and_signature() {
        let now = Utc::now();
        let items = vec![
            item("a", "Song", "Alpha", 1, now),
            item("a", "Song", "Alpha", 1, now),
            // Same signature, different id
            item("b", " SONG ", "alpha", 1, now),
            item("c", "Other", "Alpha", 1, now),
        ];
        let outcome = filter_items(&items, &rules(None, true, None), &HashSet::new(), now);

        assert_eq!(ids(&outcome), vec!["a", "c"]);
        assert_eq!(outcome.count(RemovalReason::Duplicate), 2);
    }

    #[test]
    fn test_duplicates_kept_when_disabled() {
        let now = Utc::now();
        let items = vec![item("a", "Song", "Alpha", 1, now), item("a", "Song", "Alpha", 1, now)];
        let outcome = filter_items(&items, &rules(None, false, None), &HashSet::new(), now);
        assert_eq!(outcome.survivors.len(), 2);
    }

    #[test]
    fn test_expired_unless_pinned() {
        let now = Utc::now();
        let items = vec![
            item("old", "Old", "Alpha", 40, now),
            item("pinned-old", "Pinned", "Beta", 40, now),
            item("fresh", "Fresh", "Gamma", 5, now),
        ];
        let pinned: HashSet<String> = ["pinned-old".to_string()].into_iter().collect();
        let outcome = filter_items(&items, &rules(Some(30), true, None), &pinned, now);

        assert_eq!(ids(&outcome), vec!["pinned-old", "fresh"]);
        assert!(outcome.survivors[0].is_pinned);
        assert_eq!(outcome.removed[0].reason, RemovalReason::Expired);
    }

    #[test]
    fn test_items_without_timestamp_never_expire() {
        let now = Utc::now();
        let mut undated = item("x", "Undated", "Alpha", 0, now);
        undated.added_at = None;
        let outcome = filter_items(&[undated], &rules(Some(1), true, None), &HashSet::new(), now);
        assert_eq!(outcome.survivors.len(), 1);
    }

    #[test]
    fn test_author_limit_counts_only_unpinned() {
        let now = Utc::now();
        let items = vec![
            item("p", "Pinned", "Alpha", 1, now),
            item("a1", "One", "Alpha", 1, now),
            item("a2", "Two", "Alpha, Featured", 1, now),
            item("a3", "Three", "ALPHA", 1, now),
            item("b1", "Four", "Beta", 1, now),
        ];
        let pinned: HashSet<String> = ["p".to_string()].into_iter().collect();
        let outcome = filter_items(&items, &rules(None, true, Some(2)), &pinned, now);

        assert_eq!(ids(&outcome), vec!["p", "a1", "a2", "b1"]);
        assert_eq!(outcome.removed.len(), 1);
        assert_eq!(outcome.removed[0].item.id, "a3");
        assert_eq!(outcome.removed[0].reason, RemovalReason::AuthorLimit);
    }

    #[test]
    fn test_various_artists_exempt_from_cap() {
        let now = Utc::now();
        let items: Vec<_> = (0..4)
            .map(|i| item(&format!("v{}", i), &format!("Song {}", i), "Various Artists", 1, now))
            .collect();
        let outcome = filter_items(&items, &rules(None, true, Some(1)), &HashSet::new(), now);
        assert_eq!(outcome.survivors.len(), 4);
    }

    #[test]
    fn test_first_rule_wins() {
        let now = Utc::now();
        // Second copy is both a duplicate and expired: duplicate is evaluated first
        let items = vec![item("a", "Song", "Alpha", 40, now), item("a", "Song", "Alpha", 40, now)];
        let outcome = filter_items(&items, &rules(Some(30), true, None), &HashSet::new(), now);

        assert_eq!(outcome.removed[0].reason, RemovalReason::Expired);
        assert_eq!(outcome.removed[1].reason, RemovalReason::Duplicate);
        assert_eq!(outcome.reason_map()["a"], RemovalReason::Expired);
    }

    #[test]
    fn test_filter_is_idempotent() {
        let now = Utc::now();
        let items = vec![
            item("a", "Song", "Alpha", 1, now),
            item("a", "Song", "Alpha", 1, now),
            item("b", "Old", "Beta", 90, now),
            item("c", "C1", "Gamma", 2, now),
            item("d", "C2", "Gamma", 3, now),
            item("e", "C3", "Gamma", 4, now),
            item("f", "Pinned", "Gamma", 200, now),
        ];
        let pinned: HashSet<String> = ["f".to_string()].into_iter().collect();
        let rules = rules(Some(30), true, Some(2));

        let first = filter_items(&items, &rules, &pinned, now);
        assert!(!first.removed.is_empty());

        let survivors: Vec<CatalogItem> = first.survivors.iter().map(|s| s.item.clone()).collect();
        let second = filter_items(&survivors, &rules, &pinned, now);
        assert!(second.removed.is_empty());
        assert_eq!(second.survivors.len(), first.survivors.len());
    }
}
