//! Synchronization stage
//!
//! Converges the remote collection onto a target ordered id list in four
//! strictly sequential phases:
//!
//! 1. **Categorize**: keep only the pinned occurrences still needed to reach
//!    their target multiplicity; mark every other occurrence for removal.
//! 2. **Remove**: bulk-remove the marked occurrences, highest index first,
//!    naming exact positions so duplicates are removed precisely.
//! 3. **Add**: re-read the collection and append each id's missing
//!    occurrences in target order.
//! 4. **Reorder**: re-read into a local mirror and walk the target, moving
//!    the next matching occurrence into place one step at a time.
//!
//! Pinned entries are never removed while still required, so they remain
//! present throughout. In dry-run mode the same phases run against a local
//! mirror and no mutating call is issued.

use crate::error::CurationResult;
use crate::remote::{fetch_all_items, RemoteSession, RemovalTarget};
use crate::types::CatalogItem;
use serde::{Deserialize, Serialize};
use setlist_common::config::RemoteConfig;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Knobs for one synchronization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub page_size: usize,
    /// Max occurrences per bulk remove/append call
    pub batch_limit: usize,
    /// Pause after each move for the remote side to settle
    pub move_delay: Duration,
    pub dry_run: bool,
}

impl SyncOptions {
    pub fn from_config(config: &RemoteConfig, dry_run: bool) -> Self {
        Self {
            page_size: config.page_size,
            batch_limit: config.batch_limit,
            move_delay: config.move_delay(),
            dry_run,
        }
    }
}

/// Synchronization phase, reported as it starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Categorize,
    Remove,
    Add,
    Reorder,
}

/// Target item missing from the mirror during reorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyFault {
    pub target_index: usize,
    pub item_id: String,
}

/// Operations issued (or, in dry-run, that would be issued)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub removed: usize,
    pub remove_calls: usize,
    pub added: usize,
    pub append_calls: usize,
    pub moved: usize,
    pub consistency_faults: Vec<ConsistencyFault>,
    pub dry_run: bool,
}

/// Converge `collection_id` from `current` onto `target`
///
/// `current` must be the collection as just read. `on_phase` is called as
/// each phase begins.
pub async fn synchronize<P>(
    session: &RemoteSession<'_>,
    collection_id: &str,
    current: &[CatalogItem],
    target: &[String],
    pinned_ids: &HashSet<String>,
    options: &SyncOptions,
    mut on_phase: P,
) -> CurationResult<SyncReport>
where
    P: FnMut(SyncPhase),
{
    let api = session.api();
    let batch_limit = options.batch_limit.max(1);
    let mut report = SyncReport {
        dry_run: options.dry_run,
        ..Default::default()
    };

    let current_ids: Vec<String> = current.iter().map(|i| i.id.clone()).collect();
    let target_counts = occurrence_counts(target);

    // Phase 1: categorize
    on_phase(SyncPhase::Categorize);
    let marked = categorize(&current_ids, &target_counts, pinned_ids);
    debug!(collection_id, marked = marked.len(), kept = current_ids.len() - marked.len(), "Categorized current items");

    // Phase 2: remove
    on_phase(SyncPhase::Remove);
    let batches = removal_batches(&current_ids, &marked, batch_limit);
    for batch in &batches {
        if !options.dry_run {
            session
                .call("remove_occurrences", |token| async move {
                    api.remove_occurrences(&token, collection_id, batch).await
                })
                .await?;
        }
        report.remove_calls += 1;
    }
    report.removed = marked.len();
    info!(collection_id, removed = report.removed, calls = report.remove_calls, dry_run = options.dry_run, "Remove phase complete");

    // Phase 3: add
    on_phase(SyncPhase::Add);
    let mut mirror: Vec<String> = if options.dry_run {
        remove_indices(&current_ids, &marked)
    } else {
        read_ids(session, collection_id, options.page_size).await?
    };
    let additions = missing_occurrences(&mirror, target);
    for chunk in additions.chunks(batch_limit) {
        if !options.dry_run {
            session
                .call("append", |token| async move {
                    api.append(&token, collection_id, chunk, None).await
                })
                .await?;
        }
        report.append_calls += 1;
    }
    report.added = additions.len();
    info!(collection_id, added = report.added, calls = report.append_calls, dry_run = options.dry_run, "Add phase complete");

    // Phase 4: reorder
    on_phase(SyncPhase::Reorder);
    if options.dry_run {
        mirror.extend(additions);
    } else {
        mirror = read_ids(session, collection_id, options.page_size).await?;
    }

    for (i, wanted) in target.iter().enumerate() {
        if mirror.get(i) == Some(wanted) {
            continue;
        }
        let found = mirror.iter().skip(i).position(|id| id == wanted).map(|offset| i + offset);
        let Some(from) = found else {
            warn!(collection_id, target_index = i, item_id = %wanted, "Consistency fault: target item not found during reorder");
            report.consistency_faults.push(ConsistencyFault {
                target_index: i,
                item_id: wanted.clone(),
            });
            continue;
        };

        if !options.dry_run {
            session
                .call("move_item", |token| async move {
                    api.move_item(&token, collection_id, from, i).await
                })
                .await?;
            if !options.move_delay.is_zero() {
                tokio::time::sleep(options.move_delay).await;
            }
        }
        let moved = mirror.remove(from);
        mirror.insert(i, moved);
        report.moved += 1;
    }
    info!(
        collection_id,
        moved = report.moved,
        faults = report.consistency_faults.len(),
        dry_run = options.dry_run,
        "Reorder phase complete"
    );

    Ok(report)
}

async fn read_ids(
    session: &RemoteSession<'_>,
    collection_id: &str,
    page_size: usize,
) -> CurationResult<Vec<String>> {
    let items = fetch_all_items(session, collection_id, page_size).await?;
    Ok(items.into_iter().map(|i| i.id).collect())
}

fn occurrence_counts(ids: &[String]) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for id in ids {
        *counts.entry(id.as_str()).or_insert(0) += 1;
    }
    counts
}

/// Indices (ascending) of occurrences to remove
///
/// An occurrence survives only if it is pinned and earlier occurrences of
/// the same id have not yet reached the target count.
pub fn categorize(
    current: &[String],
    target_counts: &HashMap<&str, usize>,
    pinned_ids: &HashSet<String>,
) -> Vec<usize> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut marked = Vec::new();
    for (index, id) in current.iter().enumerate() {
        let seen_count = seen.entry(id.as_str()).or_insert(0);
        let needed = target_counts.get(id.as_str()).copied().unwrap_or(0);
        let keep = pinned_ids.contains(id) && *seen_count < needed;
        *seen_count += 1;
        if !keep {
            marked.push(index);
        }
    }
    marked
}

/// Group marked indices into bulk-remove calls
///
/// Indices are processed highest first and chunked by `batch_limit`, so a
/// later batch never refers to a position shifted by an earlier one. Within
/// a batch, occurrences are grouped per id with explicit positions.
pub fn removal_batches(
    current: &[String],
    marked: &[usize],
    batch_limit: usize,
) -> Vec<Vec<RemovalTarget>> {
    let mut descending = marked.to_vec();
    descending.sort_unstable_by(|a, b| b.cmp(a));

    descending
        .chunks(batch_limit.max(1))
        .map(|chunk| {
            let mut targets: Vec<RemovalTarget> = Vec::new();
            for &index in chunk {
                let id = &current[index];
                match targets.iter_mut().find(|t| &t.id == id) {
                    Some(target) => target.positions.push(index),
                    None => targets.push(RemovalTarget {
                        id: id.clone(),
                        positions: vec![index],
                    }),
                }
            }
            targets
        })
        .collect()
}

/// Ids to append, in target order, so every id reaches its target count
pub fn missing_occurrences(current: &[String], target: &[String]) -> Vec<String> {
    let mut deficit: HashMap<&str, usize> = occurrence_counts(target);
    for id in current {
        if let Some(d) = deficit.get_mut(id.as_str()) {
            *d = d.saturating_sub(1);
        }
    }

    let mut additions = Vec::new();
    for id in target {
        if let Some(d) = deficit.get_mut(id.as_str()) {
            if *d > 0 {
                *d -= 1;
                additions.push(id.clone());
            }
        }
    }
    additions
}

fn remove_indices(ids: &[String], marked: &[usize]) -> Vec<String> {
    let marked: HashSet<usize> = marked.iter().copied().collect();
    ids.iter()
        .enumerate()
        .filter(|(i, _)| !marked.contains(i))
        .map(|(_, id)| id.clone())
        .collect()
}
