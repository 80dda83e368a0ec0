//! Pipeline coordinator
//!
//! Runs one collection through validate → fetch → filter → gap-fill →
//! allocate → diff → synchronize, reporting progress on the [`EventBus`].
//! Multiple collections are processed one after another with a fixed pause
//! in between to stay under the remote API's global rate limit.

use crate::allocation::{allocate, AllocationRequest};
use crate::credentials::{CredentialManager, CredentialStore, TokenRefresher};
use crate::diff::compute_diff;
use crate::error::{CurationError, CurationResult};
use crate::filter::{filter_items, FilterOutcome, FilterRules};
use crate::remote::{fetch_all_items, CollectionApi, DetailsUpdate, RemoteSession};
use crate::retry::RetryPolicy;
use crate::suggest::{fill_gaps, GapFillRequest, SuggestionService};
use crate::sync::{synchronize, SyncOptions, SyncPhase, SyncReport};
use crate::types::{CandidateItem, DiffResult, RemovalReason};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use setlist_common::config::{CollectionConfig, TomlConfig};
use setlist_common::events::{CurationEvent, EventBus};
use setlist_common::time;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of reconciling one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub collection_id: String,
    pub added_count: usize,
    pub removed_count: usize,
    /// Target order the collection was reconciled towards
    pub final_order: Vec<String>,
    pub diff: DiffResult,
    pub sync: SyncReport,
    pub dry_run: bool,
}

/// Filter-stage prediction for one collection, without any mutation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Estimate {
    pub collection_id: String,
    pub current_size: usize,
    pub duplicates_to_remove: usize,
    pub aged_out_count: usize,
    pub author_limit_removed: usize,
    pub size_limit_removed: usize,
    pub pinned_to_add: usize,
    pub suggested_to_add: usize,
    pub predicted_final_size: usize,
}

/// Per-collection result of a multi-collection run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded(ReconcileSummary),
    Failed {
        collection_id: String,
        reason: String,
        /// Owner must re-authorise before this collection can be curated
        credential_invalid: bool,
    },
}

impl RunOutcome {
    pub fn collection_id(&self) -> &str {
        match self {
            Self::Succeeded(summary) => &summary.collection_id,
            Self::Failed { collection_id, .. } => collection_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// Outcomes of a multi-collection run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub dry_run: bool,
    pub outcomes: Vec<RunOutcome>,
}

impl RunReport {
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_success()).count()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.len() - self.failed()
    }
}

/// Curation engine wired to its collaborators
pub struct Curator {
    config: TomlConfig,
    api: Arc<dyn CollectionApi>,
    suggestions: Option<Arc<dyn SuggestionService>>,
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    managers: Mutex<HashMap<String, Arc<CredentialManager>>>,
    events: EventBus,
    retry: RetryPolicy,
    rng: Mutex<StdRng>,
}

impl Curator {
    pub fn new(
        config: TomlConfig,
        api: Arc<dyn CollectionApi>,
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        let retry = RetryPolicy::from(&config.retry);
        Self {
            config,
            api,
            suggestions: None,
            store,
            refresher,
            managers: Mutex::new(HashMap::new()),
            events: EventBus::default(),
            retry,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_suggestions(mut self, service: Arc<dyn SuggestionService>) -> Self {
        self.suggestions = Some(service);
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Deterministic randomness for eviction, ranged pins and shuffling
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn config(&self) -> &TomlConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    fn collection(&self, collection_id: &str) -> CurationResult<&CollectionConfig> {
        self.config.collection(collection_id).ok_or_else(|| {
            CurationError::Validation(format!("collection '{}' is not configured", collection_id))
        })
    }

    fn credentials_for(&self, owner: &str) -> CurationResult<Arc<CredentialManager>> {
        let mut managers = self
            .managers
            .lock()
            .map_err(|_| setlist_common::Error::Internal("credential cache poisoned".into()))?;
        let manager = managers.entry(owner.to_string()).or_insert_with(|| {
            Arc::new(CredentialManager::new(
                owner,
                self.store.clone(),
                self.refresher.clone(),
                self.config.auth.refresh_margin(),
            ))
        });
        Ok(manager.clone())
    }

    fn validate(&self, collection: &CollectionConfig) -> CurationResult<()> {
        collection
            .validate()
            .map_err(|e| CurationError::Validation(e.to_string()))?;
        if self.config.remote.page_size == 0 || self.config.remote.batch_limit == 0 {
            return Err(CurationError::Validation(
                "remote.page_size and remote.batch_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn progress(&self, run_id: Uuid, collection_id: &str, percent: u8, step: &str) {
        debug!(collection_id, percent, step, "Progress");
        self.events.emit_lossy(CurationEvent::Progress {
            run_id,
            collection_id: collection_id.to_string(),
            percent,
            step: step.to_string(),
            timestamp: time::now(),
        });
    }

    /// Reconcile one configured collection
    pub async fn reconcile(&self, collection_id: &str, dry_run: bool) -> CurationResult<ReconcileSummary> {
        self.reconcile_in_run(Uuid::new_v4(), collection_id, dry_run).await
    }

    async fn reconcile_in_run(
        &self,
        run_id: Uuid,
        collection_id: &str,
        dry_run: bool,
    ) -> CurationResult<ReconcileSummary> {
        let result = self.reconcile_inner(run_id, collection_id, dry_run).await;
        match &result {
            Ok(summary) => {
                info!(
                    collection_id,
                    added = summary.added_count,
                    removed = summary.removed_count,
                    moved = summary.sync.moved,
                    dry_run,
                    "Collection curated"
                );
                self.events.emit_lossy(CurationEvent::CollectionCompleted {
                    run_id,
                    collection_id: collection_id.to_string(),
                    added: summary.added_count,
                    removed: summary.removed_count,
                    dry_run,
                    timestamp: time::now(),
                });
            }
            Err(e) => {
                error!(collection_id, error = %e, dry_run, "Collection curation failed");
                self.events.emit_lossy(CurationEvent::CollectionFailed {
                    run_id,
                    collection_id: collection_id.to_string(),
                    reason: e.to_string(),
                    timestamp: time::now(),
                });
            }
        }
        result
    }

    async fn reconcile_inner(
        &self,
        run_id: Uuid,
        collection_id: &str,
        dry_run: bool,
    ) -> CurationResult<ReconcileSummary> {
        let collection = self.collection(collection_id)?;
        self.validate(collection)?;

        let credentials = self.credentials_for(&collection.owner)?;
        let session = RemoteSession::new(self.api.as_ref(), credentials.as_ref(), self.retry.clone());
        let pinned_ids = collection.pinned_ids();

        // Fetch
        let before = fetch_all_items(&session, collection_id, self.config.remote.page_size).await?;
        self.progress(run_id, collection_id, 10, "fetched");

        // Filter
        let filtered = filter_items(&before, &FilterRules::from(collection), &pinned_ids, time::now());
        info!(
            collection_id,
            before = before.len(),
            survivors = filtered.survivors.len(),
            removed = filtered.removed.len(),
            "Filter stage complete"
        );
        self.progress(run_id, collection_id, 20, "filtered");

        let carried: Vec<CandidateItem> = filtered
            .unpinned_survivors()
            .filter(|s| !pinned_ids.contains(&s.item.id))
            .map(CandidateItem::from)
            .collect();

        // Gap filling
        let open_slots = open_slots(collection, carried.len());
        let suggested = match (&self.suggestions, &collection.suggestion_prompt) {
            (Some(service), Some(prompt)) if open_slots > 0 => {
                let existing: Vec<_> = filtered.survivors.iter().map(|s| s.item.clone()).collect();
                let request = GapFillRequest {
                    prompt: prompt.as_str(),
                    open_slots,
                    existing: &existing,
                    pinned_ids: &pinned_ids,
                    attempts: self.config.suggestions.attempts,
                    batch_size: self.config.suggestions.search_batch_size,
                };
                let outcome = fill_gaps(service.as_ref(), &session, &request, |done, total| {
                    let percent = 30 + (30 * done / total.max(1)).min(30);
                    self.progress(run_id, collection_id, percent as u8, "matching suggestions");
                })
                .await?;
                outcome.candidates
            }
            _ => Vec::new(),
        };
        self.progress(run_id, collection_id, 60, "suggestions matched");

        // Allocation
        let pinned_present: Vec<_> = filtered
            .survivors
            .iter()
            .filter(|s| s.is_pinned)
            .map(|s| s.item.clone())
            .collect();
        let allocation = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| setlist_common::Error::Internal("rng poisoned".into()))?;
            allocate(
                &AllocationRequest {
                    pinned: &collection.pinned,
                    pinned_present: &pinned_present,
                    carried: &carried,
                    suggested: &suggested,
                    target_size: collection.target_size,
                    shuffle: collection.shuffle_at_end,
                    policy: collection.size_limit_policy,
                    author_separation: collection.min_author_separation,
                },
                &mut *rng,
            )
        };
        if !allocation.unplaced_pins.is_empty() {
            warn!(collection_id, pins = ?allocation.unplaced_pins, "Pinned items without a slot");
        }
        self.progress(run_id, collection_id, 70, "allocated");

        // Diff
        let reasons = removal_reasons(&filtered, &allocation.evicted);
        let diff = compute_diff(
            &before,
            &filtered.survivors,
            &allocation.ordered_ids,
            &collection.pinned,
            &suggested,
            Some(&reasons),
        );

        // Synchronization
        let options = SyncOptions::from_config(&self.config.remote, dry_run);
        let report = synchronize(
            &session,
            collection_id,
            &before,
            &allocation.ordered_ids,
            &pinned_ids,
            &options,
            |phase| {
                let (percent, step) = match phase {
                    SyncPhase::Categorize => (80, "categorizing"),
                    SyncPhase::Remove => (85, "removing"),
                    SyncPhase::Add => (90, "adding"),
                    SyncPhase::Reorder => (95, "reordering"),
                };
                self.progress(run_id, collection_id, percent, step);
            },
        )
        .await?;

        for fault in &report.consistency_faults {
            self.events.emit_lossy(CurationEvent::ConsistencyFault {
                run_id,
                collection_id: collection_id.to_string(),
                target_index: fault.target_index,
                item_id: fault.item_id.clone(),
                timestamp: time::now(),
            });
        }

        if !dry_run {
            if let Some(description) = &collection.description {
                let update = DetailsUpdate {
                    name: None,
                    description: Some(description.clone()),
                };
                let api = session.api();
                let update = &update;
                session
                    .call("update_details", |token| async move {
                        api.update_details(&token, collection_id, update).await
                    })
                    .await?;
            }
        }
        self.progress(run_id, collection_id, 100, "done");

        Ok(ReconcileSummary {
            collection_id: collection_id.to_string(),
            added_count: diff.added.len(),
            removed_count: diff.removed.len(),
            final_order: allocation.ordered_ids,
            diff,
            sync: report,
            dry_run,
        })
    }

    /// Predict what a run would change, using only fetch and the filter stage
    pub async fn estimate(&self, collection_id: &str) -> CurationResult<Estimate> {
        let collection = self.collection(collection_id)?;
        self.validate(collection)?;

        let credentials = self.credentials_for(&collection.owner)?;
        let session = RemoteSession::new(self.api.as_ref(), credentials.as_ref(), self.retry.clone());
        let pinned_ids = collection.pinned_ids();

        let before = fetch_all_items(&session, collection_id, self.config.remote.page_size).await?;
        let filtered = filter_items(&before, &FilterRules::from(collection), &pinned_ids, time::now());

        Ok(estimate_from(collection, before.len(), &filtered, self.suggestions.is_some()))
    }

    /// Reconcile every configured collection
    pub async fn run_all(&self, dry_run: bool) -> RunReport {
        let ids: Vec<String> = self.config.collections.iter().map(|c| c.id.clone()).collect();
        self.run_collections(&ids, dry_run).await
    }

    /// Reconcile the given collections sequentially
    ///
    /// A failure is recorded against its collection and the run continues.
    pub async fn run_collections(&self, collection_ids: &[String], dry_run: bool) -> RunReport {
        let run_id = Uuid::new_v4();
        let delay = self.config.run.inter_collection_delay();
        info!(%run_id, collections = collection_ids.len(), dry_run, "Curation run started");
        self.events.emit_lossy(CurationEvent::RunStarted {
            run_id,
            collection_count: collection_ids.len(),
            dry_run,
            timestamp: time::now(),
        });

        let mut outcomes = Vec::with_capacity(collection_ids.len());
        for (i, collection_id) in collection_ids.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let outcome = match self.reconcile_in_run(run_id, collection_id, dry_run).await {
                Ok(summary) => RunOutcome::Succeeded(summary),
                Err(e) => {
                    let credential_invalid = e.is_critical_auth();
                    if credential_invalid {
                        self.report_invalid_credential(run_id, collection_id, &e).await;
                    }
                    RunOutcome::Failed {
                        collection_id: collection_id.clone(),
                        reason: e.to_string(),
                        credential_invalid,
                    }
                }
            };
            outcomes.push(outcome);
        }

        let report = RunReport {
            run_id,
            dry_run,
            outcomes,
        };
        info!(
            %run_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Curation run complete"
        );
        self.events.emit_lossy(CurationEvent::RunCompleted {
            run_id,
            succeeded: report.succeeded(),
            failed: report.failed(),
            timestamp: time::now(),
        });
        report
    }

    async fn report_invalid_credential(&self, run_id: Uuid, collection_id: &str, err: &CurationError) {
        let Some(owner) = self.config.collection(collection_id).map(|c| c.owner.clone()) else {
            return;
        };
        warn!(owner = %owner, collection_id, error = %err, "Credential permanently invalid");

        match self.credentials_for(&owner) {
            Ok(manager) => {
                if let Err(e) = manager.mark_invalid(&err.to_string()).await {
                    warn!(owner = %owner, error = %e, "Could not mark credential invalid");
                }
            }
            Err(e) => warn!(owner = %owner, error = %e, "Could not mark credential invalid"),
        }

        self.events.emit_lossy(CurationEvent::CredentialInvalid {
            run_id,
            owner,
            collection_id: collection_id.to_string(),
            reason: err.to_string(),
            timestamp: time::now(),
        });
    }
}

/// Cells left after pins and carried items
fn open_slots(collection: &CollectionConfig, carried: usize) -> usize {
    let pinned = collection.pinned.len().min(collection.target_size);
    collection
        .target_size
        .saturating_sub(pinned)
        .saturating_sub(carried)
}

/// Filter reasons, plus `size_limit` for carried items that were evicted
fn removal_reasons(filtered: &FilterOutcome, evicted: &[CandidateItem]) -> HashMap<String, RemovalReason> {
    let mut reasons = filtered.reason_map();
    for candidate in evicted.iter().filter(|c| !c.is_new()) {
        reasons
            .entry(candidate.id.clone())
            .or_insert(RemovalReason::SizeLimit);
    }
    reasons
}

fn estimate_from(
    collection: &CollectionConfig,
    current_size: usize,
    filtered: &FilterOutcome,
    suggestions_available: bool,
) -> Estimate {
    let pinned_ids = collection.pinned_ids();
    let present: HashSet<&str> = filtered.survivors.iter().map(|s| s.item.id.as_str()).collect();
    let carried = filtered
        .unpinned_survivors()
        .filter(|s| !pinned_ids.contains(&s.item.id))
        .count();

    let pinned_slots = collection.pinned.len().min(collection.target_size);
    let open_for_pool = collection.target_size - pinned_slots;
    let size_limit_removed = carried.saturating_sub(open_for_pool);
    let pinned_to_add = collection
        .pinned
        .iter()
        .take(pinned_slots)
        .filter(|p| !present.contains(p.id.as_str()))
        .count();
    let suggested_to_add = if suggestions_available && collection.suggestion_prompt.is_some() {
        open_slots(collection, carried)
    } else {
        0
    };

    Estimate {
        collection_id: collection.id.clone(),
        current_size,
        duplicates_to_remove: filtered.count(RemovalReason::Duplicate),
        aged_out_count: filtered.count(RemovalReason::Expired),
        author_limit_removed: filtered.count(RemovalReason::AuthorLimit),
        size_limit_removed,
        pinned_to_add,
        suggested_to_add,
        predicted_final_size: (pinned_slots + carried.min(open_for_pool) + suggested_to_add)
            .min(collection.target_size),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CatalogItem, PinnedItem, PositionRange, SurvivingItem};

    fn survivor(id: &str, pinned: bool) -> SurvivingItem {
        SurvivingItem {
            item: CatalogItem::new(id, id, "a"),
            is_pinned: pinned,
        }
    }

    #[test]
    fn test_open_slots_accounts_for_pins_and_carried() {
        let mut collection = CollectionConfig::new("c", "o", 5);
        collection.pinned = vec![
            PinnedItem::new("p1", PositionRange::fixed(1)),
            PinnedItem::new("p2", PositionRange::fixed(2)),
        ];
        assert_eq!(open_slots(&collection, 1), 2);
        assert_eq!(open_slots(&collection, 9), 0);

        collection.target_size = 1;
        assert_eq!(open_slots(&collection, 0), 0);
    }

    #[test]
    fn test_estimate_counts() {
        let mut collection = CollectionConfig::new("c", "o", 3);
        collection.pinned = vec![
            PinnedItem::new("p1", PositionRange::fixed(1)),
            PinnedItem::new("p2", PositionRange::fixed(2)),
        ];
        collection.suggestion_prompt = Some("more".into());

        let filtered = FilterOutcome {
            survivors: vec![survivor("p1", true), survivor("x", false), survivor("y", false)],
            removed: vec![crate::types::RemovedItem {
                item: CatalogItem::new("d", "d", "a"),
                reason: RemovalReason::Duplicate,
            }],
        };

        let estimate = estimate_from(&collection, 4, &filtered, true);
        assert_eq!(estimate.duplicates_to_remove, 1);
        assert_eq!(estimate.pinned_to_add, 1);
        assert_eq!(estimate.size_limit_removed, 1);
        assert_eq!(estimate.suggested_to_add, 0);
        assert_eq!(estimate.predicted_final_size, 3);
    }

    #[test]
    fn test_evicted_carried_items_get_size_limit_reason() {
        let filtered = FilterOutcome::default();
        let evicted = vec![
            CandidateItem::carried(&CatalogItem::new("old", "t", "a")),
            CandidateItem::suggested(&CatalogItem::new("new", "t", "a")),
        ];
        let reasons = removal_reasons(&filtered, &evicted);
        assert_eq!(reasons.get("old"), Some(&RemovalReason::SizeLimit));
        assert!(!reasons.contains_key("new"));
    }
}
