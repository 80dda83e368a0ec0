//! In-process collection backend
//!
//! Behaves like the remote API (index-based mutations, exact-occurrence
//! removal) and records every call attempt. Failures can be scripted per
//! operation to exercise the retry wrapper.

use super::{CollectionApi, CollectionDetails, CollectionPage, DetailsUpdate, RemovalTarget};
use crate::error::{CurationError, CurationResult};
use crate::types::CatalogItem;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Operation kinds, for scripting failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    FetchPage,
    Search,
    Remove,
    Append,
    Move,
    Details,
    UpdateDetails,
}

/// One recorded call attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    FetchPage { collection_id: String, offset: usize, limit: usize },
    Search { query: String },
    Remove { collection_id: String, targets: Vec<RemovalTarget> },
    Append { collection_id: String, ids: Vec<String>, position: Option<usize> },
    Move { collection_id: String, from: usize, to: usize },
    Details { collection_id: String },
    UpdateDetails { collection_id: String, update: DetailsUpdate },
}

impl RemoteCall {
    pub fn operation(&self) -> Operation {
        match self {
            Self::FetchPage { .. } => Operation::FetchPage,
            Self::Search { .. } => Operation::Search,
            Self::Remove { .. } => Operation::Remove,
            Self::Append { .. } => Operation::Append,
            Self::Move { .. } => Operation::Move,
            Self::Details { .. } => Operation::Details,
            Self::UpdateDetails { .. } => Operation::UpdateDetails,
        }
    }

    /// True for calls that change remote state
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::Remove { .. } | Self::Append { .. } | Self::Move { .. } | Self::UpdateDetails { .. }
        )
    }
}

/// Failure to inject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    RateLimited,
    ServerFault,
    CredentialExpired,
    Network,
    CriticalAuth,
    Rejected,
}

impl Failure {
    fn to_error(self) -> CurationError {
        match self {
            Self::RateLimited => CurationError::RateLimited {
                retry_after: Some(Duration::ZERO),
            },
            Self::ServerFault => CurationError::ServerFault {
                status: 503,
                retry_after: None,
            },
            Self::CredentialExpired => CurationError::CredentialExpired,
            Self::Network => CurationError::TransientNetwork("connection reset".to_string()),
            Self::CriticalAuth => CurationError::CriticalAuth("credential revoked".to_string()),
            Self::Rejected => CurationError::Remote {
                status: 400,
                message: "request rejected".to_string(),
            },
        }
    }
}

#[derive(Debug, Default)]
struct State {
    collections: HashMap<String, Vec<CatalogItem>>,
    details: HashMap<String, CollectionDetails>,
    catalog: Vec<CatalogItem>,
    calls: Vec<RemoteCall>,
    scripted: HashMap<Operation, VecDeque<Failure>>,
    always: HashMap<Operation, Failure>,
    required_token: Option<String>,
}

/// In-memory [`CollectionApi`]
#[derive(Debug, Default)]
pub struct MemoryCollection {
    state: Mutex<State>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CurationResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| setlist_common::Error::Internal("memory collection poisoned".into()).into())
    }

    /// Create or replace a collection
    pub fn insert_collection(&self, collection_id: &str, items: Vec<CatalogItem>) {
        if let Ok(mut state) = self.lock() {
            state.details.entry(collection_id.to_string()).or_insert_with(|| CollectionDetails {
                id: collection_id.to_string(),
                name: collection_id.to_string(),
                description: None,
                total: 0,
            });
            state.collections.insert(collection_id.to_string(), items);
        }
    }

    /// Make items findable by [`CollectionApi::search`]
    pub fn add_to_catalog(&self, items: impl IntoIterator<Item = CatalogItem>) {
        if let Ok(mut state) = self.lock() {
            state.catalog.extend(items);
        }
    }

    /// Fail the next `times` attempts of `operation`
    pub fn fail_times(&self, operation: Operation, failure: Failure, times: usize) {
        if let Ok(mut state) = self.lock() {
            let queue = state.scripted.entry(operation).or_default();
            queue.extend(std::iter::repeat(failure).take(times));
        }
    }

    /// Fail every attempt of `operation`
    pub fn fail_always(&self, operation: Operation, failure: Failure) {
        if let Ok(mut state) = self.lock() {
            state.always.insert(operation, failure);
        }
    }

    /// Reject any token other than `token` as expired
    pub fn require_token(&self, token: &str) {
        if let Ok(mut state) = self.lock() {
            state.required_token = Some(token.to_string());
        }
    }

    /// Current ids of a collection, in order
    pub fn ids(&self, collection_id: &str) -> Vec<String> {
        self.lock()
            .ok()
            .and_then(|s| s.collections.get(collection_id).map(|items| items.iter().map(|i| i.id.clone()).collect()))
            .unwrap_or_default()
    }

    pub fn details_of(&self, collection_id: &str) -> Option<CollectionDetails> {
        self.lock().ok().and_then(|s| s.details.get(collection_id).cloned())
    }

    /// Every call attempt so far, including failed ones
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn attempts(&self, operation: Operation) -> usize {
        self.calls().iter().filter(|c| c.operation() == operation).count()
    }

    pub fn mutating_calls(&self) -> Vec<RemoteCall> {
        self.calls().into_iter().filter(RemoteCall::is_mutating).collect()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut state) = self.lock() {
            state.calls.clear();
        }
    }

    /// Record the attempt and apply any scripted failure
    fn begin(&self, token: &str, call: RemoteCall) -> CurationResult<MutexGuard<'_, State>> {
        let mut state = self.lock()?;
        let operation = call.operation();
        state.calls.push(call);

        if let Some(required) = &state.required_token {
            if required != token {
                return Err(CurationError::CredentialExpired);
            }
        }
        if let Some(failure) = state.scripted.get_mut(&operation).and_then(VecDeque::pop_front) {
            return Err(failure.to_error());
        }
        if let Some(failure) = state.always.get(&operation) {
            return Err(failure.to_error());
        }
        Ok(state)
    }
}

fn not_found(collection_id: &str) -> CurationError {
    CurationError::Remote {
        status: 404,
        message: format!("collection '{}' not found", collection_id),
    }
}

fn bad_request(message: String) -> CurationError {
    CurationError::Remote { status: 400, message }
}

#[async_trait]
impl CollectionApi for MemoryCollection {
    async fn fetch_page(
        &self,
        token: &str,
        collection_id: &str,
        offset: usize,
        limit: usize,
    ) -> CurationResult<CollectionPage> {
        let state = self.begin(
            token,
            RemoteCall::FetchPage {
                collection_id: collection_id.to_string(),
                offset,
                limit,
            },
        )?;
        let items = state
            .collections
            .get(collection_id)
            .ok_or_else(|| not_found(collection_id))?;
        Ok(CollectionPage {
            items: items.iter().skip(offset).take(limit).cloned().collect(),
            total: items.len(),
        })
    }

    async fn search(&self, token: &str, query: &str, limit: usize) -> CurationResult<Vec<CatalogItem>> {
        let state = self.begin(
            token,
            RemoteCall::Search {
                query: query.to_string(),
            },
        )?;
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        Ok(state
            .catalog
            .iter()
            .filter(|item| {
                let haystack = format!("{} {}", item.author_display(), item.title).to_lowercase();
                terms.iter().all(|t| haystack.contains(t.as_str()))
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn remove_occurrences(
        &self,
        token: &str,
        collection_id: &str,
        targets: &[RemovalTarget],
    ) -> CurationResult<()> {
        let mut state = self.begin(
            token,
            RemoteCall::Remove {
                collection_id: collection_id.to_string(),
                targets: targets.to_vec(),
            },
        )?;
        let items = state
            .collections
            .get_mut(collection_id)
            .ok_or_else(|| not_found(collection_id))?;

        let mut positions = Vec::new();
        for target in targets {
            for &pos in &target.positions {
                match items.get(pos) {
                    Some(item) if item.id == target.id => positions.push(pos),
                    _ => {
                        return Err(bad_request(format!(
                            "item '{}' is not at position {}",
                            target.id, pos
                        )))
                    }
                }
            }
        }
        positions.sort_unstable_by(|a, b| b.cmp(a));
        positions.dedup();
        for pos in positions {
            items.remove(pos);
        }
        Ok(())
    }

    async fn append(
        &self,
        token: &str,
        collection_id: &str,
        ids: &[String],
        position: Option<usize>,
    ) -> CurationResult<()> {
        let mut state = self.begin(
            token,
            RemoteCall::Append {
                collection_id: collection_id.to_string(),
                ids: ids.to_vec(),
                position,
            },
        )?;
        let now = Utc::now();
        let new_items: Vec<CatalogItem> = ids
            .iter()
            .map(|id| {
                let mut item = state
                    .catalog
                    .iter()
                    .find(|c| &c.id == id)
                    .cloned()
                    .unwrap_or_else(|| CatalogItem::new(id.clone(), id.clone(), "Unknown"));
                item.added_at = Some(now);
                item
            })
            .collect();

        let items = state
            .collections
            .get_mut(collection_id)
            .ok_or_else(|| not_found(collection_id))?;
        let at = position.unwrap_or(items.len());
        if at > items.len() {
            return Err(bad_request(format!("position {} out of range", at)));
        }
        items.splice(at..at, new_items);
        Ok(())
    }

    async fn move_item(
        &self,
        token: &str,
        collection_id: &str,
        from: usize,
        to: usize,
    ) -> CurationResult<()> {
        let mut state = self.begin(
            token,
            RemoteCall::Move {
                collection_id: collection_id.to_string(),
                from,
                to,
            },
        )?;
        let items = state
            .collections
            .get_mut(collection_id)
            .ok_or_else(|| not_found(collection_id))?;
        if from >= items.len() || to >= items.len() {
            return Err(bad_request(format!("move {} -> {} out of range", from, to)));
        }
        let item = items.remove(from);
        items.insert(to, item);
        Ok(())
    }

    async fn details(&self, token: &str, collection_id: &str) -> CurationResult<CollectionDetails> {
        let state = self.begin(
            token,
            RemoteCall::Details {
                collection_id: collection_id.to_string(),
            },
        )?;
        let mut details = state
            .details
            .get(collection_id)
            .cloned()
            .ok_or_else(|| not_found(collection_id))?;
        details.total = state.collections.get(collection_id).map_or(0, Vec::len);
        Ok(details)
    }

    async fn update_details(
        &self,
        token: &str,
        collection_id: &str,
        update: &DetailsUpdate,
    ) -> CurationResult<()> {
        let mut state = self.begin(
            token,
            RemoteCall::UpdateDetails {
                collection_id: collection_id.to_string(),
                update: update.clone(),
            },
        )?;
        let details = state
            .details
            .get_mut(collection_id)
            .ok_or_else(|| not_found(collection_id))?;
        if let Some(name) = &update.name {
            details.name = name.clone();
        }
        if let Some(description) = &update.description {
            details.description = Some(description.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> CatalogItem {
        CatalogItem::new(id, format!("Song {}", id), "Band")
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_remove_exact_occurrences() {
        let remote = MemoryCollection::new();
        remote.insert_collection("c", vec![item("a"), item("b"), item("a"), item("c")]);

        let targets = vec![RemovalTarget {
            id: "a".into(),
            positions: vec![2],
        }];
        remote.remove_occurrences("t", "c", &targets).await.unwrap();
        assert_eq!(remote.ids("c"), ids(&["a", "b", "c"]));

        let wrong = vec![RemovalTarget {
            id: "a".into(),
            positions: vec![1],
        }];
        assert!(remote.remove_occurrences("t", "c", &wrong).await.is_err());
        assert_eq!(remote.ids("c"), ids(&["a", "b", "c"]));
    }

    #[tokio::test]
    async fn test_move_and_append() {
        let remote = MemoryCollection::new();
        remote.insert_collection("c", vec![item("d"), item("a")]);

        remote.move_item("t", "c", 1, 0).await.unwrap();
        assert_eq!(remote.ids("c"), ids(&["a", "d"]));

        remote.append("t", "c", &ids(&["x"]), Some(1)).await.unwrap();
        remote.append("t", "c", &ids(&["y"]), None).await.unwrap();
        assert_eq!(remote.ids("c"), ids(&["a", "x", "d", "y"]));
        assert_eq!(remote.mutating_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_scripted_failures_and_token_check() {
        let remote = MemoryCollection::new();
        remote.insert_collection("c", vec![item("a")]);
        remote.fail_times(Operation::FetchPage, Failure::RateLimited, 1);

        let err = remote.fetch_page("t", "c", 0, 10).await.unwrap_err();
        assert!(matches!(err, CurationError::RateLimited { .. }));
        assert_eq!(remote.fetch_page("t", "c", 0, 10).await.unwrap().total, 1);

        remote.require_token("fresh");
        assert!(matches!(
            remote.details("stale", "c").await.unwrap_err(),
            CurationError::CredentialExpired
        ));
        assert_eq!(remote.details("fresh", "c").await.unwrap().total, 1);
        assert_eq!(remote.attempts(Operation::FetchPage), 2);
    }

    #[tokio::test]
    async fn test_search_matches_all_terms() {
        let remote = MemoryCollection::new();
        remote.add_to_catalog(vec![
            CatalogItem::new("1", "Blue Monday", "New Order"),
            CatalogItem::new("2", "Monday Morning", "Other"),
        ]);
        let found = remote.search("t", "new order blue monday", 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "1");
    }
}
