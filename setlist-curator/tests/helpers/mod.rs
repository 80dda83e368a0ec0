//! Test Helper Utilities
//!
//! Shared fixtures for setlist-curator integration tests: an in-memory remote,
//! in-memory credentials and a scripted suggestion service.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use setlist_common::config::{CollectionConfig, TomlConfig};
use setlist_common::events::{CurationEvent, EventBus};
use setlist_curator::credentials::{MemoryCredentialStore, TokenGrant, TokenRefresher};
use setlist_curator::remote::MemoryCollection;
use setlist_curator::retry::RetryPolicy;
use setlist_curator::suggest::SuggestionService;
use setlist_curator::types::{CatalogItem, Suggestion};
use setlist_curator::{CurationError, CurationResult, Curator};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const OWNER: &str = "owner-1";

/// Grants "token-1", "token-2", ... valid for an hour
#[derive(Default)]
pub struct CountingRefresher {
    pub calls: AtomicUsize,
}

#[async_trait]
impl TokenRefresher for CountingRefresher {
    async fn refresh(&self, _refresh_token: &str) -> CurationResult<TokenGrant> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TokenGrant {
            access_token: format!("token-{}", n),
            expires_in: std::time::Duration::from_secs(3600),
            refresh_token: None,
        })
    }
}

/// Returns one scripted response per call, then empty lists
#[derive(Default)]
pub struct ScriptedSuggestions {
    responses: Mutex<Vec<CurationResult<Vec<Suggestion>>>>,
    pub counts: Mutex<Vec<usize>>,
}

impl ScriptedSuggestions {
    pub fn new(mut responses: Vec<CurationResult<Vec<Suggestion>>>) -> Self {
        responses.reverse();
        Self {
            responses: Mutex::new(responses),
            counts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(times: usize) -> Self {
        Self::new(
            (0..times)
                .map(|_| Err(CurationError::UpstreamService("unavailable".into())))
                .collect(),
        )
    }
}

#[async_trait]
impl SuggestionService for ScriptedSuggestions {
    async fn suggest(&self, _prompt: &str, count: usize, _exclusions: &[String]) -> CurationResult<Vec<Suggestion>> {
        self.counts.lock().unwrap().push(count);
        self.responses.lock().unwrap().pop().unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Everything a curation test needs to inspect
pub struct TestRig {
    pub curator: Curator,
    pub remote: Arc<MemoryCollection>,
    pub store: Arc<MemoryCredentialStore>,
    pub refresher: Arc<CountingRefresher>,
}

/// Configuration with zero delays and the given collections
pub fn config(collections: Vec<CollectionConfig>) -> TomlConfig {
    let mut config = TomlConfig::default();
    config.remote.page_size = 3;
    config.remote.move_delay_ms = 0;
    config.run.inter_collection_delay_ms = 0;
    config.collections = collections;
    config
}

pub fn collection(id: &str, target_size: usize) -> CollectionConfig {
    CollectionConfig::new(id, OWNER, target_size)
}

/// Curator over a fresh in-memory remote, seeded and with an immediate retry policy
pub fn rig(config: TomlConfig) -> TestRig {
    let remote = Arc::new(MemoryCollection::new());
    let store = Arc::new(MemoryCredentialStore::with_owner(OWNER, "refresh-token"));
    let refresher = Arc::new(CountingRefresher::default());
    let curator = Curator::new(config, remote.clone(), store.clone(), refresher.clone())
        .with_retry_policy(RetryPolicy::immediate(2))
        .with_seed(7);
    TestRig {
        curator,
        remote,
        store,
        refresher,
    }
}

/// Catalog item added `days_ago` days ago
pub fn item(id: &str, title: &str, author: &str, days_ago: i64) -> CatalogItem {
    let mut item = CatalogItem::new(id, title, author);
    item.added_at = Some(Utc::now() - Duration::days(days_ago));
    item
}

pub fn suggestion(author: &str, title: &str) -> Suggestion {
    Suggestion {
        author: author.to_string(),
        title: title.to_string(),
        rationale: String::new(),
    }
}

/// Drain every event currently buffered for `rx`
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<CurationEvent>) -> Vec<CurationEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn subscribe(bus: &EventBus) -> tokio::sync::broadcast::Receiver<CurationEvent> {
    bus.subscribe()
}
