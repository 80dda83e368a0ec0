//! Remote collection access
//!
//! [`CollectionApi`] is the capability contract the engine needs from the
//! remote catalog: paginated listing, free-text search, bulk positional
//! remove, bulk append, single positional move and basic metadata.
//! [`RemoteSession`] binds an API to one owner's credentials and routes every
//! call through the retry wrapper.

pub mod http;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;

use crate::credentials::CredentialManager;
use crate::error::CurationResult;
use crate::retry::{with_retry, RetryPolicy};
use crate::types::CatalogItem;
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::debug;

pub use http::HttpCollectionClient;
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryCollection;

/// One page of a collection listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionPage {
    pub items: Vec<CatalogItem>,
    /// Total entries in the collection, across all pages
    pub total: usize,
}

/// Collection metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDetails {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub total: usize,
}

/// Metadata fields to change; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailsUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Exact occurrences of one id to remove (0-based positions)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalTarget {
    pub id: String,
    pub positions: Vec<usize>,
}

/// Remote catalog/collection capability
#[async_trait]
pub trait CollectionApi: Send + Sync {
    async fn fetch_page(
        &self,
        token: &str,
        collection_id: &str,
        offset: usize,
        limit: usize,
    ) -> CurationResult<CollectionPage>;

    async fn search(&self, token: &str, query: &str, limit: usize) -> CurationResult<Vec<CatalogItem>>;

    /// Remove exactly the listed occurrences in one call
    async fn remove_occurrences(
        &self,
        token: &str,
        collection_id: &str,
        targets: &[RemovalTarget],
    ) -> CurationResult<()>;

    /// Insert `ids` at `position`, or at the end when `None`
    async fn append(
        &self,
        token: &str,
        collection_id: &str,
        ids: &[String],
        position: Option<usize>,
    ) -> CurationResult<()>;

    /// Move the entry at `from` so that it ends up at index `to`
    async fn move_item(
        &self,
        token: &str,
        collection_id: &str,
        from: usize,
        to: usize,
    ) -> CurationResult<()>;

    async fn details(&self, token: &str, collection_id: &str) -> CurationResult<CollectionDetails>;

    async fn update_details(
        &self,
        token: &str,
        collection_id: &str,
        update: &DetailsUpdate,
    ) -> CurationResult<()>;
}

/// A [`CollectionApi`] bound to one owner's credentials and a retry policy
pub struct RemoteSession<'a> {
    api: &'a dyn CollectionApi,
    credentials: &'a CredentialManager,
    policy: RetryPolicy,
}

impl<'a> RemoteSession<'a> {
    pub fn new(
        api: &'a dyn CollectionApi,
        credentials: &'a CredentialManager,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            api,
            credentials,
            policy,
        }
    }

    pub fn api(&self) -> &'a dyn CollectionApi {
        self.api
    }

    pub fn credentials(&self) -> &'a CredentialManager {
        self.credentials
    }

    /// Run one remote call under the retry wrapper
    pub async fn call<F, Fut, T>(&self, operation_name: &str, operation: F) -> CurationResult<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = CurationResult<T>>,
    {
        with_retry(&self.policy, self.credentials, operation_name, operation).await
    }
}

/// Read every entry of a collection in order
///
/// The first page is read alone to learn the total; the remaining pages are
/// then fetched concurrently and concatenated in page order.
pub async fn fetch_all_items(
    session: &RemoteSession<'_>,
    collection_id: &str,
    page_size: usize,
) -> CurationResult<Vec<CatalogItem>> {
    let api = session.api();
    let page_size = page_size.max(1);

    let first = session
        .call("fetch_page", |token| async move {
            api.fetch_page(&token, collection_id, 0, page_size).await
        })
        .await?;

    let total = first.total;
    let offsets: Vec<usize> = (page_size..total).step_by(page_size).collect();
    debug!(
        collection_id,
        total,
        pages = offsets.len() + 1,
        "Fetching collection"
    );

    let rest = try_join_all(offsets.into_iter().map(|offset| {
        session.call("fetch_page", move |token| async move {
            api.fetch_page(&token, collection_id, offset, page_size).await
        })
    }))
    .await?;

    let mut items = first.items;
    for page in rest {
        items.extend(page.items);
    }
    Ok(items)
}
