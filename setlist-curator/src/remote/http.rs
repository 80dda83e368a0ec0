//! HTTP collection API client
//!
//! JSON over HTTPS with bearer tokens. A client-side token bucket keeps the
//! request rate under the configured quota; status codes are mapped onto
//! [`CurationError`] so the retry wrapper can classify them.

use super::{CollectionApi, CollectionDetails, CollectionPage, DetailsUpdate, RemovalTarget};
use crate::error::{CurationError, CurationResult};
use crate::types::CatalogItem;
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use setlist_common::config::RemoteConfig;
use std::num::NonZeroU32;
use std::time::Duration;

/// User-Agent sent with every request
pub const USER_AGENT: &str = concat!("setlist-curator/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<CatalogItem>,
}

#[derive(Debug, Serialize)]
struct RemoveRequest<'a> {
    items: &'a [RemovalTarget],
}

#[derive(Debug, Serialize)]
struct AppendRequest<'a> {
    ids: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<usize>,
}

#[derive(Debug, Serialize)]
struct MoveRequest {
    range_start: usize,
    insert_before: usize,
}

/// `reqwest` implementation of [`CollectionApi`]
pub struct HttpCollectionClient {
    client: Client,
    base_url: String,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HttpCollectionClient {
    pub fn new(base_url: impl Into<String>, requests_per_second: u32, timeout: Duration) -> CurationResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| setlist_common::Error::Internal(format!("HTTP client: {}", e)))?;

        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter,
        })
    }

    pub fn from_config(config: &RemoteConfig) -> CurationResult<Self> {
        Self::new(
            config.base_url.clone(),
            config.requests_per_second,
            config.request_timeout(),
        )
    }

    fn collection_url(&self, collection_id: &str) -> String {
        format!("{}/collections/{}", self.base_url, collection_id)
    }

    /// Wait for a rate-limit permit, send, and map error statuses
    async fn send(&self, request: RequestBuilder, token: &str) -> CurationResult<Response> {
        self.rate_limiter.until_ready().await;
        let response = request.bearer_auth(token).send().await?;
        check_status(response).await
    }
}

/// Translate a remove-then-insert move into the API's `insert_before`
///
/// The API inserts before an index computed on the pre-move list, so a
/// forward move has to point one past the destination.
pub fn insert_before_index(from: usize, to: usize) -> usize {
    if to > from {
        to + 1
    } else {
        to
    }
}

/// Parse a `Retry-After` header given in seconds
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map a non-success response onto the error taxonomy
pub async fn check_status(response: Response) -> CurationResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let wait = retry_after(response.headers());
    match status.as_u16() {
        429 => Err(CurationError::RateLimited { retry_after: wait }),
        401 => Err(CurationError::CredentialExpired),
        code if code >= 500 => Err(CurationError::ServerFault {
            status: code,
            retry_after: wait,
        }),
        code => {
            let message = response.text().await.unwrap_or_default();
            Err(CurationError::Remote { status: code, message })
        }
    }
}

#[async_trait]
impl CollectionApi for HttpCollectionClient {
    async fn fetch_page(
        &self,
        token: &str,
        collection_id: &str,
        offset: usize,
        limit: usize,
    ) -> CurationResult<CollectionPage> {
        tracing::debug!(collection_id, offset, limit, "GET collection page");
        let request = self
            .client
            .get(format!("{}/items", self.collection_url(collection_id)))
            .query(&[("offset", offset), ("limit", limit)]);
        let page: CollectionPage = self.send(request, token).await?.json().await?;
        Ok(page)
    }

    async fn search(&self, token: &str, query: &str, limit: usize) -> CurationResult<Vec<CatalogItem>> {
        tracing::debug!(query, limit, "GET search");
        let request = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("q", query.to_string()), ("limit", limit.to_string())]);
        let body: SearchResponse = self.send(request, token).await?.json().await?;
        Ok(body.items)
    }

    async fn remove_occurrences(
        &self,
        token: &str,
        collection_id: &str,
        targets: &[RemovalTarget],
    ) -> CurationResult<()> {
        tracing::debug!(collection_id, targets = targets.len(), "DELETE items");
        let request = self
            .client
            .delete(format!("{}/items", self.collection_url(collection_id)))
            .json(&RemoveRequest { items: targets });
        self.send(request, token).await?;
        Ok(())
    }

    async fn append(
        &self,
        token: &str,
        collection_id: &str,
        ids: &[String],
        position: Option<usize>,
    ) -> CurationResult<()> {
        tracing::debug!(collection_id, count = ids.len(), ?position, "POST items");
        let request = self
            .client
            .post(format!("{}/items", self.collection_url(collection_id)))
            .json(&AppendRequest { ids, position });
        self.send(request, token).await?;
        Ok(())
    }

    async fn move_item(
        &self,
        token: &str,
        collection_id: &str,
        from: usize,
        to: usize,
    ) -> CurationResult<()> {
        let insert_before = insert_before_index(from, to);
        tracing::debug!(collection_id, from, to, "PUT items (move)");
        let request = self
            .client
            .put(format!("{}/items", self.collection_url(collection_id)))
            .json(&MoveRequest {
                range_start: from,
                insert_before,
            });
        self.send(request, token).await?;
        Ok(())
    }

    async fn details(&self, token: &str, collection_id: &str) -> CurationResult<CollectionDetails> {
        let request = self.client.get(self.collection_url(collection_id));
        let details: CollectionDetails = self.send(request, token).await?.json().await?;
        Ok(details)
    }

    async fn update_details(
        &self,
        token: &str,
        collection_id: &str,
        update: &DetailsUpdate,
    ) -> CurationResult<()> {
        let request = self.client.put(self.collection_url(collection_id)).json(update);
        self.send(request, token).await?;
        Ok(())
    }
}
