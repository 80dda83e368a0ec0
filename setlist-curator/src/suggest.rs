//! Gap filling from the generative suggestion service
//!
//! Open slots are filled in rounds. Each round asks the service for more
//! suggestions than there are open slots (the overfetch ratio grows per
//! round, since some suggestions will not be found in the catalog), then
//! looks each one up by search in small concurrent batches.

use crate::error::{CurationError, CurationResult};
use crate::matching::{best_match, search_query};
use crate::remote::RemoteSession;
use crate::types::{CandidateItem, CatalogItem, Suggestion};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use setlist_common::config::SuggestionConfig;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Overfetch ratio per round; later rounds reuse the last value
pub const OVERFETCH_RATIOS: [f64; 3] = [1.5, 2.0, 3.0];

/// Search results inspected per suggestion
pub const SEARCH_RESULT_LIMIT: usize = 10;

/// Generative suggestion capability
#[async_trait]
pub trait SuggestionService: Send + Sync {
    /// Up to `count` suggestions for `prompt`, none of them in `exclusions`
    async fn suggest(
        &self,
        prompt: &str,
        count: usize,
        exclusions: &[String],
    ) -> CurationResult<Vec<Suggestion>>;
}

#[derive(Debug, Serialize)]
struct SuggestRequest<'a> {
    prompt: &'a str,
    count: usize,
    exclusions: &'a [String],
}

#[derive(Debug, Deserialize)]
struct SuggestResponse {
    #[serde(default)]
    suggestions: Vec<Suggestion>,
}

/// JSON-over-HTTP suggestion service with a bearer API key
pub struct HttpSuggestionClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpSuggestionClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> CurationResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(crate::remote::http::USER_AGENT)
            .build()
            .map_err(|e| setlist_common::Error::Internal(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    pub fn from_config(config: &SuggestionConfig, timeout: Duration) -> CurationResult<Self> {
        Self::new(config.endpoint.clone(), config.api_key.clone(), timeout)
    }
}

#[async_trait]
impl SuggestionService for HttpSuggestionClient {
    async fn suggest(
        &self,
        prompt: &str,
        count: usize,
        exclusions: &[String],
    ) -> CurationResult<Vec<Suggestion>> {
        let mut request = self.client.post(&self.endpoint).json(&SuggestRequest {
            prompt,
            count,
            exclusions,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CurationError::UpstreamService(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CurationError::UpstreamService(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let body: SuggestResponse = response
            .json()
            .await
            .map_err(|e| CurationError::UpstreamService(format!("malformed response: {}", e)))?;
        Ok(body.suggestions)
    }
}

/// Inputs for one gap-filling pass
#[derive(Debug, Clone)]
pub struct GapFillRequest<'a> {
    pub prompt: &'a str,
    pub open_slots: usize,
    /// Current collection entries (survivors); excluded from suggestions
    pub existing: &'a [CatalogItem],
    pub pinned_ids: &'a HashSet<String>,
    pub attempts: u32,
    pub batch_size: usize,
}

/// Result of gap filling
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GapFillOutcome {
    pub candidates: Vec<CandidateItem>,
    pub rounds: u32,
    pub suggestions_received: usize,
    pub unmatched: usize,
}

/// Number of suggestions to request in round `round` (0-based)
pub fn request_size(remaining: usize, round: usize) -> usize {
    let ratio = OVERFETCH_RATIOS[round.min(OVERFETCH_RATIOS.len() - 1)];
    (remaining as f64 * ratio).ceil() as usize
}

/// Fill up to `open_slots` with catalog items matching fresh suggestions
///
/// A failing suggestion call ends only its round. Search failures skip the
/// affected suggestion, except a permanently invalid credential, which is
/// returned. `on_batch(done, total)` is called after every search batch of a
/// round.
pub async fn fill_gaps<P>(
    service: &dyn SuggestionService,
    session: &RemoteSession<'_>,
    request: &GapFillRequest<'_>,
    mut on_batch: P,
) -> CurationResult<GapFillOutcome>
where
    P: FnMut(usize, usize),
{
    let api = session.api();
    let batch_size = request.batch_size.max(1);
    let mut outcome = GapFillOutcome::default();

    let mut taken: HashSet<String> = request
        .existing
        .iter()
        .map(|i| i.id.clone())
        .chain(request.pinned_ids.iter().cloned())
        .collect();
    let mut exclusions: Vec<String> = request.existing.iter().map(CatalogItem::label).collect();

    for round in 0..request.attempts as usize {
        let remaining = request.open_slots.saturating_sub(outcome.candidates.len());
        if remaining == 0 {
            break;
        }
        outcome.rounds += 1;

        let count = request_size(remaining, round);
        debug!(round, remaining, count, "Requesting suggestions");

        let suggestions = match service.suggest(request.prompt, count, &exclusions).await {
            Ok(s) => s,
            Err(e) => {
                warn!(round, error = %e, "Suggestion round failed");
                continue;
            }
        };
        outcome.suggestions_received += suggestions.len();
        exclusions.extend(suggestions.iter().map(Suggestion::label));

        let queries: Vec<String> = suggestions.iter().map(search_query).collect();
        let total_batches = suggestions.chunks(batch_size).len();

        for (batch_index, (batch, batch_queries)) in suggestions
            .chunks(batch_size)
            .zip(queries.chunks(batch_size))
            .enumerate()
        {
            let results = join_all(batch_queries.iter().map(|query| {
                session.call("search", move |token| async move {
                    api.search(&token, query, SEARCH_RESULT_LIMIT).await
                })
            }))
            .await;

            for (suggestion, result) in batch.iter().zip(results) {
                let found = match result {
                    Ok(items) => items,
                    Err(e) if e.is_critical_auth() => return Err(e),
                    Err(e) => {
                        warn!(suggestion = %suggestion.label(), error = %e, "Catalog search failed");
                        outcome.unmatched += 1;
                        continue;
                    }
                };

                let remaining = request.open_slots.saturating_sub(outcome.candidates.len());
                match best_match(suggestion, &found) {
                    Some(item) if remaining > 0 && !taken.contains(&item.id) => {
                        taken.insert(item.id.clone());
                        outcome.candidates.push(CandidateItem::suggested(item));
                    }
                    Some(_) => {}
                    None => {
                        debug!(suggestion = %suggestion.label(), "No catalog match");
                        outcome.unmatched += 1;
                    }
                }
            }

            on_batch(batch_index + 1, total_batches);
        }
    }

    info!(
        filled = outcome.candidates.len(),
        open_slots = request.open_slots,
        rounds = outcome.rounds,
        unmatched = outcome.unmatched,
        "Gap filling complete"
    );
    Ok(outcome)
}
