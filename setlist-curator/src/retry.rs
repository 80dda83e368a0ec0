//! Retry wrapper for remote calls
//!
//! Every remote call goes through [`with_retry`]:
//! 1. Obtain a valid access token from the [`CredentialManager`]
//! 2. Attempt the operation
//! 3. On failure, act on the error's [`RetryClass`]:
//!    a. `Backoff`: sleep the server-specified delay (or the default, capped)
//!    b. `Network`: sleep the fixed network delay
//!    c. `RefreshCredential`: force a refresh, at most once per call
//!    d. `Fatal`: return the error
//! 4. Give up with the last error after `1 + budget` attempts

use crate::credentials::CredentialManager;
use crate::error::{CurationResult, RetryClass};
use setlist_common::config::RetryConfig;
use std::future::Future;
use std::time::{Duration, Instant};

/// Bounds and delays for [`with_retry`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub budget: u32,
    pub default_backoff: Duration,
    pub max_backoff: Duration,
    pub network_delay: Duration,
}

impl RetryPolicy {
    /// Policy with the given budget and no waiting between attempts
    pub fn immediate(budget: u32) -> Self {
        Self {
            budget,
            default_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            network_delay: Duration::ZERO,
        }
    }

    fn backoff(&self, requested: Option<Duration>) -> Duration {
        requested.unwrap_or(self.default_backoff).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            budget: config.budget,
            default_backoff: Duration::from_millis(config.default_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            network_delay: Duration::from_millis(config.network_delay_ms),
        }
    }
}

/// Run `operation` with a fresh access token, retrying per `policy`
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g. "fetch_page", "move_item")
/// * `operation` - Closure receiving the access token and returning the call future
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    credentials: &CredentialManager,
    operation_name: &str,
    mut operation: F,
) -> CurationResult<T>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = CurationResult<T>>,
{
    let start_time = Instant::now();
    let mut attempt: u32 = 0;
    let mut retries_left = policy.budget;
    let mut refreshed = false;
    let mut token = credentials.access_token().await?;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying remote call");
        }

        let err = match operation(token.clone()).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis(),
                        "Remote call succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => err,
        };

        let class = err.retry_class();

        if class == RetryClass::RefreshCredential {
            if refreshed {
                tracing::error!(
                    operation = operation_name,
                    attempt,
                    "Access token rejected again after refresh"
                );
                return Err(err);
            }
            refreshed = true;
            tracing::warn!(operation = operation_name, attempt, "Access token expired, refreshing");
            token = credentials.force_refresh().await?;
            continue;
        }

        let delay = match class {
            RetryClass::Backoff(requested) => policy.backoff(requested),
            RetryClass::Network => policy.network_delay,
            _ => return Err(err),
        };

        if retries_left == 0 {
            tracing::error!(
                operation = operation_name,
                attempt,
                elapsed_ms = start_time.elapsed().as_millis(),
                error = %err,
                "Remote call failed: retry budget exhausted"
            );
            return Err(err);
        }
        retries_left -= 1;

        tracing::warn!(
            operation = operation_name,
            attempt,
            backoff_ms = delay.as_millis(),
            retries_left,
            error = %err,
            "Remote call failed, will retry after backoff"
        );

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        // Token may have crossed the refresh margin while waiting
        token = credentials.access_token().await?;
    }
}
