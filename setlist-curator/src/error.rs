//! Error types for setlist-curator
//!
//! Every remote failure is classified so the retry wrapper can decide
//! whether to back off, refresh the credential, or give up.

use std::time::Duration;
use thiserror::Error;

/// Curation error type
#[derive(Debug, Error)]
pub enum CurationError {
    /// Malformed configuration or input, rejected before any remote call
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Remote API asked us to slow down
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Remote API reported a server-side fault
    #[error("Server fault (HTTP {status})")]
    ServerFault {
        status: u16,
        retry_after: Option<Duration>,
    },

    /// Access token rejected as expired
    #[error("Access credential expired")]
    CredentialExpired,

    /// Connection or timeout failure
    #[error("Transient network fault: {0}")]
    TransientNetwork(String),

    /// Suggestion service failure
    #[error("Suggestion service error: {0}")]
    UpstreamService(String),

    /// Credential permanently invalid (revoked, unknown owner)
    #[error("Credential invalid: {0}")]
    CriticalAuth(String),

    /// Remote API rejected the request
    #[error("Remote API error (HTTP {status}): {message}")]
    Remote { status: u16, message: String },

    /// Remote payload could not be decoded
    #[error("Malformed remote response: {0}")]
    Decode(String),

    /// setlist-common error
    #[error("Common error: {0}")]
    Common(#[from] setlist_common::Error),
}

/// What the retry wrapper should do with a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Wait (server-specified or default backoff) and retry
    Backoff(Option<Duration>),
    /// Force a credential refresh and retry once
    RefreshCredential,
    /// Wait the fixed network delay and retry
    Network,
    /// Propagate unchanged
    Fatal,
}

impl CurationError {
    /// Classify this error for the retry wrapper
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::RateLimited { retry_after } => RetryClass::Backoff(*retry_after),
            Self::ServerFault { retry_after, .. } => RetryClass::Backoff(*retry_after),
            Self::CredentialExpired => RetryClass::RefreshCredential,
            Self::TransientNetwork(_) => RetryClass::Network,
            _ => RetryClass::Fatal,
        }
    }

    /// True if the owner must re-authorise before the collection can be curated
    pub fn is_critical_auth(&self) -> bool {
        matches!(self, Self::CriticalAuth(_))
    }
}

impl From<reqwest::Error> for CurationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::TransientNetwork(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Remote {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            Self::TransientNetwork(err.to_string())
        }
    }
}

/// Result type for curation operations
pub type CurationResult<T> = Result<T, CurationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classes() {
        let wait = Some(Duration::from_secs(3));
        assert_eq!(
            CurationError::RateLimited { retry_after: wait }.retry_class(),
            RetryClass::Backoff(wait)
        );
        assert_eq!(
            CurationError::ServerFault { status: 503, retry_after: None }.retry_class(),
            RetryClass::Backoff(None)
        );
        assert_eq!(
            CurationError::CredentialExpired.retry_class(),
            RetryClass::RefreshCredential
        );
        assert_eq!(
            CurationError::TransientNetwork("reset".into()).retry_class(),
            RetryClass::Network
        );
        assert_eq!(
            CurationError::CriticalAuth("revoked".into()).retry_class(),
            RetryClass::Fatal
        );
        assert_eq!(
            CurationError::Remote { status: 404, message: "gone".into() }.retry_class(),
            RetryClass::Fatal
        );
    }

    #[test]
    fn test_common_error_converts() {
        let err: CurationError = setlist_common::Error::InvalidInput("bad".into()).into();
        assert!(matches!(err, CurationError::Common(_)));
        assert!(err.to_string().contains("bad"));
    }
}
