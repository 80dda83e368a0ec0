//! Owner credentials and access-token refresh
//!
//! Each collection owner has a long-lived refresh token kept in a
//! [`CredentialStore`]. The [`CredentialManager`] turns it into short-lived
//! access tokens, refreshing ahead of expiry and persisting rotated refresh
//! tokens back to the store.

use crate::error::{CurationError, CurationResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Persisted credential for one owner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub refresh_token: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Set once the credential was found to be permanently invalid
    #[serde(default)]
    pub invalid: bool,
}

/// Where owner credentials live
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the credential for `owner`
    ///
    /// An unknown owner is a [`CurationError::CriticalAuth`].
    async fn load(&self, owner: &str) -> CurationResult<StoredCredential>;

    /// Persist a rotated refresh token
    async fn save_refresh_token(&self, owner: &str, refresh_token: &str) -> CurationResult<()>;

    /// Persist the current access token and its expiry
    async fn cache_access(
        &self,
        owner: &str,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> CurationResult<()>;

    /// Flag the credential as unusable until the owner re-authorises
    async fn mark_invalid(&self, owner: &str, reason: &str) -> CurationResult<()>;
}

/// Result of a refresh-token exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: Duration,
    /// Present when the server rotated the refresh token
    pub refresh_token: Option<String>,
}

/// Exchanges a refresh token for an access token
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> CurationResult<TokenGrant>;
}

// ============================================================================
// Stores
// ============================================================================

/// In-process credential store
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: Mutex<HashMap<String, StoredCredential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with a single owner holding `refresh_token`
    pub fn with_owner(owner: &str, refresh_token: &str) -> Self {
        let store = Self::new();
        store.insert(
            owner,
            StoredCredential {
                refresh_token: refresh_token.to_string(),
                ..Default::default()
            },
        );
        store
    }

    pub fn insert(&self, owner: &str, credential: StoredCredential) {
        if let Ok(mut map) = self.credentials.lock() {
            map.insert(owner.to_string(), credential);
        }
    }

    /// Snapshot of the stored credential, if any
    pub fn get(&self, owner: &str) -> Option<StoredCredential> {
        self.credentials
            .lock()
            .ok()
            .and_then(|map| map.get(owner).cloned())
    }

    fn update<F>(&self, owner: &str, f: F) -> CurationResult<()>
    where
        F: FnOnce(&mut StoredCredential),
    {
        let mut map = self
            .credentials
            .lock()
            .map_err(|_| CurationError::CriticalAuth("credential store poisoned".to_string()))?;
        let credential = map
            .get_mut(owner)
            .ok_or_else(|| CurationError::CriticalAuth(format!("no credential for owner '{}'", owner)))?;
        f(credential);
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, owner: &str) -> CurationResult<StoredCredential> {
        self.get(owner)
            .ok_or_else(|| CurationError::CriticalAuth(format!("no credential for owner '{}'", owner)))
    }

    async fn save_refresh_token(&self, owner: &str, refresh_token: &str) -> CurationResult<()> {
        self.update(owner, |c| c.refresh_token = refresh_token.to_string())
    }

    async fn cache_access(
        &self,
        owner: &str,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> CurationResult<()> {
        self.update(owner, |c| {
            c.access_token = Some(access_token.to_string());
            c.expires_at = Some(expires_at);
        })
    }

    async fn mark_invalid(&self, owner: &str, _reason: &str) -> CurationResult<()> {
        self.update(owner, |c| c.invalid = true)
    }
}

/// Credential store backed by a JSON file (`{ "owner": { ... } }`)
///
/// The whole file is rewritten on every change via a temp file and rename.
#[derive(Debug)]
pub struct JsonFileCredentialStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonFileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn read_all(&self) -> CurationResult<HashMap<String, StoredCredential>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                CurationError::Common(setlist_common::Error::Config(format!(
                    "credential file {} is malformed: {}",
                    self.path.display(),
                    e
                )))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(setlist_common::Error::Io(e).into()),
        }
    }

    async fn write_all(&self, all: &HashMap<String, StoredCredential>) -> CurationResult<()> {
        let json = serde_json::to_string_pretty(all)
            .map_err(|e| setlist_common::Error::Internal(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(setlist_common::Error::Io)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(setlist_common::Error::Io)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(setlist_common::Error::Io)?;
        Ok(())
    }

    async fn modify<F>(&self, owner: &str, f: F) -> CurationResult<()>
    where
        F: FnOnce(&mut StoredCredential) + Send,
    {
        let _guard = self.lock.lock().await;
        let mut all = self.read_all().await?;
        let credential = all
            .get_mut(owner)
            .ok_or_else(|| CurationError::CriticalAuth(format!("no credential for owner '{}'", owner)))?;
        f(credential);
        self.write_all(&all).await
    }
}

#[async_trait]
impl CredentialStore for JsonFileCredentialStore {
    async fn load(&self, owner: &str) -> CurationResult<StoredCredential> {
        let _guard = self.lock.lock().await;
        let mut all = self.read_all().await?;
        all.remove(owner)
            .ok_or_else(|| CurationError::CriticalAuth(format!("no credential for owner '{}'", owner)))
    }

    async fn save_refresh_token(&self, owner: &str, refresh_token: &str) -> CurationResult<()> {
        let token = refresh_token.to_string();
        self.modify(owner, move |c| c.refresh_token = token).await
    }

    async fn cache_access(
        &self,
        owner: &str,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> CurationResult<()> {
        let token = access_token.to_string();
        self.modify(owner, move |c| {
            c.access_token = Some(token);
            c.expires_at = Some(expires_at);
        })
        .await
    }

    async fn mark_invalid(&self, owner: &str, reason: &str) -> CurationResult<()> {
        warn!(owner, reason, "Marking credential invalid");
        self.modify(owner, |c| c.invalid = true).await
    }
}

// ============================================================================
// OAuth refresh
// ============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

fn default_expires_in() -> u64 {
    3600
}

/// Refresh-token grant against an OAuth token endpoint
pub struct OAuthTokenRefresher {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: Option<String>,
}

impl OAuthTokenRefresher {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        timeout: Duration,
    ) -> CurationResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| setlist_common::Error::Internal(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret,
        })
    }
}

#[async_trait]
impl TokenRefresher for OAuthTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> CurationResult<TokenGrant> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        debug!(token_url = %self.token_url, "Refreshing access token");

        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, self.client_secret.as_ref())
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: TokenResponse = response.json().await?;
            return Ok(TokenGrant {
                access_token: body.access_token,
                expires_in: Duration::from_secs(body.expires_in),
                refresh_token: body.refresh_token,
            });
        }

        let retry_after = crate::remote::http::retry_after(response.headers());
        let text = response.text().await.unwrap_or_default();
        let parsed: Option<TokenErrorResponse> = serde_json::from_str(&text).ok();

        match status.as_u16() {
            400 | 401 if parsed.as_ref().map(|e| e.error.as_str()) == Some("invalid_grant") => {
                let detail = parsed
                    .and_then(|e| e.error_description)
                    .unwrap_or_else(|| "refresh token rejected".to_string());
                Err(CurationError::CriticalAuth(detail))
            }
            429 => Err(CurationError::RateLimited { retry_after }),
            code if code >= 500 => Err(CurationError::ServerFault {
                status: code,
                retry_after,
            }),
            code => Err(CurationError::Remote {
                status: code,
                message: text,
            }),
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Hands out valid access tokens for one owner
pub struct CredentialManager {
    owner: String,
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    margin: Duration,
    cached: tokio::sync::Mutex<Option<CachedToken>>,
}

impl CredentialManager {
    pub fn new(
        owner: impl Into<String>,
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
        margin: Duration,
    ) -> Self {
        Self {
            owner: owner.into(),
            store,
            refresher,
            margin,
            cached: tokio::sync::Mutex::new(None),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Valid access token, refreshing if absent or expiring within the margin
    pub async fn access_token(&self) -> CurationResult<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if self.is_fresh(token.expires_at) {
                return Ok(token.access_token.clone());
            }
        }

        let stored = self.store.load(&self.owner).await?;
        if stored.invalid {
            return Err(CurationError::CriticalAuth(format!(
                "credential for owner '{}' is marked invalid",
                self.owner
            )));
        }
        if let (Some(access), Some(expires_at)) = (&stored.access_token, stored.expires_at) {
            if self.is_fresh(expires_at) {
                *cached = Some(CachedToken {
                    access_token: access.clone(),
                    expires_at,
                });
                return Ok(access.clone());
            }
        }

        let token = self.refresh_with(&stored).await?;
        let access = token.access_token.clone();
        *cached = Some(token);
        Ok(access)
    }

    /// Discard the cached token and refresh unconditionally
    pub async fn force_refresh(&self) -> CurationResult<String> {
        let mut cached = self.cached.lock().await;
        *cached = None;
        let stored = self.store.load(&self.owner).await?;
        if stored.invalid {
            return Err(CurationError::CriticalAuth(format!(
                "credential for owner '{}' is marked invalid",
                self.owner
            )));
        }
        let token = self.refresh_with(&stored).await?;
        let access = token.access_token.clone();
        *cached = Some(token);
        Ok(access)
    }

    /// Record that the credential is permanently unusable
    pub async fn mark_invalid(&self, reason: &str) -> CurationResult<()> {
        *self.cached.lock().await = None;
        self.store.mark_invalid(&self.owner, reason).await
    }

    async fn refresh_with(&self, stored: &StoredCredential) -> CurationResult<CachedToken> {
        let grant = self.refresher.refresh(&stored.refresh_token).await?;
        let expires_at = Utc::now()
            + chrono::Duration::from_std(grant.expires_in)
                .unwrap_or_else(|_| chrono::Duration::seconds(3600));

        if let Some(rotated) = &grant.refresh_token {
            if *rotated != stored.refresh_token {
                info!(owner = %self.owner, "Refresh token rotated");
                self.store.save_refresh_token(&self.owner, rotated).await?;
            }
        }
        if let Err(e) = self
            .store
            .cache_access(&self.owner, &grant.access_token, expires_at)
            .await
        {
            warn!(owner = %self.owner, error = %e, "Failed to persist access token expiry");
        }

        debug!(owner = %self.owner, expires_at = %expires_at, "Access token refreshed");
        Ok(CachedToken {
            access_token: grant.access_token,
            expires_at,
        })
    }

    fn is_fresh(&self, expires_at: DateTime<Utc>) -> bool {
        let margin = chrono::Duration::from_std(self.margin).unwrap_or_else(|_| chrono::Duration::zero());
        expires_at - Utc::now() > margin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRefresher {
        calls: AtomicUsize,
        rotate: bool,
        expires_in: Duration,
    }

    impl CountingRefresher {
        fn new(rotate: bool, expires_in: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                rotate,
                expires_in,
            }
        }
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, refresh_token: &str) -> CurationResult<TokenGrant> {
            if refresh_token == "revoked" {
                return Err(CurationError::CriticalAuth("invalid_grant".into()));
            }
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TokenGrant {
                access_token: format!("access-{}", n),
                expires_in: self.expires_in,
                refresh_token: self.rotate.then(|| format!("refresh-{}", n)),
            })
        }
    }

    fn manager(store: Arc<MemoryCredentialStore>, refresher: Arc<CountingRefresher>) -> CredentialManager {
        CredentialManager::new("alice", store, refresher, Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_token_is_cached_until_margin() {
        let store = Arc::new(MemoryCredentialStore::with_owner("alice", "refresh-0"));
        let refresher = Arc::new(CountingRefresher::new(false, Duration::from_secs(3600)));
        let mgr = manager(store.clone(), refresher.clone());

        assert_eq!(mgr.access_token().await.unwrap(), "access-1");
        assert_eq!(mgr.access_token().await.unwrap(), "access-1");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

        let stored = store.get("alice").unwrap();
        assert_eq!(stored.access_token.as_deref(), Some("access-1"));
        assert!(stored.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_token_inside_margin_is_refreshed() {
        let store = Arc::new(MemoryCredentialStore::with_owner("alice", "refresh-0"));
        // Expires in 60s, inside the 300s margin: every call refreshes
        let refresher = Arc::new(CountingRefresher::new(false, Duration::from_secs(60)));
        let mgr = manager(store, refresher.clone());

        mgr.access_token().await.unwrap();
        mgr.access_token().await.unwrap();
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_is_persisted() {
        let store = Arc::new(MemoryCredentialStore::with_owner("alice", "refresh-0"));
        let refresher = Arc::new(CountingRefresher::new(true, Duration::from_secs(3600)));
        let mgr = manager(store.clone(), refresher);

        mgr.access_token().await.unwrap();
        assert_eq!(store.get("alice").unwrap().refresh_token, "refresh-1");

        assert_eq!(mgr.force_refresh().await.unwrap(), "access-2");
        assert_eq!(store.get("alice").unwrap().refresh_token, "refresh-2");
    }

    #[tokio::test]
    async fn test_stored_access_token_reused() {
        let store = Arc::new(MemoryCredentialStore::new());
        store.insert(
            "alice",
            StoredCredential {
                refresh_token: "r".into(),
                access_token: Some("persisted".into()),
                expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
                invalid: false,
            },
        );
        let refresher = Arc::new(CountingRefresher::new(false, Duration::from_secs(3600)));
        let mgr = manager(store, refresher.clone());

        assert_eq!(mgr.access_token().await.unwrap(), "persisted");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_owner_and_revoked_token_are_critical() {
        let refresher = Arc::new(CountingRefresher::new(false, Duration::from_secs(3600)));

        let empty = Arc::new(MemoryCredentialStore::new());
        let err = manager(empty, refresher.clone()).access_token().await.unwrap_err();
        assert!(err.is_critical_auth());

        let revoked = Arc::new(MemoryCredentialStore::with_owner("alice", "revoked"));
        let mgr = manager(revoked.clone(), refresher);
        assert!(mgr.access_token().await.unwrap_err().is_critical_auth());

        mgr.mark_invalid("revoked").await.unwrap();
        assert!(revoked.get("alice").unwrap().invalid);
    }

    #[tokio::test]
    async fn test_json_file_store_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("credentials.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"alice": {"refresh_token": "r0"}}"#).unwrap();

        let store = JsonFileCredentialStore::new(&path);
        assert_eq!(store.load("alice").await.unwrap().refresh_token, "r0");

        store.save_refresh_token("alice", "r1").await.unwrap();
        let expires = Utc::now();
        store.cache_access("alice", "a1", expires).await.unwrap();

        let reloaded = JsonFileCredentialStore::new(&path).load("alice").await.unwrap();
        assert_eq!(reloaded.refresh_token, "r1");
        assert_eq!(reloaded.access_token.as_deref(), Some("a1"));
        assert_eq!(reloaded.expires_at, Some(expires));

        assert!(store.load("bob").await.unwrap_err().is_critical_auth());
    }
}
