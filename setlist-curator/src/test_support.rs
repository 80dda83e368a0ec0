//! Shared fixtures for unit tests

use crate::credentials::{CredentialManager, MemoryCredentialStore, TokenGrant, TokenRefresher};
use crate::error::CurationResult;
use crate::types::CatalogItem;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Refresher that always grants the same hour-long token
pub struct FixedRefresher;

#[async_trait]
impl TokenRefresher for FixedRefresher {
    async fn refresh(&self, _refresh_token: &str) -> CurationResult<TokenGrant> {
        Ok(TokenGrant {
            access_token: "token".into(),
            expires_in: Duration::from_secs(3600),
            refresh_token: None,
        })
    }
}

pub fn credentials() -> CredentialManager {
    CredentialManager::new(
        "owner",
        Arc::new(MemoryCredentialStore::with_owner("owner", "refresh")),
        Arc::new(FixedRefresher),
        Duration::from_secs(60),
    )
}

pub fn item(id: &str) -> CatalogItem {
    CatalogItem::new(id, format!("Song {}", id), format!("Band {}", id))
}

pub fn items(ids: &[&str]) -> Vec<CatalogItem> {
    ids.iter().map(|id| item(id)).collect()
}

pub fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
