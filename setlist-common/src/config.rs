//! Configuration loading and validation
//!
//! A single TOML file describes the remote service, credentials, retry
//! behaviour and every curated collection. The file is located in this
//! priority order:
//! 1. Command-line argument (highest priority)
//! 2. `SETLIST_CONFIG` environment variable
//! 3. Platform config directory (`~/.config/setlist/config.toml` on Linux)
//!
//! Secrets may be kept out of the file: `SETLIST_CLIENT_SECRET` and
//! `SETLIST_SUGGESTION_API_KEY` override the corresponding TOML values.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "SETLIST_CONFIG";
/// Environment override for `auth.client_secret`
pub const CLIENT_SECRET_ENV_VAR: &str = "SETLIST_CLIENT_SECRET";
/// Environment override for `suggestions.api_key`
pub const SUGGESTION_KEY_ENV_VAR: &str = "SETLIST_SUGGESTION_API_KEY";

// ============================================================================
// Configuration-facing value types
// ============================================================================

/// Which candidates are evicted when the pool exceeds the open slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeLimitPolicy {
    /// Keep the oldest items
    DropNewest,
    /// Keep the newest items
    DropOldest,
    /// Keep a uniformly random subset
    #[default]
    DropRandom,
    /// Keep the least popular items
    DropMostPopular,
    /// Keep the most popular items
    DropLeastPopular,
}

/// Inclusive 1-based range of final positions a pinned item may occupy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRange {
    pub min: usize,
    pub max: usize,
}

impl PositionRange {
    /// Range covering exactly one position
    pub fn fixed(position: usize) -> Self {
        Self { min: position, max: position }
    }

    pub fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    /// True when the range names a single position
    pub fn is_fixed(&self) -> bool {
        self.min == self.max
    }
}

/// An entry that must stay in the collection within a position range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedItem {
    pub id: String,
    #[serde(rename = "position")]
    pub position_range: PositionRange,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

impl PinnedItem {
    pub fn new(id: impl Into<String>, position_range: PositionRange) -> Self {
        Self {
            id: id.into(),
            position_range,
            title: None,
            author: None,
        }
    }

    pub fn with_metadata(mut self, title: impl Into<String>, author: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self.author = Some(author.into());
        self
    }
}

// ============================================================================
// TOML sections
// ============================================================================

/// Root of the configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub suggestions: SuggestionConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Remote collection API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Items requested per listing page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Maximum ids per bulk remove/append call
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// Client-side request quota
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    /// Pause after every positional move
    #[serde(default = "default_move_delay_ms")]
    pub move_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            page_size: default_page_size(),
            batch_limit: default_batch_limit(),
            requests_per_second: default_requests_per_second(),
            move_delay_ms: default_move_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl RemoteConfig {
    pub fn move_delay(&self) -> Duration {
        Duration::from_millis(self.move_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Token endpoint and credential store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub token_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// JSON file holding per-owner refresh tokens
    #[serde(default)]
    pub credential_file: Option<PathBuf>,
    /// Refresh access tokens this long before they expire
    #[serde(default)]
    pub refresh_margin_secs: Option<u64>,
}

impl AuthConfig {
    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs.unwrap_or(300))
    }

    /// Credential file path, falling back to the platform data directory
    pub fn credential_path(&self) -> PathBuf {
        if let Some(path) = &self.credential_file {
            return path.clone();
        }
        dirs::data_local_dir()
            .map(|d| d.join("setlist").join("credentials.json"))
            .unwrap_or_else(|| PathBuf::from("./setlist_credentials.json"))
    }
}

/// Bounded retry behaviour for remote calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_budget")]
    pub budget: u32,
    /// Backoff used when the server does not specify one
    #[serde(default = "default_backoff_ms")]
    pub default_backoff_ms: u64,
    /// Upper bound on any server-specified backoff
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_network_delay_ms")]
    pub network_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            budget: default_retry_budget(),
            default_backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            network_delay_ms: default_network_delay_ms(),
        }
    }
}

/// Generative suggestion service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Suggestion rounds before giving up on the remaining open slots
    #[serde(default = "default_suggestion_attempts")]
    pub attempts: u32,
    /// Concurrent catalog searches per batch
    #[serde(default = "default_search_batch_size")]
    pub search_batch_size: usize,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            attempts: default_suggestion_attempts(),
            search_batch_size: default_search_batch_size(),
        }
    }
}

/// Multi-collection run settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Pause between collections to stay under the global rate limit
    #[serde(default = "default_inter_collection_delay_ms")]
    pub inter_collection_delay_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            inter_collection_delay_ms: default_inter_collection_delay_ms(),
        }
    }
}

impl RunConfig {
    pub fn inter_collection_delay(&self) -> Duration {
        Duration::from_millis(self.inter_collection_delay_ms)
    }
}

/// Curation rules for one remote collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub id: String,
    /// Credential store key of the collection owner
    pub owner: String,
    pub target_size: usize,
    /// Items older than this are dropped (unless pinned); `None` disables the rule
    #[serde(default)]
    pub max_age_days: Option<u32>,
    #[serde(default = "default_true")]
    pub remove_duplicates: bool,
    /// Per-author cap on non-pinned items; `None` disables the rule
    #[serde(default)]
    pub max_per_author: Option<usize>,
    #[serde(default)]
    pub size_limit_policy: SizeLimitPolicy,
    #[serde(default)]
    pub shuffle_at_end: bool,
    /// Minimum same-author spacing among the front-loaded suggestions
    #[serde(default = "default_min_author_separation")]
    pub min_author_separation: usize,
    /// Prompt forwarded to the suggestion service; `None` disables gap filling
    #[serde(default)]
    pub suggestion_prompt: Option<String>,
    /// Description written back to the remote collection after a live run
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub pinned: Vec<PinnedItem>,
}

impl CollectionConfig {
    /// Minimal configuration with defaults for every optional rule
    pub fn new(id: impl Into<String>, owner: impl Into<String>, target_size: usize) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            target_size,
            max_age_days: None,
            remove_duplicates: true,
            max_per_author: None,
            size_limit_policy: SizeLimitPolicy::default(),
            shuffle_at_end: false,
            min_author_separation: default_min_author_separation(),
            suggestion_prompt: None,
            description: None,
            pinned: Vec::new(),
        }
    }

    /// Ids of all pinned items
    pub fn pinned_ids(&self) -> HashSet<String> {
        self.pinned.iter().map(|p| p.id.clone()).collect()
    }

    /// Reject malformed rules before any remote call is made
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidInput("collection id must not be empty".to_string()));
        }
        if self.owner.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "collection '{}' has no owner",
                self.id
            )));
        }

        let mut seen = HashSet::new();
        for pin in &self.pinned {
            if pin.id.trim().is_empty() {
                return Err(Error::InvalidInput(format!(
                    "collection '{}' has a pinned item without an id",
                    self.id
                )));
            }
            let range = pin.position_range;
            if range.min == 0 {
                return Err(Error::InvalidInput(format!(
                    "pinned item '{}' position must be 1-based (got min = 0)",
                    pin.id
                )));
            }
            if range.min > range.max {
                return Err(Error::InvalidInput(format!(
                    "pinned item '{}' has min {} greater than max {}",
                    pin.id, range.min, range.max
                )));
            }
            if !seen.insert(pin.id.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "pinned item '{}' is listed more than once",
                    pin.id
                )));
            }
        }
        Ok(())
    }
}

impl TomlConfig {
    /// Look up a collection by id
    pub fn collection(&self, id: &str) -> Option<&CollectionConfig> {
        self.collections.iter().find(|c| c.id == id)
    }

    /// Validate global settings and every collection
    pub fn validate(&self) -> Result<()> {
        if self.remote.page_size == 0 {
            return Err(Error::Config("remote.page_size must be at least 1".to_string()));
        }
        if self.remote.batch_limit == 0 {
            return Err(Error::Config("remote.batch_limit must be at least 1".to_string()));
        }
        if self.remote.requests_per_second == 0 {
            return Err(Error::Config(
                "remote.requests_per_second must be at least 1".to_string(),
            ));
        }
        if self.suggestions.search_batch_size == 0 {
            return Err(Error::Config(
                "suggestions.search_batch_size must be at least 1".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        for collection in &self.collections {
            collection.validate()?;
            if !ids.insert(collection.id.as_str()) {
                return Err(Error::Config(format!(
                    "collection '{}' is configured more than once",
                    collection.id
                )));
            }
        }
        Ok(())
    }

    /// Replace secrets with their environment overrides when present
    pub fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var(CLIENT_SECRET_ENV_VAR) {
            if !secret.trim().is_empty() {
                debug!("auth.client_secret taken from environment");
                self.auth.client_secret = Some(secret);
            }
        }
        if let Ok(key) = std::env::var(SUGGESTION_KEY_ENV_VAR) {
            if !key.trim().is_empty() {
                debug!("suggestions.api_key taken from environment");
                self.suggestions.api_key = Some(key);
            }
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Resolve the configuration file path (CLI → ENV → platform default)
pub fn resolve_config_path(cli_arg: Option<&Path>) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: Platform config directory
    default_config_path()
}

/// Platform default configuration path
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("setlist").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("./setlist.toml"))
}

/// Parse configuration text, apply environment overrides and validate
pub fn parse_config(content: &str) -> Result<TomlConfig> {
    let mut config: TomlConfig = toml::from_str(content)?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Load and validate the configuration file at `path`
pub fn load_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        return Err(Error::NotFound(format!(
            "Config file not found: {}",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    info!(
        path = %path.display(),
        collections = config.collections.len(),
        "Configuration loaded"
    );
    Ok(config)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080/v1".to_string()
}

fn default_page_size() -> usize {
    100
}

fn default_batch_limit() -> usize {
    100
}

fn default_requests_per_second() -> u32 {
    10
}

fn default_move_delay_ms() -> u64 {
    250
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_retry_budget() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    2000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_network_delay_ms() -> u64 {
    1000
}

fn default_suggestion_attempts() -> u32 {
    3
}

fn default_search_batch_size() -> usize {
    5
}

fn default_inter_collection_delay_ms() -> u64 {
    2000
}

fn default_min_author_separation() -> usize {
    2
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection_with_pins(pins: Vec<PinnedItem>) -> CollectionConfig {
        let mut config = CollectionConfig::new("pl-1", "owner-1", 20);
        config.pinned = pins;
        config
    }

    #[test]
    fn test_position_range_fixed() {
        assert!(PositionRange::fixed(3).is_fixed());
        assert!(!PositionRange::new(1, 4).is_fixed());
    }

    #[test]
    fn test_size_limit_policy_default_is_random() {
        assert_eq!(SizeLimitPolicy::default(), SizeLimitPolicy::DropRandom);
    }

    #[test]
    fn test_validate_accepts_well_formed_pins() {
        let config = collection_with_pins(vec![
            PinnedItem::new("a", PositionRange::fixed(1)),
            PinnedItem::new("b", PositionRange::new(2, 5)),
        ]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_position() {
        let config = collection_with_pins(vec![PinnedItem::new("a", PositionRange::new(0, 2))]);
        assert!(matches!(config.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let config = collection_with_pins(vec![PinnedItem::new("a", PositionRange::new(5, 2))]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("greater than max"));
    }

    #[test]
    fn test_validate_rejects_duplicate_pins() {
        let config = collection_with_pins(vec![
            PinnedItem::new("a", PositionRange::fixed(1)),
            PinnedItem::new("a", PositionRange::fixed(2)),
        ]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_owner() {
        let config = CollectionConfig::new("pl-1", " ", 10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pinned_ids() {
        let config = collection_with_pins(vec![
            PinnedItem::new("a", PositionRange::fixed(1)),
            PinnedItem::new("b", PositionRange::new(2, 5)),
        ]);
        let ids = config.pinned_ids();
        assert!(ids.contains("a") && ids.contains("b"));
        assert_eq!(ids.len(), 2);
    }
}
