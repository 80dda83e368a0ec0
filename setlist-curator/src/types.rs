//! Core value types shared by the curation stages
//!
//! All of these are created fresh for each run and discarded afterwards.
//! The remote collection is the only durable state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use setlist_common::config::{PinnedItem, PositionRange, SizeLimitPolicy};

/// Literal author credit that is exempt from the per-author cap
pub const VARIOUS_AUTHORS: &str = "various artists";

// ============================================================================
// Catalog entries
// ============================================================================

/// Read-only snapshot of one remote collection entry (or a search result)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    /// Album, compilation or other grouping the item belongs to
    #[serde(default)]
    pub container: String,
    /// When the item was added to the collection; absent for search results
    #[serde(default)]
    pub added_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub popularity: Option<u32>,
}

impl CatalogItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            authors: vec![author.into()],
            container: String::new(),
            added_at: None,
            popularity: None,
        }
    }

    /// Display form of the author list
    pub fn author_display(&self) -> String {
        self.authors.join(", ")
    }

    /// First comma-separated author token, lowercased and trimmed
    pub fn primary_author(&self) -> String {
        primary_author_key(&self.author_display())
    }

    /// Normalisation signature used for duplicate detection
    pub fn signature(&self) -> String {
        format!(
            "{}:{}:{}",
            self.title.trim().to_lowercase(),
            self.primary_author(),
            self.container.trim().to_lowercase()
        )
    }

    /// "author – title" label used in suggestion exclusion lists
    pub fn label(&self) -> String {
        format!("{} – {}", self.author_display(), self.title)
    }
}

/// Lowercased first comma-separated token of an author credit
pub fn primary_author_key(credit: &str) -> String {
    credit
        .split(',')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

/// Catalog item that survived filtering
#[derive(Debug, Clone, PartialEq)]
pub struct SurvivingItem {
    pub item: CatalogItem,
    pub is_pinned: bool,
}

/// Where an allocation candidate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateOrigin {
    /// Survived filtering of the current collection
    Carried,
    /// Newly suggested and matched in the catalog
    Suggested,
}

/// Item the allocation stage may place in an open slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub id: String,
    pub title: String,
    pub primary_author: String,
    pub added_at: Option<DateTime<Utc>>,
    pub popularity: Option<u32>,
    pub origin: CandidateOrigin,
}

impl CandidateItem {
    fn from_catalog(item: &CatalogItem, origin: CandidateOrigin) -> Self {
        Self {
            id: item.id.clone(),
            title: item.title.clone(),
            primary_author: item
                .author_display()
                .split(',')
                .next()
                .unwrap_or_default()
                .trim()
                .to_string(),
            added_at: item.added_at,
            popularity: item.popularity,
            origin,
        }
    }

    /// Candidate carried over from the current collection
    pub fn carried(item: &CatalogItem) -> Self {
        Self::from_catalog(item, CandidateOrigin::Carried)
    }

    /// Candidate found in the catalog for a new suggestion
    pub fn suggested(item: &CatalogItem) -> Self {
        Self::from_catalog(item, CandidateOrigin::Suggested)
    }

    /// Case-insensitive author key used for bucketing
    pub fn author_key(&self) -> String {
        self.primary_author.trim().to_lowercase()
    }

    pub fn is_new(&self) -> bool {
        self.origin == CandidateOrigin::Suggested
    }
}

impl From<&SurvivingItem> for CandidateItem {
    fn from(survivor: &SurvivingItem) -> Self {
        Self::carried(&survivor.item)
    }
}

// ============================================================================
// Removal and diff reporting
// ============================================================================

/// Why an entry left the collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    Duplicate,
    Expired,
    AuthorLimit,
    SizeLimit,
    Other,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::Expired => "expired",
            Self::AuthorLimit => "author_limit",
            Self::SizeLimit => "size_limit",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry dropped by the filter stage
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedItem {
    pub item: CatalogItem,
    pub reason: RemovalReason,
}

/// Display metadata for one diff line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub id: String,
    pub title: String,
    pub author: String,
}

/// Removed entry with its reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedEntry {
    pub id: String,
    pub title: String,
    pub author: String,
    pub reason: RemovalReason,
}

/// What a curation run changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub added: Vec<DiffEntry>,
    pub removed: Vec<RemovedEntry>,
    pub kept_pinned: Vec<DiffEntry>,
}

// ============================================================================
// Suggestions
// ============================================================================

/// One item proposed by the suggestion service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub author: String,
    pub title: String,
    #[serde(default)]
    pub rationale: String,
}

impl Suggestion {
    pub fn label(&self) -> String {
        format!("{} – {}", self.author, self.title)
    }
}
