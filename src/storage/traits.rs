//! Storage traits and error types
//!
//! The pipeline reaches its stores only through these narrow capabilities:
//! a seen-set with atomic set-if-absent, an idempotent record sink, and the
//! run journal used for resumption.

use crate::record::{CandidateRecord, IdentityKey};
use crate::storage::RunStatus;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage lock poisoned")]
    Lock,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Whether an upsert created the record or refreshed an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Saved position of a site's listing loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteCursor {
    /// Listing page to fetch next
    pub next_url: String,

    /// Template page index of `next_url`
    pub page_index: u32,

    /// Listing pages already visited
    pub pages_visited: u32,
}

/// A detail target accepted by the link gate but not yet finished
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingTarget {
    pub site: String,
    pub url: String,
}

impl PendingTarget {
    /// Seen-set marker the link gate took for this target
    pub fn link_key(&self) -> Option<IdentityKey> {
        Url::parse(&self.url)
            .ok()
            .map(|url| IdentityKey::for_link(&self.site, &url))
    }
}

/// How `begin_run` found the journal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStart {
    pub run_id: i64,

    /// True when the previous run stopped early and its cursors and pending
    /// targets were kept
    pub resumed: bool,

    /// True when resuming under a different configuration hash
    pub config_changed: bool,
}

/// Seen-set with expiring markers
#[async_trait]
pub trait SeenStore: Send + Sync {
    /// Sets the marker if it is absent or expired
    ///
    /// # Returns
    ///
    /// `true` only for the single caller that set the marker; every
    /// concurrent or later caller inside the TTL window gets `false`.
    async fn set_if_absent(&self, key: &IdentityKey, ttl: Duration) -> StorageResult<bool>;

    /// Checks for an unexpired marker
    async fn contains(&self, key: &IdentityKey) -> StorageResult<bool>;

    /// Removes a marker so a later run can retry the identity
    async fn release(&self, key: &IdentityKey) -> StorageResult<()>;
}

/// Idempotent record store
#[async_trait]
pub trait Sink: Send + Sync {
    /// Inserts or updates the record keyed by its identity
    async fn upsert(&self, record: &CandidateRecord) -> StorageResult<UpsertOutcome>;
}

/// Run bookkeeping for crash-safe resumption
#[async_trait]
pub trait RunJournal: Send + Sync {
    /// Opens a new run, resuming the previous one's progress unless `fresh`
    async fn begin_run(&self, config_hash: &str, fresh: bool) -> StorageResult<RunStart>;

    /// Stamps the run's final status
    async fn finish_run(&self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    /// Records where a site's listing loop should continue
    async fn save_cursor(
        &self,
        site: &str,
        next_url: &Url,
        page_index: u32,
        pages_visited: u32,
    ) -> StorageResult<()>;

    /// Saved cursors keyed by site name
    async fn load_cursors(&self) -> StorageResult<HashMap<String, SiteCursor>>;

    /// Forgets a site's cursor once its loop has finished
    async fn clear_cursor(&self, site: &str) -> StorageResult<()>;

    /// Adds a detail target to the pending frontier
    async fn add_pending(&self, site: &str, url: &Url) -> StorageResult<()>;

    /// Removes a finished detail target from the pending frontier
    async fn remove_pending(&self, site: &str, url: &Url) -> StorageResult<()>;

    /// Detail targets left over from an interrupted run
    async fn load_pending(&self) -> StorageResult<Vec<PendingTarget>>;
}
