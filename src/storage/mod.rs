//! Storage module for persisting harvest data
//!
//! This module handles every store the pipeline talks to:
//! - The seen-set with expiring markers (atomic set-if-absent)
//! - The record store with idempotent upserts
//! - The run journal: runs, per-site cursors and the pending frontier
//!
//! `SqliteStorage` backs all three with one database file. `MemoryStorage`
//! implements the same traits in process.

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;
pub use traits::{
    PendingTarget, RunJournal, RunStart, SeenStore, Sink, SiteCursor, StorageError,
    StorageResult, UpsertOutcome,
};

use crate::record::RecordFields;
use crate::site::TargetRole;

/// A record as held by the record store
#[derive(Debug, Clone)]
pub struct PersistedRecord {
    pub identity: String,
    pub site: String,
    pub role: TargetRole,
    pub source_url: String,
    pub fields: RecordFields,
    pub created_at: String,
    pub last_seen_at: String,

    /// Set by the liveness checker once the posting disappears
    pub delisted_at: Option<String>,
}

/// Represents a harvest run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether a run that ended in this status left progress worth resuming
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Running | Self::Interrupted)
    }
}
