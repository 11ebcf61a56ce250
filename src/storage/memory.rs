//! In-process storage backend
//!
//! Implements the same capabilities as `SqliteStorage` over mutex-guarded
//! maps. Used for `--dry-run` and in tests.

use crate::record::{CandidateRecord, IdentityKey};
use crate::storage::traits::{
    PendingTarget, RunJournal, RunStart, SeenStore, Sink, SiteCursor, StorageError,
    StorageResult, UpsertOutcome,
};
use crate::storage::RunStatus;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use url::Url;

#[derive(Debug, Default)]
struct JournalState {
    runs: Vec<(String, RunStatus)>,
    cursors: HashMap<String, SiteCursor>,
    pending: Vec<PendingTarget>,
}

/// Mutex-backed store for all three storage capabilities
#[derive(Debug, Default)]
pub struct MemoryStorage {
    seen: Mutex<HashMap<IdentityKey, Instant>>,
    records: Mutex<BTreeMap<IdentityKey, CandidateRecord>>,
    journal: Mutex<JournalState>,
    upserts: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> StorageResult<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| StorageError::Lock)
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `upsert` calls received
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Snapshot of the stored records
    pub fn records(&self) -> StorageResult<Vec<CandidateRecord>> {
        Ok(lock(&self.records)?.values().cloned().collect())
    }

    /// Stored record for an identity
    pub fn record(&self, identity: &IdentityKey) -> StorageResult<Option<CandidateRecord>> {
        Ok(lock(&self.records)?.get(identity).cloned())
    }

    /// Status of a run, if it exists
    pub fn run_status(&self, run_id: i64) -> StorageResult<Option<RunStatus>> {
        let journal = lock(&self.journal)?;
        let index = usize::try_from(run_id - 1).ok();
        Ok(index.and_then(|i| journal.runs.get(i)).map(|(_, status)| *status))
    }
}

#[async_trait]
impl SeenStore for MemoryStorage {
    async fn set_if_absent(&self, key: &IdentityKey, ttl: Duration) -> StorageResult<bool> {
        let now = Instant::now();
        let mut seen = lock(&self.seen)?;

        match seen.get(key) {
            Some(expires_at) if *expires_at > now => Ok(false),
            _ => {
                seen.insert(key.clone(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn contains(&self, key: &IdentityKey) -> StorageResult<bool> {
        let now = Instant::now();
        let seen = lock(&self.seen)?;
        Ok(seen.get(key).map_or(false, |expires_at| *expires_at > now))
    }

    async fn release(&self, key: &IdentityKey) -> StorageResult<()> {
        lock(&self.seen)?.remove(key);
        Ok(())
    }
}

#[async_trait]
impl Sink for MemoryStorage {
    async fn upsert(&self, record: &CandidateRecord) -> StorageResult<UpsertOutcome> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let mut records = lock(&self.records)?;

        match records.insert(record.identity.clone(), record.clone()) {
            Some(_) => Ok(UpsertOutcome::Updated),
            None => Ok(UpsertOutcome::Inserted),
        }
    }
}

#[async_trait]
impl RunJournal for MemoryStorage {
    async fn begin_run(&self, config_hash: &str, fresh: bool) -> StorageResult<RunStart> {
        let mut journal = lock(&self.journal)?;

        let previous = journal.runs.last().cloned();
        let resumed = !fresh
            && previous
                .as_ref()
                .map_or(false, |(_, status)| status.is_resumable());
        let config_changed = resumed
            && previous
                .as_ref()
                .map_or(false, |(hash, _)| hash != config_hash);

        if let Some((_, status)) = journal.runs.last_mut() {
            if *status == RunStatus::Running {
                *status = RunStatus::Interrupted;
            }
        }

        if !resumed {
            let mut seen = lock(&self.seen)?;
            for key in journal.pending.iter().filter_map(PendingTarget::link_key) {
                seen.remove(&key);
            }
            journal.cursors.clear();
            journal.pending.clear();
        }

        journal
            .runs
            .push((config_hash.to_string(), RunStatus::Running));

        Ok(RunStart {
            run_id: journal.runs.len() as i64,
            resumed,
            config_changed,
        })
    }

    async fn finish_run(&self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let mut journal = lock(&self.journal)?;
        let run = usize::try_from(run_id - 1)
            .ok()
            .and_then(|i| journal.runs.get_mut(i))
            .ok_or(StorageError::RunNotFound(run_id))?;
        run.1 = status;
        Ok(())
    }

    async fn save_cursor(
        &self,
        site: &str,
        next_url: &Url,
        page_index: u32,
        pages_visited: u32,
    ) -> StorageResult<()> {
        lock(&self.journal)?.cursors.insert(
            site.to_string(),
            SiteCursor {
                next_url: next_url.to_string(),
                page_index,
                pages_visited,
            },
        );
        Ok(())
    }

    async fn load_cursors(&self) -> StorageResult<HashMap<String, SiteCursor>> {
        Ok(lock(&self.journal)?.cursors.clone())
    }

    async fn clear_cursor(&self, site: &str) -> StorageResult<()> {
        lock(&self.journal)?.cursors.remove(site);
        Ok(())
    }

    async fn add_pending(&self, site: &str, url: &Url) -> StorageResult<()> {
        let mut journal = lock(&self.journal)?;
        let target = PendingTarget {
            site: site.to_string(),
            url: url.to_string(),
        };
        if !journal.pending.contains(&target) {
            journal.pending.push(target);
        }
        Ok(())
    }

    async fn remove_pending(&self, site: &str, url: &Url) -> StorageResult<()> {
        lock(&self.journal)?
            .pending
            .retain(|t| !(t.site == site && t.url == url.as_str()));
        Ok(())
    }

    async fn load_pending(&self) -> StorageResult<Vec<PendingTarget>> {
        Ok(lock(&self.journal)?.pending.clone())
    }
}
