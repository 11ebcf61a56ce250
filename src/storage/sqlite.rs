//! SQLite storage implementation
//!
//! One connection behind a mutex serves the seen-set, the record store and
//! the run journal. Each trait call is a single short critical section, so
//! the check-and-set on `seen_keys` is one atomic statement.

use crate::record::{CandidateRecord, IdentityKey, RecordFields};
use crate::site::TargetRole;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    PendingTarget, RunJournal, RunStart, SeenStore, Sink, SiteCursor, StorageError,
    StorageResult, UpsertOutcome,
};
use crate::storage::{PersistedRecord, RunRecord, RunStatus};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use url::Url;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Lock)
    }

    // ===== Statistics =====

    /// Gets a run by ID
    pub fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
            params![run_id],
            row_to_run,
        )
        .optional()?
        .ok_or(StorageError::RunNotFound(run_id))
    }

    /// Gets the most recent run
    pub fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let conn = self.lock()?;
        latest_run(&conn)
    }

    /// Number of runs recorded so far
    pub fn count_runs(&self) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Looks up a persisted record by identity
    pub fn get_record(&self, identity: &str) -> StorageResult<Option<PersistedRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT identity, site, role, source_url, fields, created_at, last_seen_at, delisted_at
                 FROM records WHERE identity = ?1",
                params![identity],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, Option<String>>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((identity, site, role, source_url, fields, created_at, last_seen_at, delisted_at)) =
            row
        else {
            return Ok(None);
        };

        let fields: RecordFields = serde_json::from_str(&fields)?;
        let role = TargetRole::from_db_string(&role)
            .ok_or_else(|| StorageError::Database(format!("unknown record role '{}'", role)))?;

        Ok(Some(PersistedRecord {
            identity,
            site,
            role,
            source_url,
            fields,
            created_at,
            last_seen_at,
            delisted_at,
        }))
    }

    /// Record count per site, ordered by site name
    pub fn record_counts_by_site(&self) -> StorageResult<Vec<(String, usize)>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT site, COUNT(*) FROM records GROUP BY site ORDER BY site")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Number of records marked as no longer listed
    pub fn count_delisted(&self) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE delisted_at IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Number of unexpired seen-set markers
    pub fn count_live_seen_keys(&self) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM seen_keys WHERE expires_at > ?1",
            params![now_millis()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Number of detail targets waiting in the frontier
    pub fn count_pending(&self) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM frontier", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(RunStatus::Running),
    })
}

fn latest_run(conn: &Connection) -> StorageResult<Option<RunRecord>> {
    let run = conn
        .query_row(
            "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
            [],
            row_to_run,
        )
        .optional()?;
    Ok(run)
}

#[async_trait]
impl SeenStore for SqliteStorage {
    async fn set_if_absent(&self, key: &IdentityKey, ttl: Duration) -> StorageResult<bool> {
        let now = now_millis();
        let expires_at = now.saturating_add(ttl_millis(ttl));
        let conn = self.lock()?;

        // Inserts a new marker or revives an expired one; a live marker
        // leaves the row untouched and reports zero changes.
        let changed = conn.execute(
            "INSERT INTO seen_keys (identity, expires_at) VALUES (?1, ?2)
             ON CONFLICT(identity) DO UPDATE SET expires_at = excluded.expires_at
             WHERE seen_keys.expires_at <= ?3",
            params![key.as_str(), expires_at, now],
        )?;

        Ok(changed == 1)
    }

    async fn contains(&self, key: &IdentityKey) -> StorageResult<bool> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM seen_keys WHERE identity = ?1 AND expires_at > ?2",
                params![key.as_str(), now_millis()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn release(&self, key: &IdentityKey) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM seen_keys WHERE identity = ?1",
            params![key.as_str()],
        )?;
        Ok(())
    }
}

#[async_trait]
impl Sink for SqliteStorage {
    async fn upsert(&self, record: &CandidateRecord) -> StorageResult<UpsertOutcome> {
        let fields = serde_json::to_string(&record.fields)?;
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;

        let exists = conn
            .query_row(
                "SELECT 1 FROM records WHERE identity = ?1",
                params![record.identity.as_str()],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        conn.execute(
            "INSERT INTO records (identity, site, role, source_url, fields, created_at, last_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(identity) DO UPDATE SET
                 site = excluded.site,
                 role = excluded.role,
                 source_url = excluded.source_url,
                 fields = excluded.fields,
                 last_seen_at = excluded.last_seen_at,
                 delisted_at = NULL",
            params![
                record.identity.as_str(),
                record.site,
                record.role.as_str(),
                record.source_url.as_str(),
                fields,
                now
            ],
        )?;

        Ok(if exists {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }
}

#[async_trait]
impl RunJournal for SqliteStorage {
    async fn begin_run(&self, config_hash: &str, fresh: bool) -> StorageResult<RunStart> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let previous = latest_run(&tx)?;
        let resumed = !fresh
            && previous
                .as_ref()
                .map_or(false, |run| run.status.is_resumable());
        let config_changed = resumed
            && previous
                .as_ref()
                .map_or(false, |run| run.config_hash != config_hash);

        // A run still marked running at startup crashed
        if let Some(run) = previous.as_ref().filter(|r| r.status == RunStatus::Running) {
            tx.execute(
                "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
                params![RunStatus::Interrupted.to_db_string(), now, run.id],
            )?;
        }

        if !resumed {
            // Abandoned targets must not stay gated by their link markers
            for target in frontier(&tx)? {
                if let Some(key) = target.link_key() {
                    tx.execute(
                        "DELETE FROM seen_keys WHERE identity = ?1",
                        params![key.as_str()],
                    )?;
                }
            }
            tx.execute("DELETE FROM site_cursors", [])?;
            tx.execute("DELETE FROM frontier", [])?;
        }

        tx.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        let run_id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(RunStart {
            run_id,
            resumed,
            config_changed,
        })
    }

    async fn finish_run(&self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    async fn save_cursor(
        &self,
        site: &str,
        next_url: &Url,
        page_index: u32,
        pages_visited: u32,
    ) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO site_cursors (site, next_url, page_index, pages_visited)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(site) DO UPDATE SET
                 next_url = excluded.next_url,
                 page_index = excluded.page_index,
                 pages_visited = excluded.pages_visited",
            params![site, next_url.as_str(), page_index, pages_visited],
        )?;
        Ok(())
    }

    async fn load_cursors(&self) -> StorageResult<HashMap<String, SiteCursor>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT site, next_url, page_index, pages_visited FROM site_cursors")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                SiteCursor {
                    next_url: row.get(1)?,
                    page_index: row.get(2)?,
                    pages_visited: row.get(3)?,
                },
            ))
        })?;

        let mut cursors = HashMap::new();
        for row in rows {
            let (site, cursor) = row?;
            cursors.insert(site, cursor);
        }
        Ok(cursors)
    }

    async fn clear_cursor(&self, site: &str) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM site_cursors WHERE site = ?1", params![site])?;
        Ok(())
    }

    async fn add_pending(&self, site: &str, url: &Url) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO frontier (site, url, queued_at) VALUES (?1, ?2, ?3)",
            params![site, url.as_str(), now],
        )?;
        Ok(())
    }

    async fn remove_pending(&self, site: &str, url: &Url) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM frontier WHERE site = ?1 AND url = ?2",
            params![site, url.as_str()],
        )?;
        Ok(())
    }

    async fn load_pending(&self) -> StorageResult<Vec<PendingTarget>> {
        let conn = self.lock()?;
        frontier(&conn)
    }
}

fn frontier(conn: &Connection) -> StorageResult<Vec<PendingTarget>> {
    let mut stmt = conn.prepare("SELECT site, url FROM frontier ORDER BY queued_at, url")?;
    let pending = stmt
        .query_map([], |row| {
            Ok(PendingTarget {
                site: row.get(0)?,
                url: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(pending)
}
