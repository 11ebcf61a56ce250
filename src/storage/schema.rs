//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the harvester database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track harvest runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Seen-set markers; expires_at is unix milliseconds
CREATE TABLE IF NOT EXISTS seen_keys (
    identity TEXT PRIMARY KEY,
    expires_at INTEGER NOT NULL
);

-- Persisted records keyed by identity
CREATE TABLE IF NOT EXISTS records (
    identity TEXT PRIMARY KEY,
    site TEXT NOT NULL,
    role TEXT NOT NULL,
    source_url TEXT NOT NULL,
    fields TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_seen_at TEXT NOT NULL,
    delisted_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_records_site ON records(site);

-- Listing loop position per site, for resumption
CREATE TABLE IF NOT EXISTS site_cursors (
    site TEXT PRIMARY KEY,
    next_url TEXT NOT NULL,
    page_index INTEGER NOT NULL,
    pages_visited INTEGER NOT NULL
);

-- Detail targets accepted but not yet finished
CREATE TABLE IF NOT EXISTS frontier (
    site TEXT NOT NULL,
    url TEXT NOT NULL,
    queued_at TEXT NOT NULL,
    PRIMARY KEY (site, url)
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
