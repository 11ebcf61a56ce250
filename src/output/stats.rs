//! Statistics from the harvest database
//!
//! This module provides functionality for extracting and displaying
//! store statistics for `--stats`.

use crate::storage::{RunRecord, SqliteStorage, StorageResult};

/// Store statistics summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    /// Most recent run, if any
    pub latest_run: Option<RunRecord>,

    /// Number of runs recorded
    pub total_runs: usize,

    /// Persisted records per site
    pub records_by_site: Vec<(String, usize)>,

    /// Records marked as no longer listed
    pub delisted_records: usize,

    /// Unexpired seen-set markers
    pub live_seen_keys: usize,

    /// Detail targets waiting for a resumed run
    pub pending_targets: usize,
}

impl HarvestStatistics {
    pub fn total_records(&self) -> usize {
        self.records_by_site.iter().map(|(_, count)| count).sum()
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(StorageError)` - Failed to query statistics
pub fn load_statistics(storage: &SqliteStorage) -> StorageResult<HarvestStatistics> {
    Ok(HarvestStatistics {
        latest_run: storage.get_latest_run()?,
        total_runs: storage.count_runs()?,
        records_by_site: storage.record_counts_by_site()?,
        delisted_records: storage.count_delisted()?,
        live_seen_keys: storage.count_live_seen_keys()?,
        pending_targets: storage.count_pending()?,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Runs:");
    println!("  Total runs: {}", stats.total_runs);
    if let Some(run) = &stats.latest_run {
        println!(
            "  Latest run: #{} {} (started {}, finished {})",
            run.id,
            run.status.to_db_string(),
            run.started_at,
            run.finished_at.as_deref().unwrap_or("-")
        );
    }
    println!();

    println!("Records:");
    println!("  Total records: {}", stats.total_records());
    println!("  Delisted: {}", stats.delisted_records);
    for (site, count) in &stats.records_by_site {
        println!("  {}: {}", site, count);
    }
    println!();

    println!("Seen-set markers: {}", stats.live_seen_keys);
    println!("Pending detail targets: {}", stats.pending_targets);
}
