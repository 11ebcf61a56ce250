//! Output module for run summaries and store statistics
//!
//! This module handles:
//! - Aggregating per-target results into per-site outcomes
//! - Printing the end-of-run summary
//! - Reading store statistics for `--stats`

mod outcome;
pub mod stats;

pub use outcome::{print_run_summary, RunOutcome, SiteOutcome, TargetOutcome};
pub use stats::{load_statistics, print_statistics, HarvestStatistics};
