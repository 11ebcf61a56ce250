//! Run outcome aggregation
//!
//! Per-target results are folded into one `SiteOutcome` per site. Failures
//! are counted here and never propagate to sibling targets or sites.

use crate::storage::UpsertOutcome;
use serde::Serialize;
use std::collections::BTreeMap;

/// Final result of one detail target or listing record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    /// Passed the gate and was upserted
    Persisted(UpsertOutcome),

    /// Identity already seen inside the TTL window
    Duplicate,

    /// Fetch, extraction or store failed for good
    Failed { reason: String },

    /// Cancelled before fetching; left in the pending frontier
    Abandoned,
}

/// Counters for one site
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SiteOutcome {
    pub site: String,

    /// Listing pages fetched this run
    pub pages_visited: u32,

    /// Candidate records produced by extraction
    pub records_extracted: u32,

    /// Records accepted by the gate and persisted
    pub accepted: u32,

    /// Records or links skipped as duplicates
    pub skipped: u32,

    /// Terminal per-target failures
    pub failed: u32,

    /// Cards that could not become records
    pub dropped: u32,

    /// Detail targets handed to the worker pool
    pub detail_targets: u32,

    /// Why the listing loop stopped early, if it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SiteOutcome {
    pub fn new(site: &str) -> Self {
        Self {
            site: site.to_string(),
            ..Self::default()
        }
    }

    /// Counts one target's final result
    pub fn record(&mut self, outcome: &TargetOutcome) {
        match outcome {
            TargetOutcome::Persisted(_) => self.accepted += 1,
            TargetOutcome::Duplicate => self.skipped += 1,
            TargetOutcome::Failed { .. } => self.failed += 1,
            TargetOutcome::Abandoned => {}
        }
    }

    /// Adds another tally for the same site
    pub fn absorb(&mut self, other: &SiteOutcome) {
        self.pages_visited += other.pages_visited;
        self.records_extracted += other.records_extracted;
        self.accepted += other.accepted;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.dropped += other.dropped;
        self.detail_targets += other.detail_targets;
        if self.error.is_none() {
            self.error = other.error.clone();
        }
    }

    /// A site failed when its loop stopped on an error before any page loaded
    pub fn failed_site(&self) -> bool {
        self.error.is_some() && self.pages_visited == 0
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub sites: BTreeMap<String, SiteOutcome>,
    pub cancelled: bool,
}

impl RunOutcome {
    /// Sum of every site's counters
    pub fn totals(&self) -> SiteOutcome {
        let mut totals = SiteOutcome::new("total");
        for outcome in self.sites.values() {
            totals.absorb(outcome);
        }
        totals.error = None;
        totals
    }

    /// True when at least one site ran and every site failed
    pub fn all_sites_failed(&self) -> bool {
        !self.sites.is_empty() && self.sites.values().all(SiteOutcome::failed_site)
    }

    pub fn site(&self, name: &str) -> Option<&SiteOutcome> {
        self.sites.get(name)
    }
}

/// Prints the per-site summary table
pub fn print_run_summary(outcome: &RunOutcome) {
    println!("=== Harvest Summary ===\n");
    println!(
        "  {:<20} {:>6} {:>9} {:>8} {:>7} {:>6} {:>7}",
        "site", "pages", "extracted", "accepted", "skipped", "failed", "dropped"
    );

    for site in outcome.sites.values() {
        println!(
            "  {:<20} {:>6} {:>9} {:>8} {:>7} {:>6} {:>7}",
            site.site,
            site.pages_visited,
            site.records_extracted,
            site.accepted,
            site.skipped,
            site.failed,
            site.dropped
        );
        if let Some(error) = &site.error {
            println!("    stopped early: {}", error);
        }
    }

    let totals = outcome.totals();
    println!();
    println!(
        "Total: {} accepted, {} skipped, {} failed across {} pages",
        totals.accepted, totals.skipped, totals.failed, totals.pages_visited
    );
    if outcome.cancelled {
        println!("Run was cancelled; the next run resumes where this one stopped.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_by_kind() {
        let mut outcome = SiteOutcome::new("acme");
        outcome.record(&TargetOutcome::Persisted(UpsertOutcome::Inserted));
        outcome.record(&TargetOutcome::Persisted(UpsertOutcome::Updated));
        outcome.record(&TargetOutcome::Duplicate);
        outcome.record(&TargetOutcome::Failed {
            reason: "HTTP 404".to_string(),
        });
        outcome.record(&TargetOutcome::Abandoned);

        assert_eq!(outcome.accepted, 2);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.failed, 1);
    }

    #[test]
    fn test_all_sites_failed_only_when_every_site_failed() {
        let mut run = RunOutcome::default();
        let mut broken = SiteOutcome::new("broken");
        broken.error = Some("HTTP 403".to_string());
        run.sites.insert("broken".to_string(), broken.clone());
        assert!(run.all_sites_failed());

        let mut healthy = SiteOutcome::new("healthy");
        healthy.pages_visited = 2;
        run.sites.insert("healthy".to_string(), healthy);
        assert!(!run.all_sites_failed());

        assert!(!RunOutcome::default().all_sites_failed());
    }

    #[test]
    fn test_partial_site_is_not_a_failed_site() {
        let mut outcome = SiteOutcome::new("acme");
        outcome.pages_visited = 3;
        outcome.error = Some("HTTP 500".to_string());
        assert!(!outcome.failed_site());
    }

    #[test]
    fn test_totals() {
        let mut run = RunOutcome::default();
        for (name, accepted) in [("a", 2), ("b", 3)] {
            let mut outcome = SiteOutcome::new(name);
            outcome.accepted = accepted;
            outcome.pages_visited = 1;
            run.sites.insert(name.to_string(), outcome);
        }

        let totals = run.totals();
        assert_eq!(totals.accepted, 5);
        assert_eq!(totals.pages_visited, 2);
    }
}
