//! State machines for listing loops and detail targets

use crate::HarvestError;
use std::fmt;

/// Position of a site's listing loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteState {
    /// Fetching a listing page
    Listing,

    /// Pulling cards and the next link out of the page
    Extracting,

    /// Gating cards and handing work to the pool
    Scheduling,

    /// Pagination exhausted, ceiling reached, cancelled or failed
    Done,
}

impl SiteState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listing => "listing",
            Self::Extracting => "extracting",
            Self::Scheduling => "scheduling",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for SiteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of one detail target in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetState {
    // ===== Active States =====
    /// Accepted by the link gate and waiting for a worker
    Queued,

    /// Holding a rate-limiter permit and fetching
    Fetching,

    /// Turning the fetched page into a record
    Extracting,

    /// Checking the record identity against the seen-set
    Gating,

    /// Upserting into the sink
    Persisting,

    // ===== Terminal States =====
    /// Record upserted
    Done,

    /// Record identity already seen
    Skipped,

    /// Fetch, extraction or store failed for good
    Failed,
}

impl TargetState {
    /// Returns true if no further processing happens for the target
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Skipped | Self::Failed)
    }

    /// Checks the causal order fetch → extract → gate → persist
    ///
    /// Any active state may fail. Only the gate may skip.
    pub fn can_transition_to(&self, next: TargetState) -> bool {
        use TargetState::*;
        match (self, next) {
            (Queued, Fetching) => true,
            (Fetching, Extracting) => true,
            (Extracting, Gating) => true,
            (Gating, Persisting) | (Gating, Skipped) => true,
            (Persisting, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Moves to `next`, rejecting steps out of causal order
    pub fn advance(self, next: TargetState) -> Result<TargetState, HarvestError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(HarvestError::InvalidTransition { from: self, to: next })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Fetching => "fetching",
            Self::Extracting => "extracting",
            Self::Gating => "gating",
            Self::Persisting => "persisting",
            Self::Done => "done",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
