use std::time::Duration;
use tokio::time::Instant;

/// Tracks request spacing for one site
///
/// Spacing is reserved ahead of time so that workers waiting on the same
/// site line up one behind the other instead of waking together.
#[derive(Debug, Clone, Default)]
pub struct SitePacing {
    /// Number of fetches started against this site
    pub request_count: u32,

    /// When the most recent fetch actually started
    pub last_started: Option<Instant>,

    /// Earliest instant the next reservation may start at
    pub next_slot: Option<Instant>,
}

impl SitePacing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next start slot and pushes the following one `delay` later
    pub fn reserve(&mut self, now: Instant, delay: Duration) -> Instant {
        let slot = match self.next_slot {
            Some(next) if next > now => next,
            _ => now,
        };
        self.next_slot = Some(slot + delay);
        slot
    }

    /// Records a fetch start unless one started less than `min_gap` ago
    pub fn try_start(&mut self, now: Instant, min_gap: Duration) -> bool {
        if let Some(last) = self.last_started {
            if now.saturating_duration_since(last) < min_gap {
                return false;
            }
        }
        self.last_started = Some(now);
        self.request_count += 1;
        true
    }

    /// Time until the next reservation could start
    pub fn time_until_next_slot(&self, now: Instant) -> Option<Duration> {
        match self.next_slot {
            Some(next) if next > now => Some(next - now),
            _ => None,
        }
    }
}
