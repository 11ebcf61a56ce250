//! Rate limiting across sites
//!
//! Two ceilings apply to every fetch:
//! - a global cap on fetches in flight (the worker pool size)
//! - a randomized minimum spacing between fetches to the same site
//!
//! A caller waiting on its site's spacing does not hold a global slot, so
//! a slow site never starves the others.

use crate::config::HarvesterConfig;
use crate::state::SitePacing;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("rate limiter is closed")]
    Closed,
}

/// A granted fetch slot; the global slot is released on drop
#[derive(Debug)]
pub struct RatePermit {
    _permit: OwnedSemaphorePermit,
}

/// Global in-flight ceiling plus per-site spacing
#[derive(Debug)]
pub struct RateLimiter {
    global: Arc<Semaphore>,
    pacing: Mutex<HashMap<String, SitePacing>>,
    min_delay: Duration,
    max_delay: Duration,
}

impl RateLimiter {
    /// Creates a limiter
    ///
    /// # Arguments
    ///
    /// * `max_in_flight` - Global fetch ceiling
    /// * `min_delay` / `max_delay` - Bounds of the per-site random spacing
    pub fn new(max_in_flight: usize, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            global: Arc::new(Semaphore::new(max_in_flight.max(1))),
            pacing: Mutex::new(HashMap::new()),
            min_delay,
            max_delay: max_delay.max(min_delay),
        }
    }

    pub fn from_config(config: &HarvesterConfig) -> Self {
        Self::new(
            config.workers as usize,
            Duration::from_millis(config.min_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Waits for the site's next slot, then for a global slot
    ///
    /// # Returns
    ///
    /// * `Ok(RatePermit)` - Hold it for the duration of the fetch
    /// * `Err(AcquireError)` - The global semaphore was closed
    pub async fn acquire(&self, site: &str) -> Result<RatePermit, AcquireError> {
        loop {
            let slot = {
                let mut pacing = self.pacing.lock().await;
                pacing
                    .entry(site.to_string())
                    .or_default()
                    .reserve(Instant::now(), self.random_delay())
            };
            tokio::time::sleep_until(slot).await;

            let permit = Arc::clone(&self.global)
                .acquire_owned()
                .await
                .map_err(|_| AcquireError::Closed)?;

            // Waiting for the global slot may have let another caller for
            // this site start in the meantime.
            let started = {
                let mut pacing = self.pacing.lock().await;
                pacing
                    .entry(site.to_string())
                    .or_default()
                    .try_start(Instant::now(), self.min_delay)
            };

            if started {
                return Ok(RatePermit { _permit: permit });
            }

            tracing::trace!("Slot for {} went stale while waiting; re-queueing", site);
            drop(permit);
        }
    }

    /// Fetches started so far for a site
    pub async fn request_count(&self, site: &str) -> u32 {
        self.pacing
            .lock()
            .await
            .get(site)
            .map_or(0, |pacing| pacing.request_count)
    }

    fn random_delay(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        let low = self.min_delay.as_millis() as u64;
        let high = self.max_delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }
}
