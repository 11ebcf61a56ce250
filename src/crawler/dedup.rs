//! Deduplication gate
//!
//! Wraps a `SeenStore` so that only the first caller for an identity inside
//! the TTL window is told to proceed.

use crate::record::IdentityKey;
use crate::storage::{SeenStore, StorageResult};
use std::sync::Arc;
use std::time::Duration;

/// Default marker lifetime, matching the usual re-listing cadence
pub const DEFAULT_SEEN_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Atomic check-and-set over the seen-set
#[derive(Clone)]
pub struct Deduplicator {
    store: Arc<dyn SeenStore>,
    ttl: Duration,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn SeenStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn with_days(store: Arc<dyn SeenStore>, days: u32) -> Self {
        Self::new(store, Duration::from_secs(u64::from(days) * 24 * 60 * 60))
    }

    /// Returns `true` exactly once per identity inside the TTL window
    ///
    /// A store error is returned to the caller, which must treat the
    /// identity as not admitted.
    pub async fn should_process(&self, key: &IdentityKey) -> StorageResult<bool> {
        let admitted = self.store.set_if_absent(key, self.ttl).await?;
        if admitted {
            tracing::trace!("Admitted {}", key);
        } else {
            tracing::debug!("Skipping duplicate {}", key);
        }
        Ok(admitted)
    }

    /// Whether an identity is currently marked as seen
    pub async fn is_seen(&self, key: &IdentityKey) -> StorageResult<bool> {
        self.store.contains(key).await
    }

    /// Clears a marker after a terminal failure so a later run retries it
    pub async fn release(&self, key: &IdentityKey) -> StorageResult<()> {
        self.store.release(key).await
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
