//! Concurrency limiter for sync runs
//!
//! Bounds how many entity types are fetched and written at the same time so
//! `sync-all` does not open one upstream connection per feed.

use super::config::ConcurrencyConfig;
use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

// Tokio's semaphore rejects anything above this
const UNLIMITED_PERMITS: usize = 1_000_000;

/// Semaphore-based limiter
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    config: ConcurrencyConfig,
    acquired: Arc<AtomicU64>,
    waited: Arc<AtomicU64>,
}

impl ConcurrencyLimiter {
    pub fn new(config: ConcurrencyConfig) -> Self {
        let permits = if config.enabled {
            config.max_concurrent_runs.clamp(1, UNLIMITED_PERMITS)
        } else {
            UNLIMITED_PERMITS
        };

        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            config,
            acquired: Arc::new(AtomicU64::new(0)),
            waited: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Wait for a permit. The run slot is released when the permit drops.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        if self.config.enabled && self.semaphore.available_permits() == 0 {
            self.waited.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Concurrency limiter: waiting for a run slot ({} in use)",
                self.config.max_concurrent_runs
            );
        }

        let permit = self.semaphore.clone().acquire_owned().await?;
        self.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(permit)
    }

    pub fn available_permits(&self) -> usize {
        if !self.config.enabled {
            return usize::MAX;
        }
        self.semaphore.available_permits()
    }

    pub fn stats(&self) -> ConcurrencyStats {
        ConcurrencyStats {
            acquired: self.acquired.load(Ordering::Relaxed),
            waited: self.waited.load(Ordering::Relaxed),
        }
    }
}

/// Counters since the limiter was created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyStats {
    pub acquired: u64,
    /// Acquisitions that found no free slot
    pub waited: u64,
}
