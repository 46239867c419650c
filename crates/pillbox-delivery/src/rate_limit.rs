//! Delivery throttling: a global concurrency ceiling plus a minimum spacing
//! between sends to the same owner.
//!
//! Each owner keeps a "next free slot" instant in a `DashMap`. Acquiring
//! reserves the slot (pushing it forward by the per-owner interval), sleeps
//! until it arrives, then waits for a global semaphore permit. The returned
//! [`Permit`] releases the global slot when dropped, on every exit path.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use pillbox_core::OwnerId;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep_until, Instant};

use crate::error::DeliveryError;

pub struct RateLimiter {
    global: Arc<Semaphore>,
    next_slot: DashMap<OwnerId, Instant>,
    per_owner_interval: Duration,
}

/// Held for the duration of one send attempt.
#[derive(Debug)]
pub struct Permit {
    _global: OwnedSemaphorePermit,
}

impl RateLimiter {
    pub fn new(global_concurrency: usize, per_owner_interval: Duration) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_concurrency.max(1))),
            next_slot: DashMap::new(),
            per_owner_interval,
        }
    }

    /// Wait for the owner's spacing slot, then for global capacity.
    pub async fn acquire(&self, owner: OwnerId) -> Result<Permit, DeliveryError> {
        let slot = self.reserve(owner);
        sleep_until(slot).await;
        let permit = self
            .global
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DeliveryError::Transient("rate limiter closed".to_string()))?;
        Ok(Permit { _global: permit })
    }

    /// Global permits currently free.
    pub fn available(&self) -> usize {
        self.global.available_permits()
    }

    /// Reserve the owner's next send slot and return when it starts.
    fn reserve(&self, owner: OwnerId) -> Instant {
        let now = Instant::now();
        let mut next = self.next_slot.entry(owner).or_insert(now);
        let slot = (*next).max(now);
        *next = slot + self.per_owner_interval;
        slot
    }

    /// Forget owners whose spacing window has fully elapsed.
    pub fn prune(&self) {
        let now = Instant::now();
        self.next_slot.retain(|_, next| *next > now);
    }
}
