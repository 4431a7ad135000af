use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;

use crate::errors::GatewayError;

/// Outbound call budget shared by every wallet in a run: at most
/// `max_concurrency` requests in flight, started no faster than
/// `requests_per_second`.
#[derive(Debug)]
pub struct RequestThrottle {
    permits: Semaphore,
    min_interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RequestThrottle {
    pub fn new(max_concurrency: usize, requests_per_second: u32) -> Self {
        Self {
            permits: Semaphore::new(max_concurrency.max(1)),
            min_interval: Duration::from_secs(1) / requests_per_second.max(1),
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Wait for a concurrency permit and the next free start slot.
    /// The request must be issued while the permit is held.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, GatewayError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| GatewayError::Cancelled)?;

        let slot = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + self.min_interval;
            slot
        };
        tokio::time::sleep_until(slot).await;

        Ok(permit)
    }

    /// Refuse all further requests.
    pub fn close(&self) {
        self.permits.close();
    }
}
