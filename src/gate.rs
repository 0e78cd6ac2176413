//! Bounded, FIFO-fair admission of render operations.
//!
//! A single browser session backs every request, so the number of operations
//! allowed to drive it concurrently is capped by a counting semaphore. Waiters
//! are granted strictly in arrival order, and a grant is held as an RAII
//! permit: dropping the permit releases the slot on every exit path, including
//! `?` returns and panics inside the pipeline.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{Result, RpxError};

/// FIFO-fair counting semaphore bounding concurrent renders.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held admission slot. Dropping it wakes the longest-waiting acquirer.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    /// Create a gate with the given capacity, clamped to at least 1.
    pub fn new(max_concurrency: usize) -> Self {
        let capacity = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a slot. There is no internal timeout: a caller waits
    /// indefinitely unless it cancels the wait itself (dropping the future
    /// leaves the queue intact).
    pub async fn acquire(&self) -> Result<AdmissionPermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RpxError::Unknown("admission gate closed".to_string()))?;
        Ok(AdmissionPermit { _permit: permit })
    }

    /// Acquire every slot, i.e. wait for all in-flight operations to finish.
    /// Used by the shutdown path to drain before the session closes.
    pub async fn drain(&self) -> Result<()> {
        let permits = self
            .semaphore
            .clone()
            .acquire_many_owned(self.capacity as u32)
            .await
            .map_err(|_| RpxError::Unknown("admission gate closed".to_string()))?;
        drop(permits);
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free; `capacity - available` operations are in flight.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
