//! Bounded engine connection pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::warn;

use crate::error::EngineError;

/// Caps concurrent engine calls. Waiting callers queue on the semaphore for
/// at most `wait`, then fail with `PoolExhausted`.
#[derive(Debug, Clone)]
pub struct EnginePool {
    semaphore: Arc<Semaphore>,
    size: usize,
    wait: Duration,
}

/// Slot held for the duration of one engine call.
#[derive(Debug)]
pub struct PoolPermit {
    _permit: OwnedSemaphorePermit,
}

impl EnginePool {
    pub fn new(size: usize, wait: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
            wait,
        }
    }

    pub async fn acquire(&self) -> Result<PoolPermit, EngineError> {
        let start = Instant::now();
        match tokio::time::timeout(self.wait, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(PoolPermit { _permit: permit }),
            // The semaphore is never closed; treat it like exhaustion if it is.
            Ok(Err(_)) | Err(_) => {
                let waited_ms = start.elapsed().as_millis() as u64;
                warn!(size = self.size, waited_ms, "Engine connection pool exhausted");
                Err(EngineError::PoolExhausted { waited_ms })
            }
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn in_use(&self) -> usize {
        self.size - self.semaphore.available_permits()
    }
}
