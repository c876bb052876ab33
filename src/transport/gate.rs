use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub const DEFAULT_MAX_PARALLEL_CONNECTIONS: usize = 10;

/// Bounds the number of device connections the process holds open at once,
/// across every concurrently running task execution and ad-hoc check. Cloned
/// handles share the same capacity; construct a fresh gate per test.
#[derive(Clone)]
pub struct ConnectionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConnectionGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Waits (without busy-waiting) until a connection slot is free. The slot
    /// is returned to the gate when the guard drops, on every exit path.
    pub async fn acquire(&self) -> ConnectionSlot {
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            // The semaphore is never closed.
            Err(_) => unreachable!("connection gate semaphore closed"),
        };
        ConnectionSlot { _permit: permit }
    }
}

impl Default for ConnectionGate {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PARALLEL_CONNECTIONS)
    }
}

pub struct ConnectionSlot {
    _permit: OwnedSemaphorePermit,
}
