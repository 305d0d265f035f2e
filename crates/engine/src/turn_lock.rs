//! Per-turn concurrency control.
//!
//! Ensures only one Executor runs for a given turn at a time — a reconnect
//! or a retried POST must not spin up a second generation against the same
//! turn id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

/// Maps turn id -> `Semaphore(1)`. Acquiring the permit grants exclusive
/// access to that turn for the duration of the Executor's run.
pub struct TurnLockMap {
    locks: Mutex<HashMap<Uuid, Arc<Semaphore>>>,
}

impl Default for TurnLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Try to acquire the lock for `turn_id` without waiting. Used by the
    /// create-turn handler, which must reject a concurrent second Executor
    /// rather than queue behind it (`TurnBusy`, mapped to 409 at the HTTP
    /// boundary).
    pub fn try_acquire(&self, turn_id: Uuid) -> Result<OwnedSemaphorePermit, TurnBusy> {
        let sem = {
            let mut locks = self.locks.lock();
            locks.entry(turn_id).or_insert_with(|| Arc::new(Semaphore::new(1))).clone()
        };
        sem.try_acquire_owned().map_err(|_| TurnBusy)
    }

    pub fn active_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop tracked locks that nobody currently holds (cleanup).
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}

#[derive(Debug)]
pub struct TurnBusy;

impl std::fmt::Display for TurnBusy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "a turn is already streaming for this turn id")
    }
}

impl std::error::Error for TurnBusy {}
