//! Per-turn cancellation tokens.
//!
//! Every running Executor gets a `CancelToken`; calling `cancel()` on it
//! asks the Executor's loop to stop at the next checkpoint (between a
//! provider event and the next, or between tool dispatch and the next
//! round) and transition the turn to `cancelled` rather than `complete`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the active cancel token for every turn currently streaming.
pub struct CancelMap {
    tokens: Mutex<HashMap<Uuid, CancelToken>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, turn_id: Uuid) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(turn_id, token.clone());
        token
    }

    /// Request cancellation of a running turn. Returns true if it was found
    /// running (the caller uses this to decide whether to 404 instead).
    pub fn cancel(&self, turn_id: Uuid) -> bool {
        if let Some(token) = self.tokens.lock().get(&turn_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Called by the Executor when the turn reaches a terminal status.
    pub fn remove(&self, turn_id: Uuid) {
        self.tokens.lock().remove(&turn_id);
    }

    pub fn is_running(&self, turn_id: Uuid) -> bool {
        self.tokens.lock().contains_key(&turn_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_lifecycle() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_map_register_and_cancel() {
        let map = CancelMap::new();
        let turn_id = Uuid::new_v4();
        let token = map.register(turn_id);
        assert!(map.is_running(turn_id));

        assert!(map.cancel(turn_id));
        assert!(token.is_cancelled());

        map.remove(turn_id);
        assert!(!map.is_running(turn_id));
        assert!(!map.cancel(turn_id));
    }

    #[test]
    fn cancel_unknown_turn_returns_false() {
        let map = CancelMap::new();
        assert!(!map.cancel(Uuid::new_v4()));
    }

    #[test]
    fn remove_is_idempotent() {
        let map = CancelMap::new();
        let turn_id = Uuid::new_v4();
        map.register(turn_id);
        map.remove(turn_id);
        map.remove(turn_id);
        assert!(!map.is_running(turn_id));
    }
}
