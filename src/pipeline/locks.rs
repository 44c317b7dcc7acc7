use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

type Key = (i64, i64);
type Slots = Arc<Mutex<HashMap<Key, Arc<AsyncMutex<()>>>>>;

/// Serializes grading passes per (user, assignment) so that two attempts by
/// the same student never read each other's half-written history.
#[derive(Debug, Default, Clone)]
pub struct GradingLocks {
    slots: Slots,
}

pub struct GradingGuard {
    key: Key,
    slot: Arc<AsyncMutex<()>>,
    slots: Slots,
    held: Option<OwnedMutexGuard<()>>,
}

impl GradingLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user_id: i64, assignment_id: i64) -> GradingGuard {
        let key = (user_id, assignment_id);
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.entry(key).or_default().clone()
        };

        debug!("Waiting for grading lock on user {} assignment {}", user_id, assignment_id);
        let held = slot.clone().lock_owned().await;

        GradingGuard {
            key,
            slot,
            slots: self.slots.clone(),
            held: Some(held),
        }
    }

    /// Number of keys with a holder or waiter.
    pub fn active(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for GradingGuard {
    fn drop(&mut self) {
        // Release the async lock before deciding whether the slot is idle.
        self.held.take();
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        // The map and this guard are the only owners left: nobody is waiting.
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.key);
        }
    }
}
