//! Per-entity mutual exclusion.
//!
//! A branch sync holds the lock on its parent entity for the whole
//! list-diff-apply cycle, so two passes touching the same parent never
//! interleave. Distinct parents proceed independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot = Arc<AsyncMutex<()>>;

/// Registry of per-entity locks. Entries are created on demand and dropped
/// once nobody holds or waits for them.
#[derive(Default)]
pub struct EntityLocks {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, entity_id: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(entity_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait for the lock on `entity_id`.
    pub async fn acquire(&self, entity_id: &str) -> EntityGuard {
        let guard = self.slot(entity_id).lock_owned().await;
        EntityGuard {
            slots: Arc::clone(&self.slots),
            entity_id: entity_id.to_string(),
            guard: Some(guard),
        }
    }

    /// Take the lock on `entity_id` if it is free.
    pub fn try_acquire(&self, entity_id: &str) -> Option<EntityGuard> {
        let guard = self.slot(entity_id).try_lock_owned().ok()?;
        Some(EntityGuard {
            slots: Arc::clone(&self.slots),
            entity_id: entity_id.to_string(),
            guard: Some(guard),
        })
    }

    /// Number of entities with a live lock entry.
    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held lock on one entity. Released on drop.
pub struct EntityGuard {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    entity_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl EntityGuard {
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        // Release while holding the map lock, so nobody can clone the slot
        // between the count check and the removal.
        self.guard.take();
        if let Some(slot) = slots.get(&self.entity_id) {
            if Arc::strong_count(slot) == 1 {
                slots.remove(&self.entity_id);
            }
        }
    }
}
