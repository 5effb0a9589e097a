use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use recall_access::Namespace;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-record async write locks.
///
/// Multi-record acquisitions always lock in sorted key order.
#[derive(Debug, Default)]
pub struct RecordLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held locks for a set of records; released on drop.
#[derive(Debug)]
pub struct RecordLockGuard {
    keys: Vec<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl RecordLockGuard {
    /// Returns true when `id` in `namespace` is covered by this guard.
    pub fn covers(&self, namespace: Namespace, id: &str) -> bool {
        let key = lock_key(namespace, id);
        self.keys.binary_search(&key).is_ok()
    }
}

fn lock_key(namespace: Namespace, id: &str) -> String {
    format!("{}/{}", namespace.as_str(), id.trim())
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, namespace: Namespace, id: &str) -> RecordLockGuard {
        self.lock_many([(namespace, id)]).await
    }

    /// Locks every `(namespace, id)` pair, deduplicated, in sorted order.
    pub async fn lock_many<'a, I>(&self, records: I) -> RecordLockGuard
    where
        I: IntoIterator<Item = (Namespace, &'a str)>,
    {
        let keys = records
            .into_iter()
            .map(|(namespace, id)| lock_key(namespace, id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();

        let slots = keys.iter().map(|key| self.slot(key)).collect::<Vec<_>>();
        let mut guards = Vec::with_capacity(slots.len());
        for slot in slots {
            guards.push(slot.lock_owned().await);
        }
        RecordLockGuard {
            keys,
            _guards: guards,
        }
    }

    /// Number of tracked lock slots, idle ones included.
    pub fn tracked(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or(0)
    }

    fn slot(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut slots = match self.slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.retain(|slot_key, slot| slot_key == key || Arc::strong_count(slot) > 1);
        slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}
