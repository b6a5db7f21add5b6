//! Per-key locks for the `lock` conflict policy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::entity::CorrelationKey;

type LockTable = Arc<Mutex<HashMap<CorrelationKey, Arc<AsyncMutex<()>>>>>;

/// Serializes units of work that share a correlation key.
///
/// Entries are created on demand and removed when the last holder or
/// waiter for a key is gone.
#[derive(Default)]
pub struct KeyLocks {
    table: LockTable,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &CorrelationKey) -> KeyLockGuard {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            table.entry(key.clone()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        KeyLockGuard {
            table: self.table.clone(),
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Keys with a live holder or waiter.
    pub fn active_keys(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Held for the duration of one unit of work.
pub struct KeyLockGuard {
    table: LockTable,
    key: CorrelationKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyLockGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(guard) = self.guard.take() {
            // table entry + this guard; any more means someone is waiting
            if Arc::strong_count(OwnedMutexGuard::mutex(&guard)) <= 2 {
                table.remove(&self.key);
            }
        }
    }
}
