//! Per-key serialisation of read-then-write sequences

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::types::*;

/// One async mutex per key, created on demand.
///
/// Holders of different keys never wait on each other. Entries nobody holds
/// or waits on are pruned on the next acquire.
#[derive(Debug)]
pub struct KeyedLocks {
    scope: &'static str,
    timeout: Duration,
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new(scope: &'static str, timeout: Duration) -> Self {
        Self {
            scope,
            timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`; the guard releases it on drop
    pub async fn acquire(&self, key: Uuid) -> LedgerResult<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| LedgerError::Storage(format!("{} lock table poisoned", self.scope)))?;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(key).or_default().clone()
        };

        match tokio::time::timeout(self.timeout, lock.lock_owned()).await {
            Ok(guard) => {
                tracing::debug!(scope = self.scope, %key, "lock acquired");
                Ok(guard)
            }
            Err(_) => {
                tracing::warn!(
                    scope = self.scope,
                    %key,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "lock wait timed out"
                );
                Err(LedgerError::LockTimeout(format!("{} {key}", self.scope)))
            }
        }
    }

    /// Number of keys currently tracked
    pub fn tracked(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }
}
