//! Per-thread async locks

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot = Arc<AsyncMutex<()>>;

type LockTable = Arc<Mutex<HashMap<String, Slot>>>;

/// Table of one async mutex per thread id.
///
/// Holding the guard for thread `a` never blocks a caller locking thread `b`.
/// A thread's entry is dropped again once nobody holds or waits for it.
#[derive(Debug, Default, Clone)]
pub struct ThreadLocks {
    locks: LockTable,
}

/// Exclusive access to one thread, released on drop.
#[derive(Debug)]
pub struct ThreadGuard {
    guard: Option<OwnedMutexGuard<()>>,
    slot: Slot,
    thread_id: String,
    locks: LockTable,
}

impl ThreadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `thread_id`.
    pub async fn lock(&self, thread_id: &str) -> ThreadGuard {
        let slot = self.slot(thread_id);
        let guard = slot.clone().lock_owned().await;
        self.guard(thread_id, slot, guard)
    }

    /// Non-blocking variant, `None` if the thread is busy.
    pub fn try_lock(&self, thread_id: &str) -> Option<ThreadGuard> {
        let slot = self.slot(thread_id);
        let guard = slot.clone().try_lock_owned().ok()?;
        Some(self.guard(thread_id, slot, guard))
    }

    /// Number of threads currently held or waited on.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, thread_id: &str) -> Slot {
        self.locks
            .lock()
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn guard(&self, thread_id: &str, slot: Slot, guard: OwnedMutexGuard<()>) -> ThreadGuard {
        ThreadGuard {
            guard: Some(guard),
            slot,
            thread_id: thread_id.to_string(),
            locks: self.locks.clone(),
        }
    }
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        // New lockers clone the slot under the table lock, so with the table
        // held a count of 2 (table + this guard) means nobody else is waiting.
        let mut locks = self.locks.lock();
        let idle = locks
            .get(&self.thread_id)
            .is_some_and(|slot| Arc::ptr_eq(slot, &self.slot) && Arc::strong_count(slot) == 2);
        if idle {
            locks.remove(&self.thread_id);
        }
    }
}
