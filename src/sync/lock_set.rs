//! # Scoped Per-Key Blocking Locks
//!
//! A [`LockSet`] hands out mutual exclusion on arbitrary keys without
//! preallocating a lock per key. Lock slots are created on first contact,
//! reference-counted while any thread holds or waits on them, and removed
//! from the map when the last guard drops, so the map stays proportional
//! to the number of *active* keys rather than the keyspace.
//!
//! Acquisition order: the map mutex is held only long enough to find or
//! create the slot; the blocking wait happens on the slot's own mutex with
//! the map unlocked, so waiting on one key never delays other keys.
//!
//! ## Thread Safety
//!
//! `LockSet` is `Send + Sync` and cheap to share by reference. Guards are
//! owned values (`ArcMutexGuard`), so they can outlive the borrow of the
//! set that created them.

use std::hash::Hash;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

struct Slot {
    lock: Arc<Mutex<()>>,
    // Holders plus waiters. The slot is removed when this reaches zero.
    refs: usize,
}

pub struct LockSet<K: Eq + Hash + Clone> {
    slots: Mutex<HashMap<K, Slot>>,
}

impl<K: Eq + Hash + Clone> LockSet<K> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Blocks until the calling thread holds the lock for `key`.
    pub fn lock(&self, key: K) -> LockSetGuard<'_, K> {
        let slot_lock = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
                lock: Arc::new(Mutex::new(())),
                refs: 0,
            });
            slot.refs += 1;
            Arc::clone(&slot.lock)
        };

        let guard = slot_lock.lock_arc();

        LockSetGuard {
            set: self,
            key: Some(key),
            guard: Some(guard),
        }
    }

    /// Number of keys with at least one holder or waiter.
    pub fn active_keys(&self) -> usize {
        self.slots.lock().len()
    }

    fn release(&self, key: &K) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(key) {
            slot.refs -= 1;
            if slot.refs == 0 {
                slots.remove(key);
            }
        }
    }
}

impl<K: Eq + Hash + Clone> Default for LockSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the per-key lock until dropped.
pub struct LockSetGuard<'a, K: Eq + Hash + Clone> {
    set: &'a LockSet<K>,
    key: Option<K>,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl<K: Eq + Hash + Clone> Drop for LockSetGuard<'_, K> {
    fn drop(&mut self) {
        // Release the slot mutex before decrementing the refcount so a
        // waiter observing refs > 0 always finds the slot still mapped.
        self.guard.take();
        if let Some(key) = self.key.take() {
            self.set.release(&key);
        }
    }
}
