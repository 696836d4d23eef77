//! Debounced, cancellable single-shot alarms keyed by id.
//!
//! Scheduling an alarm for a key that already has one cancels the old one,
//! so there is never more than one outstanding alarm per key. Each alarm
//! carries a generation number; when it wakes it claims its slot only if the
//! slot still holds that generation, which makes a superseded alarm a no-op
//! even if it woke before it could be aborted.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct Slot {
    generation: u64,
    deadline: Instant,
    task: JoinHandle<()>,
}

/// A set of alarms, at most one per key.
pub struct Alarms<K> {
    slots: Arc<Mutex<HashMap<K, Slot>>>,
    next_generation: AtomicU64,
}

impl<K> Default for Alarms<K> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }
}

impl<K> Alarms<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay`, replacing any alarm already set for `key`.
    /// Returns the new deadline.
    pub fn schedule<F>(&self, key: K, delay: Duration, action: F) -> Instant
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let deadline = Instant::now() + delay;
        self.schedule_at(key, deadline, action);
        deadline
    }

    /// Run `action` at `deadline`, replacing any alarm already set for `key`.
    pub fn schedule_at<F>(&self, key: K, deadline: Instant, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let slots = Arc::clone(&self.slots);
        let task_key = key.clone();

        // Hold the lock across spawn + insert so the task cannot look for
        // its slot before the slot exists.
        let mut guard = self.slots.lock();
        if let Some(old) = guard.remove(&key) {
            old.task.abort();
        }
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let claimed = {
                let mut slots = slots.lock();
                match slots.get(&task_key) {
                    Some(slot) if slot.generation == generation => {
                        slots.remove(&task_key);
                        true
                    }
                    _ => false,
                }
            };
            if claimed {
                action.await;
            }
        });
        guard.insert(
            key,
            Slot {
                generation,
                deadline,
                task,
            },
        );
    }

    /// Cancel the alarm for `key`. Returns whether one was outstanding.
    pub fn cancel(&self, key: &K) -> bool {
        match self.slots.lock().remove(key) {
            Some(slot) => {
                slot.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, key: &K) -> bool {
        self.slots.lock().contains_key(key)
    }

    pub fn deadline(&self, key: &K) -> Option<Instant> {
        self.slots.lock().get(key).map(|slot| slot.deadline)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> Drop for Alarms<K> {
    fn drop(&mut self) {
        for (_, slot) in self.slots.lock().drain() {
            slot.task.abort();
        }
    }
}
