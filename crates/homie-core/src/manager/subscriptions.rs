// ── Per-device subscription ref-counting ──
//
// Each device is in one of three states:
//
//   Idle            no entry; no broker subscription
//   Subscribed      `count` holders; broker subscription live
//   PendingTeardown no holders; broker subscription still live until the
//                   teardown timer fires
//
// The table only tracks state. The manager issues the broker requests and
// runs the timers based on what these transitions return.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use super::lock;

#[derive(Debug)]
enum Entry {
    Subscribed {
        count: usize,
    },
    PendingTeardown {
        token: CancellationToken,
        generation: u64,
    },
}

/// What the caller must do after `acquire`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Acquired {
    /// Idle → Subscribed: issue the broker subscribe.
    First,
    /// PendingTeardown → Subscribed: the timer was cancelled and the broker
    /// subscription is still live.
    Resumed,
    /// Another holder was added.
    Shared,
}

/// A teardown the caller has to schedule.
#[derive(Debug)]
pub(crate) struct Teardown {
    pub(crate) token: CancellationToken,
    pub(crate) generation: u64,
}

#[derive(Default)]
pub(crate) struct SubscriptionTable {
    entries: Mutex<HashMap<String, Entry>>,
    generation: AtomicU64,
}

impl SubscriptionTable {
    pub(crate) fn acquire(&self, device_id: &str) -> Acquired {
        let mut entries = lock(&self.entries);
        match entries.get_mut(device_id) {
            Some(Entry::Subscribed { count }) => {
                *count += 1;
                Acquired::Shared
            }
            Some(entry) => {
                if let Entry::PendingTeardown { token, .. } =
                    std::mem::replace(entry, Entry::Subscribed { count: 1 })
                {
                    token.cancel();
                }
                Acquired::Resumed
            }
            None => {
                entries.insert(device_id.to_owned(), Entry::Subscribed { count: 1 });
                Acquired::First
            }
        }
    }

    /// Drop one holder. Returns the teardown to schedule when the count
    /// reaches zero; `parent` bounds the timer's lifetime.
    pub(crate) fn release(
        &self,
        device_id: &str,
        parent: &CancellationToken,
    ) -> Option<Teardown> {
        let mut entries = lock(&self.entries);
        let entry = entries.get_mut(device_id)?;
        let Entry::Subscribed { count } = entry else {
            return None;
        };

        *count = count.saturating_sub(1);
        if *count > 0 {
            return None;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = parent.child_token();
        *entry = Entry::PendingTeardown {
            token: token.clone(),
            generation,
        };
        Some(Teardown { token, generation })
    }

    /// Called when a teardown timer fires. Removes the entry and returns
    /// `true` only if that exact teardown is still pending, in which case
    /// the caller unsubscribes from the broker.
    pub(crate) fn finish_teardown(&self, device_id: &str, generation: u64) -> bool {
        let mut entries = lock(&self.entries);
        match entries.get(device_id) {
            Some(Entry::PendingTeardown {
                generation: pending,
                ..
            }) if *pending == generation => {
                entries.remove(device_id);
                true
            }
            _ => false,
        }
    }

    /// Current number of holders (zero while a teardown is pending).
    pub(crate) fn count(&self, device_id: &str) -> usize {
        match lock(&self.entries).get(device_id) {
            Some(Entry::Subscribed { count }) => *count,
            _ => 0,
        }
    }

    /// `true` while the broker subscription for the device is live.
    pub(crate) fn is_active(&self, device_id: &str) -> bool {
        lock(&self.entries).contains_key(device_id)
    }

    /// Forget everything, cancelling pending teardowns.
    pub(crate) fn clear(&self) {
        for (_, entry) in lock(&self.entries).drain() {
            if let Entry::PendingTeardown { token, .. } = entry {
                token.cancel();
            }
        }
    }
}
