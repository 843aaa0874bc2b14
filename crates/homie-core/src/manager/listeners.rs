// ── Change listener registry ──
//
// Listeners are plain callbacks with no payload: they re-read whatever
// snapshot they care about. They run synchronously, in registration order,
// with no lock held, so a callback may unregister itself or others.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use super::lock;

pub(crate) type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub(crate) struct ListenerSet {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Callback)>>,
}

impl ListenerSet {
    pub(crate) fn add(&self, callback: Callback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.entries).push((id, callback));
        id
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Invoke every listener registered at the time of the call.
    pub(crate) fn notify(&self) {
        let callbacks: Vec<Callback> = lock(&self.entries)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in callbacks {
            callback();
        }
    }
}

/// Keeps a change listener registered. Dropping it unregisters.
#[must_use = "the listener is removed as soon as the handle is dropped"]
pub struct ListenerHandle {
    set: Weak<ListenerSet>,
    id: u64,
}

impl ListenerHandle {
    pub(crate) fn new(set: &Arc<ListenerSet>, id: u64) -> Self {
        Self {
            set: Arc::downgrade(set),
            id,
        }
    }

    /// Unregister now. Equivalent to dropping the handle.
    pub fn unregister(self) {}
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            set.remove(self.id);
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}
