//! Callback sets for manager-level signals (state changes, terminal failure)

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashsync_core::Subscription;
use parking_lot::Mutex;
use tracing::error;

pub(crate) type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Entries<T> {
    next_id: u64,
    listeners: Vec<(u64, Listener<T>)>,
}

pub(crate) struct ListenerSet<T> {
    name: &'static str,
    entries: Arc<Mutex<Entries<T>>>,
}

impl<T: 'static> ListenerSet<T> {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Arc::new(Mutex::new(Entries {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    pub(crate) fn add(&self, listener: Listener<T>) -> Subscription {
        let id = {
            let mut entries = self.entries.lock();
            entries.next_id += 1;
            let id = entries.next_id;
            entries.listeners.push((id, listener));
            id
        };

        let weak = Arc::downgrade(&self.entries);
        Subscription::new(move || {
            if let Some(entries) = weak.upgrade() {
                entries.lock().listeners.retain(|(existing, _)| *existing != id);
            }
        })
    }

    /// Register and immediately invoke with `value`
    pub(crate) fn add_and_call(&self, listener: Listener<T>, value: &T) -> Subscription {
        let subscription = self.add(listener.clone());
        self.invoke(&listener, value);
        subscription
    }

    /// Invoke every listener outside the lock; panics are logged and swallowed
    pub(crate) fn notify(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = self
            .entries
            .lock()
            .listeners
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in snapshot {
            self.invoke(&listener, value);
        }
    }

    fn invoke(&self, listener: &Listener<T>, value: &T) {
        if catch_unwind(AssertUnwindSafe(|| listener(value))).is_err() {
            error!(listeners = self.name, "[ConnectionManager] Listener panicked");
        }
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().listeners.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().listeners.len()
    }
}
