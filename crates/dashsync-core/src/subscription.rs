//! Unsubscribe handles returned by every listener registration

use parking_lot::Mutex;

type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Handle for a registered listener
///
/// Dropping the handle does NOT remove the listener; call [`Subscription::unsubscribe`].
/// Unsubscribing is idempotent and may be called from inside the listener itself.
#[must_use = "keep the subscription to be able to unsubscribe later"]
pub struct Subscription {
    unsubscribe: Mutex<Option<Unsubscribe>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Mutex::new(Some(Box::new(unsubscribe))),
        }
    }

    /// A handle with nothing to remove (e.g. registration on a destroyed component)
    pub fn noop() -> Self {
        Self {
            unsubscribe: Mutex::new(None),
        }
    }

    pub fn unsubscribe(&self) {
        let unsubscribe = self.unsubscribe.lock().take();
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe();
        }
    }

    pub fn is_active(&self) -> bool {
        self.unsubscribe.lock().is_some()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
