//! Observer lists.
//!
//! Each subscriber gets its own unbounded channel, so several independent
//! listeners can watch the same event stream and a slow or dropped
//! subscriber never affects the others.

// ============================================================================
// Imports
// ============================================================================

use std::panic::{AssertUnwindSafe, catch_unwind};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::error;

// ============================================================================
// Observers
// ============================================================================

/// List of channel subscribers for one event type.
pub(crate) struct Observers<T> {
    senders: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> Observers<T> {
    /// Adds a subscriber.
    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().push(tx);
        rx
    }

    /// Delivers an event to every live subscriber, pruning closed ones.
    pub(crate) fn emit(&self, event: T) {
        self.senders
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of live subscribers.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        let mut senders = self.senders.lock();
        senders.retain(|tx| !tx.is_closed());
        senders.len()
    }
}

// ============================================================================
// Callback Isolation
// ============================================================================

/// Runs a caller-supplied callback, containing any panic it raises.
///
/// Returns `false` if the callback panicked.
pub(crate) fn call_isolated(what: &str, callback: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(()) => true,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(callback = what, %reason, "Callback panicked");
            false
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let observers = Observers::<u32>::default();
        let mut a = observers.subscribe();
        let mut b = observers.subscribe();

        observers.emit(7);

        assert_eq!(a.recv().await, Some(7));
        assert_eq!(b.recv().await, Some(7));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_pruned() {
        let observers = Observers::<u32>::default();
        let dropped = observers.subscribe();
        let mut kept = observers.subscribe();
        drop(dropped);

        observers.emit(1);

        assert_eq!(observers.len(), 1);
        assert_eq!(kept.recv().await, Some(1));
    }

    #[test]
    fn test_call_isolated_contains_panic() {
        let mut ran_after = false;

        let ok = call_isolated("test", || panic!("boom"));
        call_isolated("test", || ran_after = true);

        assert!(!ok);
        assert!(ran_after);
    }
}
