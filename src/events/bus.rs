//! Event listener registry.
//!
//! [`EventBus`] remembers every active subscription so it can be replayed
//! after the connection is replaced, and routes inbound `event` messages to
//! the callbacks whose keys they name.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ListenerKey;
use crate::protocol::{ListenerRemoval, ServiceMessage};
use crate::transport::{ServiceTransport, TransportEvent, call_isolated};

use super::listener::{EventCallback, ListenerEntry};

// ============================================================================
// Types
// ============================================================================

type Registry = FxHashMap<ListenerKey, ListenerEntry>;

// ============================================================================
// EventBus
// ============================================================================

/// Local registry of server event subscriptions.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct EventBus {
    transport: ServiceTransport,
    listeners: Arc<Mutex<Registry>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Creates a bus and starts routing inbound events.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn new(transport: ServiceTransport) -> Self {
        let listeners = Arc::new(Mutex::new(Registry::default()));
        let mut events = transport.subscribe();
        let routed = Arc::clone(&listeners);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let TransportEvent::Event(notice) = event {
                    dispatch_to(&routed, &notice.keys, &notice.data);
                }
            }
            debug!("Event routing terminated");
        });

        Self {
            transport,
            listeners,
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Subscribes on the server and records the listener locally.
    ///
    /// The listener is recorded only after the server acknowledged it.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscribe round trip fails.
    pub async fn add_listener(
        &self,
        event_name: impl Into<String>,
        info: Value,
        callback: EventCallback,
    ) -> Result<ListenerKey> {
        let entry = ListenerEntry::new(event_name, info, callback);
        let key = entry.key;

        self.transport
            .send(ServiceMessage::AddListener(entry.registration()), None)
            .await?;

        debug!(%key, event = %entry.event_name, "Listener added");
        self.listeners.lock().insert(key, entry);
        Ok(key)
    }

    /// Removes a listener locally and unsubscribes on the server.
    ///
    /// The local entry is gone even if the server cannot be told; a failed
    /// unsubscribe is logged and not reported.
    pub async fn remove_listener(&self, key: ListenerKey) {
        let removed = self.listeners.lock().remove(&key);
        if removed.is_none() {
            trace!(%key, "Removing unknown listener");
        }

        let message = ServiceMessage::RemoveListener(ListenerRemoval { key });
        match self.transport.send(message, None).await {
            Ok(_) => debug!(%key, "Listener removed"),
            Err(e) => warn!(%key, error = %e, "Server-side unsubscribe failed"),
        }
    }

    /// Replays every recorded subscription.
    ///
    /// Every entry is attempted even if some fail. Returns the number of
    /// subscriptions replayed.
    ///
    /// # Errors
    ///
    /// Returns the first failure after all entries were attempted.
    pub async fn re_register_all(&self) -> Result<usize> {
        let entries: Vec<ListenerEntry> = self.listeners.lock().values().cloned().collect();
        let mut first_error: Option<Error> = None;

        for entry in &entries {
            let message = ServiceMessage::AddListener(entry.registration());
            if let Err(e) = self.transport.send(message, None).await {
                warn!(key = %entry.key, event = %entry.event_name, error = %e, "Re-subscribe failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                if !entries.is_empty() {
                    debug!(count = entries.len(), "Listeners re-registered");
                }
                Ok(entries.len())
            }
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Invokes the callbacks of the given keys with the event data.
    ///
    /// Unknown keys are skipped. A panicking callback does not prevent the
    /// others from running. Returns the number of callbacks invoked.
    pub fn dispatch(&self, keys: &[ListenerKey], data: &Value) -> usize {
        dispatch_to(&self.listeners, keys, data)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the number of recorded listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Returns `true` if the key is recorded.
    #[must_use]
    pub fn contains(&self, key: &ListenerKey) -> bool {
        self.listeners.lock().contains_key(key)
    }

    /// Returns a snapshot of the recorded listeners.
    #[must_use]
    pub fn entries(&self) -> Vec<ListenerEntry> {
        self.listeners.lock().values().cloned().collect()
    }
}

fn dispatch_to(listeners: &Mutex<Registry>, keys: &[ListenerKey], data: &Value) -> usize {
    // Snapshot so callbacks may add or remove listeners
    let callbacks: Vec<(ListenerKey, EventCallback)> = {
        let registry = listeners.lock();
        keys.iter()
            .filter_map(|key| registry.get(key).map(|entry| (*key, Arc::clone(&entry.callback))))
            .collect()
    };

    for (key, callback) in &callbacks {
        trace!(%key, "Dispatching event");
        call_isolated("event listener", || callback(data.clone()));
    }

    callbacks.len()
}

// ============================================================================
// Tests
// ============================================================================
