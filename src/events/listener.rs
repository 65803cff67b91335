//! Listener registrations and typed event declarations.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::identifiers::ListenerKey;
use crate::protocol::ListenerRegistration;

// ============================================================================
// ServiceEvent
// ============================================================================

/// Declares a server-side event type.
///
/// `Info` describes what a listener subscribes to and is matched by the
/// server (or by [`emit`](crate::ServiceClient::emit) selectors); `Data` is
/// the payload delivered to listeners.
///
/// # Example
///
/// ```ignore
/// struct OrderChanged;
///
/// impl ServiceEvent for OrderChanged {
///     const NAME: &'static str = "OrderChanged";
///     type Info = OrderFilter;
///     type Data = Order;
/// }
/// ```
pub trait ServiceEvent: Send + Sync + 'static {
    /// Wire name of the event.
    const NAME: &'static str;

    /// Subscription descriptor.
    type Info: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Event payload.
    type Data: Serialize + DeserializeOwned + Send + Sync + 'static;
}

// ============================================================================
// ListenerEntry
// ============================================================================

/// Callback invoked with raw event data.
pub type EventCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// One local listener registration.
#[derive(Clone)]
pub struct ListenerEntry {
    /// Listener key, unique per registration.
    pub key: ListenerKey,
    /// Event name.
    pub event_name: String,
    /// Subscription descriptor.
    pub info: Value,
    pub(crate) callback: EventCallback,
}

impl ListenerEntry {
    /// Creates an entry with a fresh key.
    #[must_use]
    pub fn new(event_name: impl Into<String>, info: Value, callback: EventCallback) -> Self {
        Self {
            key: ListenerKey::generate(),
            event_name: event_name.into(),
            info,
            callback,
        }
    }

    /// Builds the subscribe message body for this entry.
    #[must_use]
    pub fn registration(&self) -> ListenerRegistration {
        ListenerRegistration {
            key: self.key,
            name: self.event_name.clone(),
            info: self.info.clone(),
        }
    }
}

impl fmt::Debug for ListenerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerEntry")
            .field("key", &self.key)
            .field("event_name", &self.event_name)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_registration_mirrors_entry() {
        let entry = ListenerEntry::new("OrderChanged", json!({ "shop": 3 }), Arc::new(|_: Value| {}));
        let registration = entry.registration();

        assert_eq!(registration.key, entry.key);
        assert_eq!(registration.name, "OrderChanged");
        assert_eq!(registration.info, json!({ "shop": 3 }));
    }

    #[test]
    fn test_entries_get_distinct_keys() {
        let a = ListenerEntry::new("E", Value::Null, Arc::new(|_: Value| {}));
        let b = ListenerEntry::new("E", Value::Null, Arc::new(|_: Value| {}));
        assert_ne!(a.key, b.key);
    }
}
