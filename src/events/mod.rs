//! Server event subscriptions.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `bus` | Listener registry, replay and dispatch |
//! | `listener` | Registration entries and the [`ServiceEvent`] trait |

// ============================================================================
// Submodules
// ============================================================================

/// Listener registry.
pub mod bus;

/// Listener entries and typed events.
pub mod listener;

// ============================================================================
// Re-exports
// ============================================================================

pub use bus::EventBus;
pub use listener::{EventCallback, ListenerEntry, ServiceEvent};
