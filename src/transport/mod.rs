//! Transport layer.
//!
//! Keeps one logical connection to a service host alive and correlates
//! requests with replies over it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   requests    ┌──────────────────┐   frames   ┌────────────┐
//! │ ServiceTransport │──────────────►│  SocketProvider  │───────────►│  Service   │
//! │ pending map      │◄──────────────│  heartbeat       │◄───────────│  host      │
//! │ dispatch task    │ SocketEvents  │  reconnect       │ DuplexLink │            │
//! └──────────────────┘               └──────────────────┘            └────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Duplex link capability and the WebSocket connector |
//! | `memory` | In-process links |
//! | `provider` | Connection lifecycle, heartbeat and reconnect |
//! | `service` | Request correlation, progress and event routing |

// ============================================================================
// Submodules
// ============================================================================

/// Duplex link capability and the WebSocket connector.
pub mod connection;

/// In-process links.
pub mod memory;

/// Observer lists.
mod observers;

/// Connection lifecycle.
pub mod provider;

/// Request/response correlation.
pub mod service;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connector, DuplexLink, FrameReader, FrameWriter, WebSocketConnector};
pub use memory::{MemoryConnector, MemoryListener, MemoryPeer, memory_pair};
pub(crate) use observers::{Observers, call_isolated};
pub use provider::{ConnectionState, SocketConfig, SocketEvent, SocketProvider};
pub use service::{
    ProgressSink, ServiceTransport, TransferDirection, TransferProgress, TransportEvent,
};
