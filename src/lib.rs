//! Service Link - resilient RPC client transport.
//!
//! Keeps one logical connection to a remote service host alive over an
//! unreliable duplex link and multiplexes request/response calls and server
//! events over it.
//!
//! # Architecture
//!
//! The client is built from three layers, each a cheap `Clone` handle:
//!
//! - **[`SocketProvider`]**: owns the physical link, heartbeats, reconnects
//! - **[`ServiceTransport`]**: correlates requests with replies, chunks
//!   large payloads, cancels pending requests when the link drops
//! - **[`EventBus`]**: remembers event subscriptions and replays them after
//!   reconnect
//!
//! [`ServiceClient`] wires the three together for a named client.
//!
//! # Quick Start
//!
//! ```no_run
//! use service_link::{Result, ServiceClient};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = ServiceClient::builder()
//!         .name("admin")
//!         .host("127.0.0.1")
//!         .port(8080)
//!         .build()?;
//!
//!     client.connect().await?;
//!
//!     let users = client.send("UserService", "list", vec![json!({ "active": true })]).await?;
//!     println!("users: {users}");
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`ServiceClient`] facade and configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`events`] | Event subscriptions: [`EventBus`], [`ServiceEvent`] |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Logical messages, chunk framing and reassembly |
//! | [`transport`] | Connection lifecycle and request correlation |

// ============================================================================
// Modules
// ============================================================================

/// Client facade and configuration.
///
/// Use [`ServiceClient::builder()`] to create a configured client.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Server event subscriptions.
pub mod events;

/// Type-safe identifiers.
pub mod identifiers;

/// Wire protocol.
///
/// Logical messages, the chunk codec and reassembly.
pub mod protocol;

/// Transport layer.
///
/// Connection lifecycle, heartbeat, reconnect and request correlation.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{ClientOptions, ServiceClient, ServiceClientBuilder};

// Error types
pub use error::{Error, Result};

// Event types
pub use events::{EventBus, ListenerEntry, ServiceEvent};

// Identifier types
pub use identifiers::{ClientId, CorrelationId, ListenerKey};

// Protocol types
pub use protocol::{BinaryCodec, Codec, ServiceMessage};

// Transport types
pub use transport::{
    ConnectionState, Connector, ServiceTransport, SocketConfig, SocketProvider, TransferDirection,
    TransferProgress, TransportEvent, WebSocketConnector,
};
