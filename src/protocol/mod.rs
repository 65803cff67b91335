//! Wire protocol: logical messages, chunk framing and reassembly.
//!
//! # Protocol Overview
//!
//! | Layer | Type | Purpose |
//! |-------|------|---------|
//! | Logical | [`ServiceMessage`] | Typed request, response, event and control messages |
//! | Envelope | [`WireMessage`] | JSON `{ name, body }` |
//! | Framing | [`Chunk`] | 28-byte header + payload slice |
//! | Liveness | [`PING`] / [`PONG`] | Single-byte heartbeat frames |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `assembly` | Reassembly of chunked payloads |
//! | `codec` | [`Codec`] trait and the default [`BinaryCodec`] |
//! | `message` | Logical message and body types |

// ============================================================================
// Submodules
// ============================================================================

/// Chunk reassembly.
pub mod assembly;

/// Chunk framing and message codec.
pub mod codec;

/// Logical message types.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use assembly::{Assembly, Reassembler};
pub use codec::{
    BinaryCodec, Chunk, Codec, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE, Encoded, HEADER_SIZE,
    PING, PONG, is_heartbeat,
};
pub use message::{
    EmitRequest, ErrorBody, EventNotice, ListenerInfo, ListenerQuery, ListenerRegistration,
    ListenerRemoval, ProgressBody, ReloadInfo, ServiceMessage, WireMessage, names,
};
