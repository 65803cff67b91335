//! Chunk framing and message codec.
//!
//! # Chunk Format
//!
//! ```text
//! ┌──────────────────┬─────────────────┬───────────────┬───────────────┐
//! │ correlation uuid │ total size      │ index         │ payload slice │
//! │ 16 bytes         │ u64 big-endian  │ u32 big-endian│ ...           │
//! └──────────────────┴─────────────────┴───────────────┴───────────────┘
//! ```
//!
//! The payload is the JSON [`WireMessage`] of one logical message. Payloads
//! larger than the chunk size are split; the receiver reassembles them with
//! [`Reassembler`](super::Reassembler).
//!
//! Heartbeat frames are a single byte and can never be mistaken for a chunk,
//! which always carries at least [`HEADER_SIZE`] bytes.

// ============================================================================
// Imports
// ============================================================================

use crate::error::{Error, Result};
use crate::identifiers::CorrelationId;

use super::message::{ServiceMessage, WireMessage};

// ============================================================================
// Constants
// ============================================================================

/// Heartbeat ping byte.
pub const PING: u8 = 0x01;

/// Heartbeat pong byte.
pub const PONG: u8 = 0x02;

/// Size of the chunk header in bytes.
pub const HEADER_SIZE: usize = 28;

/// Payloads above this size are split into chunks (3 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 3 * 1024 * 1024;

/// Largest payload accepted in either direction (100 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 100 * 1024 * 1024;

/// Returns `true` if the frame is a heartbeat ping or pong.
#[inline]
#[must_use]
pub fn is_heartbeat(frame: &[u8]) -> bool {
    matches!(frame, [PING] | [PONG])
}

// ============================================================================
// Chunk
// ============================================================================

/// One byte-level fragment of a logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Correlation id of the message.
    pub id: CorrelationId,
    /// Sequence index within the message.
    pub index: u32,
    /// Total payload size of the whole message.
    pub total_size: u64,
    /// This fragment's payload.
    pub payload: Vec<u8>,
}

impl Chunk {
    /// Returns `true` if this chunk carries the whole message.
    #[inline]
    #[must_use]
    pub fn is_whole(&self) -> bool {
        self.index == 0 && self.payload.len() as u64 == self.total_size
    }
}

// ============================================================================
// Encoded
// ============================================================================

/// Result of encoding one message.
#[derive(Debug, Clone)]
pub struct Encoded {
    /// Framed chunks, in send order.
    pub chunks: Vec<Vec<u8>>,
    /// Total payload size (sum of chunk payloads, headers excluded).
    pub total_size: u64,
}

// ============================================================================
// Codec Trait
// ============================================================================

/// Turns logical messages into framed chunks and back.
///
/// Implementations must be deterministic and side-effect free; reassembly
/// state lives in the transport, not in the codec.
pub trait Codec: Send + Sync + 'static {
    /// Encodes a message into one or more framed chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be serialized or is too large.
    fn encode(&self, id: CorrelationId, message: &ServiceMessage) -> Result<Encoded>;

    /// Parses the header of one inbound frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed.
    fn parse_chunk(&self, frame: &[u8]) -> Result<Chunk>;

    /// Decodes a complete, reassembled payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid message.
    fn decode_payload(&self, payload: &[u8]) -> Result<ServiceMessage>;

    /// Largest accepted payload size.
    fn max_message_size(&self) -> u64;
}

// ============================================================================
// BinaryCodec
// ============================================================================

/// Default codec: 28-byte binary header plus JSON payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryCodec {
    /// Split threshold and slice size.
    chunk_size: usize,
    /// Largest accepted payload.
    max_message_size: u64,
}

impl Default for BinaryCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl BinaryCodec {
    /// Creates a codec with the default chunk size and message limit.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Sets the chunk size. Values below 1 are clamped to 1.
    #[inline]
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Sets the message size limit.
    #[inline]
    #[must_use]
    pub const fn with_max_message_size(mut self, max_message_size: u64) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Returns the chunk size.
    #[inline]
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Frames one payload slice.
    fn frame(id: CorrelationId, total_size: u64, index: u32, slice: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(HEADER_SIZE + slice.len());
        frame.extend_from_slice(id.as_bytes());
        frame.extend_from_slice(&total_size.to_be_bytes());
        frame.extend_from_slice(&index.to_be_bytes());
        frame.extend_from_slice(slice);
        frame
    }
}

impl Codec for BinaryCodec {
    fn encode(&self, id: CorrelationId, message: &ServiceMessage) -> Result<Encoded> {
        let payload = serde_json::to_vec(&message.to_wire()?)?;
        let total_size = payload.len() as u64;

        if total_size > self.max_message_size {
            return Err(Error::message_too_large(total_size, self.max_message_size));
        }

        let chunks = payload
            .chunks(self.chunk_size)
            .enumerate()
            .map(|(index, slice)| Self::frame(id, total_size, index as u32, slice))
            .collect();

        Ok(Encoded { chunks, total_size })
    }

    fn parse_chunk(&self, frame: &[u8]) -> Result<Chunk> {
        if frame.len() < HEADER_SIZE {
            return Err(Error::protocol(format!(
                "Frame of {} bytes is smaller than the {HEADER_SIZE}-byte header",
                frame.len()
            )));
        }

        let mut id = [0u8; 16];
        id.copy_from_slice(&frame[..16]);
        let mut total_size = [0u8; 8];
        total_size.copy_from_slice(&frame[16..24]);
        let mut index = [0u8; 4];
        index.copy_from_slice(&frame[24..HEADER_SIZE]);

        let total_size = u64::from_be_bytes(total_size);
        if total_size > self.max_message_size {
            return Err(Error::message_too_large(total_size, self.max_message_size));
        }

        Ok(Chunk {
            id: CorrelationId::from_bytes(id),
            index: u32::from_be_bytes(index),
            total_size,
            payload: frame[HEADER_SIZE..].to_vec(),
        })
    }

    fn decode_payload(&self, payload: &[u8]) -> Result<ServiceMessage> {
        let wire: WireMessage = serde_json::from_slice(payload)?;
        ServiceMessage::from_wire(wire)
    }

    #[inline]
    fn max_message_size(&self) -> u64 {
        self.max_message_size
    }
}

// ============================================================================
// Tests
// ============================================================================
