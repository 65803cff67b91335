//! Chunk reassembly.
//!
//! Collects chunks per correlation id until the announced total size has
//! arrived. Chunks of different ids may interleave; a repeated index is
//! ignored so a duplicate never inflates the completed size.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::identifiers::CorrelationId;

use super::codec::{Chunk, DEFAULT_MAX_MESSAGE_SIZE};

// ============================================================================
// Assembly
// ============================================================================

/// Outcome of feeding one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembly {
    /// More chunks are needed.
    Partial {
        /// Correlation id of the message.
        id: CorrelationId,
        /// Total payload size.
        total_size: u64,
        /// Payload bytes received so far.
        completed_size: u64,
    },
    /// The message is complete.
    Complete {
        /// Correlation id of the message.
        id: CorrelationId,
        /// Reassembled payload.
        payload: Vec<u8>,
    },
}

// ============================================================================
// Reassembler
// ============================================================================

/// In-progress message.
#[derive(Debug)]
struct PartialMessage {
    total_size: u64,
    completed_size: u64,
    parts: BTreeMap<u32, Vec<u8>>,
}

/// Reassembles chunked messages by correlation id and sequence index.
#[derive(Debug)]
pub struct Reassembler {
    partials: FxHashMap<CorrelationId, PartialMessage>,
    max_message_size: u64,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl Reassembler {
    /// Creates a reassembler with the given size limit.
    #[must_use]
    pub fn new(max_message_size: u64) -> Self {
        Self {
            partials: FxHashMap::default(),
            max_message_size,
        }
    }

    /// Feeds one chunk.
    ///
    /// # Errors
    ///
    /// - [`Error::MessageTooLarge`] if the announced size exceeds the limit
    /// - [`Error::Protocol`] if chunks of one id disagree on the total size
    ///   or deliver more bytes than announced
    ///
    /// On error the partial state for that id is discarded.
    pub fn push(&mut self, chunk: Chunk) -> Result<Assembly> {
        let Chunk {
            id,
            index,
            total_size,
            payload,
        } = chunk;

        if total_size > self.max_message_size {
            self.partials.remove(&id);
            return Err(Error::message_too_large(total_size, self.max_message_size));
        }

        if index == 0 && payload.len() as u64 == total_size && !self.partials.contains_key(&id) {
            return Ok(Assembly::Complete { id, payload });
        }

        let partial = self.partials.entry(id).or_insert_with(|| PartialMessage {
            total_size,
            completed_size: 0,
            parts: BTreeMap::new(),
        });

        if partial.total_size != total_size {
            self.partials.remove(&id);
            return Err(Error::protocol(format!(
                "Chunk of {id} announces {total_size} bytes, earlier chunks announced a different size"
            )));
        }

        if !partial.parts.contains_key(&index) {
            partial.completed_size += payload.len() as u64;
            partial.parts.insert(index, payload);
        }

        let completed_size = partial.completed_size;

        if completed_size > total_size {
            self.partials.remove(&id);
            return Err(Error::protocol(format!(
                "Chunks of {id} exceed the announced {total_size} bytes"
            )));
        }

        if completed_size < total_size {
            return Ok(Assembly::Partial {
                id,
                total_size,
                completed_size,
            });
        }

        let Some(partial) = self.partials.remove(&id) else {
            return Err(Error::protocol(format!("Reassembly state for {id} vanished")));
        };

        let mut payload = Vec::with_capacity(total_size as usize);
        for part in partial.parts.into_values() {
            payload.extend_from_slice(&part);
        }

        Ok(Assembly::Complete { id, payload })
    }

    /// Discards the partial state of one id.
    pub fn discard(&mut self, id: &CorrelationId) {
        self.partials.remove(id);
    }

    /// Discards every partial message.
    pub fn clear(&mut self) {
        self.partials.clear();
    }

    /// Returns the number of incomplete messages.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.partials.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
