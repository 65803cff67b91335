//! In-process duplex links.
//!
//! [`memory_pair`] returns a [`MemoryConnector`] for the client side and a
//! [`MemoryListener`] that hands out the server end of every link opened
//! through it. Useful for exercising reconnect and heartbeat behaviour
//! without sockets, and for embedding a service in the same process.
//!
//! ```ignore
//! let (connector, mut listener) = memory_pair();
//! let provider = SocketProvider::new("memory://svc", SocketConfig::new(), Arc::new(connector));
//!
//! provider.connect().await?;
//! let mut peer = listener.accept().await.expect("link");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::CorrelationId;
use crate::protocol::{Assembly, Codec, PING, PONG, Reassembler, ServiceMessage, is_heartbeat};

use super::connection::{Connector, DuplexLink, FrameReader, FrameWriter};

// ============================================================================
// memory_pair
// ============================================================================

/// Creates a connected connector/listener pair.
#[must_use]
pub fn memory_pair() -> (MemoryConnector, MemoryListener) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();

    let connector = MemoryConnector {
        shared: Arc::new(ConnectorShared {
            accept_tx,
            refuse: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        }),
    };

    (connector, MemoryListener { accept_rx })
}

// ============================================================================
// MemoryConnector
// ============================================================================

struct ConnectorShared {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    refuse: AtomicBool,
    attempts: AtomicUsize,
}

/// Client side of an in-process link factory.
///
/// Cloning shares the refuse switch and attempt counter.
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<ConnectorShared>,
}

impl MemoryConnector {
    /// Makes subsequent opens fail with a connection error.
    pub fn set_refuse(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Returns the number of open attempts so far, refused ones included.
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, url: &str) -> Result<DuplexLink> {
        let attempt = self.shared.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if self.shared.refuse.load(Ordering::SeqCst) {
            debug!(url, attempt, "Memory link refused");
            return Err(Error::connection(format!("{url}: connection refused")));
        }

        let (to_server_tx, to_server_rx) = mpsc::unbounded_channel();
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            rx: to_server_rx,
            tx: Some(to_client_tx),
            reassembler: Reassembler::default(),
        };

        self.shared
            .accept_tx
            .send(peer)
            .map_err(|_| Error::connection(format!("{url}: listener dropped")))?;

        debug!(url, attempt, "Memory link opened");

        Ok(DuplexLink::new(
            MemoryWriter {
                tx: Some(to_server_tx),
            },
            MemoryReader { rx: to_client_rx },
        ))
    }
}

struct MemoryWriter {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn write(&mut self, frame: Vec<u8>) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::ConnectionClosed)?;
        tx.send(frame).map_err(|_| Error::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn read(&mut self) -> Option<Result<Vec<u8>>> {
        self.rx.recv().await.map(Ok)
    }
}

// ============================================================================
// MemoryListener
// ============================================================================

/// Server side of an in-process link factory.
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Waits for the next opened link.
    ///
    /// Returns `None` once every connector clone is dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// Returns an already opened link, if any.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.try_recv().ok()
    }
}

// ============================================================================
// MemoryPeer
// ============================================================================

/// Server end of one in-process link.
///
/// Dropping the peer (or calling [`close`](Self::close)) ends the link as
/// seen from the client.
pub struct MemoryPeer {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    reassembler: Reassembler,
}

impl MemoryPeer {
    /// Receives the next raw frame, heartbeats included.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Returns an already received raw frame, if any.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }

    /// Receives the next non-heartbeat frame, answering pings on the way.
    pub async fn recv_data(&mut self) -> Option<Vec<u8>> {
        loop {
            let frame = self.rx.recv().await?;
            if frame == [PING] {
                self.send(vec![PONG]);
                continue;
            }
            if !is_heartbeat(&frame) {
                return Some(frame);
            }
        }
    }

    /// Receives and reassembles the next logical message.
    ///
    /// Returns `None` once the client side is gone.
    pub async fn recv_message(
        &mut self,
        codec: &dyn Codec,
    ) -> Option<Result<(CorrelationId, ServiceMessage)>> {
        loop {
            let frame = self.recv_data().await?;
            let assembled = codec
                .parse_chunk(&frame)
                .and_then(|chunk| self.reassembler.push(chunk));

            match assembled {
                Ok(Assembly::Partial { .. }) => {}
                Ok(Assembly::Complete { id, payload }) => {
                    return Some(codec.decode_payload(&payload).map(|message| (id, message)));
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }

    /// Sends a raw frame. Returns `false` if the client side is gone.
    pub fn send(&self, frame: Vec<u8>) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.send(frame).is_ok())
    }

    /// Encodes and sends one logical message.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the client side is gone.
    pub fn send_message(
        &self,
        codec: &dyn Codec,
        id: CorrelationId,
        message: &ServiceMessage,
    ) -> Result<()> {
        for chunk in codec.encode(id, message)?.chunks {
            if !self.send(chunk) {
                return Err(Error::ConnectionClosed);
            }
        }
        Ok(())
    }

    /// Closes the server-to-client direction.
    pub fn close(&mut self) {
        self.tx = None;
    }
}

// ============================================================================
// Tests
// ============================================================================
