//! Duplex connection capability.
//!
//! The provider only needs an ordered, reliable, message-oriented duplex
//! link. [`Connector`] opens one and hands back its two halves:
//!
//! - [`FrameWriter`] - writes whole frames, in order
//! - [`FrameReader`] - yields whole frames, in order; `None` once closed
//!
//! Transports that can reorder or drop frames must not implement these
//! traits.
//!
//! # Implementations
//!
//! | Type | Transport |
//! |------|-----------|
//! | [`WebSocketConnector`] | WebSocket via tokio-tungstenite (binary frames) |
//! | [`MemoryConnector`](super::MemoryConnector) | In-process channels |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// Client-side WebSocket stream.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// Traits
// ============================================================================

/// Opens physical connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens a connection and completes its handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    async fn open(&self, url: &str) -> Result<DuplexLink>;
}

/// Write half of a duplex link.
#[async_trait]
pub trait FrameWriter: Send + 'static {
    /// Writes one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the link is closed or the write fails.
    async fn write(&mut self, frame: Vec<u8>) -> Result<()>;

    /// Starts a graceful close.
    ///
    /// # Errors
    ///
    /// Returns an error if the close frame cannot be written.
    async fn close(&mut self) -> Result<()>;
}

/// Read half of a duplex link.
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Reads the next frame. Returns `None` once the link is closed.
    async fn read(&mut self) -> Option<Result<Vec<u8>>>;
}

// ============================================================================
// DuplexLink
// ============================================================================

/// An open physical connection, split into halves.
pub struct DuplexLink {
    /// Write half.
    pub writer: Box<dyn FrameWriter>,
    /// Read half.
    pub reader: Box<dyn FrameReader>,
}

impl DuplexLink {
    /// Creates a link from its halves.
    #[inline]
    #[must_use]
    pub fn new(writer: impl FrameWriter, reader: impl FrameReader) -> Self {
        Self {
            writer: Box::new(writer),
            reader: Box::new(reader),
        }
    }
}

impl fmt::Debug for DuplexLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplexLink").finish_non_exhaustive()
    }
}

// ============================================================================
// WebSocketConnector
// ============================================================================

/// Opens WebSocket connections with tokio-tungstenite.
///
/// Frames are sent as binary messages. Inbound text messages are passed on
/// as their UTF-8 bytes; protocol-level ping/pong is answered by tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Creates a new connector.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &str) -> Result<DuplexLink> {
        let (ws_stream, response) = connect_async(url)
            .await
            .map_err(|e| Error::connection(format!("WebSocket handshake with {url} failed: {e}")))?;

        debug!(url, status = %response.status(), "WebSocket handshake completed");

        let (sink, stream) = ws_stream.split();
        Ok(DuplexLink::new(WsWriter { sink }, WsReader { stream }))
    }
}

/// Write half of a WebSocket link.
struct WsWriter {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn write(&mut self, frame: Vec<u8>) -> Result<()> {
        self.sink.send(Message::binary(frame)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.sink.close().await?;
        Ok(())
    }
}

/// Read half of a WebSocket link.
struct WsReader {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameReader for WsReader {
    async fn read(&mut self) -> Option<Result<Vec<u8>>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Binary(data)) => return Some(Ok(data.to_vec())),
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().as_bytes().to_vec())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "WebSocket close frame received");
                }
                // Ping, Pong and raw frames are handled by tungstenite
                Ok(_) => trace!("Ignoring control frame"),
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
