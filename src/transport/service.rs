//! Request/response correlation over a [`SocketProvider`].
//!
//! Every outbound request gets a fresh [`CorrelationId`] and a pending entry
//! that resolves when the matching `response` or `error` arrives. A single
//! dispatch task consumes the provider's events:
//!
//! - frames are reassembled per id and routed to their pending entry
//! - `event`, `reload` and `client-get-id` messages are republished as
//!   [`TransportEvent`]s
//! - the loss of a link cancels every request written on it
//!
//! Pending entries are stamped with the generation of the link they were
//! written on, so a late loss notice never rejects a request that already
//! went out on the replacement link.
//!
//! # Example
//!
//! ```ignore
//! let transport = ServiceTransport::new(provider, Arc::new(BinaryCodec::new()));
//! let message = ServiceMessage::request("UserService", "find", vec![json!(42)]);
//! let user = transport.send(message, None).await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::CorrelationId;
use crate::protocol::{Assembly, Codec, EventNotice, Reassembler, ReloadInfo, ServiceMessage};

use super::observers::{Observers, call_isolated};
use super::provider::{ConnectionState, SocketEvent, SocketProvider};

// ============================================================================
// Progress Types
// ============================================================================

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferDirection {
    /// Request bytes going to the server.
    Upload,
    /// Response bytes coming from the server.
    Download,
}

/// Progress of one chunked transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Request the transfer belongs to.
    pub id: CorrelationId,
    /// Transfer direction.
    pub direction: TransferDirection,
    /// Total payload bytes.
    pub total_size: u64,
    /// Payload bytes transferred so far.
    pub completed_size: u64,
}

/// Callback receiving transfer progress.
pub type ProgressSink = Arc<dyn Fn(TransferProgress) + Send + Sync>;

// ============================================================================
// TransportEvent
// ============================================================================

/// Unsolicited traffic and state changes published by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Server event addressed to listener keys.
    Event(EventNotice),
    /// Server asks clients to reload.
    Reload(ReloadInfo),
    /// Server asks for the client id; answer with the given correlation id.
    ClientIdRequested(CorrelationId),
    /// Provider state transition.
    State(ConnectionState),
}

// ============================================================================
// Correlation Map
// ============================================================================

/// A request awaiting its reply.
struct PendingRequest {
    response_tx: oneshot::Sender<Result<Value>>,
    progress: Option<ProgressSink>,
    /// Link the request is written on.
    generation: u64,
}

type CorrelationMap = FxHashMap<CorrelationId, PendingRequest>;

// ============================================================================
// ServiceTransport
// ============================================================================

/// Correlates requests with replies over one provider.
///
/// Cheap to clone; clones share the pending map and dispatch task.
#[derive(Clone)]
pub struct ServiceTransport {
    socket: SocketProvider,
    codec: Arc<dyn Codec>,
    pending: Arc<Mutex<CorrelationMap>>,
    observers: Arc<Observers<TransportEvent>>,
    request_timeout: Option<Duration>,
}

impl fmt::Debug for ServiceTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceTransport")
            .field("socket", &self.socket)
            .field("pending", &self.pending_count())
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl ServiceTransport {
    /// Creates a transport and starts its dispatch task.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn new(socket: SocketProvider, codec: Arc<dyn Codec>) -> Self {
        let pending = Arc::new(Mutex::new(CorrelationMap::default()));
        let observers = Arc::new(Observers::default());

        tokio::spawn(run_dispatch(
            socket.subscribe(),
            Arc::clone(&codec),
            Arc::clone(&pending),
            Arc::clone(&observers),
        ));

        Self {
            socket,
            codec,
            pending,
            observers,
            request_timeout: None,
        }
    }

    /// Sets a default bound on waiting for replies. `None` waits indefinitely.
    #[must_use]
    pub fn with_request_timeout(mut self, request_timeout: Option<Duration>) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Returns the underlying provider.
    #[inline]
    #[must_use]
    pub fn socket(&self) -> &SocketProvider {
        &self.socket
    }

    /// Subscribes to events, reload notices and state changes.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        self.observers.subscribe()
    }

    /// Returns the number of requests awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Sends a message and waits for its reply.
    ///
    /// If the message spans several chunks and a progress sink is given, an
    /// initial upload report of zero bytes is issued before the first chunk.
    ///
    /// # Errors
    ///
    /// - [`Error::Server`] if the server answers with an error
    /// - [`Error::Cancelled`] if the connection is lost while pending
    /// - [`Error::RequestTimeout`] if the default request timeout elapses
    /// - Any encoding or send error
    pub async fn send(&self, message: ServiceMessage, progress: Option<ProgressSink>) -> Result<Value> {
        self.send_inner(message, progress, self.request_timeout).await
    }

    /// Like [`send`](Self::send) with an explicit reply timeout.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn send_with_timeout(
        &self,
        message: ServiceMessage,
        progress: Option<ProgressSink>,
        timeout: Duration,
    ) -> Result<Value> {
        self.send_inner(message, progress, Some(timeout)).await
    }

    /// Sends an unsolicited answer to a server push, without awaiting a reply.
    ///
    /// # Errors
    ///
    /// Any encoding or send error.
    pub async fn reply(&self, id: CorrelationId, message: &ServiceMessage) -> Result<()> {
        let encoded = self.codec.encode(id, message)?;
        let generation = self.socket.wait_connected().await?;

        for chunk in encoded.chunks {
            self.socket.send_to(generation, chunk).await?;
        }
        trace!(%id, name = message.name(), "Reply sent");
        Ok(())
    }

    async fn send_inner(
        &self,
        message: ServiceMessage,
        progress: Option<ProgressSink>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let id = CorrelationId::generate();
        let encoded = self.codec.encode(id, &message)?;
        let generation = self.socket.wait_connected().await?;

        let (response_tx, response_rx) = oneshot::channel();
        self.pending.lock().insert(
            id,
            PendingRequest {
                response_tx,
                progress: progress.clone(),
                generation,
            },
        );

        let chunk_count = encoded.chunks.len();
        trace!(%id, name = message.name(), chunks = chunk_count, size = encoded.total_size, "Sending");

        if chunk_count > 1
            && let Some(sink) = &progress
        {
            report(
                sink,
                TransferProgress {
                    id,
                    direction: TransferDirection::Upload,
                    total_size: encoded.total_size,
                    completed_size: 0,
                },
            );
        }

        for chunk in encoded.chunks {
            if let Err(e) = self.socket.send_to(generation, chunk).await {
                if self.pending.lock().remove(&id).is_some() {
                    return Err(e);
                }
                // Already settled, most likely cancelled with its link
                break;
            }
        }

        let reply = match timeout {
            None => response_rx.await,
            Some(limit) => match tokio::time::timeout(limit, response_rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    self.pending.lock().remove(&id);
                    return Err(Error::request_timeout(id, as_millis(limit)));
                }
            },
        };

        match reply {
            Ok(result) => result,
            Err(_) => Err(Error::cancelled(id)),
        }
    }
}

// ============================================================================
// Dispatch Loop
// ============================================================================

/// Consumes provider events until the provider is gone.
async fn run_dispatch(
    mut events: mpsc::UnboundedReceiver<SocketEvent>,
    codec: Arc<dyn Codec>,
    pending: Arc<Mutex<CorrelationMap>>,
    observers: Arc<Observers<TransportEvent>>,
) {
    let mut reassembler = Reassembler::new(codec.max_message_size());

    while let Some(event) = events.recv().await {
        match event {
            SocketEvent::Message(frame) => {
                handle_frame(&frame, codec.as_ref(), &mut reassembler, &pending, &observers);
            }
            SocketEvent::LinkClosed(generation) => {
                cancel_link(&pending, generation);
                reassembler.clear();
            }
            SocketEvent::State(state) => observers.emit(TransportEvent::State(state)),
        }
    }

    debug!("Dispatch loop terminated");
}

fn handle_frame(
    frame: &[u8],
    codec: &dyn Codec,
    reassembler: &mut Reassembler,
    pending: &Mutex<CorrelationMap>,
    observers: &Observers<TransportEvent>,
) {
    let chunk = match codec.parse_chunk(frame) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(error = %e, len = frame.len(), "Dropping malformed frame");
            return;
        }
    };
    let id = chunk.id;

    let payload = match reassembler.push(chunk) {
        Ok(Assembly::Partial {
            id,
            total_size,
            completed_size,
        }) => {
            notify_progress(pending, id, TransferDirection::Download, total_size, completed_size);
            return;
        }
        Ok(Assembly::Complete { payload, .. }) => payload,
        Err(e) => {
            settle(pending, id, Err(e));
            return;
        }
    };

    let message = match codec.decode_payload(&payload) {
        Ok(message) => message,
        Err(e) => {
            settle(pending, id, Err(Error::protocol(format!("Undecodable message: {e}"))));
            return;
        }
    };

    match message {
        ServiceMessage::Response(value) => settle(pending, id, Ok(value)),
        ServiceMessage::Error(body) => settle(pending, id, Err(body.into())),
        ServiceMessage::Progress(body) => notify_progress(
            pending,
            id,
            TransferDirection::Upload,
            body.total_size,
            body.completed_size,
        ),
        ServiceMessage::Event(notice) => observers.emit(TransportEvent::Event(notice)),
        ServiceMessage::Reload(info) => {
            debug!(changed = info.changed_files.len(), "Reload notice received");
            observers.emit(TransportEvent::Reload(info));
        }
        ServiceMessage::GetClientId => observers.emit(TransportEvent::ClientIdRequested(id)),
        other => settle(
            pending,
            id,
            Err(Error::protocol(format!(
                "Unexpected inbound message: {}",
                other.name()
            ))),
        ),
    }
}

/// Resolves or rejects the pending request with the given id.
fn settle(pending: &Mutex<CorrelationMap>, id: CorrelationId, result: Result<Value>) {
    let entry = pending.lock().remove(&id);

    match entry {
        Some(request) => {
            let _ = request.response_tx.send(result);
        }
        None => match result {
            Ok(_) => debug!(%id, "Reply for unknown request dropped"),
            Err(e) => warn!(%id, error = %e, "Unattributable inbound error dropped"),
        },
    }
}

fn notify_progress(
    pending: &Mutex<CorrelationMap>,
    id: CorrelationId,
    direction: TransferDirection,
    total_size: u64,
    completed_size: u64,
) {
    let sink = pending
        .lock()
        .get(&id)
        .and_then(|request| request.progress.clone());

    if let Some(sink) = sink {
        report(
            &sink,
            TransferProgress {
                id,
                direction,
                total_size,
                completed_size,
            },
        );
    }
}

fn report(sink: &ProgressSink, progress: TransferProgress) {
    call_isolated("progress", || sink(progress));
}

/// Rejects every pending request written on the given link or an older one.
fn cancel_link(pending: &Mutex<CorrelationMap>, generation: u64) {
    let cancelled: Vec<(CorrelationId, PendingRequest)> = {
        let mut map = pending.lock();
        let lost: Vec<CorrelationId> = map
            .iter()
            .filter(|(_, request)| request.generation <= generation)
            .map(|(id, _)| *id)
            .collect();
        lost.into_iter()
            .filter_map(|id| map.remove(&id).map(|request| (id, request)))
            .collect()
    };

    if !cancelled.is_empty() {
        warn!(count = cancelled.len(), generation, "Cancelling pending requests of lost link");
    }

    for (id, request) in cancelled {
        let _ = request.response_tx.send(Err(Error::cancelled(id)));
    }
}

#[inline]
fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::identifiers::{ClientId, ListenerKey};
    use crate::protocol::{BinaryCodec, ErrorBody, ProgressBody};
    use crate::transport::memory::{MemoryListener, MemoryPeer, memory_pair};
    use crate::transport::provider::SocketConfig;

    async fn setup_with(codec: BinaryCodec) -> (ServiceTransport, MemoryListener, MemoryPeer) {
        let (connector, mut listener) = memory_pair();
        let socket = SocketProvider::new("memory://svc", SocketConfig::new(), Arc::new(connector));
        let transport = ServiceTransport::new(socket.clone(), Arc::new(codec));
        let mut states = transport.subscribe();

        socket.connect().await.expect("connect");
        let peer = listener.accept().await.expect("peer");

        // Let the dispatch task publish `connected` before tests subscribe
        while let Some(event) = states.recv().await {
            if event == TransportEvent::State(ConnectionState::Connected) {
                break;
            }
        }
        (transport, listener, peer)
    }

    async fn setup() -> (ServiceTransport, MemoryListener, MemoryPeer) {
        setup_with(BinaryCodec::new()).await
    }

    async fn next_request(peer: &mut MemoryPeer, codec: &BinaryCodec) -> (CorrelationId, ServiceMessage) {
        peer.recv_message(codec)
            .await
            .expect("request")
            .expect("decodable")
    }

    fn recorder() -> (ProgressSink, Arc<Mutex<Vec<TransferProgress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: ProgressSink = Arc::new(move |progress: TransferProgress| sink_seen.lock().push(progress));
        (sink, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_replies_reach_their_callers() {
        let codec = BinaryCodec::new();
        let (transport, _listener, mut peer) = setup().await;

        let first = tokio::spawn({
            let transport = transport.clone();
            async move { transport.send(ServiceMessage::request("Svc", "a", vec![]), None).await }
        });
        let (id_a, _) = next_request(&mut peer, &codec).await;

        let second = tokio::spawn({
            let transport = transport.clone();
            async move { transport.send(ServiceMessage::request("Svc", "b", vec![]), None).await }
        });
        let (id_b, _) = next_request(&mut peer, &codec).await;

        peer.send_message(&codec, id_b, &ServiceMessage::Response(json!("B")))
            .expect("reply b");
        peer.send_message(&codec, id_a, &ServiceMessage::Response(json!("A")))
            .expect("reply a");

        assert_eq!(second.await.expect("task").expect("reply"), json!("B"));
        assert_eq!(first.await.expect("task").expect("reply"), json!("A"));
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_reply_rejects_with_server_error() {
        let codec = BinaryCodec::new();
        let (transport, _listener, mut peer) = setup().await;

        let call = tokio::spawn({
            let transport = transport.clone();
            async move { transport.send(ServiceMessage::request("Svc", "fail", vec![]), None).await }
        });
        let (id, _) = next_request(&mut peer, &codec).await;

        let body = ErrorBody {
            name: Some("NotFound".into()),
            code: Some("E_NOT_FOUND".into()),
            message: "no such user".into(),
            stack: None,
            detail: Some(json!({ "id": 7 })),
        };
        peer.send_message(&codec, id, &ServiceMessage::Error(body))
            .expect("reply");

        let err = call.await.expect("task").unwrap_err();
        assert!(err.is_server_error());
        assert_eq!(err.server_code(), Some("E_NOT_FOUND"));
        assert_eq!(err.to_string(), "no such user");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_loss_cancels_every_pending_request() {
        let codec = BinaryCodec::new();
        let (transport, _listener, mut peer) = setup().await;

        let mut calls = Vec::new();
        for i in 0..3 {
            let transport = transport.clone();
            calls.push(tokio::spawn(async move {
                transport
                    .send(ServiceMessage::request("Svc", "slow", vec![json!(i)]), None)
                    .await
            }));
            next_request(&mut peer, &codec).await;
        }
        assert_eq!(transport.pending_count(), 3);

        drop(peer);

        for call in calls {
            let err = call.await.expect("task").unwrap_err();
            assert!(err.is_cancelled());
        }
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunked_request_reports_upload_progress() {
        let codec = BinaryCodec::new().with_chunk_size(64);
        let (transport, _listener, mut peer) = setup_with(codec).await;
        let (sink, seen) = recorder();

        let call = tokio::spawn({
            let transport = transport.clone();
            async move {
                transport
                    .send(
                        ServiceMessage::request("Files", "upload", vec![json!("u".repeat(400))]),
                        Some(sink),
                    )
                    .await
            }
        });

        let (id, message) = next_request(&mut peer, &codec).await;
        assert!(matches!(message, ServiceMessage::Request { .. }));

        let total = seen.lock()[0].total_size;
        peer.send_message(
            &codec,
            id,
            &ServiceMessage::Progress(ProgressBody {
                total_size: total,
                completed_size: total / 2,
            }),
        )
        .expect("progress");
        peer.send_message(&codec, id, &ServiceMessage::Response(json!("stored")))
            .expect("reply");

        assert_eq!(call.await.expect("task").expect("reply"), json!("stored"));

        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].direction, TransferDirection::Upload);
        assert_eq!(seen[0].completed_size, 0);
        assert_eq!(seen[1].completed_size, total / 2);
        assert!(seen.iter().all(|p| p.id == id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunked_response_reports_download_progress() {
        let codec = BinaryCodec::new().with_chunk_size(64);
        let (transport, _listener, mut peer) = setup_with(codec).await;
        let (sink, seen) = recorder();

        let call = tokio::spawn({
            let transport = transport.clone();
            async move {
                transport
                    .send(ServiceMessage::request("Files", "download", vec![]), Some(sink))
                    .await
            }
        });
        let (id, _) = next_request(&mut peer, &codec).await;

        let body = json!("d".repeat(300));
        let reply = ServiceMessage::Response(body.clone());
        let chunk_count = codec.encode(id, &reply).expect("encode").chunks.len();
        peer.send_message(&codec, id, &reply).expect("reply");

        assert_eq!(call.await.expect("task").expect("reply"), body);

        let seen = seen.lock().clone();
        assert_eq!(seen.len(), chunk_count - 1);
        assert!(seen.iter().all(|p| p.direction == TransferDirection::Download));
        assert!(seen.windows(2).all(|w| w[0].completed_size < w[1].completed_size));
    }

    #[tokio::test(start_paused = true)]
    async fn test_encode_failure_leaves_no_pending_entry() {
        let codec = BinaryCodec::new().with_max_message_size(64);
        let (transport, _listener, mut peer) = setup_with(codec).await;

        let err = transport
            .send(
                ServiceMessage::request("Svc", "big", vec![json!("x".repeat(500))]),
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MessageTooLarge { .. }));
        assert_eq!(transport.pending_count(), 0);
        assert!(peer.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_and_reloads_are_published() {
        let codec = BinaryCodec::new();
        let (transport, _listener, peer) = setup().await;
        let mut events = transport.subscribe();

        let notice = EventNotice {
            keys: vec![ListenerKey::generate()],
            data: json!({ "n": 1 }),
        };
        peer.send_message(&codec, CorrelationId::generate(), &ServiceMessage::Event(notice.clone()))
            .expect("event");
        let reload = ReloadInfo {
            client_name: Some("admin".into()),
            changed_files: vec!["main.js".into()],
        };
        peer.send_message(&codec, CorrelationId::generate(), &ServiceMessage::Reload(reload.clone()))
            .expect("reload");

        assert_eq!(events.recv().await, Some(TransportEvent::Event(notice)));
        assert_eq!(events.recv().await, Some(TransportEvent::Reload(reload)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_kind_rejects_request() {
        let codec = BinaryCodec::new();
        let (transport, _listener, mut peer) = setup().await;

        let call = tokio::spawn({
            let transport = transport.clone();
            async move { transport.send(ServiceMessage::request("Svc", "x", vec![]), None).await }
        });
        let (id, _) = next_request(&mut peer, &codec).await;
        peer.send_message(&codec, id, &ServiceMessage::Auth("token".into()))
            .expect("bogus reply");

        let err = call.await.expect("task").unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_is_ignored() {
        let codec = BinaryCodec::new();
        let (transport, _listener, mut peer) = setup().await;

        let call = tokio::spawn({
            let transport = transport.clone();
            async move { transport.send(ServiceMessage::request("Svc", "x", vec![]), None).await }
        });
        let (id, _) = next_request(&mut peer, &codec).await;

        peer.send(vec![0xFF; 10]);
        peer.send_message(&codec, id, &ServiceMessage::Response(json!(1)))
            .expect("reply");

        assert_eq!(call.await.expect("task").expect("reply"), json!(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout() {
        let codec = BinaryCodec::new();
        let (transport, _listener, mut peer) = setup().await;

        let call = tokio::spawn({
            let transport = transport.clone();
            async move {
                transport
                    .send_with_timeout(
                        ServiceMessage::request("Svc", "hang", vec![]),
                        None,
                        Duration::from_secs(2),
                    )
                    .await
            }
        });
        next_request(&mut peer, &codec).await;

        let err = call.await.expect("task").unwrap_err();
        assert!(matches!(err, Error::RequestTimeout { timeout_ms: 2000, .. }));
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_disconnected_times_out() {
        let (connector, _listener) = memory_pair();
        let socket = SocketProvider::new("memory://svc", SocketConfig::new(), Arc::new(connector));
        let transport = ServiceTransport::new(socket, Arc::new(BinaryCodec::new()));

        let err = transport
            .send(ServiceMessage::request("Svc", "x", vec![]), None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ConnectionTimeout { .. }));
        assert_eq!(transport.pending_count(), 0);
    }

    #[test]
    fn test_link_loss_spares_requests_on_newer_links() {
        let pending = Mutex::new(CorrelationMap::default());
        let mut replies = Vec::new();
        for generation in [1, 2, 3] {
            let (response_tx, response_rx) = oneshot::channel();
            pending.lock().insert(
                CorrelationId::generate(),
                PendingRequest {
                    response_tx,
                    progress: None,
                    generation,
                },
            );
            replies.push(response_rx);
        }

        cancel_link(&pending, 2);

        assert_eq!(pending.lock().len(), 1);
        assert!(pending.lock().values().all(|request| request.generation == 3));
        for mut reply in replies.drain(..2) {
            let result = reply.try_recv().expect("settled");
            assert!(result.unwrap_err().is_cancelled());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_made_while_reconnecting_uses_new_link() {
        let codec = BinaryCodec::new();
        let (transport, mut listener, peer) = setup().await;
        let mut state_rx = transport.socket().watch_state();

        drop(peer);
        state_rx
            .wait_for(|state| *state == ConnectionState::Reconnecting)
            .await
            .expect("reconnecting");

        let call = tokio::spawn({
            let transport = transport.clone();
            async move { transport.send(ServiceMessage::request("Svc", "retry", vec![]), None).await }
        });

        let mut next = listener.accept().await.expect("replacement link");
        let (id, message) = next_request(&mut next, &codec).await;
        assert_eq!(message.name(), "Svc.retry");
        next.send_message(&codec, id, &ServiceMessage::Response(json!("done")))
            .expect("reply");

        assert_eq!(call.await.expect("task").expect("reply"), json!("done"));
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_id_request_is_published_and_answered() {
        let codec = BinaryCodec::new();
        let (transport, _listener, mut peer) = setup().await;
        let mut events = transport.subscribe();

        let request_id = CorrelationId::generate();
        peer.send_message(&codec, request_id, &ServiceMessage::GetClientId)
            .expect("push");
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::ClientIdRequested(request_id))
        );

        let client_id = ClientId::generate();
        transport
            .reply(request_id, &ServiceMessage::ClientIdResponse(client_id))
            .await
            .expect("reply");

        assert_eq!(
            next_request(&mut peer, &codec).await,
            (request_id, ServiceMessage::ClientIdResponse(client_id))
        );
        assert_eq!(transport.pending_count(), 0);
    }
}
