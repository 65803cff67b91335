//! Service client facade.
//!
//! [`ServiceClient`] wires one [`SocketProvider`], [`ServiceTransport`] and
//! [`EventBus`] together for a named client. A session task follows the
//! transport's events:
//!
//! - restores the session (authentication, then listener subscriptions)
//!   whenever the connection is re-established
//! - answers `client-get-id` with the instance's [`ClientId`]
//! - drops reload notices addressed to other clients
//!
//! Everything else is passed on to [`ServiceClient::subscribe`] receivers.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::error::Result;
use crate::events::{EventBus, EventCallback, ServiceEvent};
use crate::identifiers::{ClientId, CorrelationId, ListenerKey};
use crate::protocol::{Codec, EmitRequest, ListenerInfo, ListenerQuery, ServiceMessage};
use crate::transport::{
    ConnectionState, Connector, Observers, ProgressSink, ServiceTransport, SocketProvider,
    TransferProgress, TransportEvent,
};

use super::builder::ServiceClientBuilder;
use super::options::ClientOptions;

// ============================================================================
// ServiceClient
// ============================================================================

/// Named client of a service host.
///
/// Cheap to clone; clones share the connection. Create one with
/// [`ServiceClient::builder`].
///
/// # Example
///
/// ```ignore
/// let client = ServiceClient::builder()
///     .name("admin")
///     .host("services.internal")
///     .port(8080)
///     .build()?;
///
/// client.connect().await?;
/// let users = client.send("UserService", "list", vec![]).await?;
/// ```
#[derive(Clone)]
pub struct ServiceClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    name: String,
    id: ClientId,
    options: ClientOptions,
    socket: SocketProvider,
    transport: ServiceTransport,
    events: EventBus,
    observers: Observers<TransportEvent>,
    /// Last token the server accepted.
    auth_token: Mutex<Option<String>>,
}

impl fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceClient")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id)
            .field("url", &self.url())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ServiceClient {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ServiceClientBuilder {
        ServiceClientBuilder::new()
    }

    /// Assembles a client from validated parts and starts the session task.
    pub(crate) fn from_parts(
        name: String,
        options: ClientOptions,
        url: String,
        connector: Arc<dyn Connector>,
        codec: Arc<dyn Codec>,
    ) -> Self {
        let socket = SocketProvider::new(url, options.socket_config(), connector);
        let transport =
            ServiceTransport::new(socket.clone(), codec).with_request_timeout(options.request_timeout);
        let events = EventBus::new(transport.clone());
        let states = transport.subscribe();

        let inner = Arc::new(ClientInner {
            name,
            id: ClientId::generate(),
            options,
            socket,
            transport,
            events,
            observers: Observers::default(),
            auth_token: Mutex::new(None),
        });

        tokio::spawn(run_session(Arc::downgrade(&inner), states));

        Self { inner }
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl ServiceClient {
    /// Returns the client name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the instance id reported to the server.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.inner.id
    }

    /// Returns the endpoint URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        self.inner.socket.url()
    }

    /// Returns the options the client was built with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Returns the connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.socket.state()
    }

    /// Returns `true` while connected.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Subscribes to state changes, raw events and reload notices for this
    /// client.
    ///
    /// Reload notices naming another client are not delivered.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        self.inner.observers.subscribe()
    }

    /// Returns the number of registered event listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.events.listener_count()
    }

    /// Returns the number of requests awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.transport.pending_count()
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

impl ServiceClient {
    /// Connects to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial connect fails. It is not retried.
    pub async fn connect(&self) -> Result<()> {
        self.inner.socket.connect().await?;
        info!(client = %self.inner.name, url = %self.url(), "Client connected");
        Ok(())
    }

    /// Closes the connection. No reconnect follows.
    pub async fn close(&self) {
        self.inner.socket.close().await;
        info!(client = %self.inner.name, "Client closed");
    }
}

// ============================================================================
// Requests
// ============================================================================

impl ServiceClient {
    /// Calls `service.method` with the given parameters.
    ///
    /// # Errors
    ///
    /// Returns the server's error, [`Error::Cancelled`](crate::Error::Cancelled)
    /// on connection loss, or any transport error.
    pub async fn send(&self, service: &str, method: &str, params: Vec<Value>) -> Result<Value> {
        let message = ServiceMessage::request(service, method, params);
        self.inner.transport.send(message, None).await
    }

    /// Like [`send`](Self::send), reporting transfer progress of large payloads.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn send_with_progress(
        &self,
        service: &str,
        method: &str,
        params: Vec<Value>,
        progress: impl Fn(TransferProgress) + Send + Sync + 'static,
    ) -> Result<Value> {
        let message = ServiceMessage::request(service, method, params);
        let sink: ProgressSink = Arc::new(progress);
        self.inner.transport.send(message, Some(sink)).await
    }

    /// Calls `service.method` and deserializes the reply.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send), plus [`Error::Json`](crate::Error::Json)
    /// if the reply does not match `T`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        service: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T> {
        let value = self.send(service, method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Authenticates the session.
    ///
    /// Once accepted, the token is remembered and re-sent after every
    /// reconnect. A rejected token is not remembered.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the token or the send fails.
    pub async fn auth(&self, token: impl Into<String>) -> Result<()> {
        let token = token.into();

        self.inner
            .transport
            .send(ServiceMessage::Auth(token.clone()), None)
            .await?;

        *self.inner.auth_token.lock() = Some(token);
        debug!(client = %self.inner.name, "Authenticated");
        Ok(())
    }
}

// ============================================================================
// Events
// ============================================================================

impl ServiceClient {
    /// Subscribes to a server event.
    ///
    /// `info` describes what to listen for; the callback receives each
    /// delivered payload. Payloads that do not deserialize as `E::Data` are
    /// logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if `info` cannot be serialized or the subscribe
    /// round trip fails.
    pub async fn add_event_listener<E: ServiceEvent>(
        &self,
        info: &E::Info,
        callback: impl Fn(E::Data) + Send + Sync + 'static,
    ) -> Result<ListenerKey> {
        let info = serde_json::to_value(info)?;
        let typed: EventCallback = Arc::new(move |data: Value| {
            match serde_json::from_value::<E::Data>(data) {
                Ok(data) => callback(data),
                Err(e) => warn!(event = E::NAME, error = %e, "Undecodable event payload dropped"),
            }
        });

        self.inner.events.add_listener(E::NAME, info, typed).await
    }

    /// Unsubscribes a listener.
    ///
    /// The local registration is dropped even if the server cannot be told.
    pub async fn remove_event_listener(&self, key: ListenerKey) {
        self.inner.events.remove_listener(key).await;
    }

    /// Delivers `data` to the server-side listeners of `E` chosen by `selector`.
    ///
    /// Returns the number of listeners addressed; nothing is sent when the
    /// selector matches none.
    ///
    /// # Errors
    ///
    /// Returns an error if either round trip fails or the listener list is
    /// malformed.
    pub async fn emit<E: ServiceEvent>(
        &self,
        selector: impl Fn(&E::Info) -> bool + Send,
        data: &E::Data,
    ) -> Result<usize> {
        let query = ServiceMessage::GetListenerInfos(ListenerQuery {
            name: E::NAME.to_string(),
        });
        let listed = self.inner.transport.send(query, None).await?;
        let infos: Vec<ListenerInfo> = serde_json::from_value(listed)?;

        let keys: Vec<ListenerKey> = infos
            .into_iter()
            .filter(|entry| {
                serde_json::from_value::<E::Info>(entry.info.clone())
                    .is_ok_and(|info| selector(&info))
            })
            .map(|entry| entry.key)
            .collect();

        if keys.is_empty() {
            debug!(event = E::NAME, "No listeners selected");
            return Ok(0);
        }

        let count = keys.len();
        let request = ServiceMessage::EmitEvent(EmitRequest {
            keys,
            data: serde_json::to_value(data)?,
        });
        self.inner.transport.send(request, None).await?;
        Ok(count)
    }
}

// ============================================================================
// Session Task
// ============================================================================

impl ClientInner {
    /// Re-authenticates, then replays listener subscriptions.
    async fn restore_session(&self) {
        let token = self.auth_token.lock().clone();
        if let Some(token) = token
            && let Err(e) = self.transport.send(ServiceMessage::Auth(token), None).await
        {
            warn!(client = %self.name, error = %e, "Re-authentication failed");
        }

        match self.events.re_register_all().await {
            Ok(0) => {}
            Ok(count) => info!(client = %self.name, count, "Listeners restored"),
            Err(e) => warn!(client = %self.name, error = %e, "Listener restore incomplete"),
        }
    }
}

impl ClientInner {
    /// Answers a `client-get-id` push.
    async fn report_id(&self, request: CorrelationId) {
        let answer = ServiceMessage::ClientIdResponse(self.id);
        match self.transport.reply(request, &answer).await {
            Ok(()) => debug!(client = %self.name, id = %self.id, "Client id reported"),
            Err(e) => warn!(client = %self.name, error = %e, "Client id report failed"),
        }
    }
}

/// Follows the transport for one client until either is gone.
///
/// Session restore skips the first `connected`: nothing can have been
/// registered before it, since every request waits for the connection.
async fn run_session(client: Weak<ClientInner>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    let mut established = false;

    while let Some(event) = events.recv().await {
        let Some(inner) = client.upgrade() else {
            break;
        };

        match event {
            TransportEvent::ClientIdRequested(request) => inner.report_id(request).await,
            TransportEvent::Reload(info) if !info.applies_to(&inner.name) => {
                trace!(client = %inner.name, target = ?info.client_name, "Reload for another client");
            }
            TransportEvent::State(ConnectionState::Connected) => {
                inner
                    .observers
                    .emit(TransportEvent::State(ConnectionState::Connected));
                if established {
                    inner.restore_session().await;
                } else {
                    established = true;
                }
            }
            other => inner.observers.emit(other),
        }
    }

    debug!("Session task terminated");
}

// ============================================================================
// Tests
// ============================================================================
