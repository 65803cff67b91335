//! Physical connection lifecycle.
//!
//! [`SocketProvider`] owns at most one open link at a time, keeps it alive
//! with heartbeats and replaces it after unexpected loss.
//!
//! # State Machine
//!
//! ```text
//! disconnected ──connect──► connecting ──ok──► connected
//!      ▲                        │                  │
//!      └──────── failure ───────┘         loss / heartbeat timeout
//!                                                  ▼
//!        closed ◄── ceiling reached ───────── reconnecting ──ok──► connected
//!          ▲
//!          └──────────── close() from any state
//! ```
//!
//! # Tasks
//!
//! | Task | Lifetime | Holds |
//! |------|----------|-------|
//! | Link loop | One per open link | Weak provider ref |
//! | Heartbeat timer | At most one, while connected | Weak provider ref |
//! | Reconnect loop | At most one, while reconnecting | Strong provider ref |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, timeout};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{PING, PONG, is_heartbeat};

use super::connection::{Connector, DuplexLink};
use super::observers::Observers;

// ============================================================================
// Constants
// ============================================================================

/// Default interval between pings.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Default silence after which the link is considered dead.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default delay before each reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Default number of reconnect attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_COUNT: u32 = 10;

/// Default bound on opening a link and on waiting for `connected`.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on waiting for close confirmation.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No link; never connected or initial connect failed.
    Disconnected,
    /// Initial connect in progress.
    Connecting,
    /// Link open and usable.
    Connected,
    /// Link lost; automatic replacement in progress.
    Reconnecting,
    /// Closed by the caller or reconnect ceiling reached.
    Closed,
}

impl ConnectionState {
    /// Returns the lowercase state name.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }

    /// Returns `true` if requests can currently be written.
    #[inline]
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SocketEvent
// ============================================================================

/// Event published by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Inbound non-heartbeat frame.
    Message(Vec<u8>),
    /// State transition.
    State(ConnectionState),
    /// A link stopped being usable; carries its generation.
    ///
    /// Published before the state change that follows the loss.
    LinkClosed(u64),
}

// ============================================================================
// SocketConfig
// ============================================================================

/// Timing and retry settings of the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketConfig {
    /// Interval between pings.
    pub heartbeat_interval: Duration,
    /// Silence after which the link is severed.
    pub heartbeat_timeout: Duration,
    /// Delay before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// Reconnect attempts before giving up. `0` disables reconnect.
    pub max_reconnect_count: u32,
    /// Bound on opening a link and on waiting for `connected` in sends.
    pub connect_timeout: Duration,
    /// Bound on waiting for close confirmation.
    pub close_timeout: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketConfig {
    /// Creates a config with default values.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_count: DEFAULT_MAX_RECONNECT_COUNT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

// ============================================================================
// Internal Types
// ============================================================================

/// Command sent to the link loop.
enum LinkCommand {
    /// Write one frame; `ack` receives the write result.
    Write {
        frame: Vec<u8>,
        ack: Option<oneshot::Sender<Result<()>>>,
    },
    /// Close gracefully and confirm once the remote side is gone.
    Close { ack: oneshot::Sender<()> },
}

/// Handle to the current link loop.
struct LinkHandle {
    generation: u64,
    command_tx: mpsc::UnboundedSender<LinkCommand>,
    task: JoinHandle<()>,
}

impl LinkHandle {
    /// Drops the link without a close handshake.
    fn sever(self) {
        self.task.abort();
    }
}

/// Heartbeat timer task, aborted on drop.
struct HeartbeatTimer(JoinHandle<()>);

impl Drop for HeartbeatTimer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// ============================================================================
// SocketProvider
// ============================================================================

/// Owns one logical connection and keeps it alive.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct SocketProvider {
    inner: Arc<ProviderInner>,
}

struct ProviderInner {
    url: String,
    config: SocketConfig,
    connector: Arc<dyn Connector>,
    state_tx: watch::Sender<ConnectionState>,
    observers: Observers<SocketEvent>,
    link: Mutex<Option<LinkHandle>>,
    heartbeat: Mutex<Option<HeartbeatTimer>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    reconnecting: AtomicBool,
    manual_close: AtomicBool,
    reconnect_count: AtomicU32,
    next_generation: AtomicU64,
    last_activity: Mutex<Instant>,
    /// Serializes connect, reconnect and close.
    transition: tokio::sync::Mutex<()>,
}

impl fmt::Debug for SocketProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketProvider")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .field("reconnect_count", &self.reconnect_count())
            .finish_non_exhaustive()
    }
}

impl SocketProvider {
    /// Creates a provider. No connection is opened until [`connect`](Self::connect).
    #[must_use]
    pub fn new(url: impl Into<String>, config: SocketConfig, connector: Arc<dyn Connector>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(ProviderInner {
                url: url.into(),
                config,
                connector,
                state_tx,
                observers: Observers::default(),
                link: Mutex::new(None),
                heartbeat: Mutex::new(None),
                reconnect_task: Mutex::new(None),
                reconnecting: AtomicBool::new(false),
                manual_close: AtomicBool::new(false),
                reconnect_count: AtomicU32::new(0),
                next_generation: AtomicU64::new(0),
                last_activity: Mutex::new(Instant::now()),
                transition: tokio::sync::Mutex::new(()),
            }),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the endpoint URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Returns the timing settings.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SocketConfig {
        &self.inner.config
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Returns a receiver that always holds the latest state.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribes to inbound frames and state transitions.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SocketEvent> {
        self.inner.observers.subscribe()
    }

    /// Returns the number of reconnect attempts in the current cycle.
    #[inline]
    #[must_use]
    pub fn reconnect_count(&self) -> u32 {
        self.inner.reconnect_count.load(Ordering::SeqCst)
    }

    /// Returns `true` while a heartbeat timer is running.
    #[must_use]
    pub fn is_heartbeat_running(&self) -> bool {
        self.inner
            .heartbeat
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.0.is_finished())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Opens the connection.
    ///
    /// No-op when already connected. A failed initial connect is not retried.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] while a connect or reconnect is in progress
    /// - [`Error::ConnectionTimeout`] if opening exceeds the connect timeout
    /// - Any error from the connector
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        let _transition = inner.transition.lock().await;

        match inner.state() {
            ConnectionState::Connected => return Ok(()),
            state @ (ConnectionState::Connecting | ConnectionState::Reconnecting) => {
                return Err(Error::invalid_state("connect", state));
            }
            ConnectionState::Disconnected | ConnectionState::Closed => {}
        }

        inner.manual_close.store(false, Ordering::SeqCst);
        inner.reconnect_count.store(0, Ordering::SeqCst);
        inner.set_state(ConnectionState::Connecting);

        let outcome = match inner.open_link().await {
            Ok(generation) if inner.mark_connected(generation) => Ok(generation),
            Ok(_) => Err(Error::ConnectionClosed),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(generation) => {
                info!(url = %inner.url, generation, "Connected");
                Ok(())
            }
            Err(e) => {
                error!(url = %inner.url, error = %e, "Connect failed");
                inner.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Closes the connection and disables reconnect.
    ///
    /// Always ends in [`ConnectionState::Closed`], even if the remote side
    /// never confirms within the close timeout.
    pub async fn close(&self) {
        let inner = &self.inner;

        inner.manual_close.store(true, Ordering::SeqCst);
        inner.cancel_reconnect();

        let _transition = inner.transition.lock().await;
        inner.stop_heartbeat();

        let link = inner.link.lock().take();
        if let Some(link) = link {
            let generation = link.generation;
            let (ack_tx, ack_rx) = oneshot::channel();
            let limit = inner.config.close_timeout;

            if link.command_tx.send(LinkCommand::Close { ack: ack_tx }).is_ok()
                && timeout(limit, ack_rx).await.is_err()
            {
                warn!(timeout_ms = as_millis(limit), "Close not confirmed in time");
            }
            link.sever();
            inner.observers.emit(SocketEvent::LinkClosed(generation));
        }

        inner.set_state(ConnectionState::Closed);
        info!(url = %inner.url, "Connection closed");
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Writes one frame.
    ///
    /// Waits up to the connect timeout for the `connected` state first.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if not connected within the timeout
    /// - [`Error::ConnectionClosed`] if the link goes away before the write
    /// - Any write error from the link
    pub async fn send(&self, frame: Vec<u8>) -> Result<()> {
        let generation = self.wait_connected().await?;
        self.send_to(generation, frame).await
    }

    /// Waits up to the connect timeout for an established link.
    ///
    /// Returns the generation of that link, for use with [`send_to`](Self::send_to).
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if not connected within the timeout
    /// - [`Error::ConnectionClosed`] if the provider is gone
    pub async fn wait_connected(&self) -> Result<u64> {
        let limit = self.inner.config.connect_timeout;

        match timeout(limit, self.inner.next_established()).await {
            Ok(result) => result,
            Err(_) => Err(Error::connection_timeout(as_millis(limit))),
        }
    }

    /// Writes one frame on the link with the given generation only.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if that link is no longer current
    /// - Any write error from the link
    pub async fn send_to(&self, generation: u64, frame: Vec<u8>) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.inner.write(Some(generation), frame, Some(ack_tx))?;

        ack_rx.await.unwrap_or(Err(Error::ConnectionClosed))
    }
}

// ============================================================================
// ProviderInner
// ============================================================================

impl ProviderInner {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Publishes a state change; repeated states are not re-published.
    fn set_state(&self, next: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });

        if changed {
            debug!(state = %next, "Connection state changed");
            self.observers.emit(SocketEvent::State(next));
        }
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Resolves with the generation of the next link seen in `connected`.
    async fn next_established(&self) -> Result<u64> {
        let mut state_rx = self.state_tx.subscribe();

        loop {
            state_rx
                .wait_for(ConnectionState::is_connected)
                .await
                .map_err(|_| Error::ConnectionClosed)?;

            let current = self.link.lock().as_ref().map(|link| link.generation);
            if let Some(generation) = current {
                return Ok(generation);
            }

            // Severed but the follow-up state is not published yet
            state_rx.changed().await.map_err(|_| Error::ConnectionClosed)?;
        }
    }

    /// Queues a frame on the current link, or on `expected` only if given.
    fn write(
        &self,
        expected: Option<u64>,
        frame: Vec<u8>,
        ack: Option<oneshot::Sender<Result<()>>>,
    ) -> Result<()> {
        let slot = self.link.lock();
        let link = slot
            .as_ref()
            .filter(|link| expected.is_none_or(|generation| generation == link.generation))
            .ok_or(Error::ConnectionClosed)?;

        link.command_tx
            .send(LinkCommand::Write { frame, ack })
            .map_err(|_| Error::ConnectionClosed)
    }

    // ========================================================================
    // Link Management
    // ========================================================================

    /// Opens a new link and installs it, replacing any stale one.
    async fn open_link(self: &Arc<Self>) -> Result<u64> {
        let limit = self.config.connect_timeout;
        let link = timeout(limit, self.connector.open(&self.url))
            .await
            .map_err(|_| Error::connection_timeout(as_millis(limit)))??;

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.touch();

        {
            let (command_tx, command_rx) = mpsc::unbounded_channel();
            let mut slot = self.link.lock();
            let task = tokio::spawn(run_link(
                generation,
                link,
                command_rx,
                Arc::downgrade(self),
            ));

            if let Some(stale) = slot.replace(LinkHandle {
                generation,
                command_tx,
                task,
            }) {
                let stale_generation = stale.generation;
                stale.sever();
                self.observers.emit(SocketEvent::LinkClosed(stale_generation));
            }
        }

        debug!(generation, "Link opened");
        Ok(generation)
    }

    /// Moves to `connected` if the given link is still the current one.
    fn mark_connected(self: &Arc<Self>, generation: u64) -> bool {
        let slot = self.link.lock();
        if slot.as_ref().map(|link| link.generation) != Some(generation) {
            return false;
        }

        self.start_heartbeat();
        self.set_state(ConnectionState::Connected);
        true
    }

    /// Called by the link loop when its link ends.
    fn on_link_lost(self: &Arc<Self>, generation: u64) {
        let was_current = {
            let mut slot = self.link.lock();
            if slot.as_ref().map(|link| link.generation) == Some(generation) {
                slot.take();
                true
            } else {
                false
            }
        };

        if !was_current {
            trace!(generation, "Stale link ended");
            return;
        }

        self.stop_heartbeat();
        self.observers.emit(SocketEvent::LinkClosed(generation));

        if self.manual_close.load(Ordering::SeqCst) || self.state() != ConnectionState::Connected {
            debug!(generation, state = %self.state(), "Link ended");
            return;
        }

        warn!(url = %self.url, generation, "Connection lost");
        self.spawn_reconnect();
    }

    // ========================================================================
    // Heartbeat
    // ========================================================================

    /// Starts the heartbeat timer, replacing any previous one.
    fn start_heartbeat(self: &Arc<Self>) {
        let provider = Arc::downgrade(self);
        let period = self.config.heartbeat_interval;
        let limit = self.config.heartbeat_timeout;

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let Some(inner) = provider.upgrade() else {
                    break;
                };

                if inner.state() != ConnectionState::Connected {
                    continue;
                }

                let silent_for = inner.last_activity.lock().elapsed();
                if silent_for > limit {
                    inner.on_heartbeat_timeout(silent_for);
                    break;
                }

                if let Err(e) = inner.write(None, vec![PING], None) {
                    trace!(error = %e, "Ping skipped");
                }
            }
        });

        let previous = self.heartbeat.lock().replace(HeartbeatTimer(task));
        drop(previous);
    }

    fn stop_heartbeat(&self) {
        let timer = self.heartbeat.lock().take();
        drop(timer);
    }

    fn on_heartbeat_timeout(self: &Arc<Self>, silent_for: Duration) {
        warn!(
            silent_ms = as_millis(silent_for),
            timeout_ms = as_millis(self.config.heartbeat_timeout),
            "Heartbeat timeout, severing link"
        );

        let link = self.link.lock().take();
        if let Some(link) = link {
            let generation = link.generation;
            link.sever();
            self.observers.emit(SocketEvent::LinkClosed(generation));
        }

        if !self.manual_close.load(Ordering::SeqCst) {
            self.spawn_reconnect();
        }

        // Aborts the calling timer once it yields
        self.stop_heartbeat();
    }

    // ========================================================================
    // Reconnect
    // ========================================================================

    fn spawn_reconnect(self: &Arc<Self>) {
        if self.config.max_reconnect_count == 0 {
            warn!(url = %self.url, "Reconnect disabled, closing");
            self.set_state(ConnectionState::Closed);
            return;
        }

        if self.reconnecting.swap(true, Ordering::SeqCst) {
            debug!("Reconnect already in progress");
            return;
        }

        let inner = Arc::clone(self);
        let task = tokio::spawn(async move { inner.reconnect_loop().await });
        *self.reconnect_task.lock() = Some(task);
    }

    fn cancel_reconnect(&self) {
        let task = self.reconnect_task.lock().take();
        if let Some(task) = task {
            task.abort();
        }
        self.reconnecting.store(false, Ordering::SeqCst);
    }

    /// Ends the cycle and publishes `connected` for the new link.
    ///
    /// The cycle is over before `connected` is visible, so a loss of the new
    /// link right away starts a fresh cycle instead of being swallowed.
    fn finish_reconnect(self: &Arc<Self>, generation: u64) -> Result<u64> {
        let attempts = self.reconnect_count.swap(0, Ordering::SeqCst);
        self.reconnecting.store(false, Ordering::SeqCst);

        if self.mark_connected(generation) {
            return Ok(generation);
        }

        // Lost before `connected`; this cycle carries on
        self.reconnect_count.store(attempts, Ordering::SeqCst);
        self.reconnecting.store(true, Ordering::SeqCst);
        Err(Error::ConnectionClosed)
    }

    async fn reconnect_loop(self: Arc<Self>) {
        let max = self.config.max_reconnect_count;
        let delay = self.config.reconnect_delay;

        loop {
            if self.manual_close.load(Ordering::SeqCst) {
                break;
            }

            let attempt = self.reconnect_count.fetch_add(1, Ordering::SeqCst) + 1;
            self.set_state(ConnectionState::Reconnecting);
            info!(
                url = %self.url,
                attempt,
                max,
                delay_ms = as_millis(delay),
                "Reconnecting"
            );

            sleep(delay).await;

            let _transition = self.transition.lock().await;
            if self.manual_close.load(Ordering::SeqCst) {
                break;
            }

            let outcome = match self.open_link().await {
                Ok(generation) => self.finish_reconnect(generation),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(generation) => {
                    info!(url = %self.url, attempt, generation, "Reconnected");
                    return;
                }
                Err(e) => {
                    warn!(attempt, max, error = %e, "Reconnect attempt failed");
                    if attempt >= max {
                        error!(url = %self.url, attempts = attempt, "Reconnect limit reached, giving up");
                        self.reconnecting.store(false, Ordering::SeqCst);
                        self.set_state(ConnectionState::Closed);
                        return;
                    }
                }
            }
        }

        self.reconnecting.store(false, Ordering::SeqCst);
    }
}

impl Drop for ProviderInner {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.sever();
        }
    }
}

// ============================================================================
// Link Loop
// ============================================================================

/// Pumps one link: inbound frames out to observers, commands into the writer.
async fn run_link(
    generation: u64,
    link: DuplexLink,
    mut command_rx: mpsc::UnboundedReceiver<LinkCommand>,
    provider: Weak<ProviderInner>,
) {
    let DuplexLink {
        mut writer,
        mut reader,
    } = link;

    loop {
        tokio::select! {
            frame = reader.read() => {
                match frame {
                    Some(Ok(frame)) => {
                        let Some(inner) = provider.upgrade() else {
                            break;
                        };
                        inner.touch();

                        if is_heartbeat(&frame) {
                            if frame == [PING]
                                && let Err(e) = writer.write(vec![PONG]).await
                            {
                                warn!(generation, error = %e, "Failed to answer ping");
                            }
                            continue;
                        }

                        inner.observers.emit(SocketEvent::Message(frame));
                    }
                    Some(Err(e)) => {
                        warn!(generation, error = %e, "Link read failed");
                        break;
                    }
                    None => {
                        debug!(generation, "Link closed by remote");
                        break;
                    }
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(LinkCommand::Write { frame, ack }) => {
                        let result = writer.write(frame).await;
                        match ack {
                            Some(ack) => {
                                let _ = ack.send(result);
                            }
                            None => {
                                if let Err(e) = result {
                                    trace!(generation, error = %e, "Unacknowledged write failed");
                                }
                            }
                        }
                    }
                    Some(LinkCommand::Close { ack }) => {
                        if let Err(e) = writer.close().await {
                            debug!(generation, error = %e, "Close handshake failed");
                        }
                        while let Some(Ok(_)) = reader.read().await {}
                        let _ = ack.send(());
                        return;
                    }
                    None => {
                        let _ = writer.close().await;
                        return;
                    }
                }
            }
        }
    }

    if let Some(inner) = provider.upgrade() {
        inner.on_link_lost(generation);
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

    use crate::transport::memory::{MemoryConnector, MemoryListener, MemoryPeer, memory_pair};

    fn provider_with(config: SocketConfig) -> (SocketProvider, MemoryConnector, MemoryListener) {
        let (connector, listener) = memory_pair();
        let provider = SocketProvider::new("memory://svc", config, Arc::new(connector.clone()));
        (provider, connector, listener)
    }

    async fn connected() -> (SocketProvider, MemoryConnector, MemoryListener, MemoryPeer) {
        let (provider, connector, mut listener) = provider_with(SocketConfig::new());
        provider.connect().await.expect("connect");
        let peer = listener.accept().await.expect("peer");
        (provider, connector, listener, peer)
    }

    async fn wait_for(provider: &SocketProvider, wanted: ConnectionState) {
        let mut rx = provider.watch_state();
        timeout(Duration::from_secs(120), rx.wait_for(|state| *state == wanted))
            .await
            .expect("state reached in time")
            .expect("provider alive");
    }

    fn drain_states(rx: &mut mpsc::UnboundedReceiver<SocketEvent>) -> Vec<ConnectionState> {
        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SocketEvent::State(state) = event {
                states.push(state);
            }
        }
        states
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::Closed.as_str(), "closed");
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_publishes_states_and_starts_one_heartbeat() {
        let (provider, _connector, mut listener) = provider_with(SocketConfig::new());
        let mut events = provider.subscribe();

        provider.connect().await.expect("connect");
        let _peer = listener.accept().await.expect("peer");

        assert_eq!(provider.state(), ConnectionState::Connected);
        assert!(provider.is_heartbeat_running());
        assert_eq!(
            drain_states(&mut events),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );

        // Connecting again is a no-op
        provider.connect().await.expect("connect again");
        assert!(drain_states(&mut events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_initial_connect_is_not_retried() {
        let (provider, connector, _listener) = provider_with(SocketConfig::new());
        connector.set_refuse(true);

        let err = provider.connect().await.unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(provider.state(), ConnectionState::Disconnected);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(provider.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_times_out_when_never_connected() {
        let (provider, _connector, _listener) = provider_with(SocketConfig::new());

        let err = provider.send(vec![1, 2, 3]).await.unwrap_err();

        assert!(matches!(err, Error::ConnectionTimeout { timeout_ms: 5000 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_flow_in_order() {
        let (provider, _connector, _listener, mut peer) = connected().await;
        let mut events = provider.subscribe();

        for i in 0..5u8 {
            provider.send(vec![i; 40]).await.expect("send");
        }
        for i in 0..5u8 {
            assert_eq!(peer.recv_data().await, Some(vec![i; 40]));
        }

        peer.send(vec![9; 40]);
        assert_eq!(events.recv().await, Some(SocketEvent::Message(vec![9; 40])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_is_answered_and_not_published() {
        let (provider, _connector, _listener, mut peer) = connected().await;
        let mut events = provider.subscribe();

        peer.send(vec![PING]);
        assert_eq!(peer.recv().await, Some(vec![PONG]));

        peer.send(vec![PONG]);
        peer.send(vec![5; 30]);
        assert_eq!(events.recv().await, Some(SocketEvent::Message(vec![5; 30])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_keeps_healthy_link() {
        let (provider, _connector, _listener, mut peer) = connected().await;
        let mut events = provider.subscribe();

        let server = tokio::spawn(async move {
            while peer.recv_data().await.is_some() {}
        });

        sleep(Duration::from_secs(120)).await;

        assert_eq!(provider.state(), ConnectionState::Connected);
        assert!(drain_states(&mut events).is_empty());
        server.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout_reconnects_once() {
        let (provider, connector, mut listener, _silent_peer) = connected().await;
        let mut events = provider.subscribe();

        // Peer never answers pings: 30s of silence then the next tick fires
        let mut next_peer = listener.accept().await.expect("replacement link");
        wait_for(&provider, ConnectionState::Connected).await;

        assert_eq!(
            drain_states(&mut events),
            vec![ConnectionState::Reconnecting, ConnectionState::Connected]
        );
        assert_eq!(connector.attempts(), 2);
        assert_eq!(provider.reconnect_count(), 0);
        assert!(provider.is_heartbeat_running());

        provider.send(vec![3; 40]).await.expect("send on new link");
        assert_eq!(next_peer.recv_data().await, Some(vec![3; 40]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_close_triggers_reconnect() {
        let (provider, _connector, mut listener, peer) = connected().await;
        let mut events = provider.subscribe();

        drop(peer);
        let _next = listener.accept().await.expect("replacement link");
        wait_for(&provider, ConnectionState::Connected).await;

        assert_eq!(
            drain_states(&mut events),
            vec![ConnectionState::Reconnecting, ConnectionState::Connected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_ceiling_closes() {
        let config = SocketConfig {
            max_reconnect_count: 3,
            ..SocketConfig::new()
        };
        let (provider, connector, mut listener) = provider_with(config);
        let mut events = provider.subscribe();
        provider.connect().await.expect("connect");
        let peer = listener.accept().await.expect("peer");

        connector.set_refuse(true);
        drop(peer);
        wait_for(&provider, ConnectionState::Closed).await;

        // One initial open plus three refused attempts
        assert_eq!(connector.attempts(), 4);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts(), 4);
        assert_eq!(
            drain_states(&mut events),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Reconnecting,
                ConnectionState::Closed,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ceiling_disables_reconnect() {
        let config = SocketConfig {
            max_reconnect_count: 0,
            ..SocketConfig::new()
        };
        let (provider, connector, mut listener) = provider_with(config);
        provider.connect().await.expect("connect");
        drop(listener.accept().await.expect("peer"));

        wait_for(&provider, ConnectionState::Closed).await;
        sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_everything() {
        let (provider, connector, _listener, mut peer) = connected().await;

        let closing = provider.clone();
        let close = tokio::spawn(async move { closing.close().await });

        // Remote acknowledges by going away once the client stops writing
        assert_eq!(peer.recv().await, None);
        drop(peer);
        close.await.expect("close task");

        assert_eq!(provider.state(), ConnectionState::Closed);
        assert!(!provider.is_heartbeat_running());

        sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(provider.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_bounded_without_confirmation() {
        let (provider, _connector, _listener, _peer) = connected().await;

        let started = Instant::now();
        provider.close().await;

        assert_eq!(provider.state(), ConnectionState::Closed);
        assert!(started.elapsed() >= DEFAULT_CLOSE_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_reconnect_delay_wins() {
        let (provider, connector, _listener, peer) = connected().await;
        let mut rx = provider.watch_state();

        drop(peer);
        rx.wait_for(|state| *state == ConnectionState::Reconnecting)
            .await
            .expect("reconnecting");
        provider.close().await;

        sleep(Duration::from_secs(30)).await;
        assert_eq!(provider.state(), ConnectionState::Closed);
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_after_close() {
        let (provider, _connector, mut listener, peer) = connected().await;
        drop(peer);
        provider.close().await;

        provider.connect().await.expect("reconnect manually");
        let _peer = listener.accept().await.expect("peer");

        assert_eq!(provider.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loss_right_after_reconnect_starts_new_cycle() {
        let (provider, connector, mut listener, peer) = connected().await;

        drop(peer);
        // Replacement link dies as soon as it is established
        drop(listener.accept().await.expect("second link"));
        let mut third = listener.accept().await.expect("third link");
        wait_for(&provider, ConnectionState::Connected).await;

        assert_eq!(connector.attempts(), 3);
        assert_eq!(provider.reconnect_count(), 0);
        assert!(!provider.inner.reconnecting.load(Ordering::SeqCst));

        provider.send(vec![4; 40]).await.expect("send on third link");
        assert_eq!(third.recv_data().await, Some(vec![4; 40]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_reconnect_clears_cycle_before_connected() {
        let (provider, _connector, mut listener, _peer) = connected().await;
        let inner = Arc::clone(&provider.inner);
        inner.reconnecting.store(true, Ordering::SeqCst);
        inner.reconnect_count.store(2, Ordering::SeqCst);
        inner.set_state(ConnectionState::Reconnecting);

        let generation = inner.open_link().await.expect("open");
        let _next = listener.accept().await.expect("peer");
        let mut state_rx = provider.watch_state();

        assert_eq!(inner.finish_reconnect(generation).ok(), Some(generation));
        assert!(*state_rx.borrow_and_update() == ConnectionState::Connected);
        assert!(!inner.reconnecting.load(Ordering::SeqCst));
        assert_eq!(provider.reconnect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_to_replaced_link_is_rejected() {
        let (provider, _connector, mut listener, peer) = connected().await;
        let old = provider.wait_connected().await.expect("established");

        drop(peer);
        let mut next = listener.accept().await.expect("replacement link");
        wait_for(&provider, ConnectionState::Connected).await;
        let current = provider.wait_connected().await.expect("established");

        assert!(current > old);
        let err = provider.send_to(old, vec![1; 40]).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));

        provider.send_to(current, vec![2; 40]).await.expect("send");
        assert_eq!(next.recv_data().await, Some(vec![2; 40]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_closed_precedes_reconnecting() {
        let (provider, _connector, mut listener, peer) = connected().await;
        let generation = provider.wait_connected().await.expect("established");
        let mut events = provider.subscribe();

        drop(peer);
        let _next = listener.accept().await.expect("replacement link");
        wait_for(&provider, ConnectionState::Connected).await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                SocketEvent::LinkClosed(generation),
                SocketEvent::State(ConnectionState::Reconnecting),
                SocketEvent::State(ConnectionState::Connected),
            ]
        );
    }
}
