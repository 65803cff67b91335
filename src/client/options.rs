//! Client connection options.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use service_link::ClientOptions;
//!
//! let options = ClientOptions::new()
//!     .with_host("services.internal")
//!     .with_port(8443)
//!     .with_ssl()
//!     .with_request_timeout(Duration::from_secs(30));
//!
//! assert_eq!(options.ws_url()?.as_str(), "wss://services.internal:8443/ws");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::transport::SocketConfig;
use crate::transport::provider::{
    DEFAULT_CLOSE_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_MAX_RECONNECT_COUNT, DEFAULT_RECONNECT_DELAY,
};

// ============================================================================
// Constants
// ============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_PORT: u16 = 80;

/// Default WebSocket endpoint path.
pub const DEFAULT_PATH: &str = "/ws";

// ============================================================================
// ClientOptions
// ============================================================================

/// Where to connect and how to keep the connection alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Server host.
    pub host: String,

    /// Server port.
    pub port: u16,

    /// Use `wss://` instead of `ws://`.
    pub ssl: bool,

    /// WebSocket endpoint path.
    pub path: String,

    /// Interval between pings.
    pub heartbeat_interval: Duration,

    /// Silence after which the connection is considered dead.
    pub heartbeat_timeout: Duration,

    /// Delay before each reconnect attempt.
    pub reconnect_delay: Duration,

    /// Reconnect attempts before giving up. `0` disables reconnect.
    pub max_reconnect_count: u32,

    /// Bound on opening the connection and on waiting for it in sends.
    pub connect_timeout: Duration,

    /// Bound on waiting for close confirmation.
    pub close_timeout: Duration,

    /// Optional reply deadline applied to every request.
    pub request_timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ClientOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            ssl: false,
            path: DEFAULT_PATH.to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_count: DEFAULT_MAX_RECONNECT_COUNT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            request_timeout: None,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ClientOptions {
    /// Sets the server host.
    #[inline]
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the server port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enables `wss://`.
    #[inline]
    #[must_use]
    pub fn with_ssl(mut self) -> Self {
        self.ssl = true;
        self
    }

    /// Sets the endpoint path.
    #[inline]
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the heartbeat interval and timeout.
    #[inline]
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }

    /// Sets the reconnect delay and attempt ceiling.
    #[inline]
    #[must_use]
    pub fn with_reconnect(mut self, delay: Duration, max_count: u32) -> Self {
        self.reconnect_delay = delay;
        self.max_reconnect_count = max_count;
        self
    }

    /// Disables automatic reconnect.
    #[inline]
    #[must_use]
    pub fn without_reconnect(mut self) -> Self {
        self.max_reconnect_count = 0;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the close timeout.
    #[inline]
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Sets the reply deadline applied to every request.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

// ============================================================================
// Conversion Methods
// ============================================================================

impl ClientOptions {
    /// Builds the WebSocket URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] if host or path do not form a valid URL.
    pub fn ws_url(&self) -> Result<Url> {
        let scheme = if self.ssl { "wss" } else { "ws" };
        let mut url = Url::parse(&format!("{scheme}://{}:{}", self.host, self.port))?;

        let path = self.path.trim();
        if !path.is_empty() {
            url.set_path(path);
        }

        Ok(url)
    }

    /// Returns the timing settings for the socket provider.
    #[must_use]
    pub fn socket_config(&self) -> SocketConfig {
        SocketConfig {
            heartbeat_interval: self.heartbeat_interval,
            heartbeat_timeout: self.heartbeat_timeout,
            reconnect_delay: self.reconnect_delay,
            max_reconnect_count: self.max_reconnect_count,
            connect_timeout: self.connect_timeout,
            close_timeout: self.close_timeout,
        }
    }

    /// Checks the options for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty host, a zero interval or
    /// timeout, or a heartbeat timeout not greater than the interval.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::config("Host must not be empty"));
        }

        if self.heartbeat_interval.is_zero() {
            return Err(Error::config("Heartbeat interval must be greater than zero"));
        }

        if self.heartbeat_timeout <= self.heartbeat_interval {
            return Err(Error::config(format!(
                "Heartbeat timeout ({:?}) must be greater than the interval ({:?})",
                self.heartbeat_timeout, self.heartbeat_interval
            )));
        }

        if self.connect_timeout.is_zero() || self.close_timeout.is_zero() {
            return Err(Error::config("Connect and close timeouts must be greater than zero"));
        }

        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::config("Request timeout must be greater than zero"));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
