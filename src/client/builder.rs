//! Builder pattern for client configuration.
//!
//! # Example
//!
//! ```ignore
//! use service_link::ServiceClient;
//!
//! let client = ServiceClient::builder()
//!     .name("admin")
//!     .host("services.internal")
//!     .port(8080)
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::{BinaryCodec, Codec};
use crate::transport::{Connector, WebSocketConnector};

use super::core::ServiceClient;
use super::options::ClientOptions;

// ============================================================================
// ServiceClientBuilder
// ============================================================================

/// Builder for configuring a [`ServiceClient`].
///
/// Use [`ServiceClient::builder()`] to create one.
#[derive(Default, Clone)]
pub struct ServiceClientBuilder {
    /// Client name.
    name: Option<String>,
    /// Connection options.
    options: ClientOptions,
    /// Link factory; WebSocket when unset.
    connector: Option<Arc<dyn Connector>>,
    /// Message codec; [`BinaryCodec`] when unset.
    codec: Option<Arc<dyn Codec>>,
}

impl fmt::Debug for ServiceClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceClientBuilder")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("custom_connector", &self.connector.is_some())
            .field("custom_codec", &self.codec.is_some())
            .finish()
    }
}

// ============================================================================
// ServiceClientBuilder Implementation
// ============================================================================

impl ServiceClientBuilder {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the client name.
    ///
    /// Used for logging and to filter reload notices.
    #[inline]
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replaces all connection options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the server host.
    #[inline]
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.options.host = host.into();
        self
    }

    /// Sets the server port.
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.options.port = port;
        self
    }

    /// Enables or disables `wss://`.
    #[inline]
    #[must_use]
    pub fn ssl(mut self, ssl: bool) -> Self {
        self.options.ssl = ssl;
        self
    }

    /// Sets the endpoint path.
    #[inline]
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.options.path = path.into();
        self
    }

    /// Sets the heartbeat interval and timeout.
    #[inline]
    #[must_use]
    pub fn heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.options = self.options.with_heartbeat(interval, timeout);
        self
    }

    /// Sets the reconnect delay and attempt ceiling.
    #[inline]
    #[must_use]
    pub fn reconnect(mut self, delay: Duration, max_count: u32) -> Self {
        self.options = self.options.with_reconnect(delay, max_count);
        self
    }

    /// Sets the reply deadline applied to every request.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.options.request_timeout = Some(timeout);
        self
    }

    /// Uses a custom link factory instead of WebSocket.
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Uses a custom message codec.
    #[inline]
    #[must_use]
    pub fn codec(mut self, codec: impl Codec) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    /// Builds the client with validation.
    ///
    /// Must be called within a Tokio runtime. Does not connect.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the name is missing or options are inconsistent
    /// - [`Error::Url`] if host or path do not form a valid URL
    pub fn build(self) -> Result<ServiceClient> {
        let name = self.validate_name()?;
        self.options.validate()?;
        let url = self.options.ws_url()?;

        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WebSocketConnector::new()));
        let codec = self.codec.unwrap_or_else(|| Arc::new(BinaryCodec::new()));

        Ok(ServiceClient::from_parts(
            name,
            self.options,
            url.into(),
            connector,
            codec,
        ))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ServiceClientBuilder {
    /// Validates the client name.
    fn validate_name(&self) -> Result<String> {
        let name = self.name.clone().ok_or_else(|| {
            Error::config(
                "Client name is required. Use .name() to set it.\n\
                 Example: ServiceClient::builder().name(\"admin\")",
            )
        })?;

        if name.trim().is_empty() {
            return Err(Error::config("Client name must not be empty"));
        }

        Ok(name)
    }
}

// ============================================================================
// Tests
// ============================================================================
