//! Logical message types.
//!
//! Every frame exchanged with the server is a JSON envelope:
//!
//! ```json
//! { "name": "UserService.list", "body": [ ... ] }
//! ```
//!
//! Reserved names identify transport-level messages; any other
//! `service.method` name is an RPC request whose body is the parameter array.
//!
//! | Name | Direction | Body |
//! |------|-----------|------|
//! | `service.method` | Client → Server | parameter array |
//! | `response` | Server → Client | result value |
//! | `error` | Server → Client | [`ErrorBody`] |
//! | `progress` | Server → Client | [`ProgressBody`] |
//! | `event` | Server → Client | [`EventNotice`] |
//! | `reload` | Server → Client | [`ReloadInfo`] |
//! | `auth` | Client → Server | token string |
//! | `evt:add` | Client → Server | [`ListenerRegistration`] |
//! | `evt:remove` | Client → Server | [`ListenerRemoval`] |
//! | `evt:gets` | Client → Server | [`ListenerQuery`] |
//! | `evt:emit` | Client → Server | [`EmitRequest`] |
//! | `client-get-id` | Server → Client | none |
//! | `client-get-id-response` | Client → Server | [`ClientId`] string |

// ============================================================================
// Imports
// ============================================================================

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{ClientId, ListenerKey};

// ============================================================================
// Message Names
// ============================================================================

/// Reserved message names.
pub mod names {
    /// Sender-side completion report for a chunked request.
    pub const PROGRESS: &str = "progress";
    /// Successful response.
    pub const RESPONSE: &str = "response";
    /// Error response.
    pub const ERROR: &str = "error";
    /// Server-pushed event notification.
    pub const EVENT: &str = "event";
    /// Server-pushed reload notice.
    pub const RELOAD: &str = "reload";
    /// Authentication.
    pub const AUTH: &str = "auth";
    /// Register an event listener.
    pub const ADD_LISTENER: &str = "evt:add";
    /// Unregister an event listener.
    pub const REMOVE_LISTENER: &str = "evt:remove";
    /// Query listener infos by event name.
    pub const GET_LISTENER_INFOS: &str = "evt:gets";
    /// Deliver data to listener keys.
    pub const EMIT_EVENT: &str = "evt:emit";
    /// Server asks for the client instance id.
    pub const GET_CLIENT_ID: &str = "client-get-id";
    /// Answer carrying the client instance id.
    pub const CLIENT_ID_RESPONSE: &str = "client-get-id-response";
}

// ============================================================================
// WireMessage
// ============================================================================

/// Untyped `{ name, body }` envelope as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Message name.
    pub name: String,
    /// Message body.
    #[serde(default)]
    pub body: Value,
}

// ============================================================================
// ServiceMessage
// ============================================================================

/// A decoded logical message.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceMessage {
    /// RPC request for `service.method`.
    Request {
        /// Full method name (`service.method`).
        method: String,
        /// Positional parameters.
        params: Vec<Value>,
    },
    /// Successful response body.
    Response(Value),
    /// Error response.
    Error(ErrorBody),
    /// Receiver-side completion of a chunked request.
    Progress(ProgressBody),
    /// Event notification for a set of listener keys.
    Event(EventNotice),
    /// Reload notice pushed by the server.
    Reload(ReloadInfo),
    /// Authentication token.
    Auth(String),
    /// Listener registration.
    AddListener(ListenerRegistration),
    /// Listener removal.
    RemoveListener(ListenerRemoval),
    /// Listener info query.
    GetListenerInfos(ListenerQuery),
    /// Event emission request.
    EmitEvent(EmitRequest),
    /// Server asks for the client instance id.
    GetClientId,
    /// Client instance id.
    ClientIdResponse(ClientId),
}

impl ServiceMessage {
    /// Creates a request for `service.method`.
    #[must_use]
    pub fn request(service: &str, method: &str, params: Vec<Value>) -> Self {
        Self::Request {
            method: format!("{service}.{method}"),
            params,
        }
    }

    /// Returns the wire name of this message.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Request { method, .. } => method,
            Self::Response(_) => names::RESPONSE,
            Self::Error(_) => names::ERROR,
            Self::Progress(_) => names::PROGRESS,
            Self::Event(_) => names::EVENT,
            Self::Reload(_) => names::RELOAD,
            Self::Auth(_) => names::AUTH,
            Self::AddListener(_) => names::ADD_LISTENER,
            Self::RemoveListener(_) => names::REMOVE_LISTENER,
            Self::GetListenerInfos(_) => names::GET_LISTENER_INFOS,
            Self::EmitEvent(_) => names::EMIT_EVENT,
            Self::GetClientId => names::GET_CLIENT_ID,
            Self::ClientIdResponse(_) => names::CLIENT_ID_RESPONSE,
        }
    }

    /// Converts into the untyped envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if a body cannot be serialized.
    pub fn to_wire(&self) -> Result<WireMessage> {
        let body = match self {
            Self::Request { params, .. } => serde_json::to_value(params)?,
            Self::Response(value) => value.clone(),
            Self::Error(body) => serde_json::to_value(body)?,
            Self::Progress(body) => serde_json::to_value(body)?,
            Self::Event(body) => serde_json::to_value(body)?,
            Self::Reload(body) => serde_json::to_value(body)?,
            Self::Auth(token) => Value::String(token.clone()),
            Self::AddListener(body) => serde_json::to_value(body)?,
            Self::RemoveListener(body) => serde_json::to_value(body)?,
            Self::GetListenerInfos(body) => serde_json::to_value(body)?,
            Self::EmitEvent(body) => serde_json::to_value(body)?,
            Self::GetClientId => Value::Null,
            Self::ClientIdResponse(id) => serde_json::to_value(id)?,
        };

        Ok(WireMessage {
            name: self.name().to_string(),
            body,
        })
    }

    /// Converts from the untyped envelope.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the name is not a known kind
    /// - [`Error::Json`] if the body does not match the kind
    pub fn from_wire(wire: WireMessage) -> Result<Self> {
        let WireMessage { name, body } = wire;

        let message = match name.as_str() {
            names::RESPONSE => Self::Response(body),
            names::ERROR => Self::Error(from_body(body)?),
            names::PROGRESS => Self::Progress(from_body(body)?),
            names::EVENT => Self::Event(from_body(body)?),
            names::RELOAD => Self::Reload(from_body(body)?),
            names::AUTH => Self::Auth(from_body(body)?),
            names::ADD_LISTENER => Self::AddListener(from_body(body)?),
            names::REMOVE_LISTENER => Self::RemoveListener(from_body(body)?),
            names::GET_LISTENER_INFOS => Self::GetListenerInfos(from_body(body)?),
            names::EMIT_EVENT => Self::EmitEvent(from_body(body)?),
            names::GET_CLIENT_ID => Self::GetClientId,
            names::CLIENT_ID_RESPONSE => Self::ClientIdResponse(from_body(body)?),
            method if is_method_name(method) => Self::Request {
                method: method.to_string(),
                params: match body {
                    Value::Null => Vec::new(),
                    other => from_body(other)?,
                },
            },
            other => {
                return Err(Error::protocol(format!("Unknown message kind: {other}")));
            }
        };

        Ok(message)
    }
}

/// Returns `true` for `service.method` style names.
fn is_method_name(name: &str) -> bool {
    match name.split_once('.') {
        Some((service, method)) => !service.is_empty() && !method.is_empty(),
        None => false,
    }
}

fn from_body<T: DeserializeOwned>(body: Value) -> Result<T> {
    Ok(serde_json::from_value(body)?)
}

// ============================================================================
// Bodies
// ============================================================================

/// Body of an `error` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Error class name on the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error message.
    pub message: String,
    /// Stack trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Extra detail payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl From<ErrorBody> for Error {
    fn from(body: ErrorBody) -> Self {
        Self::Server {
            code: body.code,
            message: body.message,
            stack: body.stack,
            detail: body.detail,
        }
    }
}

/// Body of a `progress` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressBody {
    /// Total bytes of the transfer.
    pub total_size: u64,
    /// Bytes received so far.
    pub completed_size: u64,
}

/// Body of an `event` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNotice {
    /// Listener keys the data is addressed to.
    pub keys: Vec<ListenerKey>,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
}

/// Body of a `reload` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadInfo {
    /// Client the notice is meant for (`None` = every client).
    #[serde(default)]
    pub client_name: Option<String>,
    /// Files that changed.
    #[serde(default, rename = "changedFileSet")]
    pub changed_files: Vec<String>,
}

impl ReloadInfo {
    /// Returns `true` if the notice applies to the named client.
    #[must_use]
    pub fn applies_to(&self, client_name: &str) -> bool {
        self.client_name.as_deref().is_none_or(|name| name == client_name)
    }
}

/// Body of an `evt:add` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerRegistration {
    /// Listener key.
    pub key: ListenerKey,
    /// Event name.
    pub name: String,
    /// Subscription descriptor.
    pub info: Value,
}

/// Body of an `evt:remove` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerRemoval {
    /// Listener key.
    pub key: ListenerKey,
}

/// Body of an `evt:gets` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerQuery {
    /// Event name.
    pub name: String,
}

/// One entry of the `evt:gets` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerInfo {
    /// Listener key.
    pub key: ListenerKey,
    /// Subscription descriptor.
    pub info: Value,
}

/// Body of an `evt:emit` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitRequest {
    /// Target listener keys.
    pub keys: Vec<ListenerKey>,
    /// Event payload.
    pub data: Value,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let message = ServiceMessage::request("UserService", "list", vec![json!(1)]);
        let wire = message.to_wire().expect("to wire");

        assert_eq!(wire.name, "UserService.list");
        assert_eq!(wire.body, json!([1]));
    }

    #[test]
    fn test_error_body_becomes_server_error() {
        let wire: WireMessage = serde_json::from_value(json!({
            "name": "error",
            "body": {
                "name": "Error",
                "code": "E_DENIED",
                "message": "denied",
                "stack": "at foo()",
                "detail": { "field": "name" }
            }
        }))
        .expect("parse");

        let ServiceMessage::Error(body) = ServiceMessage::from_wire(wire).expect("decode") else {
            panic!("expected error message");
        };

        let err: Error = body.into();
        match err {
            Error::Server {
                code,
                message,
                stack,
                detail,
            } => {
                assert_eq!(code.as_deref(), Some("E_DENIED"));
                assert_eq!(message, "denied");
                assert_eq!(stack.as_deref(), Some("at foo()"));
                assert_eq!(detail, Some(json!({ "field": "name" })));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_event_notice_parse() {
        let key = ListenerKey::generate();
        let wire = WireMessage {
            name: names::EVENT.into(),
            body: json!({ "keys": [key], "data": { "id": 7 } }),
        };

        let message = ServiceMessage::from_wire(wire).expect("decode");
        assert_eq!(
            message,
            ServiceMessage::Event(EventNotice {
                keys: vec![key],
                data: json!({ "id": 7 }),
            })
        );
    }

    #[test]
    fn test_client_id_push_and_answer() {
        let wire = WireMessage {
            name: "client-get-id".into(),
            body: Value::Null,
        };
        assert_eq!(
            ServiceMessage::from_wire(wire).expect("decode"),
            ServiceMessage::GetClientId
        );

        let id = ClientId::generate();
        let answer = ServiceMessage::ClientIdResponse(id).to_wire().expect("to wire");
        assert_eq!(answer.name, "client-get-id-response");
        assert_eq!(answer.body, json!(id.to_string()));
    }

    #[test]
    fn test_unknown_kind_is_protocol_error() {
        let wire = WireMessage {
            name: "bogus".into(),
            body: Value::Null,
        };

        let err = ServiceMessage::from_wire(wire).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_reload_applies_to() {
        let all = ReloadInfo {
            client_name: None,
            changed_files: vec!["main.js".into()],
        };
        let targeted = ReloadInfo {
            client_name: Some("admin".into()),
            changed_files: Vec::new(),
        };

        assert!(all.applies_to("admin"));
        assert!(targeted.applies_to("admin"));
        assert!(!targeted.applies_to("mobile"));
    }

    #[test]
    fn test_request_without_body() {
        let wire = WireMessage {
            name: "Health.ping".into(),
            body: Value::Null,
        };

        let message = ServiceMessage::from_wire(wire).expect("decode");
        assert_eq!(
            message,
            ServiceMessage::Request {
                method: "Health.ping".into(),
                params: Vec::new(),
            }
        );
    }
}
