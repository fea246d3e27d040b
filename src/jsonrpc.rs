//! JSON-RPC 2.0 envelope types used on every transport.
//!
//! The router layer never interprets `params` or `result`; it only needs to
//! tell requests from notifications and responses, recognise `initialize`,
//! and build the error envelopes returned to clients.

use std::fmt::{Display, Formatter};

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;
/// Missing, unknown or expired session.
pub const SESSION_ERROR: i64 = -32000;

/// Method name of the MCP handshake request.
pub const INITIALIZE_METHOD: &str = "initialize";

/// The literal `"jsonrpc": "2.0"` marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Version2;

impl Serialize for Version2 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for Version2 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let version = String::deserialize(deserializer)?;
        if version == "2.0" {
            Ok(Self)
        } else {
            Err(de::Error::custom(format!(
                "unsupported jsonrpc version: {version}"
            )))
        }
    }
}

/// Request identifier: a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric identifier.
    Number(i64),
    /// String identifier.
    String(String),
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// A call that expects a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol marker.
    pub jsonrpc: Version2,
    /// Correlation id echoed by the response.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A one-way message without an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol marker.
    pub jsonrpc: Version2,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A successful reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol marker.
    pub jsonrpc: Version2,
    /// Id of the request this answers.
    pub id: RequestId,
    /// Method result.
    pub result: Value,
}

/// Error object carried by an error reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Short description.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Error object without `data`.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// A failed reply. `id` is `null` when the request could not be identified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorResponse {
    /// Protocol marker.
    pub jsonrpc: Version2,
    /// Id of the failed request, or `null`.
    pub id: Option<RequestId>,
    /// Error detail.
    pub error: JsonRpcError,
}

/// Any single JSON-RPC message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// Request expecting a reply.
    Request(JsonRpcRequest),
    /// Fire-and-forget notification.
    Notification(JsonRpcNotification),
    /// Successful reply.
    Response(JsonRpcResponse),
    /// Error reply.
    Error(JsonRpcErrorResponse),
}

impl JsonRpcMessage {
    /// Build a request.
    #[must_use]
    pub fn request(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request(JsonRpcRequest {
            jsonrpc: Version2,
            id,
            method: method.into(),
            params,
        })
    }

    /// Build a notification.
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification(JsonRpcNotification {
            jsonrpc: Version2,
            method: method.into(),
            params,
        })
    }

    /// Build a successful reply.
    #[must_use]
    pub fn response(id: RequestId, result: Value) -> Self {
        Self::Response(JsonRpcResponse {
            jsonrpc: Version2,
            id,
            result,
        })
    }

    /// Build an error reply.
    #[must_use]
    pub fn error(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self::Error(JsonRpcErrorResponse {
            jsonrpc: Version2,
            id,
            error,
        })
    }

    /// Method name for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(req) => Some(&req.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) | Self::Error(_) => None,
        }
    }

    /// Request id, if this message carries one.
    #[must_use]
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Response(resp) => Some(&resp.id),
            Self::Error(err) => err.id.as_ref(),
            Self::Notification(_) => None,
        }
    }

    /// Whether this is the MCP `initialize` handshake request.
    #[must_use]
    pub fn is_initialize(&self) -> bool {
        matches!(self, Self::Request(req) if req.method == INITIALIZE_METHOD)
    }

    /// Whether the sender expects a reply to this message.
    #[must_use]
    pub fn expects_reply(&self) -> bool {
        matches!(self, Self::Request(_))
    }
}

/// Parse a single JSON-RPC message from raw bytes.
///
/// # Errors
///
/// Returns a ready-to-send error object: [`PARSE_ERROR`] when the bytes are
/// not JSON at all, [`INVALID_REQUEST`] when they are JSON but not a
/// JSON-RPC 2.0 message. Batches arrive as JSON arrays and are rejected with
/// [`INVALID_REQUEST`].
pub fn parse_message(raw: &[u8]) -> Result<JsonRpcMessage, JsonRpcError> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|err| JsonRpcError::new(PARSE_ERROR, format!("Parse error: {err}")))?;
    serde_json::from_value(value)
        .map_err(|_| JsonRpcError::new(INVALID_REQUEST, "Invalid Request"))
}
