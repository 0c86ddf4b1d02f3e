//! JSON-RPC 2.0 Message Types
//!
//! Wire-level envelope types shared by the dispatcher, the streaming
//! transports, and the message queue. The dispatcher inspects incoming
//! payloads as raw `serde_json::Value`s (it must distinguish an absent `id`
//! from an explicit `null`), while outgoing envelopes are always built from
//! the typed structures in this module.

// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only protocol version string accepted in the `jsonrpc` field.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC request identifier.
///
/// Request IDs may be strings or numbers per the JSON-RPC 2.0 specification.
/// An explicit `null` id is representable so the dispatcher can reject
/// requests that carry one (a request with `id: null` is invalid here; a
/// message with no id at all is a notification).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String identifier
    String(String),
    /// Numeric identifier
    Number(i64),
    /// Explicit `null` identifier
    Null,
}

impl RequestId {
    /// Create a string-based request id
    pub fn new_string(id: impl Into<String>) -> Self {
        Self::String(id.into())
    }

    /// Create a numeric request id
    pub fn new_number(id: i64) -> Self {
        Self::Number(id)
    }

    /// Whether this id is the explicit `null` value
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Build a request id from a raw JSON value, if the value is a legal id.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::Null => Some(Self::Null),
            _ => None,
        }
    }

    /// Canonical key used by the per-session duplicate-id guard.
    ///
    /// String and numeric ids live in one namespace; `"1"` and `1` are
    /// distinct keys.
    pub fn dedup_key(&self) -> String {
        match self {
            Self::String(s) => format!("s:{s}"),
            Self::Number(n) => format!("n:{n}"),
            Self::Null => "null".to_string(),
        }
    }

    /// Convert into the raw JSON value carried on the wire
    pub fn to_value(&self) -> Value {
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Number(n) => Value::Number((*n).into()),
            Self::Null => Value::Null,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// Trait for JSON-RPC message serialization and deserialization
///
/// Shared behavior for every envelope type; any `Serialize + Deserialize`
/// type gets the default implementations.
pub trait JsonRpcMessageTrait: Serialize + for<'de> Deserialize<'de> {
    /// Serialize this message to a JSON string
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if serialization fails, which should be
    /// rare given the controlled structure of JSON-RPC messages.
    fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from a JSON string
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` when the payload is not valid JSON or
    /// does not match the message shape.
    fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize directly into a reusable buffer, avoiding the intermediate
    /// `String` allocation of `to_json`.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if serialization fails.
    fn serialize_to_buffer(&self, buffer: &mut BytesMut) -> Result<(), serde_json::Error> {
        serde_json::to_writer(buffer.writer(), self)
    }

    /// Serialize this message to frozen bytes ready for a transport write
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if serialization fails.
    fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        let mut buffer = BytesMut::with_capacity(256);
        self.serialize_to_buffer(&mut buffer)?;
        Ok(buffer.freeze())
    }
}

/// JSON-RPC request message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version, always `"2.0"`
    pub jsonrpc: String,
    /// Method name to invoke
    pub method: String,
    /// Optional structured parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Request identifier echoed back on the response
    pub id: RequestId,
}

impl JsonRpcRequest {
    /// Create a new request envelope
    pub fn new(method: impl Into<String>, params: Option<Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// JSON-RPC notification message (no id, no response expected)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol version, always `"2.0"`
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Optional structured parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a new notification envelope
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC error object carried inside an error response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code (see `crate::error::codes`)
    pub code: i64,
    /// Human-readable error message
    pub message: String,
    /// Optional structured error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Create an error object without attached data
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create an error object carrying structured data
    pub fn with_data(code: i64, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }
}

/// JSON-RPC response message (success or error)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version, always `"2.0"`
    pub jsonrpc: String,
    /// Result payload, present on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload, present on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Identifier of the request this responds to (`null` for errors that
    /// could not be correlated)
    pub id: RequestId,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(result: Value, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response
    pub fn error(error: JsonRpcError, id: Option<RequestId>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id: id.unwrap_or(RequestId::Null),
        }
    }

    /// Whether this response carries an error
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Unified JSON-RPC message for transport delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// Request message (server-to-client for sampling/roots/elicitation)
    Request(JsonRpcRequest),
    /// Response message
    Response(JsonRpcResponse),
    /// Notification message
    Notification(JsonRpcNotification),
}

impl JsonRpcMessageTrait for JsonRpcRequest {}
impl JsonRpcMessageTrait for JsonRpcNotification {}
impl JsonRpcMessageTrait for JsonRpcResponse {}
impl JsonRpcMessageTrait for JsonRpcMessage {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = JsonRpcRequest::new(
            "tools/list",
            Some(json!({"cursor": null})),
            RequestId::new_number(2),
        );
        let json = request.to_json().unwrap();
        assert!(json.contains(r#""jsonrpc":"2.0""#));
        assert!(json.contains(r#""method":"tools/list""#));
        assert!(json.contains(r#""id":2"#));

        let parsed = JsonRpcRequest::from_json(&json).unwrap();
        assert_eq!(request, parsed);
    }

    #[test]
    fn test_notification_has_no_id() {
        let notification = JsonRpcNotification::new("notifications/initialized", None);
        let json = notification.to_json().unwrap();
        assert!(!json.contains("\"id\""));
        assert!(!json.contains("\"params\""));
    }

    #[test]
    fn test_error_response_null_id() {
        let response = JsonRpcResponse::error(JsonRpcError::new(-32600, "Invalid Request"), None);
        let json = response.to_json().unwrap();
        assert!(json.contains(r#""id":null"#));
        assert!(json.contains(r#""code":-32600"#));
        assert!(!json.contains("\"result\""));
    }

    #[test]
    fn test_request_id_from_value() {
        assert_eq!(
            RequestId::from_value(&json!("abc")),
            Some(RequestId::new_string("abc"))
        );
        assert_eq!(RequestId::from_value(&json!(7)), Some(RequestId::new_number(7)));
        assert_eq!(RequestId::from_value(&Value::Null), Some(RequestId::Null));
        assert_eq!(RequestId::from_value(&json!({"x": 1})), None);
        assert_eq!(RequestId::from_value(&json!([1])), None);
    }

    #[test]
    fn test_dedup_key_namespaces() {
        // "1" as a string and 1 as a number are distinct request ids
        assert_ne!(
            RequestId::new_string("1").dedup_key(),
            RequestId::new_number(1).dedup_key()
        );
        assert_eq!(
            RequestId::new_number(1).dedup_key(),
            RequestId::new_number(1).dedup_key()
        );
    }

    #[test]
    fn test_to_bytes_matches_to_json() {
        let response = JsonRpcResponse::success(json!({"ok": true}), RequestId::new_number(1));
        let bytes = response.to_bytes().unwrap();
        assert_eq!(bytes, Bytes::from(response.to_json().unwrap()));
    }

    #[test]
    fn test_untagged_message_roundtrip() {
        let msg: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#).unwrap();
        assert!(matches!(msg, JsonRpcMessage::Request(_)));

        let msg: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#).unwrap();
        assert!(matches!(msg, JsonRpcMessage::Notification(_)));

        let msg: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","result":{},"id":"a"}"#).unwrap();
        assert!(matches!(msg, JsonRpcMessage::Response(_)));
    }
}
