//! Error Types and Wire-Error Conversion
//!
//! Failures are distinguished by kind (protocol, auth, storage, handler) so
//! the HTTP boundary can translate each into the right JSON-RPC error code
//! and status. The conversion to the wire envelope happens in exactly one
//! place, the [`IntoResponse`] impl on [`ServerError`]; nothing else writes
//! error bodies, and no stack detail ever reaches a client.

// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

/// JSON-RPC error codes used on the wire.
pub mod codes {
    /// Malformed JSON body
    pub const PARSE_ERROR: i64 = -32700;
    /// Bad envelope, refused batch, duplicate id, version header mismatch,
    /// DNS-rebinding rejection
    pub const INVALID_REQUEST: i64 = -32600;
    /// Unknown or version-gated method
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid params, including missing protocolVersion on initialize
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal failure (storage errors land here)
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Authentication required (the discovery 401 envelope)
    pub const AUTH_REQUIRED: i64 = -32000;
    /// Session required or invalid
    pub const SESSION_REQUIRED: i64 = -32001;
    /// HTTP verb not allowed on the MCP endpoint
    pub const METHOD_NOT_ALLOWED: i64 = -32002;
    /// Generic authentication error
    pub const AUTH_ERROR: i64 = -32004;
}

/// Protocol-level failures: bad envelopes, unsupported methods, bad params.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Body was not valid JSON
    #[error("Parse error: {0}")]
    Parse(String),
    /// Envelope violates JSON-RPC 2.0 or a server rule (duplicate id,
    /// refused batch, header mismatch)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// Method unknown or not available on the session's version
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    /// Parameters rejected
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    /// Version string is not a YYYY-MM-DD date
    #[error("Invalid protocol version: {0}")]
    InvalidVersion(String),
    /// No usable session id on a request that requires one
    #[error("Session required or invalid")]
    SessionRequired,
    /// HTTP verb other than GET/POST/OPTIONS on the MCP endpoint
    #[error("Method not allowed")]
    MethodNotAllowed,
}

impl ProtocolError {
    /// The JSON-RPC error code for this failure
    pub fn code(&self) -> i64 {
        match self {
            Self::Parse(_) => codes::PARSE_ERROR,
            Self::InvalidRequest(_) => codes::INVALID_REQUEST,
            Self::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_) | Self::InvalidVersion(_) => codes::INVALID_PARAMS,
            Self::SessionRequired => codes::SESSION_REQUIRED,
            Self::MethodNotAllowed => codes::METHOD_NOT_ALLOWED,
        }
    }
}

/// Storage contract failures. "Not found" is not an error in the contract;
/// these cover genuine backend trouble.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Backend unreachable or refusing operations
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// A persisted record could not be encoded or decoded
    #[error("storage serialization: {0}")]
    Serialization(String),
}

/// Result alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Error returned by a tool/prompt/resource handler.
///
/// Handlers signal failure only through this value; the dispatcher converts
/// it into a generic "execution failed" response object and never lets it
/// break the dispatch contract.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Create a handler error from any displayable cause
    pub fn new(message: impl fmt::Display) -> Self {
        Self(message.to_string())
    }
}

impl From<&str> for HandlerError {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Registry lookup/execution failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    /// No handler registered under the requested name or URI
    #[error("{kind} not found: {name}")]
    NotFound {
        /// Registry kind ("tool", "prompt", "resource")
        kind: &'static str,
        /// The name or URI that missed
        name: String,
    },
    /// The handler returned an error
    #[error("{kind} execution failed: {name}")]
    ExecutionFailed {
        /// Registry kind
        kind: &'static str,
        /// Handler name
        name: String,
        /// Underlying handler message, logged but not sent to clients
        message: String,
    },
    /// Metadata schema rejected at registration time
    #[error("{kind} schema invalid for {name}: {message}")]
    InvalidSchema {
        /// Registry kind
        kind: &'static str,
        /// Handler name
        name: String,
        /// What was wrong
        message: String,
    },
}

/// Top-level error unifying every failure kind at the HTTP boundary.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Protocol failure
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Authentication failure with wire code and optional headers/data
    #[error("{message}")]
    Auth {
        /// `codes::AUTH_REQUIRED` or `codes::AUTH_ERROR`
        code: i64,
        /// Client-visible message
        message: String,
        /// Extra payload under `error.data` (OAuth discovery hints)
        data: Option<Value>,
        /// Value for the `WWW-Authenticate` response header
        www_authenticate: Option<String>,
    },
    /// Storage failure, surfaced as `-32603` with no backend detail
    #[error("internal storage failure")]
    Storage(#[from] StorageError),
    /// Anything else internal
    #[error("internal error")]
    Internal(String),
}

impl ServerError {
    /// Shorthand for a generic auth failure (`-32004`)
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            code: codes::AUTH_ERROR,
            message: message.into(),
            data: None,
            www_authenticate: None,
        }
    }

    /// The JSON-RPC error code for this failure
    pub fn code(&self) -> i64 {
        match self {
            Self::Protocol(e) => e.code(),
            Self::Auth { code, .. } => *code,
            Self::Storage(_) | Self::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// The HTTP status consistent with this failure's class
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Protocol(ProtocolError::MethodNotAllowed) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Protocol(_) => StatusCode::BAD_REQUEST,
            Self::Auth { .. } => StatusCode::UNAUTHORIZED,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The wire envelope `{jsonrpc, error: {code, message[, data]}, id: null}`
    pub fn to_envelope(&self) -> Value {
        let mut error = json!({
            "code": self.code(),
            "message": self.client_message(),
        });
        if let Self::Auth {
            data: Some(data), ..
        } = self
        {
            error["data"] = data.clone();
        }
        json!({
            "jsonrpc": "2.0",
            "error": error,
            "id": null,
        })
    }

    // Storage/internal detail is logged, never sent.
    fn client_message(&self) -> String {
        match self {
            Self::Storage(_) | Self::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if matches!(self, Self::Storage(_) | Self::Internal(_)) {
            tracing::error!(error = %self_detail(&self), "internal failure at HTTP boundary");
        }
        let status = self.http_status();
        let envelope = self.to_envelope();
        let mut response = (status, Json(envelope)).into_response();
        if let Self::Auth {
            www_authenticate: Some(value),
            ..
        } = &self
        {
            if let Ok(header) = axum::http::HeaderValue::from_str(value) {
                response.headers_mut().insert("WWW-Authenticate", header);
            }
        }
        response
    }
}

fn self_detail(error: &ServerError) -> String {
    match error {
        ServerError::Storage(e) => e.to_string(),
        ServerError::Internal(m) => m.clone(),
        other => other.to_string(),
    }
}
