//! OAuth 2.0 Error Envelope
//!
//! RFC 6749 §5.2 / §4.1.2.1 error codes with the standard JSON body
//! `{error, error_description}`. `invalid_client` answers 401 with a
//! `WWW-Authenticate` challenge; everything else client-caused is 400.

// Layer 2: Third-party crate imports
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::error::StorageError;

/// OAuth protocol failures, named after their wire error codes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OAuthError {
    /// Malformed or missing parameter
    #[error("{0}")]
    InvalidRequest(String),
    /// Bad, expired, consumed, or mismatched grant
    #[error("{0}")]
    InvalidGrant(String),
    /// Client authentication failed
    #[error("{0}")]
    InvalidClient(String),
    /// Client is not allowed to use this flow
    #[error("{0}")]
    UnauthorizedClient(String),
    /// `response_type` other than `code`
    #[error("{0}")]
    UnsupportedResponseType(String),
    /// `grant_type` this server does not issue
    #[error("{0}")]
    UnsupportedGrantType(String),
    /// Resource owner or server denied the request
    #[error("{0}")]
    AccessDenied(String),
    /// Internal failure
    #[error("{0}")]
    ServerError(String),
}

impl OAuthError {
    /// RFC 6749 wire error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::InvalidClient(_) => "invalid_client",
            Self::UnauthorizedClient(_) => "unauthorized_client",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::AccessDenied(_) => "access_denied",
            Self::ServerError(_) => "server_error",
        }
    }

    /// HTTP status for the direct (non-redirect) error response
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<StorageError> for OAuthError {
    fn from(error: StorageError) -> Self {
        tracing::error!(error = %error, "storage failure in OAuth flow");
        Self::ServerError("temporarily unable to process the request".to_string())
    }
}

/// The RFC 6749 §5.2 JSON body
#[derive(Debug, Serialize, Deserialize)]
pub struct OAuthErrorBody {
    /// Wire error code
    pub error: String,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = OAuthErrorBody {
            error: self.error_code().to_string(),
            error_description: Some(self.to_string()),
        };
        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let challenge = format!(r#"Bearer error="{}""#, self.error_code());
            if let Ok(value) = axum::http::HeaderValue::from_str(&challenge) {
                response.headers_mut().insert("WWW-Authenticate", value);
            }
        }
        response
    }
}
