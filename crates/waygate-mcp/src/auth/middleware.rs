//! Bearer Authentication Middleware
//!
//! Tower layer wrapping the MCP routes. Per request it resolves the tenant
//! context, validates the bearer token against storage, enforces the
//! 2025-06-18 resource-binding and version-header rules, and attaches the
//! resulting [`McpContext`] to the request extensions.
//!
//! Two bypasses exist by design: CORS preflights, and POST bodies whose
//! JSON-RPC method is `initialize` — initialization is the bootstrap for a
//! fresh client that has no token yet. The body is buffered for the peek
//! and rewound before forwarding.

// Layer 1: Standard library imports
use std::pin::Pin;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tower::{Layer, Service};
use tracing::debug;
use uuid::Uuid;

// Layer 3: Internal module imports
use crate::auth::{discovery_unauthorized, McpContext};
use crate::config::WaygateConfig;
use crate::error::{ProtocolError, ServerError};
use crate::protocol::{ProtocolVersion, V2025_06_18};
use crate::session::{looks_like_session_id, SessionManager};
use crate::storage::{ContextRecord, Storage, TokenRecord};

/// Largest POST body the middleware will buffer for the initialize peek.
/// Sized for the 50 MiB audio ceiling plus base64 and envelope overhead.
const MAX_BODY_BYTES: usize = 80 * 1024 * 1024;

/// Shared state the middleware needs
#[derive(Clone)]
pub struct AuthState {
    /// Server configuration
    pub config: Arc<WaygateConfig>,
    /// Storage backend
    pub storage: Arc<dyn Storage>,
    /// Session manager, for version resolution
    pub sessions: Arc<SessionManager>,
}

/// Tower layer installing [`AuthService`]
#[derive(Clone)]
pub struct AuthLayer {
    state: AuthState,
}

impl AuthLayer {
    /// Create the layer
    pub fn new(state: AuthState) -> Self {
        Self { state }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            state: self.state.clone(),
        }
    }
}

/// Service wrapper running the authentication checks
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    state: AuthState,
}

impl<S> Service<Request> for AuthService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let state = self.state.clone();
        let inner = self.inner.clone();
        // Swap keeps the polled-ready instance (tower's clone caveat)
        let mut inner = std::mem::replace(&mut self.inner, inner);

        Box::pin(async move {
            match authenticate(&state, request).await {
                Ok(request) => inner.call(request).await,
                Err(error) => Ok(error.into_response()),
            }
        })
    }
}

/// The authentication pipeline. Returns the request with `McpContext`
/// attached, or the error response to short-circuit with.
async fn authenticate(state: &AuthState, request: Request) -> Result<Request, ServerError> {
    // Preflights never authenticate
    if request.method() == Method::OPTIONS {
        return Ok(request);
    }

    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or("").to_string();
    let context_id = extract_context_id(&path)
        .ok_or_else(|| ServerError::auth("No context identifier in request path"))?;
    let base_url = state
        .config
        .resolve_base_url(host_header(request.headers()).as_deref());

    // Authless deployments synthesize a public identity and skip the rest
    if state.config.auth.authless {
        let auth = &state.config.auth;
        let session_id = session_id_from(request.headers(), &path);
        let mut request = request;
        request.extensions_mut().insert(McpContext {
            context_id: context_id.clone(),
            context_data: Some(ContextRecord {
                context_id: auth.authless_context_id.clone(),
                context_type: auth.authless_context_type.clone(),
                name: auth.authless_context_name.clone(),
                active: true,
            }),
            token_data: None,
            base_url,
            protocol_version: None,
            session_id,
        });
        return Ok(request);
    }

    // Initialize bootstraps a tokenless client: peek the body, rewind it.
    let (request, body_method) = peek_post_method(request).await?;
    if body_method.as_deref() == Some("initialize") {
        debug!(context_id, "initialize request; bypassing bearer check");
        let mut request = request;
        request.extensions_mut().insert(McpContext {
            context_id,
            context_data: None,
            token_data: None,
            base_url,
            protocol_version: None,
            session_id: None,
        });
        return Ok(request);
    }

    // Tenant resolution by configured type order
    let mut context_data = None;
    for context_type in &state.config.auth.context_types {
        if let Some(record) = state
            .storage
            .get_context_data(&context_id, context_type)
            .await?
        {
            context_data = Some(record);
            break;
        }
    }
    let context_data = match context_data {
        Some(record) if record.active => record,
        _ => {
            return Err(discovery_unauthorized(
                &state.config,
                &base_url,
                &context_id,
                "Unknown or inactive context",
            ))
        }
    };

    // Bearer extraction; tokens in query strings are forbidden outright
    if query.contains("access_token=") || query.contains("token=") {
        return Err(ServerError::auth("Tokens must not be passed in query strings"));
    }
    let token = bearer_token(request.headers()).ok_or_else(|| {
        discovery_unauthorized(
            &state.config,
            &base_url,
            &context_id,
            "Authentication required",
        )
    })?;

    let token_data = state
        .storage
        .validate_token(&token, Some(&context_id))
        .await?
        .ok_or_else(|| {
            discovery_unauthorized(
                &state.config,
                &base_url,
                &context_id,
                "Invalid or expired token",
            )
        })?;

    check_scopes(&state.config, &token_data)?;

    // Version-dependent enforcement (2025-06-18)
    let session_id = session_id_from(request.headers(), &path);
    let session_version = match &session_id {
        Some(session_id) => state.sessions.resolve_version(session_id).await?,
        None => None,
    };
    let header_version = protocol_version_header(request.headers());
    let effective = session_version.clone().or_else(|| header_version.clone());

    if effective.as_ref().map(ProtocolVersion::as_str) == Some(V2025_06_18) {
        let expected = format!("{}/mcp/{context_id}", base_url.trim_end_matches('/'));
        let bound = token_data.resource.as_deref() == Some(expected.as_str())
            && token_data.aud.iter().any(|aud| aud == &expected);
        if !bound {
            return Err(ServerError::auth("Token not bound to this resource"));
        }
        if let Some(session_version) = &session_version {
            if header_version.as_ref() != Some(session_version) {
                return Err(ProtocolError::InvalidRequest(format!(
                    "MCP-Protocol-Version header must equal the negotiated version {session_version}"
                ))
                .into());
            }
        }
    }

    let mut request = request;
    request.extensions_mut().insert(McpContext {
        context_id,
        context_data: Some(context_data),
        token_data: Some(token_data),
        base_url,
        protocol_version: effective,
        session_id,
    });
    Ok(request)
}

/// Buffer a POST body, read its JSON-RPC method, and rewind the stream.
async fn peek_post_method(request: Request) -> Result<(Request, Option<String>), ServerError> {
    if request.method() != Method::POST {
        return Ok((request, None));
    }
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| ProtocolError::InvalidRequest("request body too large".to_string()))?;
    let method = serde_json::from_slice::<Value>(&bytes)
        .ok()
        .and_then(|payload| {
            payload
                .get("method")
                .and_then(Value::as_str)
                .map(str::to_string)
        });
    let request = Request::from_parts(parts, Body::from(bytes));
    Ok((request, method))
}

pub(crate) fn extract_context_id(path: &str) -> Option<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if let Some(index) = segments.iter().position(|s| *s == "mcp") {
        if let Some(context) = segments.get(index + 1) {
            return Some((*context).to_string());
        }
    }
    // Fallback: first UUID-shaped segment anywhere in the path
    segments
        .iter()
        .find(|segment| Uuid::parse_str(segment).is_ok())
        .map(|segment| (*segment).to_string())
}

pub(crate) fn session_id_from(headers: &HeaderMap, path: &str) -> Option<String> {
    if let Some(value) = headers.get("Mcp-Session-Id").and_then(|v| v.to_str().ok()) {
        if looks_like_session_id(value) {
            return Some(value.to_string());
        }
    }
    path.split('/')
        .filter(|s| !s.is_empty())
        .find(|segment| looks_like_session_id(segment))
        .map(str::to_string)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

fn host_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn protocol_version_header(headers: &HeaderMap) -> Option<ProtocolVersion> {
    headers
        .get("MCP-Protocol-Version")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| ProtocolVersion::new(value).ok())
}

fn check_scopes(config: &WaygateConfig, token: &TokenRecord) -> Result<(), ServerError> {
    let granted = token.scope_list();
    for required in &config.auth.required_scopes {
        if !granted.contains(&required.as_str()) {
            return Err(ServerError::auth(format!(
                "Insufficient scope: {required} required"
            )));
        }
    }
    Ok(())
}
