//! Top-Level HTTP Server
//!
//! Router assembly and verb dispatch for the multi-tenant MCP endpoint,
//! plus the discovery and OAuth surfaces. `POST` feeds the dispatcher,
//! `GET` opens the version-selected streaming transport, `OPTIONS` answers
//! the CORS preflight, and every other verb is refused with `-32002`.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use axum::body::to_bytes;
use axum::extract::{FromRef, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use url::Url;

// Layer 3: Internal module imports
use crate::auth::middleware::{extract_context_id, session_id_from};
use crate::auth::{AuthLayer, AuthState, McpContext};
use crate::config::WaygateConfig;
use crate::dispatch::{DispatchContext, DispatchOutcome, MessageDispatcher, ServerIdentity};
use crate::error::{codes, ProtocolError, ServerError};
use crate::oauth::{endpoints as oauth_endpoints, OAuthState, SocialProvider, UserAgentSessionStore};
use crate::protocol::{VersionNegotiator, V2024_11_05, V2025_06_18};
use crate::registry::{PromptRegistry, ResourceRegistry, ToolRegistry};
use crate::session::SessionManager;
use crate::storage::{MemoryStorage, Storage};
use crate::transport::{SseFraming, StreamFraming, StreamableFraming};
use crate::{discovery, transport};

/// Largest POST body accepted on the MCP endpoint
const MAX_BODY_BYTES: usize = 80 * 1024 * 1024;

/// Shared application state behind every route
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<WaygateConfig>,
    /// Storage backend
    pub storage: Arc<dyn Storage>,
    /// Session manager
    pub sessions: Arc<SessionManager>,
    /// JSON-RPC dispatcher
    pub dispatcher: Arc<MessageDispatcher>,
    /// Tool registry
    pub tools: Arc<ToolRegistry>,
    /// Prompt registry
    pub prompts: Arc<PromptRegistry>,
    /// Resource registry
    pub resources: Arc<ResourceRegistry>,
    /// Consent-flow session store
    pub ua_sessions: Arc<UserAgentSessionStore>,
    /// Social providers by callback name
    pub providers: Arc<HashMap<&'static str, Arc<dyn SocialProvider>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl FromRef<AppState> for OAuthState {
    fn from_ref(app: &AppState) -> Self {
        Self {
            config: Arc::clone(&app.config),
            storage: Arc::clone(&app.storage),
            ua_sessions: Arc::clone(&app.ua_sessions),
            providers: Arc::clone(&app.providers),
        }
    }
}

/// Builder for [`McpServer`]
pub struct McpServerBuilder {
    config: WaygateConfig,
    storage: Option<Arc<dyn Storage>>,
    providers: HashMap<&'static str, Arc<dyn SocialProvider>>,
}

impl McpServerBuilder {
    /// Use a specific storage backend (defaults to [`MemoryStorage`])
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Register a social identity provider
    pub fn social_provider(mut self, provider: Arc<dyn SocialProvider>) -> Self {
        self.providers.insert(provider.name(), provider);
        self
    }

    /// Assemble the server
    pub fn build(self) -> McpServer {
        let config = Arc::new(self.config);
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let negotiator = VersionNegotiator::new(config.supported_versions.clone())
            .unwrap_or_else(|_| VersionNegotiator::with_defaults());
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&storage),
            negotiator,
            config.session_lifetime,
        ));
        let tools = Arc::new(ToolRegistry::new());
        let prompts = Arc::new(PromptRegistry::new());
        let resources = Arc::new(ResourceRegistry::new());
        let dispatcher = Arc::new(MessageDispatcher::new(
            Arc::clone(&sessions),
            Arc::clone(&storage),
            Arc::clone(&tools),
            Arc::clone(&prompts),
            Arc::clone(&resources),
            ServerIdentity {
                name: config.server_info.name.clone(),
                version: config.server_info.version.clone(),
            },
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        McpServer {
            state: AppState {
                config,
                storage,
                sessions,
                dispatcher,
                tools,
                prompts,
                resources,
                ua_sessions: Arc::new(UserAgentSessionStore::new()),
                providers: Arc::new(self.providers),
                shutdown_tx,
                shutdown_rx,
            },
        }
    }
}

/// The assembled multi-tenant MCP server.
pub struct McpServer {
    state: AppState,
}

impl McpServer {
    /// Start building a server from a configuration
    pub fn builder(config: WaygateConfig) -> McpServerBuilder {
        McpServerBuilder {
            config,
            storage: None,
            providers: HashMap::new(),
        }
    }

    /// The shared state (accessors for registration and tests)
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Tool registry for application handlers
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.state.tools
    }

    /// Prompt registry for application handlers
    pub fn prompts(&self) -> &Arc<PromptRegistry> {
        &self.state.prompts
    }

    /// Resource registry for application handlers
    pub fn resources(&self) -> &Arc<ResourceRegistry> {
        &self.state.resources
    }

    /// The consent-flow session store (the host login flow authenticates
    /// user-agent sessions through this)
    pub fn ua_sessions(&self) -> &Arc<UserAgentSessionStore> {
        &self.state.ua_sessions
    }

    /// The storage backend
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.state.storage
    }

    /// Signal every streaming loop and background task to stop
    pub fn shutdown(&self) {
        let _ = self.state.shutdown_tx.send(true);
    }

    /// Spawn the periodic storage cleanup sweep
    pub fn spawn_cleanup(&self) -> tokio::task::JoinHandle<()> {
        let storage = Arc::clone(&self.state.storage);
        let ua_sessions = Arc::clone(&self.state.ua_sessions);
        let mut shutdown = self.state.shutdown_rx.clone();
        let interval = Duration::from_secs(self.state.config.cleanup_interval.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // immediate first tick is a no-op
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {}
                }
                if *shutdown.borrow() {
                    return;
                }
                match storage.cleanup().await {
                    Ok(removed) if removed > 0 => debug!(removed, "cleanup sweep"),
                    Ok(_) => {}
                    Err(error) => warn!(error = %error, "cleanup sweep failed"),
                }
                let swept = ua_sessions.sweep();
                if swept > 0 {
                    debug!(swept, "user-agent sessions swept");
                }
            }
        })
    }

    /// Build the axum router for this server
    pub fn router(&self) -> Router {
        let state = self.state.clone();
        let endpoints = state.config.oauth.auth_server.endpoints.clone();
        let auth_state = AuthState {
            config: Arc::clone(&state.config),
            storage: Arc::clone(&state.storage),
            sessions: Arc::clone(&state.sessions),
        };

        let mcp_routes = Router::new()
            .route("/mcp/{context_id}", any(mcp_endpoint))
            .route("/mcp/{context_id}/{session_id}", any(mcp_endpoint))
            .layer(AuthLayer::new(auth_state));

        let oauth_routes = Router::new()
            .route(&endpoints.authorize, get(oauth_endpoints::authorize))
            .route(&endpoints.consent, post(oauth_endpoints::consent))
            .route(&endpoints.token, post(oauth_endpoints::token))
            .route(&endpoints.revoke, post(oauth_endpoints::revoke))
            .route(&endpoints.register, post(oauth_endpoints::register))
            .route("/oauth/{provider}/callback", get(oauth_endpoints::social_callback));

        let discovery_routes = Router::new()
            .route(
                "/.well-known/oauth-authorization-server",
                get(discovery::authorization_server_metadata),
            )
            .route(
                "/.well-known/oauth-authorization-server/{*rest}",
                get(discovery::authorization_server_metadata),
            )
            .route(
                "/.well-known/oauth-protected-resource",
                get(discovery::protected_resource_metadata),
            )
            .route(
                "/.well-known/oauth-protected-resource/{*rest}",
                get(discovery::protected_resource_metadata),
            );

        Router::new()
            .merge(mcp_routes)
            .merge(oauth_routes)
            .merge(discovery_routes)
            .route("/health", get(health))
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers(Any),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serve on the given listener until shutdown is signalled.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from the accept loop.
    pub async fn serve(&self, listener: tokio::net::TcpListener) -> std::io::Result<()> {
        let mut shutdown = self.state.shutdown_rx.clone();
        let cleanup = self.spawn_cleanup();
        info!(addr = ?listener.local_addr().ok(), "waygate-mcp listening");
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await;
        cleanup.abort();
        result
    }
}

async fn health() -> Response {
    Json(json!({"status": "ok"})).into_response()
}

/// The MCP endpoint: per-verb dispatch
async fn mcp_endpoint(State(state): State<AppState>, request: Request) -> Response {
    if request.method() == Method::OPTIONS {
        return cors_preflight();
    }
    if let Err(error) = dns_rebinding_guard(request.headers()) {
        return ServerError::from(error).into_response();
    }

    let method = request.method().clone();
    if method == Method::POST {
        handle_post(state, request)
            .await
            .unwrap_or_else(IntoResponse::into_response)
    } else if method == Method::GET {
        handle_get(state, request)
            .await
            .unwrap_or_else(IntoResponse::into_response)
    } else {
        ServerError::from(ProtocolError::MethodNotAllowed).into_response()
    }
}

fn cors_preflight() -> Response {
    let mut response = StatusCode::OK.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(
            "Authorization, Content-Type, Mcp-Session-Id, MCP-Protocol-Version, Last-Event-ID",
        ),
    );
    response
}

/// Refuse requests whose `Host` is loopback while the `Origin` is not: the
/// DNS-rebinding shape for a browser talking to a local server.
fn dns_rebinding_guard(headers: &HeaderMap) -> Result<(), ProtocolError> {
    let Some(host) = headers.get(header::HOST).and_then(|h| h.to_str().ok()) else {
        return Ok(());
    };
    if !is_loopback_host(host) {
        return Ok(());
    }
    let Some(origin) = headers.get(header::ORIGIN).and_then(|h| h.to_str().ok()) else {
        return Ok(());
    };
    let origin_host = Url::parse(origin)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string));
    match origin_host {
        Some(origin_host) if is_loopback_host(&origin_host) => Ok(()),
        _ => Err(ProtocolError::InvalidRequest(
            "cross-origin request to loopback host refused".to_string(),
        )),
    }
}

fn is_loopback_host(host: &str) -> bool {
    let bare = host
        .trim_start_matches('[')
        .split(']')
        .next()
        .unwrap_or(host);
    let bare = bare.split(':').next().unwrap_or(bare);
    bare == "localhost" || bare.ends_with(".localhost") || bare == "127.0.0.1" || bare == "::1"
}

async fn handle_post(state: AppState, request: Request) -> Result<Response, ServerError> {
    let headers = request.headers().clone();
    let path = request.uri().path().to_string();
    let context = request.extensions().get::<McpContext>().cloned();

    let bytes = to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|_| ProtocolError::InvalidRequest("request body too large".to_string()))?;
    let payload: Value = serde_json::from_slice(&bytes)
        .map_err(|e| ProtocolError::Parse(e.to_string()))?;
    if !payload.is_object() && !payload.is_array() {
        return Err(ProtocolError::InvalidRequest(
            "payload must be a JSON object or array".to_string(),
        )
        .into());
    }

    let is_initialize = payload.get("method").and_then(Value::as_str) == Some("initialize");
    let context_id = context
        .as_ref()
        .map(|ctx| ctx.context_id.clone())
        .or_else(|| extract_context_id(&path))
        .ok_or_else(|| ServerError::auth("No context identifier in request path"))?;

    // The middleware attaches a context to everything it lets through;
    // a bare non-initialize POST without one means auth never ran.
    if !is_initialize && context.is_none() && !state.config.auth.authless {
        return Err(ServerError::Auth {
            code: codes::AUTH_REQUIRED,
            message: "Authentication required".to_string(),
            data: None,
            www_authenticate: None,
        });
    }

    let base_url = context.as_ref().map(|ctx| ctx.base_url.clone()).unwrap_or_else(|| {
        state
            .config
            .resolve_base_url(headers.get(header::HOST).and_then(|h| h.to_str().ok()))
    });
    let dispatch_ctx = DispatchContext {
        context_id,
        base_url,
        context_data: context.as_ref().and_then(|ctx| ctx.context_data.clone()),
        token_data: context.as_ref().and_then(|ctx| ctx.token_data.clone()),
    };

    let session_id = session_id_from(&headers, &path);
    let outcome = state
        .dispatcher
        .dispatch(payload, session_id.as_deref(), &dispatch_ctx)
        .await?;

    Ok(match outcome {
        DispatchOutcome::Accepted => {
            (StatusCode::ACCEPTED, Json(json!({"status": "queued"}))).into_response()
        }
        DispatchOutcome::Direct { body, session_id } => {
            let mut response = (StatusCode::OK, Json(body)).into_response();
            if let Some(session_id) = session_id {
                if let Ok(value) = HeaderValue::from_str(&session_id) {
                    response.headers_mut().insert("Mcp-Session-Id", value);
                }
            }
            response
        }
        DispatchOutcome::Batch(items) => (StatusCode::OK, Json(Value::Array(items))).into_response(),
        DispatchOutcome::BatchAccepted => StatusCode::ACCEPTED.into_response(),
    })
}

async fn handle_get(state: AppState, request: Request) -> Result<Response, ServerError> {
    let headers = request.headers().clone();
    let path = request.uri().path().to_string();
    let context = request.extensions().get::<McpContext>().cloned();

    let session_id = session_id_from(&headers, &path).ok_or(ProtocolError::SessionRequired)?;
    let version = state
        .sessions
        .resolve_version(&session_id)
        .await?
        .ok_or(ProtocolError::SessionRequired)?;

    let context_id = context
        .as_ref()
        .map(|ctx| ctx.context_id.clone())
        .or_else(|| extract_context_id(&path))
        .ok_or_else(|| ServerError::auth("No context identifier in request path"))?;
    let base_url = context.as_ref().map(|ctx| ctx.base_url.clone()).unwrap_or_else(|| {
        state
            .config
            .resolve_base_url(headers.get(header::HOST).and_then(|h| h.to_str().ok()))
    });

    let (framing, stream_config): (Arc<dyn StreamFraming>, _) =
        if version.as_str() == V2024_11_05 {
            let endpoint_url = format!(
                "{}/mcp/{context_id}/{session_id}",
                base_url.trim_end_matches('/')
            );
            (
                Arc::new(SseFraming::new(endpoint_url)),
                state.config.sse_stream_config(),
            )
        } else {
            (
                Arc::new(StreamableFraming::new()),
                state.config.streamable_stream_config(),
            )
        };

    let mut extra_headers = Vec::new();
    if version.as_str() == V2025_06_18 {
        extra_headers.push(("MCP-Protocol-Version", version.as_str().to_string()));
    }

    debug!(session_id, version = %version, "opening stream");
    Ok(transport::stream_response(
        Arc::clone(&state.storage),
        session_id,
        stream_config,
        framing,
        state.shutdown_rx.clone(),
        extra_headers,
    ))
}
