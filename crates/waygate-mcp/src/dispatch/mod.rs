//! Message Dispatcher
//!
//! Takes parsed JSON-RPC payloads (single objects or batch arrays), enforces
//! the envelope rules, gates methods against the session's feature matrix,
//! and routes to the per-method handlers.
//!
//! Request outcomes are not written to the HTTP body: they are appended to
//! the session's message queue and the POST is acknowledged with
//! `202 {"status":"queued"}`; the streaming transport is the one delivery
//! path. Two exceptions: `initialize` answers directly (it carries the new
//! session id), and batch elements answer inline in the batch response
//! array.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, warn};

// Layer 3: Internal module imports
use crate::error::{codes, ProtocolError, ServerError};
use crate::protocol::{
    FeatureSet, JsonRpcError, JsonRpcResponse, ProtocolVersion, RequestId,
};
use crate::registry::{PromptRegistry, RequestContext, ResourceRegistry, ToolRegistry};
use crate::session::SessionManager;
use crate::storage::{ContextRecord, Storage, TokenRecord};

pub mod client_requests;
mod handlers;

pub use client_requests::ClientRequestBroker;

/// Reported in the `serverInfo` field of the initialize response
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    /// Server name
    pub name: String,
    /// Server version
    pub version: String,
}

/// Request-scoped inputs the HTTP layer hands to the dispatcher
#[derive(Debug, Clone)]
pub struct DispatchContext {
    /// Tenant id from the URL
    pub context_id: String,
    /// Canonical base URL
    pub base_url: String,
    /// Resolved tenant record
    pub context_data: Option<ContextRecord>,
    /// Validated token record
    pub token_data: Option<TokenRecord>,
}

/// How the HTTP layer must answer the POST
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// `202 {"status":"queued"}` — the result travels on the stream
    Accepted,
    /// Direct JSON body (initialize), with the freshly allocated session id
    Direct {
        /// Response body
        body: Value,
        /// Value for the `Mcp-Session-Id` header
        session_id: Option<String>,
    },
    /// Batch with at least one request element: `200` with the item array
    Batch(Vec<Value>),
    /// Batch of notifications only: `202` with an empty body
    BatchAccepted,
}

enum MessageDisposition {
    /// No response item (notification or recorded client response)
    None,
    /// A response envelope for this request
    Response(JsonRpcResponse),
}

/// JSON-RPC dispatch engine for one server instance.
pub struct MessageDispatcher {
    pub(crate) sessions: Arc<SessionManager>,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) prompts: Arc<PromptRegistry>,
    pub(crate) resources: Arc<ResourceRegistry>,
    pub(crate) broker: Arc<ClientRequestBroker>,
    pub(crate) identity: ServerIdentity,
}

impl MessageDispatcher {
    /// Assemble a dispatcher over shared components
    pub fn new(
        sessions: Arc<SessionManager>,
        storage: Arc<dyn Storage>,
        tools: Arc<ToolRegistry>,
        prompts: Arc<PromptRegistry>,
        resources: Arc<ResourceRegistry>,
        identity: ServerIdentity,
    ) -> Self {
        let broker = Arc::new(ClientRequestBroker::new(Arc::clone(&storage)));
        Self {
            sessions,
            storage,
            tools,
            prompts,
            resources,
            broker,
            identity,
        }
    }

    /// The server-to-client request broker
    pub fn broker(&self) -> &Arc<ClientRequestBroker> {
        &self.broker
    }

    /// Dispatch a parsed payload.
    ///
    /// `session_id` is the resolved session for this request, absent only
    /// when the payload is a bare `initialize`.
    ///
    /// # Errors
    ///
    /// Protocol-level failures (malformed envelope, refused batch, duplicate
    /// id, missing session) surface as `ServerError` and are never queued.
    pub async fn dispatch(
        &self,
        payload: Value,
        session_id: Option<&str>,
        ctx: &DispatchContext,
    ) -> Result<DispatchOutcome, ServerError> {
        match payload {
            Value::Array(elements) => self.dispatch_batch(elements, session_id, ctx).await,
            Value::Object(_) => self.dispatch_single(payload, session_id, ctx).await,
            _ => Err(ProtocolError::InvalidRequest(
                "payload must be a JSON object or array".to_string(),
            )
            .into()),
        }
    }

    async fn dispatch_single(
        &self,
        payload: Value,
        session_id: Option<&str>,
        ctx: &DispatchContext,
    ) -> Result<DispatchOutcome, ServerError> {
        if payload.get("method").and_then(Value::as_str) == Some("initialize") {
            return self.handle_initialize(&payload, ctx).await;
        }

        let session_id = session_id.ok_or(ProtocolError::SessionRequired)?;
        let version = self
            .sessions
            .resolve_version(session_id)
            .await?
            .ok_or(ProtocolError::SessionRequired)?;
        self.sessions.touch(session_id).await?;
        let features = FeatureSet::for_version(&version);
        let request_ctx = self.request_context(ctx, Some(session_id), &version);

        match self
            .process_message(&payload, session_id, &features, &request_ctx)
            .await?
        {
            MessageDisposition::None => Ok(DispatchOutcome::Accepted),
            MessageDisposition::Response(response) => {
                self.queue_response(session_id, response).await?;
                Ok(DispatchOutcome::Accepted)
            }
        }
    }

    async fn dispatch_batch(
        &self,
        elements: Vec<Value>,
        session_id: Option<&str>,
        ctx: &DispatchContext,
    ) -> Result<DispatchOutcome, ServerError> {
        if elements.is_empty() {
            return Err(ProtocolError::InvalidRequest("empty batch".to_string()).into());
        }

        let session_id = session_id.ok_or(ProtocolError::SessionRequired)?;
        let version = self
            .sessions
            .resolve_version(session_id)
            .await?
            .ok_or(ProtocolError::SessionRequired)?;
        let features = FeatureSet::for_version(&version);
        if !features.json_rpc_batching {
            return Err(ProtocolError::InvalidRequest(format!(
                "JSON-RPC batching is not supported on protocol version {version}"
            ))
            .into());
        }
        self.sessions.touch(session_id).await?;
        let request_ctx = self.request_context(ctx, Some(session_id), &version);

        let mut items = Vec::new();
        for element in &elements {
            // Elements are independent: envelope failures become inline
            // error items instead of failing the whole batch.
            let disposition = match self
                .process_message(element, session_id, &features, &request_ctx)
                .await
            {
                Ok(disposition) => disposition,
                Err(error) => MessageDisposition::Response(JsonRpcResponse::error(
                    JsonRpcError::new(error.code(), error.to_string()),
                    element.get("id").and_then(RequestId::from_value),
                )),
            };
            if let MessageDisposition::Response(response) = disposition {
                items.push(serde_json::to_value(&response).map_err(|e| {
                    ServerError::Internal(format!("response serialization: {e}"))
                })?);
            }
        }

        if items.is_empty() {
            Ok(DispatchOutcome::BatchAccepted)
        } else {
            Ok(DispatchOutcome::Batch(items))
        }
    }

    /// Validate one envelope and route it.
    async fn process_message(
        &self,
        message: &Value,
        session_id: &str,
        features: &FeatureSet,
        request_ctx: &RequestContext,
    ) -> Result<MessageDisposition, ServerError> {
        let Some(object) = message.as_object() else {
            return Err(
                ProtocolError::InvalidRequest("message must be a JSON object".to_string()).into(),
            );
        };

        if object.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return Err(ProtocolError::InvalidRequest(
                "jsonrpc field must be \"2.0\"".to_string(),
            )
            .into());
        }

        let method = match object.get("method") {
            Some(Value::String(method)) => Some(method.as_str()),
            Some(_) => {
                return Err(
                    ProtocolError::InvalidRequest("method must be a string".to_string()).into(),
                )
            }
            None => None,
        };

        let Some(method) = method else {
            // No method: either a client response to a server-initiated
            // request, or garbage.
            if object.contains_key("result") || object.contains_key("error") {
                self.record_client_response(object).await?;
                return Ok(MessageDisposition::None);
            }
            return Err(
                ProtocolError::InvalidRequest("method field is required".to_string()).into(),
            );
        };

        // Notification detection: notifications/* methods, the bare
        // `initialized`, or any message without an id.
        let is_notification = method.starts_with("notifications/")
            || method == "initialized"
            || !object.contains_key("id");

        if is_notification {
            if !features.allows_method(method) {
                // Unsupported notifications are accepted silently.
                debug!(method, "dropping notification gated by protocol version");
                return Ok(MessageDisposition::None);
            }
            self.handle_notification(method, object.get("params"), session_id)
                .await?;
            return Ok(MessageDisposition::None);
        }

        let id = object
            .get("id")
            .and_then(RequestId::from_value)
            .ok_or_else(|| {
                ProtocolError::InvalidRequest("id must be a string or number".to_string())
            })?;
        if id.is_null() {
            return Err(
                ProtocolError::InvalidRequest("request id must not be null".to_string()).into(),
            );
        }
        if !self.sessions.register_request_id(session_id, &id) {
            return Err(ProtocolError::InvalidRequest(format!(
                "duplicate request id: {id}"
            ))
            .into());
        }

        // Feature gating. Known-but-gated methods get a queued/inline
        // -32601 response; methods this server never heard of are protocol
        // errors surfaced immediately.
        if !features.allows_method(method) {
            if FeatureSet::method_exists(method) {
                debug!(method, version = %request_ctx.protocol_version, "method gated by version");
                return Ok(MessageDisposition::Response(JsonRpcResponse::error(
                    JsonRpcError::new(
                        codes::METHOD_NOT_FOUND,
                        format!(
                            "Method {method} is not supported on protocol version {}",
                            request_ctx.protocol_version
                        ),
                    ),
                    Some(id),
                )));
            }
            return Err(ProtocolError::MethodNotFound(method.to_string()).into());
        }

        let params = object.get("params").cloned().unwrap_or(Value::Null);
        let response = match self
            .route_request(method, &params, &id, session_id, features, request_ctx)
            .await
        {
            Ok(result) => JsonRpcResponse::success(result, id),
            Err(error) => JsonRpcResponse::error(error, Some(id)),
        };
        Ok(MessageDisposition::Response(response))
    }

    /// Initialization: negotiate, allocate the session, answer directly.
    async fn handle_initialize(
        &self,
        payload: &Value,
        ctx: &DispatchContext,
    ) -> Result<DispatchOutcome, ServerError> {
        if payload.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return Err(ProtocolError::InvalidRequest(
                "jsonrpc field must be \"2.0\"".to_string(),
            )
            .into());
        }
        let id = payload
            .get("id")
            .and_then(RequestId::from_value)
            .filter(|id| !id.is_null())
            .ok_or_else(|| {
                ProtocolError::InvalidRequest("initialize requires a request id".to_string())
            })?;

        let result = self.initialize_result(payload.get("params"), ctx).await?;
        let (result, session_id) = result;
        let response = JsonRpcResponse::success(result, id);
        let body = serde_json::to_value(&response)
            .map_err(|e| ServerError::Internal(format!("response serialization: {e}")))?;
        Ok(DispatchOutcome::Direct {
            body,
            session_id: Some(session_id),
        })
    }

    /// Shared initialize logic; also used for initialize inside a batch.
    pub(crate) async fn initialize_result(
        &self,
        params: Option<&Value>,
        ctx: &DispatchContext,
    ) -> Result<(Value, String), ServerError> {
        let requested = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProtocolError::InvalidParams("protocolVersion is required".to_string())
            })?;

        let negotiated = self.sessions.negotiator().negotiate_str(requested);
        let record = self
            .sessions
            .create_session(&negotiated, Some(&ctx.context_id), None)
            .await?;
        debug!(
            requested,
            negotiated = %negotiated,
            session_id = %record.session_id,
            "initialize negotiated"
        );

        let features = FeatureSet::for_version(&negotiated);
        let result = json!({
            "protocolVersion": negotiated.as_str(),
            "capabilities": features.capabilities(),
            "serverInfo": {
                "name": self.identity.name,
                "version": self.identity.version,
            },
        });
        Ok((result, record.session_id))
    }

    async fn handle_notification(
        &self,
        method: &str,
        params: Option<&Value>,
        session_id: &str,
    ) -> Result<(), ServerError> {
        match method {
            "initialized" | "notifications/initialized" => {
                debug!(session_id, "client initialization complete");
            }
            "notifications/cancelled" => {
                // Cancellation drains everything queued for the session.
                let queued = self.storage.get_messages(session_id).await?;
                for message in &queued {
                    self.storage.delete_message(message.id).await?;
                }
                debug!(session_id, drained = queued.len(), "cancellation drained queue");
            }
            "notifications/progress" => {
                let token = params
                    .and_then(|p| p.get("progressToken"))
                    .map(ToString::to_string);
                debug!(session_id, progress_token = ?token, "progress notification");
            }
            other => {
                debug!(method = other, session_id, "ignoring unknown notification");
            }
        }
        Ok(())
    }

    async fn record_client_response(
        &self,
        object: &serde_json::Map<String, Value>,
    ) -> Result<(), ServerError> {
        let Some(id) = object.get("id").and_then(Value::as_str) else {
            warn!("client response without a string id; dropping");
            return Ok(());
        };
        let payload = Value::Object(object.clone());
        if self.broker.record_response(id, payload).await?.is_none() {
            warn!(request_id = id, "client response without a pending request");
        }
        Ok(())
    }

    async fn queue_response(
        &self,
        session_id: &str,
        response: JsonRpcResponse,
    ) -> Result<(), ServerError> {
        let envelope = serde_json::to_value(&response)
            .map_err(|e| ServerError::Internal(format!("response serialization: {e}")))?;
        self.storage
            .store_message(session_id, envelope, None)
            .await?;
        Ok(())
    }

    pub(crate) fn request_context(
        &self,
        ctx: &DispatchContext,
        session_id: Option<&str>,
        version: &ProtocolVersion,
    ) -> RequestContext {
        RequestContext {
            context_id: ctx.context_id.clone(),
            session_id: session_id.map(str::to_string),
            protocol_version: version.clone(),
            base_url: ctx.base_url.clone(),
            context_data: ctx.context_data.clone(),
            token_data: ctx.token_data.clone(),
        }
    }

    /// Current timestamp in the wire format used by `ping` and progress
    pub(crate) fn timestamp() -> String {
        Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    }
}
