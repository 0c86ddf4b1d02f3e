//! Per-Method Request Handlers
//!
//! The routing table of the dispatcher. Every handler returns either a
//! result value or a `JsonRpcError`; handler failures from the registries
//! are converted into result objects here so a broken tool can never break
//! dispatch.

// Layer 2: Third-party crate imports
use serde_json::{json, Value};
use tracing::debug;

// Layer 3: Internal module imports
use crate::error::RegistryError;
use crate::protocol::{validate_content_item, FeatureSet, JsonRpcError};
use crate::registry::RequestContext;
use crate::storage::CorrelationKind;

use super::MessageDispatcher;

impl MessageDispatcher {
    /// Route a validated, gated request to its handler.
    pub(crate) async fn route_request(
        &self,
        method: &str,
        params: &Value,
        id: &crate::protocol::RequestId,
        session_id: &str,
        features: &FeatureSet,
        ctx: &RequestContext,
    ) -> Result<Value, JsonRpcError> {
        debug!(method, %id, session_id, "dispatching request");
        match method {
            "initialize" => {
                // Initialize inside a batch: negotiate and answer inline.
                let dispatch_ctx = super::DispatchContext {
                    context_id: ctx.context_id.clone(),
                    base_url: ctx.base_url.clone(),
                    context_data: ctx.context_data.clone(),
                    token_data: ctx.token_data.clone(),
                };
                self.initialize_result(Some(params).filter(|p| !p.is_null()), &dispatch_ctx)
                    .await
                    .map(|(result, _)| result)
                    .map_err(|e| JsonRpcError::new(e.code(), e.to_string()))
            }
            "ping" => Ok(json!({
                "status": "pong",
                "timestamp": Self::timestamp(),
            })),
            "tools/list" => Ok(json!({"tools": self.tools.list(features)})),
            "tools/call" => self.handle_tool_call(params, features, ctx),
            "prompts/list" => Ok(json!({"prompts": self.prompts.list(features)})),
            "prompts/get" => self.handle_prompt_get(params, ctx),
            "resources/list" => Ok(json!({"resources": self.resources.list(features)})),
            "resources/templates/list" => Ok(json!({
                "resourceTemplates": self.resources.list_templates(features)
            })),
            "resources/read" => self.handle_resource_read(params, ctx),
            "completions/complete" => self.handle_completion(params),
            "sampling/createMessage" => {
                self.validate_sampling_content(params, features)?;
                self.initiate_client_request(
                    CorrelationKind::Sampling,
                    method,
                    params,
                    session_id,
                )
                .await
            }
            "roots/list" | "roots/read" | "roots/listDirectory" => {
                self.initiate_client_request(CorrelationKind::Roots, method, params, session_id)
                    .await
            }
            "elicitation/create" => {
                self.initiate_client_request(
                    CorrelationKind::Elicitation,
                    method,
                    params,
                    session_id,
                )
                .await
            }
            // Unreachable: gating rejects unknown methods first.
            other => Err(JsonRpcError::new(
                crate::error::codes::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )),
        }
    }

    fn handle_tool_call(
        &self,
        params: &Value,
        features: &FeatureSet,
        ctx: &RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_params("tools/call requires a name"))?;
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        // Content items supplied as arguments are validated under the
        // session's feature set (audio gating and size limits).
        if let Some(items) = arguments.get("content").and_then(Value::as_array) {
            for item in items {
                validate_content_item(item, features)
                    .map_err(|e| JsonRpcError::new(e.code(), e.to_string()))?;
            }
        }

        match self.tools.execute(name, &arguments, ctx) {
            Ok(result) => Ok(Self::wrap_tool_result(&result, features)),
            Err(RegistryError::NotFound { .. }) => {
                Err(invalid_params(format!("Unknown tool: {name}")))
            }
            Err(RegistryError::ExecutionFailed { .. }) => Ok(json!({
                "content": [{
                    "type": "text",
                    "text": format!("Tool execution failed: {name}"),
                }],
                "isError": true,
            })),
            Err(RegistryError::InvalidSchema { .. }) => {
                Err(invalid_params(format!("Unknown tool: {name}")))
            }
        }
    }

    /// Wrap a raw tool result in the MCP result shape. The JSON-encoded
    /// result always travels as a text content item; sessions with
    /// structured outputs additionally get `structuredContent` (and
    /// `resourceLinks`) when the handler opts in via `_meta.structured`.
    fn wrap_tool_result(result: &Value, features: &FeatureSet) -> Value {
        let text = serde_json::to_string(result).unwrap_or_else(|_| "null".to_string());
        let mut wrapped = json!({
            "content": [{"type": "text", "text": text}],
        });

        let structured = result
            .get("_meta")
            .and_then(|meta| meta.get("structured"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if features.structured_outputs && structured {
            let mut content = result.clone();
            if let Some(object) = content.as_object_mut() {
                object.remove("_meta");
            }
            wrapped["structuredContent"] = content;
            if features.resource_links {
                if let Some(links) = result
                    .get("_meta")
                    .and_then(|meta| meta.get("resourceLinks"))
                {
                    wrapped["resourceLinks"] = links.clone();
                }
            }
        }
        wrapped
    }

    fn handle_prompt_get(
        &self,
        params: &Value,
        ctx: &RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_params("prompts/get requires a name"))?;
        match self.prompts.execute(name, params, ctx) {
            Ok(result) => Ok(result),
            Err(RegistryError::NotFound { .. }) => {
                Err(invalid_params(format!("Unknown prompt: {name}")))
            }
            Err(error) => Ok(json!({
                "description": format!("Prompt resolution failed: {name}"),
                "messages": [],
                "_error": error.to_string(),
            })),
        }
    }

    fn handle_resource_read(
        &self,
        params: &Value,
        ctx: &RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let uri = params
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_params("resources/read requires a uri"))?;
        match self.resources.execute(uri, ctx) {
            Ok(result) => Ok(result),
            Err(RegistryError::NotFound { .. }) => {
                Err(invalid_params(format!("Unknown resource: {uri}")))
            }
            Err(_) => Ok(json!({
                "contents": [{
                    "uri": uri,
                    "text": format!("Resource read failed: {uri}"),
                }],
                "isError": true,
            })),
        }
    }

    /// Argument completion. The registries are consulted so unknown targets
    /// fail fast; the completion set itself is empty unless application
    /// handlers take over.
    fn handle_completion(&self, params: &Value) -> Result<Value, JsonRpcError> {
        let reference = params
            .get("ref")
            .ok_or_else(|| invalid_params("completions/complete requires a ref"))?;
        let ref_type = reference.get("type").and_then(Value::as_str).unwrap_or("");
        match ref_type {
            "ref/prompt" => {
                let name = reference
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid_params("ref/prompt requires a name"))?;
                debug!(prompt = name, "completion requested");
            }
            "ref/resource" => {
                let uri = reference
                    .get("uri")
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid_params("ref/resource requires a uri"))?;
                debug!(resource = uri, "completion requested");
            }
            other => {
                return Err(invalid_params(format!("unknown completion ref type: {other}")));
            }
        }
        Ok(json!({
            "completion": {"values": [], "total": 0, "hasMore": false}
        }))
    }

    async fn initiate_client_request(
        &self,
        kind: CorrelationKind,
        method: &str,
        params: &Value,
        session_id: &str,
    ) -> Result<Value, JsonRpcError> {
        let params = Some(params.clone()).filter(|p| !p.is_null());
        let request_id = self
            .broker
            .initiate(session_id, kind, method, params)
            .await
            .map_err(|e| JsonRpcError::new(e.code(), e.to_string()))?;
        Ok(json!({
            "status": "requested",
            "requestId": request_id,
        }))
    }

    fn validate_sampling_content(
        &self,
        params: &Value,
        features: &FeatureSet,
    ) -> Result<(), JsonRpcError> {
        if let Some(messages) = params.get("messages").and_then(Value::as_array) {
            for message in messages {
                if let Some(content) = message.get("content") {
                    if content.is_object() {
                        validate_content_item(content, features)
                            .map_err(|e| JsonRpcError::new(e.code(), e.to_string()))?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn invalid_params(message: impl Into<String>) -> JsonRpcError {
    JsonRpcError::new(crate::error::codes::INVALID_PARAMS, message.into())
}
