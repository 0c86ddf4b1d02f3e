//! Handler Registries
//!
//! Named, late-bound plugins for tools, prompts, and resources. All three
//! registries share the same contract:
//!
//! - `register` — last write wins; re-registering a name replaces the
//!   handler but keeps its position in the listing order.
//! - `list` — ordered metadata view, filtered by the features available to
//!   the caller's protocol version.
//! - `execute` — invokes the handler; unknown names and handler failures
//!   become typed errors that the dispatcher turns into response objects,
//!   never into a broken dispatch.
//!
//! Handlers are synchronous functions of `(params, context)`. The context
//! carries everything a multi-tenant handler may need: tenant record, token
//! record, session id, protocol version, and the server base URL.

// Layer 2: Third-party crate imports
use serde_json::Value;

// Layer 3: Internal module imports
use crate::error::HandlerError;
use crate::protocol::ProtocolVersion;
use crate::storage::{ContextRecord, TokenRecord};

pub mod prompt;
pub mod resource;
pub mod tool;

pub use prompt::{PromptArgument, PromptDefinition, PromptRegistry};
pub use resource::{ResourceDefinition, ResourceRegistry};
pub use tool::{ToolDefinition, ToolRegistry};

/// Everything a handler gets to know about the request it serves.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Tenant id from the URL
    pub context_id: String,
    /// Session id, absent only during `initialize`
    pub session_id: Option<String>,
    /// Negotiated protocol version of the session
    pub protocol_version: ProtocolVersion,
    /// Canonical public base URL of this server
    pub base_url: String,
    /// Resolved tenant record (absent in authless mode before resolution)
    pub context_data: Option<ContextRecord>,
    /// Validated token record (absent in authless mode)
    pub token_data: Option<TokenRecord>,
}

impl RequestContext {
    /// The resource URL requests under this tenant are bound to
    pub fn resource_url(&self) -> String {
        format!("{}/mcp/{}", self.base_url.trim_end_matches('/'), self.context_id)
    }
}

/// A synchronous handler invoked by a registry.
///
/// Implemented for any `Fn(&Value, &RequestContext) -> Result<Value,
/// HandlerError> + Send + Sync` closure.
pub trait Handler: Send + Sync {
    /// Run the handler
    fn call(&self, params: &Value, context: &RequestContext) -> Result<Value, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&Value, &RequestContext) -> Result<Value, HandlerError> + Send + Sync,
{
    fn call(&self, params: &Value, context: &RequestContext) -> Result<Value, HandlerError> {
        self(params, context)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A context good enough for registry unit tests
    pub fn test_context(version: &str) -> RequestContext {
        RequestContext {
            context_id: "550e8400-e29b-41d4-a716-446655440000".to_string(),
            session_id: Some(format!("{version}_00000000000000000000000000000000")),
            protocol_version: ProtocolVersion::new(version).unwrap(),
            base_url: "https://srv".to_string(),
            context_data: None,
            token_data: None,
        }
    }
}
