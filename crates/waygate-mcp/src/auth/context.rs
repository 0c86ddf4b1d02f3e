//! Authenticated Request Context
//!
//! The composite the middleware attaches to a request once authentication
//! succeeds. Downstream handlers read it from the request extensions.

// Layer 3: Internal module imports
use crate::protocol::ProtocolVersion;
use crate::storage::{ContextRecord, TokenRecord};

/// Everything the MCP handlers know about the authenticated caller.
#[derive(Debug, Clone)]
pub struct McpContext {
    /// Tenant id from the URL
    pub context_id: String,
    /// Resolved tenant record (synthetic in authless mode)
    pub context_data: Option<ContextRecord>,
    /// Validated token record (absent in authless mode and on initialize)
    pub token_data: Option<TokenRecord>,
    /// Canonical base URL for this request
    pub base_url: String,
    /// Negotiated version, when a session was identified
    pub protocol_version: Option<ProtocolVersion>,
    /// Session id, when one was identified
    pub session_id: Option<String>,
}

impl McpContext {
    /// The RFC 8707 resource URL requests under this tenant bind to
    pub fn resource_url(&self) -> String {
        format!(
            "{}/mcp/{}",
            self.base_url.trim_end_matches('/'),
            self.context_id
        )
    }
}
