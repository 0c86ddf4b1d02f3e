//! Waygate MCP - Multi-Tenant Hosted Model Context Protocol Server
//!
//! A hosted MCP server speaking JSON-RPC 2.0 over HTTP to LLM clients, with
//! an embedded OAuth 2.1 authorization server and resource-server
//! middleware in front of every tenant endpoint.
//!
//! # Architecture
//!
//! The crate is organized in layers:
//!
//! - **Protocol Layer** (`protocol`): JSON-RPC 2.0 envelopes, version
//!   negotiation across the 2024-11-05 / 2025-03-26 / 2025-06-18 revisions,
//!   the per-version feature matrix, and content validation
//! - **Storage Layer** (`storage`): the persistence contract (sessions,
//!   message queues, OAuth artifacts, tenant contexts) and its in-memory
//!   implementation
//! - **Dispatch Layer** (`dispatch`): method routing, batch handling,
//!   duplicate-id enforcement, and the queue-then-stream response path
//! - **Transport Layer** (`transport`): the long-lived SSE and streamable
//!   HTTP responses that deliver queued envelopes
//! - **Auth Layers** (`auth`, `oauth`): bearer validation with RFC 8707
//!   resource binding on one side, the authorization-code + PKCE grant
//!   machinery on the other
//! - **Server Layer** (`server`): router assembly and HTTP verb dispatch
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use serde_json::{json, Value};
//! use waygate_mcp::config::WaygateConfig;
//! use waygate_mcp::error::HandlerError;
//! use waygate_mcp::registry::{RequestContext, ToolDefinition};
//! use waygate_mcp::server::McpServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = McpServer::builder(WaygateConfig::default()).build();
//!
//!     server.tools().register(
//!         ToolDefinition {
//!             name: "echo".to_string(),
//!             description: Some("Echo the arguments back".to_string()),
//!             input_schema: json!({"type": "object"}),
//!             annotations: None,
//!         },
//!         Arc::new(|params: &Value, _ctx: &RequestContext| {
//!             Ok::<Value, HandlerError>(params.clone())
//!         }),
//!     )?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     server.serve(listener).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Request Flow
//!
//! `POST /mcp/{contextId}` runs through the bearer middleware (initialize
//! bypasses it), into the dispatcher, and the result lands on the session's
//! message queue — the HTTP answer is `202 {"status":"queued"}`. A
//! concurrent `GET` on the same endpoint holds the streaming response that
//! actually delivers results, ordered FIFO and at most once.

pub mod auth;
pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod oauth;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod storage;
pub mod transport;

// Re-export commonly used types for convenience
pub use auth::McpContext;
pub use config::WaygateConfig;
pub use dispatch::{DispatchOutcome, MessageDispatcher};
pub use error::{HandlerError, ProtocolError, ServerError, StorageError};
pub use protocol::{
    FeatureSet, JsonRpcError, JsonRpcMessage, JsonRpcMessageTrait, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, ProtocolVersion, RequestId, VersionNegotiator,
};
pub use registry::{
    PromptDefinition, PromptRegistry, RequestContext, ResourceDefinition, ResourceRegistry,
    ToolDefinition, ToolRegistry,
};
pub use server::McpServer;
pub use storage::{MemoryStorage, Storage};

/// Crate version as reported by Cargo
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the crate version as a string
pub fn version() -> &'static str {
    VERSION
}
