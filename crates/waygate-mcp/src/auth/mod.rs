//! Resource-Server Authentication
//!
//! Bearer extraction, tenant-context resolution, token validation, and the
//! version-dependent resource-binding checks that run in front of every MCP
//! route. Failures answer with the discovery 401 envelope, which doubles as
//! the next step for a well-behaved client: it names the authorization
//! endpoints to go get a token from.

// Layer 2: Third-party crate imports
use serde_json::json;

// Layer 3: Internal module imports
use crate::config::WaygateConfig;
use crate::error::{codes, ServerError};

pub mod context;
pub mod middleware;

pub use context::McpContext;
pub use middleware::{AuthLayer, AuthState};

/// RFC 9728 §3.1: the protected-resource metadata URL is formed by
/// inserting the well-known path between host and resource path.
pub fn resource_metadata_url(base_url: &str, context_id: &str) -> String {
    format!(
        "{}/.well-known/oauth-protected-resource/mcp/{context_id}",
        base_url.trim_end_matches('/')
    )
}

/// Build the discovery 401: HTTP 401, `-32000`, OAuth endpoints under
/// `error.data.oauth`, and the RFC 9728 §5.1 `WWW-Authenticate` header.
pub fn discovery_unauthorized(
    config: &WaygateConfig,
    base_url: &str,
    context_id: &str,
    message: impl Into<String>,
) -> ServerError {
    let base = base_url.trim_end_matches('/');
    let endpoints = &config.oauth.auth_server.endpoints;
    let resource = format!("{base}/mcp/{context_id}");
    let metadata_url = resource_metadata_url(base, context_id);

    ServerError::Auth {
        code: codes::AUTH_REQUIRED,
        message: message.into(),
        data: Some(json!({
            "oauth": {
                "authorization_endpoint": format!("{base}{}", endpoints.authorize),
                "token_endpoint": format!("{base}{}", endpoints.token),
                "registration_endpoint": format!("{base}{}", endpoints.register),
                "resource": resource,
                "resource_metadata_endpoint": metadata_url,
                "authorization_server_metadata_endpoint":
                    format!("{base}/.well-known/oauth-authorization-server"),
            }
        })),
        www_authenticate: Some(format!(
            r#"Bearer realm="MCP Server", resource_metadata="{metadata_url}""#
        )),
    }
}
