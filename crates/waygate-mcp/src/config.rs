//! Server Configuration
//!
//! Hierarchical, serde-backed configuration. Every field has a default so a
//! bare `WaygateConfig::default()` yields a working single-tenant dev
//! server; deployments load a YAML file and override selectively.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::transport::StreamConfig;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaygateConfig {
    /// Supported protocol revisions, newest first
    pub supported_versions: Vec<String>,
    /// Canonical public URL; overrides the request-derived origin
    pub base_url: Option<String>,
    /// Session lifetime in seconds from last touch
    pub session_lifetime: u64,
    /// Seconds between storage cleanup sweeps
    pub cleanup_interval: u64,
    /// Scopes advertised in discovery metadata
    pub scopes_supported: Vec<String>,
    /// Identity reported by `initialize`
    pub server_info: ServerInfoConfig,
    /// Resource-server authentication settings
    pub auth: AuthConfig,
    /// SSE transport (2024-11-05) polling parameters
    pub sse: StreamSettings,
    /// Streamable transport (2025-03-26+) polling parameters
    pub streamable_http: StreamSettings,
    /// Embedded authorization-server settings
    pub oauth: OAuthConfig,
    /// Force both transports into drain-once mode
    pub test_mode: bool,
}

impl Default for WaygateConfig {
    fn default() -> Self {
        Self {
            supported_versions: vec![
                "2025-06-18".to_string(),
                "2025-03-26".to_string(),
                "2024-11-05".to_string(),
            ],
            base_url: None,
            session_lifetime: 3600,
            cleanup_interval: 60,
            scopes_supported: vec!["mcp:read".to_string(), "mcp:write".to_string()],
            server_info: ServerInfoConfig::default(),
            auth: AuthConfig::default(),
            sse: StreamSettings::default(),
            streamable_http: StreamSettings::default(),
            oauth: OAuthConfig::default(),
            test_mode: false,
        }
    }
}

impl WaygateConfig {
    /// Parse a YAML configuration document.
    ///
    /// # Errors
    ///
    /// Returns the underlying parse error for malformed documents.
    pub fn from_yaml(source: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(source)
    }

    /// The canonical base URL: configured value, or derived from a request
    /// `Host` header.
    pub fn resolve_base_url(&self, request_host: Option<&str>) -> String {
        if let Some(base) = &self.base_url {
            return base.trim_end_matches('/').to_string();
        }
        match request_host {
            Some(host) => format!("https://{host}"),
            None => "http://localhost".to_string(),
        }
    }

    /// Stream parameters for the SSE transport, honoring global `test_mode`
    pub fn sse_stream_config(&self) -> StreamConfig {
        self.sse.to_stream_config(self.test_mode)
    }

    /// Stream parameters for the streamable transport
    pub fn streamable_stream_config(&self) -> StreamConfig {
        self.streamable_http.to_stream_config(self.test_mode)
    }
}

/// Identity reported in the initialize response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfoConfig {
    /// Server name
    pub name: String,
    /// Server version
    pub version: String,
}

impl Default for ServerInfoConfig {
    fn default() -> Self {
        Self {
            name: "waygate-mcp".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Resource-server authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Scopes a token must carry to pass the middleware
    pub required_scopes: Vec<String>,
    /// Context types tried in order when resolving the tenant
    pub context_types: Vec<String>,
    /// Bypass authentication entirely and synthesize a public identity
    pub authless: bool,
    /// Context id injected in authless mode
    pub authless_context_id: String,
    /// Context type injected in authless mode
    pub authless_context_type: String,
    /// Context display name injected in authless mode
    pub authless_context_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            required_scopes: vec!["mcp:read".to_string()],
            context_types: vec!["agency".to_string(), "user".to_string()],
            authless: false,
            authless_context_id: "public".to_string(),
            authless_context_type: "agency".to_string(),
            authless_context_name: "Public".to_string(),
        }
    }
}

/// Per-transport polling parameters, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Base tick interval
    pub keepalive_interval: u64,
    /// Idle seconds after which the interval doubles
    pub switch_interval_after: u64,
    /// Ceiling for the doubled interval
    pub max_interval: u64,
    /// Idle seconds after which the connection closes
    pub max_connection_time: u64,
    /// Drain-once mode for this transport only
    pub test_mode: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            keepalive_interval: 1,
            switch_interval_after: 60,
            max_interval: 5,
            max_connection_time: 1800,
            test_mode: false,
        }
    }
}

impl StreamSettings {
    fn to_stream_config(&self, global_test_mode: bool) -> StreamConfig {
        StreamConfig {
            keepalive_interval: Duration::from_secs(self.keepalive_interval),
            switch_interval_after: Duration::from_secs(self.switch_interval_after),
            max_interval: Duration::from_secs(self.max_interval),
            max_connection_time: Duration::from_secs(self.max_connection_time),
            test_mode: self.test_mode || global_test_mode,
        }
    }
}

/// Embedded authorization-server settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Authorization-server endpoint paths
    pub auth_server: AuthServerConfig,
}

/// Endpoint path overrides for the authorization server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthServerConfig {
    /// Endpoint paths, joined onto the base URL in discovery metadata
    pub endpoints: EndpointPaths,
}

impl Default for AuthServerConfig {
    fn default() -> Self {
        Self {
            endpoints: EndpointPaths::default(),
        }
    }
}

/// The authorization-server paths
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointPaths {
    /// Authorization endpoint
    pub authorize: String,
    /// Token endpoint
    pub token: String,
    /// Dynamic client registration endpoint
    pub register: String,
    /// Revocation endpoint
    pub revoke: String,
    /// Consent submission endpoint
    pub consent: String,
}

impl Default for EndpointPaths {
    fn default() -> Self {
        Self {
            authorize: "/oauth/authorize".to_string(),
            token: "/oauth/token".to_string(),
            register: "/oauth/register".to_string(),
            revoke: "/oauth/revoke".to_string(),
            consent: "/oauth/consent".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WaygateConfig::default();
        assert_eq!(config.supported_versions[0], "2025-06-18");
        assert_eq!(config.session_lifetime, 3600);
        assert_eq!(config.auth.required_scopes, vec!["mcp:read"]);
        assert!(!config.auth.authless);
        assert_eq!(config.sse.keepalive_interval, 1);
        assert_eq!(config.oauth.auth_server.endpoints.token, "/oauth/token");
    }

    #[test]
    fn test_yaml_overrides() {
        let yaml = r#"
base_url: "https://mcp.example.com"
session_lifetime: 600
auth:
  authless: true
  authless_context_id: "demo"
streamable_http:
  keepalive_interval: 2
  max_connection_time: 120
"#;
        let config = WaygateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.base_url.as_deref(), Some("https://mcp.example.com"));
        assert_eq!(config.session_lifetime, 600);
        assert!(config.auth.authless);
        assert_eq!(config.auth.authless_context_id, "demo");
        // Unset fields keep their defaults
        assert_eq!(config.auth.context_types, vec!["agency", "user"]);
        assert_eq!(config.streamable_http.keepalive_interval, 2);
        assert_eq!(config.streamable_http.switch_interval_after, 60);
    }

    #[test]
    fn test_base_url_resolution() {
        let mut config = WaygateConfig::default();
        assert_eq!(
            config.resolve_base_url(Some("srv.example.com")),
            "https://srv.example.com"
        );
        config.base_url = Some("https://public.example.com/".to_string());
        assert_eq!(
            config.resolve_base_url(Some("ignored.internal")),
            "https://public.example.com"
        );
    }

    #[test]
    fn test_global_test_mode_propagates() {
        let mut config = WaygateConfig::default();
        config.test_mode = true;
        assert!(config.sse_stream_config().test_mode);
        assert!(config.streamable_stream_config().test_mode);
    }
}
