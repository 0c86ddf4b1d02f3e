//! Well-Known Discovery Metadata
//!
//! RFC 8414 authorization-server metadata and RFC 9728 protected-resource
//! metadata. Both endpoints are pure functions of the request URI and the
//! configuration; the protected-resource document echoes the resource path
//! appended after the well-known prefix (`/.well-known/
//! oauth-protected-resource/mcp/{contextId}`).

// Layer 2: Third-party crate imports
use axum::extract::State;
use axum::http::{header, HeaderMap, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

// Layer 3: Internal module imports
use crate::oauth::OAuthState;
use crate::protocol::{FeatureSet, ProtocolVersion};

/// Well-known prefix for protected-resource metadata
pub const PROTECTED_RESOURCE_PREFIX: &str = "/.well-known/oauth-protected-resource";

fn newest_features(state: &OAuthState) -> FeatureSet {
    state
        .config
        .supported_versions
        .first()
        .and_then(|v| ProtocolVersion::new(v.as_str()).ok())
        .map(|v| FeatureSet::for_version(&v))
        .unwrap_or_else(|| {
            FeatureSet::for_version(&crate::protocol::VersionNegotiator::with_defaults().newest().clone())
        })
}

/// GET /.well-known/oauth-authorization-server
pub async fn authorization_server_metadata(
    State(state): State<OAuthState>,
    headers: HeaderMap,
) -> Response {
    let base = state
        .config
        .resolve_base_url(headers.get(header::HOST).and_then(|h| h.to_str().ok()));
    let endpoints = &state.config.oauth.auth_server.endpoints;
    let features = newest_features(&state);

    let mut metadata = json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}{}", endpoints.authorize),
        "token_endpoint": format!("{base}{}", endpoints.token),
        "registration_endpoint": format!("{base}{}", endpoints.register),
        "revocation_endpoint": format!("{base}{}", endpoints.revoke),
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "response_types_supported": ["code"],
        "code_challenge_methods_supported": ["S256"],
        "pkce_required": true,
        "token_endpoint_auth_methods_supported": ["client_secret_post", "none"],
        "scopes_supported": state.config.scopes_supported,
    });
    if features.resource_indicators {
        metadata["resource_indicators_supported"] = json!(true);
        metadata["require_resource_parameter"] = json!(true);
    }
    Json(metadata).into_response()
}

/// GET /.well-known/oauth-protected-resource[/...]
pub async fn protected_resource_metadata(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let base = state
        .config
        .resolve_base_url(headers.get(header::HOST).and_then(|h| h.to_str().ok()));
    let resource_path = uri
        .path()
        .strip_prefix(PROTECTED_RESOURCE_PREFIX)
        .unwrap_or("");
    let resource = format!("{base}{resource_path}");
    let features = newest_features(&state);

    Json(json!({
        "resource": resource,
        "authorization_servers": [base],
        "bearer_methods_supported": ["header"],
        "scopes_supported": state.config.scopes_supported,
        "mcp_features_supported": features.advertised_names(),
    }))
    .into_response()
}
