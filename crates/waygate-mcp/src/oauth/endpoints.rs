//! Authorization-Server Endpoints
//!
//! `/authorize`, `/consent`, `/token`, `/revoke`, `/register`, and the
//! social callback. The flow is plain OAuth 2.1: authorization-code with
//! mandatory S256 PKCE, exact redirect-URI matching, refresh-token
//! rotation, and RFC 8707 resource indicators on 2025-06-18 deployments.
//!
//! Every validation failure answers with the RFC 6749 §5.2 envelope; the
//! only redirects carrying `error` back to the client are consent denials,
//! where the redirect URI has already been validated.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use axum::extract::{Path, Query, RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::{Form, Json};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

// Layer 3: Internal module imports
use crate::config::WaygateConfig;
use crate::oauth::error::OAuthError;
use crate::oauth::pkce::{constant_time_eq, verify_s256, CHALLENGE_METHOD_S256};
use crate::oauth::session::{PendingAuthorization, UserAgentSessionStore};
use crate::oauth::social::SocialProvider;
use crate::protocol::{FeatureSet, ProtocolVersion};
use crate::storage::{AuthorizationCodeRecord, ClientRecord, Storage, TokenRecord};

/// Out-of-band redirect URI: the code is shown to the user instead of
/// redirected.
pub const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

/// Authorization codes live this long
const CODE_TTL_SECS: i64 = 600;

/// Shared state for the OAuth endpoints
#[derive(Clone)]
pub struct OAuthState {
    /// Server configuration
    pub config: Arc<WaygateConfig>,
    /// Storage backend
    pub storage: Arc<dyn Storage>,
    /// Consent-roundtrip session store
    pub ua_sessions: Arc<UserAgentSessionStore>,
    /// Registered social providers by callback name
    pub providers: Arc<HashMap<&'static str, Arc<dyn SocialProvider>>>,
}

impl OAuthState {
    /// Whether this deployment requires the RFC 8707 `resource` parameter
    fn resource_required(&self) -> bool {
        self.config
            .supported_versions
            .first()
            .and_then(|v| ProtocolVersion::new(v.as_str()).ok())
            .map(|v| FeatureSet::for_version(&v).resource_indicators)
            .unwrap_or(false)
    }
}

/// GET /oauth/authorize
pub async fn authorize(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Response, OAuthError> {
    let query = query.unwrap_or_default();
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(&query)
        .map_err(|_| OAuthError::InvalidRequest("malformed query string".to_string()))?;

    // A repeated resource parameter is the JSON-array smuggling shape;
    // reject before any map collapses the duplicates.
    let resource_count = pairs.iter().filter(|(k, _)| k == "resource").count();
    if resource_count > 1 {
        return Err(OAuthError::InvalidRequest(
            "resource parameter must not repeat".to_string(),
        ));
    }
    let params: HashMap<String, String> = pairs.into_iter().collect();

    let client_id = params
        .get("client_id")
        .ok_or_else(|| OAuthError::InvalidRequest("client_id is required".to_string()))?;
    let client = state
        .storage
        .get_oauth_client(client_id)
        .await?
        .ok_or_else(|| OAuthError::UnauthorizedClient(format!("unknown client: {client_id}")))?;

    // Exact redirect-URI match: no substring, subdomain, fragment, or
    // extra-query tolerance.
    let redirect_uri = params
        .get("redirect_uri")
        .ok_or_else(|| OAuthError::InvalidRequest("redirect_uri is required".to_string()))?;
    if !client.redirect_uris.iter().any(|uri| uri == redirect_uri) {
        return Err(OAuthError::InvalidRequest(
            "redirect_uri is not registered for this client".to_string(),
        ));
    }

    match params.get("response_type").map(String::as_str) {
        Some("code") => {}
        Some(other) => {
            return Err(OAuthError::UnsupportedResponseType(format!(
                "response_type {other} is not supported"
            )))
        }
        None => {
            return Err(OAuthError::InvalidRequest(
                "response_type is required".to_string(),
            ))
        }
    }

    // PKCE is mandatory, S256 only
    let code_challenge = params
        .get("code_challenge")
        .filter(|c| !c.is_empty())
        .ok_or_else(|| OAuthError::InvalidRequest("code_challenge is required".to_string()))?;
    match params.get("code_challenge_method").map(String::as_str) {
        Some(CHALLENGE_METHOD_S256) => {}
        _ => {
            return Err(OAuthError::InvalidRequest(
                "code_challenge_method must be S256".to_string(),
            ))
        }
    }

    let base_url = state
        .config
        .resolve_base_url(headers.get(header::HOST).and_then(|h| h.to_str().ok()));
    let resource = params.get("resource").cloned();
    if state.resource_required() && resource.is_none() {
        return Err(OAuthError::InvalidRequest(
            "resource parameter is required".to_string(),
        ));
    }
    if let Some(resource) = &resource {
        validate_resource_indicator(resource, &base_url)?;
    }

    // Persist the in-flight request under the user-agent session
    let ua_id = UserAgentSessionStore::session_id_from_cookies(&headers)
        .filter(|id| state.ua_sessions.get(id).is_some())
        .unwrap_or_else(|| state.ua_sessions.create());
    state.ua_sessions.begin_authorization(
        &ua_id,
        PendingAuthorization {
            client_id: client.client_id.clone(),
            redirect_uri: redirect_uri.clone(),
            state: params.get("state").cloned(),
            scope: params.get("scope").cloned(),
            code_challenge: code_challenge.clone(),
            code_challenge_method: CHALLENGE_METHOD_S256.to_string(),
            resource,
        },
    );

    debug!(client_id = %client.client_id, "authorization request accepted; rendering consent");
    let page = render_consent_page(
        &client.client_name,
        params.get("scope").map(String::as_str),
        &state.config.oauth.auth_server.endpoints.consent,
    );
    Ok((
        [(header::SET_COOKIE, UserAgentSessionStore::set_cookie_value(&ua_id))],
        Html(page),
    )
        .into_response())
}

/// The resource indicator must be a syntactically valid absolute URL
/// targeting this server's authority, and never a JSON array.
fn validate_resource_indicator(resource: &str, base_url: &str) -> Result<(), OAuthError> {
    if resource.trim_start().starts_with('[') {
        return Err(OAuthError::InvalidRequest(
            "resource must be a single URL, not an array".to_string(),
        ));
    }
    let url = Url::parse(resource)
        .map_err(|_| OAuthError::InvalidRequest("resource must be an absolute URL".to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(OAuthError::InvalidRequest(
            "resource must be an http(s) URL".to_string(),
        ));
    }
    let base = Url::parse(base_url)
        .map_err(|_| OAuthError::ServerError("base URL misconfigured".to_string()))?;
    let same_authority = url.host_str() == base.host_str()
        && url.port_or_known_default() == base.port_or_known_default();
    if !same_authority {
        return Err(OAuthError::InvalidRequest(format!(
            "resource must target this server, got {resource}"
        )));
    }
    Ok(())
}

/// Form body of the consent POST
#[derive(Debug, Deserialize)]
pub struct ConsentForm {
    /// `allow` or `deny`
    pub action: String,
}

/// POST /oauth/consent
pub async fn consent(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    Form(form): Form<ConsentForm>,
) -> Result<Response, OAuthError> {
    let ua_id = UserAgentSessionStore::session_id_from_cookies(&headers)
        .ok_or_else(|| OAuthError::InvalidRequest("no user-agent session".to_string()))?;
    let session = state
        .ua_sessions
        .get(&ua_id)
        .ok_or_else(|| OAuthError::InvalidRequest("unknown user-agent session".to_string()))?;
    let user_id = session
        .user_id
        .clone()
        .ok_or_else(|| OAuthError::AccessDenied("user is not authenticated".to_string()))?;
    let pending = state
        .ua_sessions
        .take_pending(&ua_id)
        .ok_or_else(|| OAuthError::InvalidRequest("no authorization in progress".to_string()))?;

    if form.action != "allow" {
        info!(client_id = %pending.client_id, "consent denied");
        return Ok(error_redirect(
            &pending.redirect_uri,
            "access_denied",
            pending.state.as_deref(),
        ));
    }

    let code = Uuid::new_v4().simple().to_string();
    state
        .storage
        .store_authorization_code(AuthorizationCodeRecord {
            code: code.clone(),
            client_id: pending.client_id.clone(),
            redirect_uri: pending.redirect_uri.clone(),
            scope: pending.scope.clone(),
            code_challenge: pending.code_challenge.clone(),
            code_challenge_method: pending.code_challenge_method.clone(),
            resource: pending.resource.clone(),
            user_id,
            tenant_id: session.tenant_id.clone(),
            expires_at: Utc::now() + Duration::seconds(CODE_TTL_SECS),
            consumed: false,
        })
        .await?;
    info!(client_id = %pending.client_id, "consent granted; code issued");

    if pending.redirect_uri == OOB_REDIRECT_URI {
        return Ok(Html(render_oob_page(&code)).into_response());
    }

    let mut params = vec![("code", code.as_str())];
    if let Some(client_state) = pending.state.as_deref() {
        params.push(("state", client_state));
    }
    Ok(redirect_with(&pending.redirect_uri, &params))
}

/// Form body of the token POST
#[derive(Debug, Deserialize)]
pub struct TokenForm {
    /// `authorization_code` or `refresh_token`
    pub grant_type: Option<String>,
    /// The authorization code
    pub code: Option<String>,
    /// Must repeat the redirect URI bound to the code
    pub redirect_uri: Option<String>,
    /// Requesting client
    pub client_id: Option<String>,
    /// Client secret for confidential clients
    pub client_secret: Option<String>,
    /// PKCE verifier
    pub code_verifier: Option<String>,
    /// The refresh token to rotate
    pub refresh_token: Option<String>,
    /// RFC 8707 resource indicator (informational on exchange)
    pub resource: Option<String>,
}

/// POST /oauth/token
pub async fn token(
    State(state): State<OAuthState>,
    Form(form): Form<TokenForm>,
) -> Result<Response, OAuthError> {
    match form.grant_type.as_deref() {
        Some("authorization_code") => exchange_authorization_code(&state, &form).await,
        Some("refresh_token") => exchange_refresh_token(&state, &form).await,
        Some(other) => Err(OAuthError::UnsupportedGrantType(format!(
            "grant_type {other} is not supported"
        ))),
        None => Err(OAuthError::InvalidRequest("grant_type is required".to_string())),
    }
}

async fn exchange_authorization_code(
    state: &OAuthState,
    form: &TokenForm,
) -> Result<Response, OAuthError> {
    let client_id = form
        .client_id
        .as_deref()
        .ok_or_else(|| OAuthError::InvalidRequest("client_id is required".to_string()))?;
    let client = state
        .storage
        .get_oauth_client(client_id)
        .await?
        .ok_or_else(|| OAuthError::InvalidClient("unknown client".to_string()))?;
    authenticate_client(&client, form.client_secret.as_deref())?;

    let code = form
        .code
        .as_deref()
        .ok_or_else(|| OAuthError::InvalidRequest("code is required".to_string()))?;
    let code_verifier = form
        .code_verifier
        .as_deref()
        .ok_or_else(|| OAuthError::InvalidRequest("code_verifier is required".to_string()))?;
    let redirect_uri = form
        .redirect_uri
        .as_deref()
        .ok_or_else(|| OAuthError::InvalidRequest("redirect_uri is required".to_string()))?;

    // Single use is enforced in storage; consumed, expired, and unknown
    // codes are indistinguishable to the caller.
    let record = state
        .storage
        .consume_authorization_code(code)
        .await?
        .ok_or_else(|| invalid_code())?;
    if record.expires_at <= Utc::now() {
        return Err(invalid_code());
    }
    if record.client_id != client_id || record.redirect_uri != redirect_uri {
        return Err(invalid_code());
    }
    if !verify_s256(code_verifier, &record.code_challenge) {
        warn!(client_id, "PKCE verification failed");
        return Err(OAuthError::InvalidGrant(
            "PKCE verification failed".to_string(),
        ));
    }

    let token_record = issue_token_pair(
        state,
        client_id,
        record.scope.clone(),
        Some(record.user_id.clone()),
        record.tenant_id.clone(),
        record.resource.clone(),
    );
    state.storage.store_access_token(token_record.clone()).await?;
    info!(client_id, "authorization code exchanged");
    Ok(token_response(&token_record))
}

async fn exchange_refresh_token(
    state: &OAuthState,
    form: &TokenForm,
) -> Result<Response, OAuthError> {
    let refresh_token = form
        .refresh_token
        .as_deref()
        .ok_or_else(|| OAuthError::InvalidRequest("refresh_token is required".to_string()))?;

    let old = state
        .storage
        .find_by_refresh_token(refresh_token)
        .await?
        .ok_or_else(|| {
            OAuthError::InvalidGrant("refresh token is invalid or rotated".to_string())
        })?;
    if let Some(client_id) = form.client_id.as_deref() {
        if client_id != old.client_id {
            return Err(OAuthError::InvalidGrant(
                "refresh token was issued to another client".to_string(),
            ));
        }
    }
    if let Some(client) = state.storage.get_oauth_client(&old.client_id).await? {
        authenticate_client(&client, form.client_secret.as_deref())?;
    }

    let new_record = issue_token_pair(
        state,
        &old.client_id,
        old.scope.clone(),
        old.user_id.clone(),
        old.tenant_id.clone(),
        old.resource.clone(),
    );
    // Rotation is atomic in storage: a replayed refresh token loses the
    // race and gets invalid_grant.
    let rotated = state
        .storage
        .rotate_refresh_token(refresh_token, new_record.clone())
        .await?;
    if rotated.is_none() {
        return Err(OAuthError::InvalidGrant(
            "refresh token is invalid or rotated".to_string(),
        ));
    }
    info!(client_id = %old.client_id, "refresh token rotated");
    Ok(token_response(&new_record))
}

fn invalid_code() -> OAuthError {
    OAuthError::InvalidGrant("authorization code is invalid, expired, or consumed".to_string())
}

fn authenticate_client(
    client: &ClientRecord,
    presented_secret: Option<&str>,
) -> Result<(), OAuthError> {
    let Some(expected) = client.client_secret.as_deref() else {
        // Public client: nothing to check
        return Ok(());
    };
    let presented = presented_secret
        .ok_or_else(|| OAuthError::InvalidClient("client_secret is required".to_string()))?;
    if !constant_time_eq(expected.as_bytes(), presented.as_bytes()) {
        return Err(OAuthError::InvalidClient("client authentication failed".to_string()));
    }
    Ok(())
}

fn issue_token_pair(
    state: &OAuthState,
    client_id: &str,
    scope: Option<String>,
    user_id: Option<String>,
    tenant_id: Option<String>,
    resource: Option<String>,
) -> TokenRecord {
    TokenRecord {
        access_token: Uuid::new_v4().simple().to_string(),
        refresh_token: Some(Uuid::new_v4().simple().to_string()),
        client_id: client_id.to_string(),
        scope,
        expires_at: Utc::now() + Duration::seconds(state.config.session_lifetime as i64),
        revoked: false,
        user_id,
        tenant_id,
        resource: resource.clone(),
        aud: resource.into_iter().collect(),
    }
}

fn token_response(record: &TokenRecord) -> Response {
    let expires_in = (record.expires_at - Utc::now()).num_seconds().max(0);
    let mut body = json!({
        "access_token": record.access_token,
        "token_type": "Bearer",
        "expires_in": expires_in,
    });
    if let Some(refresh) = &record.refresh_token {
        body["refresh_token"] = json!(refresh);
    }
    if let Some(scope) = &record.scope {
        body["scope"] = json!(scope);
    }
    (StatusCode::OK, Json(body)).into_response()
}

/// Form body of the revocation POST
#[derive(Debug, Deserialize)]
pub struct RevokeForm {
    /// Access or refresh token to revoke
    pub token: Option<String>,
}

/// POST /oauth/revoke — always 200, even for unknown tokens (RFC 7009 §2.2)
pub async fn revoke(
    State(state): State<OAuthState>,
    Form(form): Form<RevokeForm>,
) -> Result<Response, OAuthError> {
    if let Some(token) = form.token.as_deref() {
        let found = state.storage.revoke_token(token).await?;
        debug!(found, "revocation processed");
    }
    Ok((StatusCode::OK, Json(json!({}))).into_response())
}

/// POST /oauth/register — RFC 7591 dynamic client registration
pub async fn register(
    State(state): State<OAuthState>,
    Json(body): Json<Value>,
) -> Result<Response, OAuthError> {
    let redirect_uris: Vec<String> = body
        .get("redirect_uris")
        .and_then(Value::as_array)
        .map(|uris| {
            uris.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if redirect_uris.is_empty() {
        return Err(OAuthError::InvalidRequest(
            "redirect_uris is required and must not be empty".to_string(),
        ));
    }

    let client_name = body
        .get("client_name")
        .and_then(Value::as_str)
        .unwrap_or("Unnamed client")
        .to_string();
    let public = body
        .get("token_endpoint_auth_method")
        .and_then(Value::as_str)
        == Some("none");
    let grant_types = string_list(
        &body,
        "grant_types",
        &["authorization_code", "refresh_token"],
    );
    let response_types = string_list(&body, "response_types", &["code"]);

    let client = ClientRecord {
        client_id: Uuid::new_v4().simple().to_string(),
        client_secret: (!public).then(|| Uuid::new_v4().simple().to_string()),
        client_name,
        redirect_uris,
        grant_types,
        response_types,
    };
    state.storage.store_oauth_client(client.clone()).await?;
    info!(client_id = %client.client_id, public, "client registered");

    let mut registration = json!({
        "client_id": client.client_id,
        "client_name": client.client_name,
        "redirect_uris": client.redirect_uris,
        "grant_types": client.grant_types,
        "response_types": client.response_types,
        "token_endpoint_auth_method": if public { "none" } else { "client_secret_post" },
    });
    if let Some(secret) = &client.client_secret {
        registration["client_secret"] = json!(secret);
    }
    Ok((StatusCode::CREATED, Json(registration)).into_response())
}

fn string_list(body: &Value, key: &str, default: &[&str]) -> Vec<String> {
    body.get(key)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .filter(|list: &Vec<String>| !list.is_empty())
        .unwrap_or_else(|| default.iter().map(|s| (*s).to_string()).collect())
}

/// Query of a social callback
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    /// Provider authorization code
    pub code: Option<String>,
}

/// GET /oauth/{provider}/callback
pub async fn social_callback(
    State(state): State<OAuthState>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
) -> Result<Response, OAuthError> {
    let provider = state
        .providers
        .get(provider.as_str())
        .cloned()
        .ok_or_else(|| {
            OAuthError::InvalidRequest(format!("unknown identity provider: {provider}"))
        })?;
    let code = query
        .code
        .as_deref()
        .ok_or_else(|| OAuthError::InvalidRequest("code is required".to_string()))?;

    let profile = provider.exchange_code(code).await?;
    let user_id = provider.resolve_user(&profile);

    let ua_id = UserAgentSessionStore::session_id_from_cookies(&headers)
        .filter(|id| state.ua_sessions.get(id).is_some())
        .unwrap_or_else(|| state.ua_sessions.create());
    state.ua_sessions.authenticate(&ua_id, &user_id, None);
    info!(provider = provider.name(), "social sign-in completed");

    // Resume the consent step when an authorization is in flight
    let page = match state.ua_sessions.get(&ua_id).and_then(|s| s.pending) {
        Some(pending) => {
            let client_name = state
                .storage
                .get_oauth_client(&pending.client_id)
                .await?
                .map(|c| c.client_name)
                .unwrap_or_else(|| pending.client_id.clone());
            render_consent_page(
                &client_name,
                pending.scope.as_deref(),
                &state.config.oauth.auth_server.endpoints.consent,
            )
        }
        None => "<!doctype html><html><body><p>Signed in. You can close this window.</p></body></html>"
            .to_string(),
    };
    Ok((
        [(header::SET_COOKIE, UserAgentSessionStore::set_cookie_value(&ua_id))],
        Html(page),
    )
        .into_response())
}

fn redirect_with(redirect_uri: &str, params: &[(&str, &str)]) -> Response {
    let mut target = String::from(redirect_uri);
    let mut separator = if redirect_uri.contains('?') { '&' } else { '?' };
    for (name, value) in params {
        target.push(separator);
        target.push_str(name);
        target.push('=');
        target.push_str(&urlencoding::encode(value));
        separator = '&';
    }
    (
        StatusCode::FOUND,
        [(header::LOCATION, target)],
    )
        .into_response()
}

fn error_redirect(redirect_uri: &str, error: &str, client_state: Option<&str>) -> Response {
    let mut params = vec![("error", error)];
    if let Some(client_state) = client_state {
        params.push(("state", client_state));
    }
    if redirect_uri == OOB_REDIRECT_URI {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": error})),
        )
            .into_response();
    }
    redirect_with(redirect_uri, &params)
}

fn render_consent_page(client_name: &str, scope: Option<&str>, consent_path: &str) -> String {
    let scope_line = match scope {
        Some(scope) => format!("<p>Requested scope: <code>{}</code></p>", html_escape(scope)),
        None => String::new(),
    };
    format!(
        "<!doctype html>\n<html>\n<head><title>Authorize access</title></head>\n<body>\n\
         <h1>Authorize {client}</h1>\n\
         <p><strong>{client}</strong> is requesting access to your account.</p>\n\
         {scope_line}\n\
         <form method=\"post\" action=\"{action}\">\n\
         <button type=\"submit\" name=\"action\" value=\"allow\">Allow</button>\n\
         <button type=\"submit\" name=\"action\" value=\"deny\">Deny</button>\n\
         </form>\n</body>\n</html>\n",
        client = html_escape(client_name),
        scope_line = scope_line,
        action = consent_path,
    )
}

fn render_oob_page(code: &str) -> String {
    format!(
        "<!doctype html>\n<html>\n<head><title>Authorization code</title></head>\n<body>\n\
         <h1>Authorization complete</h1>\n\
         <p>Copy this code into the application:</p>\n\
         <p><code>{}</code></p>\n</body>\n</html>\n",
        html_escape(code)
    )
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_indicator_validation() {
        let base = "https://srv.example.com";
        assert!(validate_resource_indicator("https://srv.example.com/mcp/t", base).is_ok());
        // Other authority
        assert!(validate_resource_indicator("https://evil.example.com/mcp/t", base).is_err());
        // Relative
        assert!(validate_resource_indicator("/mcp/t", base).is_err());
        // Array smuggling
        assert!(validate_resource_indicator(r#"["https://srv.example.com/mcp/t"]"#, base).is_err());
        // Non-http scheme
        assert!(validate_resource_indicator("ftp://srv.example.com/x", base).is_err());
        // Port must match the known default
        assert!(validate_resource_indicator("https://srv.example.com:8443/mcp/t", base).is_err());
        assert!(validate_resource_indicator("https://srv.example.com:443/mcp/t", base).is_ok());
    }

    #[test]
    fn test_redirect_assembly() {
        let response = redirect_with("https://app/cb", &[("code", "a b"), ("state", "x&y")]);
        let location = response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(location, "https://app/cb?code=a%20b&state=x%26y");

        let response = redirect_with("https://app/cb?k=1", &[("code", "c")]);
        let location = response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(location, "https://app/cb?k=1&code=c");
    }

    #[test]
    fn test_client_authentication() {
        let confidential = ClientRecord {
            client_id: "c".to_string(),
            client_secret: Some("s3cret".to_string()),
            client_name: "C".to_string(),
            redirect_uris: vec![],
            grant_types: vec![],
            response_types: vec![],
        };
        assert!(authenticate_client(&confidential, Some("s3cret")).is_ok());
        assert!(authenticate_client(&confidential, Some("wrong")).is_err());
        assert!(authenticate_client(&confidential, None).is_err());

        let public = ClientRecord {
            client_secret: None,
            ..confidential
        };
        assert!(authenticate_client(&public, None).is_ok());
    }

    #[test]
    fn test_consent_page_escapes_html() {
        let page = render_consent_page("<script>alert(1)</script>", None, "/oauth/consent");
        assert!(!page.contains("<script>alert"));
        assert!(page.contains("&lt;script&gt;"));
        assert!(page.contains(r#"action="/oauth/consent""#));
        assert!(page.contains(r#"value="allow""#));
        assert!(page.contains(r#"value="deny""#));
    }

    #[test]
    fn test_string_list_defaults() {
        let body = json!({});
        assert_eq!(
            string_list(&body, "grant_types", &["authorization_code"]),
            vec!["authorization_code"]
        );
        let body = json!({"grant_types": ["refresh_token"]});
        assert_eq!(string_list(&body, "grant_types", &["x"]), vec!["refresh_token"]);
    }
}
