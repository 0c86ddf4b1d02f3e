//! User-Agent Session Store
//!
//! The authorization-code flow spans a redirect roundtrip: the in-flight
//! request parameters captured at `/authorize` must survive until the
//! consent POST comes back. That state lives here, keyed by a cookie, in an
//! explicit store passed into the OAuth server — never a process-global and
//! never the HTTP framework's session primitive.
//!
//! The host's login flow (or a social callback) marks a user-agent session
//! authenticated; the consent endpoint refuses to act without that.

// Layer 2: Third-party crate imports
use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// Cookie carrying the user-agent session id
pub const UA_COOKIE: &str = "waygate_ua";

/// User-agent sessions idle longer than this are swept
const UA_SESSION_TTL_SECS: i64 = 1800;

/// The original query parameters of an in-flight authorization
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAuthorization {
    /// Requesting client
    pub client_id: String,
    /// Validated redirect URI (exact match against the client's set)
    pub redirect_uri: String,
    /// Opaque client state echoed on the redirect
    pub state: Option<String>,
    /// Requested scope
    pub scope: Option<String>,
    /// PKCE challenge
    pub code_challenge: String,
    /// Always `S256`
    pub code_challenge_method: String,
    /// RFC 8707 resource indicator
    pub resource: Option<String>,
}

/// One user-agent session
#[derive(Debug, Clone)]
pub struct UaSession {
    /// Authenticated user, set by the host login flow or a social callback
    pub user_id: Option<String>,
    /// Tenant the user belongs to, if the login flow knows it
    pub tenant_id: Option<String>,
    /// In-flight authorization, destroyed on consent completion
    pub pending: Option<PendingAuthorization>,
    /// Last-touch instant
    pub touched_at: DateTime<Utc>,
}

/// Cookie-keyed store of user-agent sessions.
pub struct UserAgentSessionStore {
    sessions: DashMap<String, UaSession>,
}

impl UserAgentSessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Allocate a fresh session and return its id
    pub fn create(&self) -> String {
        let id = Uuid::new_v4().simple().to_string();
        self.sessions.insert(
            id.clone(),
            UaSession {
                user_id: None,
                tenant_id: None,
                pending: None,
                touched_at: Utc::now(),
            },
        );
        id
    }

    /// Fetch a session by id
    pub fn get(&self, id: &str) -> Option<UaSession> {
        self.sessions.get(id).map(|entry| {
            let session = entry.value().clone();
            drop(entry);
            if let Some(mut entry) = self.sessions.get_mut(id) {
                entry.touched_at = Utc::now();
            }
            session
        })
    }

    /// Store the in-flight authorization parameters
    pub fn begin_authorization(&self, id: &str, pending: PendingAuthorization) -> bool {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.pending = Some(pending);
            session.touched_at = Utc::now();
            true
        } else {
            false
        }
    }

    /// Mark a session authenticated. The host login flow and social
    /// callbacks are the only callers.
    pub fn authenticate(&self, id: &str, user_id: &str, tenant_id: Option<&str>) -> bool {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.user_id = Some(user_id.to_string());
            session.tenant_id = tenant_id.map(str::to_string);
            session.touched_at = Utc::now();
            true
        } else {
            false
        }
    }

    /// Remove and return the in-flight authorization (consent completion)
    pub fn take_pending(&self, id: &str) -> Option<PendingAuthorization> {
        self.sessions
            .get_mut(id)
            .and_then(|mut session| session.pending.take())
    }

    /// Drop sessions idle past the TTL; returns how many were removed
    pub fn sweep(&self) -> usize {
        let cutoff = Utc::now() - Duration::seconds(UA_SESSION_TTL_SECS);
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.touched_at > cutoff);
        before - self.sessions.len()
    }

    /// Read the session id from a request's `Cookie` header
    pub fn session_id_from_cookies(headers: &HeaderMap) -> Option<String> {
        let cookies = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
        cookies.split(';').find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == UA_COOKIE).then(|| value.to_string())
        })
    }

    /// The `Set-Cookie` value binding a user agent to its session
    pub fn set_cookie_value(id: &str) -> String {
        format!("{UA_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax")
    }
}

impl Default for UserAgentSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> PendingAuthorization {
        PendingAuthorization {
            client_id: "client-1".to_string(),
            redirect_uri: "https://app/cb".to_string(),
            state: Some("xyz".to_string()),
            scope: Some("mcp:read".to_string()),
            code_challenge: "challenge".to_string(),
            code_challenge_method: "S256".to_string(),
            resource: None,
        }
    }

    #[test]
    fn test_lifecycle() {
        let store = UserAgentSessionStore::new();
        let id = store.create();
        assert!(store.get(&id).is_some());

        assert!(store.begin_authorization(&id, pending()));
        assert!(store.authenticate(&id, "user-1", Some("tenant-a")));

        let session = store.get(&id).unwrap();
        assert_eq!(session.user_id.as_deref(), Some("user-1"));
        assert_eq!(session.pending.as_ref().unwrap().state.as_deref(), Some("xyz"));

        // Pending state is single-take
        assert_eq!(store.take_pending(&id), Some(pending()));
        assert!(store.take_pending(&id).is_none());
        // The session itself survives for later flows
        assert!(store.get(&id).is_some());
    }

    #[test]
    fn test_unknown_session() {
        let store = UserAgentSessionStore::new();
        assert!(!store.begin_authorization("nope", pending()));
        assert!(!store.authenticate("nope", "u", None));
        assert!(store.take_pending("nope").is_none());
    }

    #[test]
    fn test_cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            "other=1; waygate_ua=abc123; theme=dark".parse().unwrap(),
        );
        assert_eq!(
            UserAgentSessionStore::session_id_from_cookies(&headers).as_deref(),
            Some("abc123")
        );
        assert!(UserAgentSessionStore::session_id_from_cookies(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_set_cookie_attributes() {
        let value = UserAgentSessionStore::set_cookie_value("abc");
        assert!(value.starts_with("waygate_ua=abc"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("SameSite=Lax"));
    }
}
