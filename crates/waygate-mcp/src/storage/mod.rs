//! Storage Contract
//!
//! The persistence boundary of the server. Every persisted entity (sessions,
//! queued messages, tenant contexts, OAuth clients, authorization codes,
//! tokens, client-response correlations) is owned by an implementation of
//! [`Storage`]; the core holds no durable state of its own.
//!
//! The contract is idempotent-on-error: lookups return `Ok(None)` rather
//! than failing for "not found", and mutations report whether they changed
//! anything. `StorageError` is reserved for genuine backend failures, which
//! the boundary translates to `-32603`.

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// Layer 3: Internal module imports
use crate::error::StorageResult;
use crate::protocol::ProtocolVersion;

pub mod memory;

pub use memory::{MemoryStorage, StorageStatsSnapshot};

/// A protocol session, created by `initialize` and touched on every request.
///
/// Invariant: the id prefix before the first `_` equals `protocol_version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session id of the form `<protocol_version>_<32 hex chars>`
    pub session_id: String,
    /// The negotiated protocol revision, authoritative for this session
    pub protocol_version: ProtocolVersion,
    /// Tenant the session is scoped to
    pub context_id: Option<String>,
    /// Authenticated user, when known
    pub user_id: Option<String>,
    /// Arbitrary application keys
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Creation instant
    pub created_at: DateTime<Utc>,
    /// Last-touch instant
    pub updated_at: DateTime<Utc>,
    /// Expiry instant, `session_lifetime` past the last touch
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Whether the session has passed its expiry instant
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// One JSON-RPC envelope queued for stream delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Monotonic id; delivery order is ascending id
    pub id: u64,
    /// Owning session
    pub session_id: String,
    /// The full JSON-RPC envelope
    pub data: Value,
    /// Optional delivery context recorded by the dispatcher
    pub context: Option<Value>,
    /// Insertion instant
    pub created_at: DateTime<Utc>,
}

/// A tenant context, looked up on every authenticated request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRecord {
    /// External id (UUID or other opaque string)
    pub context_id: String,
    /// Context type, e.g. `agency` or `user`
    pub context_type: String,
    /// Display name
    pub name: String,
    /// Inactive contexts fail authentication
    pub active: bool,
}

/// A registered OAuth client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Client identifier
    pub client_id: String,
    /// Secret; `None` marks a public client
    pub client_secret: Option<String>,
    /// Human-readable name shown on the consent page
    pub client_name: String,
    /// Exact-match set of allowed redirect URIs
    pub redirect_uris: Vec<String>,
    /// Allowed grant types
    pub grant_types: Vec<String>,
    /// Allowed response types
    pub response_types: Vec<String>,
}

impl ClientRecord {
    /// Whether this client must authenticate with a secret
    pub fn is_confidential(&self) -> bool {
        self.client_secret.is_some()
    }
}

/// A short-lived, single-use authorization code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationCodeRecord {
    /// The code value handed to the client via redirect
    pub code: String,
    /// Issuing client
    pub client_id: String,
    /// Redirect URI the code was bound to
    pub redirect_uri: String,
    /// Granted scope
    pub scope: Option<String>,
    /// PKCE challenge submitted at authorize time
    pub code_challenge: String,
    /// Always `S256`
    pub code_challenge_method: String,
    /// RFC 8707 resource indicator carried into the token
    pub resource: Option<String>,
    /// Consenting user
    pub user_id: String,
    /// Tenant the grant is scoped to
    pub tenant_id: Option<String>,
    /// Expiry instant (at most 10 minutes after issuance)
    pub expires_at: DateTime<Utc>,
    /// Set on first exchange; a consumed code never exchanges again
    pub consumed: bool,
}

/// An issued access/refresh token pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Bearer access token
    pub access_token: String,
    /// Paired refresh token
    pub refresh_token: Option<String>,
    /// Issuing client
    pub client_id: String,
    /// Granted scope
    pub scope: Option<String>,
    /// Access-token expiry instant
    pub expires_at: DateTime<Utc>,
    /// Revoked tokens never validate
    pub revoked: bool,
    /// Resource owner
    pub user_id: Option<String>,
    /// Tenant binding
    pub tenant_id: Option<String>,
    /// RFC 8707 resource the token is bound to
    pub resource: Option<String>,
    /// Audience list; contains `resource` when bound
    pub aud: Vec<String>,
}

impl TokenRecord {
    /// Scopes as a list (the scope string is space-separated)
    pub fn scope_list(&self) -> Vec<&str> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }
}

/// Correlation family for server-to-client request responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorrelationKind {
    /// `sampling/createMessage` responses
    Sampling,
    /// `roots/*` responses
    Roots,
    /// `elicitation/create` responses
    Elicitation,
}

impl CorrelationKind {
    /// Stable key prefix for storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sampling => "sampling",
            Self::Roots => "roots",
            Self::Elicitation => "elicitation",
        }
    }
}

/// The persistence operations the core depends on.
///
/// Implementations provide their own concurrency safety; the core never
/// holds a storage-level lock across an external I/O write. Backends may be
/// in-memory, SQL, or anything else — the core assumes nothing relational.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetch a session by id; expired sessions are reported as absent.
    async fn get_session(&self, session_id: &str) -> StorageResult<Option<SessionRecord>>;

    /// Insert or replace a session.
    async fn store_session(&self, record: SessionRecord) -> StorageResult<()>;

    /// Remove a session and everything queued for it. Returns whether a
    /// session existed.
    async fn delete_session(&self, session_id: &str) -> StorageResult<bool>;

    /// All queued envelopes for a session, FIFO by insertion.
    async fn get_messages(&self, session_id: &str) -> StorageResult<Vec<QueuedMessage>>;

    /// Append an envelope to a session's queue; returns the monotonic id.
    async fn store_message(
        &self,
        session_id: &str,
        data: Value,
        context: Option<Value>,
    ) -> StorageResult<u64>;

    /// Delete one queued envelope after delivery. Returns whether it existed.
    async fn delete_message(&self, message_id: u64) -> StorageResult<bool>;

    /// Resolve a bearer token. Revoked, expired, and unknown tokens all
    /// resolve to `None`; a tenant-bound token checked against a different
    /// tenant also resolves to `None`.
    async fn validate_token(
        &self,
        token: &str,
        context_id: Option<&str>,
    ) -> StorageResult<Option<TokenRecord>>;

    /// Look up a tenant context by id and type.
    async fn get_context_data(
        &self,
        context_id: &str,
        context_type: &str,
    ) -> StorageResult<Option<ContextRecord>>;

    /// Look up a registered OAuth client.
    async fn get_oauth_client(&self, client_id: &str) -> StorageResult<Option<ClientRecord>>;

    /// Persist a dynamically registered client.
    async fn store_oauth_client(&self, client: ClientRecord) -> StorageResult<()>;

    /// Persist a freshly issued authorization code.
    async fn store_authorization_code(
        &self,
        record: AuthorizationCodeRecord,
    ) -> StorageResult<()>;

    /// Atomically consume an authorization code: the first call returns the
    /// record and marks it consumed, every later call returns `None`.
    /// Expiry is NOT checked here; the token endpoint inspects
    /// `expires_at` itself so that expired and consumed codes fail alike.
    async fn consume_authorization_code(
        &self,
        code: &str,
    ) -> StorageResult<Option<AuthorizationCodeRecord>>;

    /// Persist an issued token pair.
    async fn store_access_token(&self, record: TokenRecord) -> StorageResult<()>;

    /// Revoke by access or refresh token value. Always succeeds; returns
    /// whether a live token was found.
    async fn revoke_token(&self, token: &str) -> StorageResult<bool>;

    /// Locate a live token record by its refresh token.
    async fn find_by_refresh_token(&self, refresh_token: &str)
        -> StorageResult<Option<TokenRecord>>;

    /// Atomic refresh rotation: revoke the pair identified by
    /// `old_refresh_token` and persist `new_record` in one step. Returns the
    /// revoked record, or `None` (and stores nothing) when the refresh token
    /// is unknown or already rotated — the double-use signal.
    async fn rotate_refresh_token(
        &self,
        old_refresh_token: &str,
        new_record: TokenRecord,
    ) -> StorageResult<Option<TokenRecord>>;

    /// Record a client's response to a server-initiated request.
    async fn store_client_response(
        &self,
        kind: CorrelationKind,
        request_id: &str,
        payload: Value,
    ) -> StorageResult<()>;

    /// Take (and remove) a recorded client response.
    async fn take_client_response(
        &self,
        kind: CorrelationKind,
        request_id: &str,
    ) -> StorageResult<Option<Value>>;

    /// Remove expired sessions (and their queues), expired or consumed
    /// authorization codes, and expired tokens. Returns how many entries
    /// were removed. Running it twice back to back removes nothing new.
    async fn cleanup(&self) -> StorageResult<u64>;
}
