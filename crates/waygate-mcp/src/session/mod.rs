//! Session Management
//!
//! A session is one initialized protocol conversation, bound to the version
//! negotiated at `initialize`. Its id carries that version as a prefix:
//! `<protocol_version>_<32 hex chars>`, the hex drawn from a cryptographic
//! RNG. The prefix is the fallback source of truth for the session's version
//! when the record is unavailable.
//!
//! The manager also owns the two in-process caches the dispatcher relies
//! on: the negotiated-version cache and the per-session seen-request-id set
//! backing the duplicate-id guard. Both are invalidated when the session is
//! destroyed.

// Layer 1: Standard library imports
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::OnceLock;

// Layer 2: Third-party crate imports
use chrono::{Duration, Utc};
use dashmap::DashMap;
use regex::Regex;
use tracing::debug;
use uuid::Uuid;

// Layer 3: Internal module imports
use crate::error::StorageResult;
use crate::protocol::{ProtocolVersion, RequestId, VersionNegotiator};
use crate::storage::{SessionRecord, Storage};

/// Wire shape of a session id: version token, underscore, alphanumeric tail.
pub const SESSION_ID_PATTERN: &str = r"^[A-Za-z0-9.-]+_[A-Za-z0-9]+$";

fn session_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)] // pattern is a checked constant
        Regex::new(SESSION_ID_PATTERN).unwrap()
    })
}

/// Whether a string has the session-id wire shape
pub fn looks_like_session_id(candidate: &str) -> bool {
    session_id_regex().is_match(candidate)
}

/// Extract the protocol version encoded in a session id prefix
pub fn version_from_session_id(session_id: &str) -> Option<ProtocolVersion> {
    let (prefix, suffix) = session_id.split_once('_')?;
    if suffix.is_empty() {
        return None;
    }
    ProtocolVersion::new(prefix).ok()
}

/// Generate a fresh session id for a negotiated version.
///
/// The suffix is 32 hex characters (16 random bytes) from the v4 UUID
/// generator, which draws from the OS CSPRNG.
pub fn generate_session_id(version: &ProtocolVersion) -> String {
    format!("{}_{}", version.as_str(), Uuid::new_v4().simple())
}

/// Session lifecycle manager over the storage contract.
pub struct SessionManager {
    storage: Arc<dyn Storage>,
    negotiator: VersionNegotiator,
    session_lifetime: Duration,
    /// Negotiated version per session id; avoids a storage read per message
    version_cache: DashMap<String, ProtocolVersion>,
    /// Seen non-null request ids per session (duplicate-id guard)
    seen_request_ids: DashMap<String, HashSet<String>>,
}

impl SessionManager {
    /// Create a manager with the given storage, negotiator, and lifetime
    pub fn new(
        storage: Arc<dyn Storage>,
        negotiator: VersionNegotiator,
        session_lifetime_secs: u64,
    ) -> Self {
        Self {
            storage,
            negotiator,
            session_lifetime: Duration::seconds(session_lifetime_secs as i64),
            version_cache: DashMap::new(),
            seen_request_ids: DashMap::new(),
        }
    }

    /// The negotiator this manager was built with
    pub fn negotiator(&self) -> &VersionNegotiator {
        &self.negotiator
    }

    /// Create and persist a session for a freshly negotiated version.
    pub async fn create_session(
        &self,
        version: &ProtocolVersion,
        context_id: Option<&str>,
        user_id: Option<&str>,
    ) -> StorageResult<SessionRecord> {
        let now = Utc::now();
        let record = SessionRecord {
            session_id: generate_session_id(version),
            protocol_version: version.clone(),
            context_id: context_id.map(str::to_string),
            user_id: user_id.map(str::to_string),
            data: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
            expires_at: now + self.session_lifetime,
        };
        self.storage.store_session(record.clone()).await?;
        self.version_cache
            .insert(record.session_id.clone(), version.clone());
        debug!(session_id = %record.session_id, version = %version, "session created");
        Ok(record)
    }

    /// Fetch a live session record.
    pub async fn get_session(&self, session_id: &str) -> StorageResult<Option<SessionRecord>> {
        self.storage.get_session(session_id).await
    }

    /// Refresh `updated_at`/`expires_at`, pushing expiry `session_lifetime`
    /// past now. Missing sessions are ignored.
    pub async fn touch(&self, session_id: &str) -> StorageResult<()> {
        if let Some(mut record) = self.storage.get_session(session_id).await? {
            let now = Utc::now();
            record.updated_at = now;
            record.expires_at = now + self.session_lifetime;
            self.storage.store_session(record).await?;
        }
        Ok(())
    }

    /// Resolve the negotiated version for a session id.
    ///
    /// The session record is authoritative; the id prefix is the fallback
    /// when the record is gone (e.g. a stream reconnect racing expiry).
    pub async fn resolve_version(&self, session_id: &str) -> StorageResult<Option<ProtocolVersion>> {
        if let Some(cached) = self.version_cache.get(session_id) {
            return Ok(Some(cached.value().clone()));
        }
        if let Some(record) = self.storage.get_session(session_id).await? {
            self.version_cache
                .insert(session_id.to_string(), record.protocol_version.clone());
            return Ok(Some(record.protocol_version));
        }
        Ok(version_from_session_id(session_id)
            .filter(|v| self.negotiator.is_supported(v)))
    }

    /// Record a request id for the duplicate guard. Returns `false` when the
    /// id was already seen on this session.
    pub fn register_request_id(&self, session_id: &str, id: &RequestId) -> bool {
        let mut seen = self
            .seen_request_ids
            .entry(session_id.to_string())
            .or_default();
        seen.insert(id.dedup_key())
    }

    /// Destroy a session: storage record, queued messages, and both caches.
    pub async fn destroy(&self, session_id: &str) -> StorageResult<bool> {
        self.version_cache.remove(session_id);
        self.seen_request_ids.remove(session_id);
        self.storage.delete_session(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use proptest::prelude::*;

    fn manager() -> SessionManager {
        SessionManager::new(
            Arc::new(MemoryStorage::new()),
            VersionNegotiator::with_defaults(),
            3600,
        )
    }

    #[test]
    fn test_generated_id_shape() {
        let version = ProtocolVersion::new("2024-11-05").unwrap();
        let id = generate_session_id(&version);
        assert!(looks_like_session_id(&id));
        let (prefix, suffix) = id.split_once('_').unwrap();
        assert_eq!(prefix, "2024-11-05");
        assert_eq!(suffix.len(), 32);
        assert!(suffix.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn test_version_from_session_id() {
        assert_eq!(
            version_from_session_id("2025-06-18_abcdef").unwrap().as_str(),
            "2025-06-18"
        );
        assert!(version_from_session_id("garbage").is_none());
        assert!(version_from_session_id("notadate_abcdef").is_none());
        assert!(version_from_session_id("2025-06-18_").is_none());
    }

    #[test]
    fn test_wire_pattern() {
        assert!(looks_like_session_id("2025-06-18_00ff"));
        assert!(!looks_like_session_id("2025-06-18"));
        assert!(!looks_like_session_id("_abc"));
        assert!(!looks_like_session_id("2025-06-18_ab/cd"));
    }

    #[tokio::test]
    async fn test_create_then_resolve() {
        let mgr = manager();
        let version = ProtocolVersion::new("2025-03-26").unwrap();
        let record = mgr.create_session(&version, Some("tenant-a"), None).await.unwrap();

        let resolved = mgr.resolve_version(&record.session_id).await.unwrap();
        assert_eq!(resolved.unwrap(), version);

        let stored = mgr.get_session(&record.session_id).await.unwrap().unwrap();
        assert_eq!(stored.protocol_version, version);
        assert_eq!(stored.context_id.as_deref(), Some("tenant-a"));
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_prefix() {
        let mgr = manager();
        // No stored record; prefix parse carries it
        let resolved = mgr
            .resolve_version("2024-11-05_deadbeefdeadbeefdeadbeefdeadbeef")
            .await
            .unwrap();
        assert_eq!(resolved.unwrap().as_str(), "2024-11-05");

        // Prefix that is a date but not on the ladder resolves to nothing
        let resolved = mgr.resolve_version("2023-01-01_deadbeef").await.unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_guard() {
        let mgr = manager();
        let id = RequestId::new_number(7);
        assert!(mgr.register_request_id("s1", &id));
        assert!(!mgr.register_request_id("s1", &id));
        // Same id on another session is fine
        assert!(mgr.register_request_id("s2", &id));
        // String "7" is a different id than number 7
        assert!(mgr.register_request_id("s1", &RequestId::new_string("7")));
    }

    #[tokio::test]
    async fn test_destroy_invalidates_caches() {
        let mgr = manager();
        let version = ProtocolVersion::new("2025-06-18").unwrap();
        let record = mgr.create_session(&version, None, None).await.unwrap();
        mgr.register_request_id(&record.session_id, &RequestId::new_number(1));

        assert!(mgr.destroy(&record.session_id).await.unwrap());
        assert!(mgr.get_session(&record.session_id).await.unwrap().is_none());
        // Guard reset: the same id registers again
        assert!(mgr.register_request_id(&record.session_id, &RequestId::new_number(1)));
    }

    #[tokio::test]
    async fn test_touch_extends_expiry() {
        let mgr = manager();
        let version = ProtocolVersion::new("2025-06-18").unwrap();
        let record = mgr.create_session(&version, None, None).await.unwrap();
        let before = mgr.get_session(&record.session_id).await.unwrap().unwrap();
        mgr.touch(&record.session_id).await.unwrap();
        let after = mgr.get_session(&record.session_id).await.unwrap().unwrap();
        assert!(after.expires_at >= before.expires_at);
        assert!(after.updated_at >= before.updated_at);
    }

    proptest! {
        /// every generated id round-trips its version through the prefix
        #[test]
        fn prop_session_id_prefix_roundtrip(y in 2020u32..2030, m in 1u32..13, d in 1u32..29) {
            let version = ProtocolVersion::new(format!("{y:04}-{m:02}-{d:02}")).unwrap();
            let id = generate_session_id(&version);
            prop_assert!(looks_like_session_id(&id));
            prop_assert_eq!(version_from_session_id(&id), Some(version));
        }
    }
}
