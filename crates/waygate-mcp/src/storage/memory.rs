//! In-Memory Storage Backend
//!
//! The reference implementation of the [`Storage`] contract, backed by
//! `DashMap` tables. It is the deployment backend for single-instance
//! servers and the fixture for every test in the crate.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

// Layer 3: Internal module imports
use crate::error::StorageResult;
use crate::storage::{
    AuthorizationCodeRecord, ClientRecord, ContextRecord, CorrelationKind, QueuedMessage,
    SessionRecord, Storage, TokenRecord,
};

/// Counters kept by the memory backend, exposed for tests and health checks.
#[derive(Debug, Default)]
struct StorageStats {
    sessions_created: AtomicU64,
    messages_queued: AtomicU64,
    messages_delivered: AtomicU64,
    codes_issued: AtomicU64,
    codes_consumed: AtomicU64,
    tokens_issued: AtomicU64,
    tokens_revoked: AtomicU64,
}

/// Point-in-time view of the backend counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStatsSnapshot {
    /// Sessions ever stored
    pub sessions_created: u64,
    /// Envelopes ever queued
    pub messages_queued: u64,
    /// Envelopes consumed by transports
    pub messages_delivered: u64,
    /// Authorization codes issued
    pub codes_issued: u64,
    /// Authorization codes consumed
    pub codes_consumed: u64,
    /// Token pairs issued
    pub tokens_issued: u64,
    /// Tokens revoked (rotation included)
    pub tokens_revoked: u64,
}

/// DashMap-backed [`Storage`] implementation.
pub struct MemoryStorage {
    sessions: DashMap<String, SessionRecord>,
    messages: DashMap<u64, QueuedMessage>,
    contexts: DashMap<(String, String), ContextRecord>,
    clients: DashMap<String, ClientRecord>,
    codes: DashMap<String, AuthorizationCodeRecord>,
    /// Tokens keyed by access token
    tokens: DashMap<String, TokenRecord>,
    /// Refresh token -> access token index
    refresh_index: DashMap<String, String>,
    correlations: DashMap<String, Value>,
    message_seq: AtomicU64,
    /// Serializes refresh rotation; rotation touches two tables.
    rotation_lock: Mutex<()>,
    stats: StorageStats,
}

impl MemoryStorage {
    /// Create an empty backend
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            messages: DashMap::new(),
            contexts: DashMap::new(),
            clients: DashMap::new(),
            codes: DashMap::new(),
            tokens: DashMap::new(),
            refresh_index: DashMap::new(),
            correlations: DashMap::new(),
            message_seq: AtomicU64::new(1),
            rotation_lock: Mutex::new(()),
            stats: StorageStats::default(),
        }
    }

    /// Seed a tenant context. Contexts are provisioned out-of-band in
    /// production; this is the provisioning hook for the memory backend.
    pub fn insert_context(&self, record: ContextRecord) {
        self.contexts.insert(
            (record.context_id.clone(), record.context_type.clone()),
            record,
        );
    }

    /// Current counter values
    pub fn stats(&self) -> StorageStatsSnapshot {
        StorageStatsSnapshot {
            sessions_created: self.stats.sessions_created.load(Ordering::Relaxed),
            messages_queued: self.stats.messages_queued.load(Ordering::Relaxed),
            messages_delivered: self.stats.messages_delivered.load(Ordering::Relaxed),
            codes_issued: self.stats.codes_issued.load(Ordering::Relaxed),
            codes_consumed: self.stats.codes_consumed.load(Ordering::Relaxed),
            tokens_issued: self.stats.tokens_issued.load(Ordering::Relaxed),
            tokens_revoked: self.stats.tokens_revoked.load(Ordering::Relaxed),
        }
    }

    fn correlation_key(kind: CorrelationKind, request_id: &str) -> String {
        format!("{}:{request_id}", kind.as_str())
    }

    fn revoke_record(&self, access_token: &str) -> bool {
        if let Some(mut record) = self.tokens.get_mut(access_token) {
            if !record.revoked {
                record.revoked = true;
                self.stats.tokens_revoked.fetch_add(1, Ordering::Relaxed);
            }
            true
        } else {
            false
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_session(&self, session_id: &str) -> StorageResult<Option<SessionRecord>> {
        let now = Utc::now();
        Ok(self
            .sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .filter(|record| !record.is_expired(now)))
    }

    async fn store_session(&self, record: SessionRecord) -> StorageResult<()> {
        if self.sessions.insert(record.session_id.clone(), record).is_none() {
            self.stats.sessions_created.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> StorageResult<bool> {
        let existed = self.sessions.remove(session_id).is_some();
        self.messages
            .retain(|_, message| message.session_id != session_id);
        Ok(existed)
    }

    async fn get_messages(&self, session_id: &str) -> StorageResult<Vec<QueuedMessage>> {
        let mut queued: Vec<QueuedMessage> = self
            .messages
            .iter()
            .filter(|entry| entry.value().session_id == session_id)
            .map(|entry| entry.value().clone())
            .collect();
        queued.sort_by_key(|message| message.id);
        Ok(queued)
    }

    async fn store_message(
        &self,
        session_id: &str,
        data: Value,
        context: Option<Value>,
    ) -> StorageResult<u64> {
        let id = self.message_seq.fetch_add(1, Ordering::SeqCst);
        self.messages.insert(
            id,
            QueuedMessage {
                id,
                session_id: session_id.to_string(),
                data,
                context,
                created_at: Utc::now(),
            },
        );
        self.stats.messages_queued.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    async fn delete_message(&self, message_id: u64) -> StorageResult<bool> {
        let existed = self.messages.remove(&message_id).is_some();
        if existed {
            self.stats.messages_delivered.fetch_add(1, Ordering::Relaxed);
        }
        Ok(existed)
    }

    async fn validate_token(
        &self,
        token: &str,
        context_id: Option<&str>,
    ) -> StorageResult<Option<TokenRecord>> {
        let now = Utc::now();
        Ok(self
            .tokens
            .get(token)
            .map(|entry| entry.value().clone())
            .filter(|record| !record.revoked && record.expires_at > now)
            .filter(|record| match (context_id, record.tenant_id.as_deref()) {
                (Some(requested), Some(bound)) => requested == bound,
                _ => true,
            }))
    }

    async fn get_context_data(
        &self,
        context_id: &str,
        context_type: &str,
    ) -> StorageResult<Option<ContextRecord>> {
        Ok(self
            .contexts
            .get(&(context_id.to_string(), context_type.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn get_oauth_client(&self, client_id: &str) -> StorageResult<Option<ClientRecord>> {
        Ok(self.clients.get(client_id).map(|entry| entry.value().clone()))
    }

    async fn store_oauth_client(&self, client: ClientRecord) -> StorageResult<()> {
        self.clients.insert(client.client_id.clone(), client);
        Ok(())
    }

    async fn store_authorization_code(
        &self,
        record: AuthorizationCodeRecord,
    ) -> StorageResult<()> {
        self.codes.insert(record.code.clone(), record);
        self.stats.codes_issued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn consume_authorization_code(
        &self,
        code: &str,
    ) -> StorageResult<Option<AuthorizationCodeRecord>> {
        // Entry lock makes the read-modify-write atomic against a racing
        // second exchange.
        if let Some(mut entry) = self.codes.get_mut(code) {
            if entry.consumed {
                return Ok(None);
            }
            entry.consumed = true;
            self.stats.codes_consumed.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(entry.clone()));
        }
        Ok(None)
    }

    async fn store_access_token(&self, record: TokenRecord) -> StorageResult<()> {
        if let Some(refresh) = &record.refresh_token {
            self.refresh_index
                .insert(refresh.clone(), record.access_token.clone());
        }
        self.tokens.insert(record.access_token.clone(), record);
        self.stats.tokens_issued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn revoke_token(&self, token: &str) -> StorageResult<bool> {
        if self.tokens.contains_key(token) {
            return Ok(self.revoke_record(token));
        }
        // Fall back to refresh-token lookup
        if let Some(access) = self.refresh_index.get(token).map(|e| e.value().clone()) {
            return Ok(self.revoke_record(&access));
        }
        Ok(false)
    }

    async fn find_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> StorageResult<Option<TokenRecord>> {
        let Some(access) = self.refresh_index.get(refresh_token).map(|e| e.value().clone())
        else {
            return Ok(None);
        };
        Ok(self
            .tokens
            .get(&access)
            .map(|entry| entry.value().clone())
            .filter(|record| !record.revoked))
    }

    async fn rotate_refresh_token(
        &self,
        old_refresh_token: &str,
        new_record: TokenRecord,
    ) -> StorageResult<Option<TokenRecord>> {
        let _guard = self
            .rotation_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let Some(access) = self
            .refresh_index
            .get(old_refresh_token)
            .map(|e| e.value().clone())
        else {
            return Ok(None);
        };
        let old = match self.tokens.get(&access).map(|e| e.value().clone()) {
            Some(record) if !record.revoked => record,
            // Already rotated or revoked: refuse, store nothing.
            _ => return Ok(None),
        };

        self.revoke_record(&access);
        self.refresh_index.remove(old_refresh_token);

        if let Some(refresh) = &new_record.refresh_token {
            self.refresh_index
                .insert(refresh.clone(), new_record.access_token.clone());
        }
        self.tokens
            .insert(new_record.access_token.clone(), new_record);
        self.stats.tokens_issued.fetch_add(1, Ordering::Relaxed);

        Ok(Some(old))
    }

    async fn store_client_response(
        &self,
        kind: CorrelationKind,
        request_id: &str,
        payload: Value,
    ) -> StorageResult<()> {
        self.correlations
            .insert(Self::correlation_key(kind, request_id), payload);
        Ok(())
    }

    async fn take_client_response(
        &self,
        kind: CorrelationKind,
        request_id: &str,
    ) -> StorageResult<Option<Value>> {
        Ok(self
            .correlations
            .remove(&Self::correlation_key(kind, request_id))
            .map(|(_, payload)| payload))
    }

    async fn cleanup(&self) -> StorageResult<u64> {
        let now = Utc::now();
        let mut removed = 0u64;

        let expired_sessions: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();
        for session_id in &expired_sessions {
            if self.sessions.remove(session_id).is_some() {
                removed += 1;
            }
        }
        if !expired_sessions.is_empty() {
            let before = self.messages.len() as u64;
            self.messages
                .retain(|_, message| !expired_sessions.contains(&message.session_id));
            removed += before - self.messages.len() as u64;
        }

        let dead_codes: Vec<String> = self
            .codes
            .iter()
            .filter(|entry| entry.value().consumed || entry.value().expires_at <= now)
            .map(|entry| entry.key().clone())
            .collect();
        for code in dead_codes {
            if self.codes.remove(&code).is_some() {
                removed += 1;
            }
        }

        let dead_tokens: Vec<(String, Option<String>)> = self
            .tokens
            .iter()
            .filter(|entry| entry.value().revoked || entry.value().expires_at <= now)
            .map(|entry| (entry.key().clone(), entry.value().refresh_token.clone()))
            .collect();
        for (access, refresh) in dead_tokens {
            if self.tokens.remove(&access).is_some() {
                removed += 1;
            }
            if let Some(refresh) = refresh {
                self.refresh_index.remove(&refresh);
            }
        }

        if removed > 0 {
            debug!(removed, "storage cleanup sweep");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use std::sync::Arc;

    fn session(id: &str, ttl_secs: i64) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            session_id: id.to_string(),
            protocol_version: crate::protocol::ProtocolVersion::new("2025-06-18").unwrap(),
            context_id: Some("tenant-a".to_string()),
            user_id: None,
            data: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
        }
    }

    fn token(access: &str, refresh: &str, ttl_secs: i64) -> TokenRecord {
        TokenRecord {
            access_token: access.to_string(),
            refresh_token: Some(refresh.to_string()),
            client_id: "client-1".to_string(),
            scope: Some("mcp:read".to_string()),
            expires_at: Utc::now() + Duration::seconds(ttl_secs),
            revoked: false,
            user_id: Some("user-1".to_string()),
            tenant_id: Some("tenant-a".to_string()),
            resource: Some("https://srv/mcp/tenant-a".to_string()),
            aud: vec!["https://srv/mcp/tenant-a".to_string()],
        }
    }

    fn code(value: &str, ttl_secs: i64) -> AuthorizationCodeRecord {
        AuthorizationCodeRecord {
            code: value.to_string(),
            client_id: "client-1".to_string(),
            redirect_uri: "https://app/cb".to_string(),
            scope: Some("mcp:read".to_string()),
            code_challenge: "challenge".to_string(),
            code_challenge_method: "S256".to_string(),
            resource: None,
            user_id: "user-1".to_string(),
            tenant_id: None,
            expires_at: Utc::now() + Duration::seconds(ttl_secs),
            consumed: false,
        }
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let storage = MemoryStorage::new();
        let record = session("2025-06-18_abc", 60);
        storage.store_session(record.clone()).await.unwrap();
        let read = storage.get_session("2025-06-18_abc").await.unwrap().unwrap();
        assert_eq!(read, record);
    }

    #[tokio::test]
    async fn test_expired_session_reads_as_absent() {
        let storage = MemoryStorage::new();
        storage.store_session(session("2025-06-18_old", -5)).await.unwrap();
        assert!(storage.get_session("2025-06-18_old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_message_fifo_and_at_most_once() {
        let storage = MemoryStorage::new();
        let first = storage
            .store_message("s1", json!({"n": 1}), None)
            .await
            .unwrap();
        let second = storage
            .store_message("s1", json!({"n": 2}), None)
            .await
            .unwrap();
        storage.store_message("s2", json!({"n": 3}), None).await.unwrap();

        let queued = storage.get_messages("s1").await.unwrap();
        assert_eq!(queued.len(), 2);
        assert!(first < second);
        assert_eq!(queued[0].data["n"], 1);
        assert_eq!(queued[1].data["n"], 2);

        assert!(storage.delete_message(first).await.unwrap());
        assert!(!storage.delete_message(first).await.unwrap());
        assert_eq!(storage.get_messages("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_token_validation_rules() {
        let storage = MemoryStorage::new();
        storage.store_access_token(token("at-1", "rt-1", 60)).await.unwrap();

        assert!(storage.validate_token("at-1", None).await.unwrap().is_some());
        assert!(storage
            .validate_token("at-1", Some("tenant-a"))
            .await
            .unwrap()
            .is_some());
        // Tenant mismatch
        assert!(storage
            .validate_token("at-1", Some("tenant-b"))
            .await
            .unwrap()
            .is_none());
        // Unknown
        assert!(storage.validate_token("nope", None).await.unwrap().is_none());

        // Expired
        storage.store_access_token(token("at-2", "rt-2", -5)).await.unwrap();
        assert!(storage.validate_token("at-2", None).await.unwrap().is_none());

        // Revoked
        storage.revoke_token("at-1").await.unwrap();
        assert!(storage.validate_token("at-1", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_by_refresh_token() {
        let storage = MemoryStorage::new();
        storage.store_access_token(token("at-1", "rt-1", 60)).await.unwrap();
        assert!(storage.revoke_token("rt-1").await.unwrap());
        assert!(storage.validate_token("at-1", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_code_single_use() {
        let storage = MemoryStorage::new();
        storage.store_authorization_code(code("c1", 600)).await.unwrap();

        let first = storage.consume_authorization_code("c1").await.unwrap();
        assert!(first.is_some());
        assert!(first.unwrap().consumed);

        assert!(storage.consume_authorization_code("c1").await.unwrap().is_none());
        assert!(storage.consume_authorization_code("zz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_rotation_atomicity() {
        let storage = MemoryStorage::new();
        storage.store_access_token(token("at-1", "rt-1", 60)).await.unwrap();

        let old = storage
            .rotate_refresh_token("rt-1", token("at-2", "rt-2", 60))
            .await
            .unwrap();
        assert_eq!(old.unwrap().access_token, "at-1");

        // Old pair dead
        assert!(storage.validate_token("at-1", None).await.unwrap().is_none());
        assert!(storage.find_by_refresh_token("rt-1").await.unwrap().is_none());
        // New pair live
        assert!(storage.validate_token("at-2", None).await.unwrap().is_some());

        // Second use of the rotated refresh token fails and stores nothing
        let replay = storage
            .rotate_refresh_token("rt-1", token("at-3", "rt-3", 60))
            .await
            .unwrap();
        assert!(replay.is_none());
        assert!(storage.validate_token("at-3", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_correlation_take_removes() {
        let storage = MemoryStorage::new();
        storage
            .store_client_response(CorrelationKind::Sampling, "req-1", json!({"ok": true}))
            .await
            .unwrap();
        // Kinds are separate namespaces
        assert!(storage
            .take_client_response(CorrelationKind::Roots, "req-1")
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            storage
                .take_client_response(CorrelationKind::Sampling, "req-1")
                .await
                .unwrap()
                .unwrap()["ok"],
            true
        );
        assert!(storage
            .take_client_response(CorrelationKind::Sampling, "req-1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_cleanup_idempotent() {
        let storage = MemoryStorage::new();
        storage.store_session(session("2025-06-18_live", 60)).await.unwrap();
        storage.store_session(session("2025-06-18_dead", -5)).await.unwrap();
        storage
            .store_message("2025-06-18_dead", json!({}), None)
            .await
            .unwrap();
        storage.store_authorization_code(code("c-dead", -5)).await.unwrap();
        storage.store_access_token(token("at-dead", "rt-dead", -5)).await.unwrap();

        let removed = storage.cleanup().await.unwrap();
        // Session + its message + code + token
        assert_eq!(removed, 4);
        assert_eq!(storage.cleanup().await.unwrap(), 0);
        assert!(storage.get_session("2025-06-18_live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_session_drops_queue() {
        let storage = MemoryStorage::new();
        storage.store_session(session("2025-06-18_s", 60)).await.unwrap();
        storage.store_message("2025-06-18_s", json!({}), None).await.unwrap();
        assert!(storage.delete_session("2025-06-18_s").await.unwrap());
        assert!(storage.get_messages("2025-06-18_s").await.unwrap().is_empty());
        assert!(!storage.delete_session("2025-06-18_s").await.unwrap());
    }

    #[test]
    fn test_concurrent_code_consumption_single_winner() {
        // Two tasks race for the same code; exactly one wins.
        tokio_test::block_on(async {
            let storage = Arc::new(MemoryStorage::new());
            storage.store_authorization_code(code("raced", 600)).await.unwrap();

            let a = {
                let storage = Arc::clone(&storage);
                tokio::spawn(async move { storage.consume_authorization_code("raced").await })
            };
            let b = {
                let storage = Arc::clone(&storage);
                tokio::spawn(async move { storage.consume_authorization_code("raced").await })
            };
            let winners = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()]
                .iter()
                .filter(|result| result.is_some())
                .count();
            assert_eq!(winners, 1);
        });
    }

    #[tokio::test]
    async fn test_stats_counters() {
        let storage = MemoryStorage::new();
        storage.store_session(session("2025-06-18_s", 60)).await.unwrap();
        let id = storage.store_message("2025-06-18_s", json!({}), None).await.unwrap();
        storage.delete_message(id).await.unwrap();
        let stats = storage.stats();
        assert_eq!(stats.sessions_created, 1);
        assert_eq!(stats.messages_queued, 1);
        assert_eq!(stats.messages_delivered, 1);
    }
}
