//! Server-to-Client Request Broker
//!
//! Sampling, roots, and elicitation are reverse-direction JSON-RPC calls:
//! the server enqueues a request envelope with a fresh id, the streaming
//! transport delivers it, and the client's later POST carries a response
//! correlated by that id. The broker owns the pending-id table and records
//! responses through the storage contract so application code can retrieve
//! them.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

// Layer 3: Internal module imports
use crate::error::ServerError;
use crate::protocol::{JsonRpcRequest, RequestId};
use crate::storage::{CorrelationKind, Storage};

/// Correlation broker for server-initiated requests.
pub struct ClientRequestBroker {
    storage: Arc<dyn Storage>,
    /// Pending request id -> correlation family
    pending: DashMap<String, CorrelationKind>,
}

impl ClientRequestBroker {
    /// Create a broker over the shared storage
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            pending: DashMap::new(),
        }
    }

    /// Enqueue a server-to-client request on the session's stream and
    /// register its id as pending. Returns the generated request id.
    pub async fn initiate(
        &self,
        session_id: &str,
        kind: CorrelationKind,
        method: &str,
        params: Option<Value>,
    ) -> Result<String, ServerError> {
        let request_id = format!("srv-{}", Uuid::new_v4().simple());
        let envelope = JsonRpcRequest::new(
            method,
            params,
            RequestId::new_string(request_id.clone()),
        );
        let envelope = serde_json::to_value(&envelope)
            .map_err(|e| ServerError::Internal(format!("envelope serialization: {e}")))?;
        self.storage
            .store_message(session_id, envelope, None)
            .await?;
        self.pending.insert(request_id.clone(), kind);
        debug!(method, request_id, session_id, "server-to-client request queued");
        Ok(request_id)
    }

    /// Record a client response for a pending request. Returns the
    /// correlation family, or `None` when the id is unknown (stale or
    /// fabricated responses are dropped by the caller).
    pub async fn record_response(
        &self,
        request_id: &str,
        payload: Value,
    ) -> Result<Option<CorrelationKind>, ServerError> {
        let Some((_, kind)) = self.pending.remove(request_id) else {
            return Ok(None);
        };
        self.storage
            .store_client_response(kind, request_id, payload)
            .await?;
        debug!(request_id, kind = kind.as_str(), "client response recorded");
        Ok(Some(kind))
    }

    /// Retrieve (and consume) a recorded client response. Application code
    /// polls this after initiating a request.
    pub async fn take_response(
        &self,
        kind: CorrelationKind,
        request_id: &str,
    ) -> Result<Option<Value>, ServerError> {
        Ok(self.storage.take_client_response(kind, request_id).await?)
    }

    /// Number of requests still waiting for a client response
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    fn broker() -> (ClientRequestBroker, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let broker = ClientRequestBroker::new(Arc::clone(&storage) as Arc<dyn Storage>);
        (broker, storage)
    }

    #[tokio::test]
    async fn test_initiate_queues_envelope() {
        let (broker, storage) = broker();
        let id = broker
            .initiate(
                "2025-06-18_s",
                CorrelationKind::Sampling,
                "sampling/createMessage",
                Some(json!({"maxTokens": 64})),
            )
            .await
            .unwrap();

        assert!(id.starts_with("srv-"));
        let queued = storage.get_messages("2025-06-18_s").await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].data["method"], "sampling/createMessage");
        assert_eq!(queued[0].data["id"], id.as_str());
        assert_eq!(broker.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_response_correlation() {
        let (broker, _storage) = broker();
        let id = broker
            .initiate("s", CorrelationKind::Roots, "roots/list", None)
            .await
            .unwrap();

        let kind = broker
            .record_response(&id, json!({"result": {"roots": []}}))
            .await
            .unwrap();
        assert_eq!(kind, Some(CorrelationKind::Roots));
        assert_eq!(broker.pending_count(), 0);

        let payload = broker
            .take_response(CorrelationKind::Roots, &id)
            .await
            .unwrap()
            .unwrap();
        assert!(payload["result"]["roots"].is_array());

        // Consumed
        assert!(broker
            .take_response(CorrelationKind::Roots, &id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unknown_response_dropped() {
        let (broker, _storage) = broker();
        let kind = broker
            .record_response("srv-unknown", json!({"result": {}}))
            .await
            .unwrap();
        assert!(kind.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_response_dropped() {
        let (broker, _storage) = broker();
        let id = broker
            .initiate("s", CorrelationKind::Elicitation, "elicitation/create", None)
            .await
            .unwrap();
        assert!(broker
            .record_response(&id, json!({"result": {}}))
            .await
            .unwrap()
            .is_some());
        // The pending entry is gone; a replayed response does not overwrite
        assert!(broker
            .record_response(&id, json!({"result": {"other": true}}))
            .await
            .unwrap()
            .is_none());
    }
}
