//! Streaming Transports
//!
//! Long-lived HTTP responses that push queued JSON-RPC envelopes to the
//! client. Both transports share one polling loop and differ only in wire
//! framing: the SSE transport (2024-11-05) opens with an `endpoint` event,
//! the streamable transport (2025-03-26 and newer) keeps the SSE framing
//! over chunked transfer and uses a synthetic `notifications/ping` envelope
//! as its keepalive.
//!
//! Delivery guarantees: messages leave the queue in insertion order and at
//! most once — each entry is written to the body and then deleted. A crash
//! between write and delete drops that message, which is acceptable for
//! request/response traffic because the client retries by id.

// Layer 1: Standard library imports
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace, warn};

// Layer 3: Internal module imports
use crate::storage::Storage;

pub mod sse;
pub mod streamable;

pub use sse::SseFraming;
pub use streamable::StreamableFraming;

/// Polling-loop parameters shared by both transports
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Base tick interval
    pub keepalive_interval: Duration,
    /// Idle time after which the interval starts doubling
    pub switch_interval_after: Duration,
    /// Ceiling for the doubled interval
    pub max_interval: Duration,
    /// Idle time after which the connection is closed; reset on delivery
    pub max_connection_time: Duration,
    /// Deliver whatever is queued once, then return (no polling)
    pub test_mode: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(1),
            switch_interval_after: Duration::from_secs(60),
            max_interval: Duration::from_secs(5),
            max_connection_time: Duration::from_secs(1800),
            test_mode: false,
        }
    }
}

/// Wire framing for one transport flavor
pub trait StreamFraming: Send + Sync {
    /// Frame emitted once at connection open, before any message
    fn preamble(&self) -> Option<Bytes> {
        None
    }

    /// Frame carrying one queued JSON-RPC envelope
    fn message_frame(&self, envelope: &Value) -> Bytes;

    /// Frame emitted on idle ticks
    fn keepalive_frame(&self) -> Bytes;
}

/// Frame a JSON value as an SSE `message` event. Shared by both framings.
pub(crate) fn sse_message_frame(envelope: &Value) -> Bytes {
    let data = serde_json::to_string(envelope).unwrap_or_else(|_| "null".to_string());
    Bytes::from(format!("event: message\ndata: {data}\n\n"))
}

/// The polling loop. Runs until the client disconnects, the idle budget is
/// exhausted, or shutdown is signalled. Sending on a closed channel means
/// the response body was dropped, i.e. the peer went away; that is normal
/// termination, not an error.
pub async fn run_stream(
    storage: Arc<dyn Storage>,
    session_id: String,
    config: StreamConfig,
    framing: Arc<dyn StreamFraming>,
    tx: mpsc::Sender<Result<Bytes, Infallible>>,
    shutdown: watch::Receiver<bool>,
) {
    if let Some(preamble) = framing.preamble() {
        if tx.send(Ok(preamble)).await.is_err() {
            return;
        }
    }

    let mut interval = config.keepalive_interval;
    let mut last_delivery = tokio::time::Instant::now();

    loop {
        if *shutdown.borrow() {
            debug!(session_id, "stream closing on shutdown");
            return;
        }

        let queued = match storage.get_messages(&session_id).await {
            Ok(queued) => queued,
            Err(error) => {
                warn!(session_id, error = %error, "stream poll failed; closing");
                return;
            }
        };

        let mut delivered = false;
        for message in queued {
            let frame = framing.message_frame(&message.data);
            if tx.send(Ok(frame)).await.is_err() {
                debug!(session_id, "client disconnected mid-delivery");
                return;
            }
            // Write-then-delete: after this point the entry is gone for good.
            if let Err(error) = storage.delete_message(message.id).await {
                warn!(session_id, message_id = message.id, error = %error, "delete after delivery failed");
            }
            delivered = true;
        }

        if config.test_mode {
            debug!(session_id, "test mode: drained once, closing stream");
            return;
        }

        if delivered {
            last_delivery = tokio::time::Instant::now();
            interval = config.keepalive_interval;
            trace!(session_id, "delivery burst; idle timer reset");
        } else if tx.send(Ok(framing.keepalive_frame())).await.is_err() {
            debug!(session_id, "client disconnected on keepalive");
            return;
        }

        let idle = last_delivery.elapsed();
        if idle >= config.max_connection_time {
            debug!(session_id, "idle budget exhausted; closing stream");
            return;
        }
        if idle >= config.switch_interval_after {
            interval = (interval * 2).min(config.max_interval);
        }

        let mut shutdown = shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {}
        }
    }
}

/// Assemble the streaming HTTP response: spawn the polling loop and hand
/// its channel to the body. `extra_headers` lets the streamable transport
/// stamp `MCP-Protocol-Version`.
pub fn stream_response(
    storage: Arc<dyn Storage>,
    session_id: String,
    config: StreamConfig,
    framing: Arc<dyn StreamFraming>,
    shutdown: watch::Receiver<bool>,
    extra_headers: Vec<(&'static str, String)>,
) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(32);
    tokio::spawn(run_stream(
        storage,
        session_id,
        config,
        framing,
        tx,
        shutdown,
    ));

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap_or_else(|_| Response::new(Body::empty()));

    for (name, value) in extra_headers {
        if let Ok(value) = HeaderValue::from_str(&value) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}
