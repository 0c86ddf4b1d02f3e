//! SSE Transport (2024-11-05)
//!
//! The legacy dual-endpoint shape: the GET stream opens with an `endpoint`
//! event telling the client where to POST, then pushes queued envelopes as
//! `message` events. Keepalives are SSE comment lines, invisible to event
//! listeners.

// Layer 2: Third-party crate imports
use bytes::Bytes;
use serde_json::Value;

// Layer 3: Internal module imports
use super::{sse_message_frame, StreamFraming};

/// Framing for the 2024-11-05 SSE transport
pub struct SseFraming {
    /// URL the client must POST its messages to
    endpoint_url: String,
}

impl SseFraming {
    /// Create a framing advertising the given POST endpoint
    pub fn new(endpoint_url: String) -> Self {
        Self { endpoint_url }
    }
}

impl StreamFraming for SseFraming {
    fn preamble(&self) -> Option<Bytes> {
        Some(Bytes::from(format!(
            "event: endpoint\ndata: {}\n\n",
            self.endpoint_url
        )))
    }

    fn message_frame(&self, envelope: &Value) -> Bytes {
        sse_message_frame(envelope)
    }

    fn keepalive_frame(&self) -> Bytes {
        Bytes::from_static(b": keepalive\n\n")
    }
}
