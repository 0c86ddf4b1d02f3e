//! Streamable HTTP Transport (2025-03-26, 2025-06-18)
//!
//! Single-endpoint multiplexing with SSE framing over chunked transfer. No
//! endpoint preamble; the keepalive is a synthetic `notifications/ping`
//! envelope so clients exercise their normal message path. On 2025-06-18
//! the response additionally carries an `MCP-Protocol-Version` header,
//! stamped by the HTTP layer.

// Layer 2: Third-party crate imports
use bytes::Bytes;
use serde_json::{json, Value};

// Layer 3: Internal module imports
use super::{sse_message_frame, StreamFraming};

/// Framing for the streamable transport
pub struct StreamableFraming;

impl StreamableFraming {
    /// Create the framing
    pub fn new() -> Self {
        Self
    }
}

impl Default for StreamableFraming {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamFraming for StreamableFraming {
    fn message_frame(&self, envelope: &Value) -> Bytes {
        sse_message_frame(envelope)
    }

    fn keepalive_frame(&self) -> Bytes {
        sse_message_frame(&json!({
            "jsonrpc": "2.0",
            "method": "notifications/ping",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_preamble() {
        assert!(StreamableFraming::new().preamble().is_none());
    }

    #[test]
    fn test_keepalive_is_ping_envelope() {
        let frame = StreamableFraming::new().keepalive_frame();
        let text = String::from_utf8_lossy(&frame).to_string();
        assert!(text.starts_with("event: message\ndata: "));
        assert!(text.contains(r#""method":"notifications/ping""#));
    }
}
