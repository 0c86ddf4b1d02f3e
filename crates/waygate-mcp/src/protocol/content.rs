//! Content Items
//!
//! Typed content blocks carried in tool results, prompt messages, and
//! resource reads. Audio content is gated by the feature matrix and
//! validated strictly: allow-listed MIME types and a decoded-size ceiling.

// Layer 2: Third-party crate imports
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Layer 3: Internal module imports
use crate::error::ProtocolError;
use crate::protocol::features::FeatureSet;

/// Maximum decoded audio payload: 50 MiB.
pub const MAX_AUDIO_BYTES: usize = 50 * 1024 * 1024;

/// MIME types accepted for audio content.
pub const ALLOWED_AUDIO_MIME_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/wav",
    "audio/ogg",
    "audio/mp4",
    "audio/webm",
    "audio/flac",
    "audio/aac",
];

/// A content block inside a tool result or prompt message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    /// Plain text
    Text {
        /// The text payload
        text: String,
    },
    /// Base64-encoded image
    Image {
        /// Base64 payload
        data: String,
        /// Image MIME type
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Base64-encoded audio (2025-03-26 and newer)
    Audio {
        /// Base64 payload
        data: String,
        /// Audio MIME type, restricted to [`ALLOWED_AUDIO_MIME_TYPES`]
        #[serde(rename = "mimeType")]
        mime_type: String,
        /// Optional duration in seconds
        #[serde(skip_serializing_if = "Option::is_none")]
        duration: Option<f64>,
        /// Optional display name
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Optional annotations
        #[serde(skip_serializing_if = "Option::is_none")]
        annotations: Option<Value>,
    },
}

impl Content {
    /// Build a text content block
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Validate a raw content item under the session's feature set.
///
/// Text and image items are accepted on every revision; audio items only
/// where the matrix enables them, and then only with an allow-listed MIME
/// type, valid base64, and a decoded size within [`MAX_AUDIO_BYTES`].
///
/// # Errors
///
/// Returns `ProtocolError::InvalidParams` (wire code `-32602`) on any
/// violation.
pub fn validate_content_item(item: &Value, features: &FeatureSet) -> Result<(), ProtocolError> {
    let content_type = item
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::InvalidParams("content item missing type".to_string()))?;

    match content_type {
        "text" => {
            if item.get("text").and_then(Value::as_str).is_none() {
                return Err(ProtocolError::InvalidParams(
                    "text content requires a text field".to_string(),
                ));
            }
            Ok(())
        }
        "image" => {
            if item.get("data").and_then(Value::as_str).is_none()
                || item.get("mimeType").and_then(Value::as_str).is_none()
            {
                return Err(ProtocolError::InvalidParams(
                    "image content requires data and mimeType".to_string(),
                ));
            }
            Ok(())
        }
        "audio" => validate_audio_item(item, features),
        other => Err(ProtocolError::InvalidParams(format!(
            "unsupported content type: {other}"
        ))),
    }
}

fn validate_audio_item(item: &Value, features: &FeatureSet) -> Result<(), ProtocolError> {
    if !features.audio_content {
        return Err(ProtocolError::InvalidParams(
            "audio content not supported on this protocol version".to_string(),
        ));
    }

    let mime_type = item
        .get("mimeType")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::InvalidParams("audio content requires mimeType".to_string()))?;
    if !ALLOWED_AUDIO_MIME_TYPES.contains(&mime_type) {
        return Err(ProtocolError::InvalidParams(format!(
            "unsupported audio mimeType: {mime_type}"
        )));
    }

    let data = item
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::InvalidParams("audio content requires data".to_string()))?;

    // Base64 expands by 4/3; reject oversized payloads before decoding.
    if data.len() / 4 * 3 > MAX_AUDIO_BYTES + 3 {
        return Err(ProtocolError::InvalidParams(format!(
            "audio payload exceeds {MAX_AUDIO_BYTES} bytes"
        )));
    }

    let decoded = BASE64_STANDARD
        .decode(data)
        .map_err(|_| ProtocolError::InvalidParams("audio data is not valid base64".to_string()))?;
    if decoded.len() > MAX_AUDIO_BYTES {
        return Err(ProtocolError::InvalidParams(format!(
            "audio payload exceeds {MAX_AUDIO_BYTES} bytes"
        )));
    }

    if let Some(duration) = item.get("duration") {
        if !duration.is_number() {
            return Err(ProtocolError::InvalidParams(
                "audio duration must be a number".to_string(),
            ));
        }
    }

    Ok(())
}
