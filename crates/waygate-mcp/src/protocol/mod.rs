//! Protocol Layer
//!
//! JSON-RPC 2.0 envelope types, protocol-version negotiation, the
//! per-version feature matrix, and content-item validation. Everything here
//! is pure: no I/O, no storage, no HTTP.

pub mod content;
pub mod features;
pub mod message;
pub mod version;

pub use content::{validate_content_item, Content, ALLOWED_AUDIO_MIME_TYPES, MAX_AUDIO_BYTES};
pub use features::FeatureSet;
pub use message::{
    JsonRpcError, JsonRpcMessage, JsonRpcMessageTrait, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId, JSONRPC_VERSION,
};
pub use version::{ProtocolVersion, VersionNegotiator, V2024_11_05, V2025_03_26, V2025_06_18};
