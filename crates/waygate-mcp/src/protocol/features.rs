//! Per-Version Feature Matrix
//!
//! Each protocol revision enables a fixed set of features. The dispatcher
//! gates every incoming method against this matrix, the registries use it to
//! filter metadata fields, and the initialize handler derives the advertised
//! capabilities object from it.
//!
//! Note that JSON-RPC batching was introduced in 2025-03-26 and removed
//! again in 2025-06-18, so the matrix is not monotonic.

// Layer 2: Third-party crate imports
use serde_json::{json, Value};

// Layer 3: Internal module imports
use crate::protocol::version::{ProtocolVersion, V2025_03_26, V2025_06_18};

/// Feature switches for one protocol revision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureSet {
    /// `tools/*` methods
    pub tools: bool,
    /// `prompts/*` methods
    pub prompts: bool,
    /// `resources/*` methods
    pub resources: bool,
    /// Server-to-client `sampling/createMessage`
    pub sampling: bool,
    /// Server-to-client `roots/*`
    pub roots: bool,
    /// `ping`
    pub ping: bool,
    /// `notifications/progress`
    pub progress_notifications: bool,
    /// `annotations` field on tool metadata
    pub tool_annotations: bool,
    /// `audio` content items
    pub audio_content: bool,
    /// `completions/complete`
    pub completions: bool,
    /// `message` field on progress notifications
    pub progress_message: bool,
    /// JSON-RPC batch arrays
    pub json_rpc_batching: bool,
    /// Server-to-client `elicitation/create`
    pub elicitation: bool,
    /// `structuredContent` on tool results
    pub structured_outputs: bool,
    /// `resourceLinks` on tool results
    pub resource_links: bool,
    /// OAuth 2.1 resource-server enforcement
    pub oauth_resource_server: bool,
    /// RFC 8707 resource indicators
    pub resource_indicators: bool,
}

impl FeatureSet {
    /// Features of a protocol revision.
    ///
    /// Revisions between the known dates inherit the matrix of the newest
    /// revision at or before them, which matches how negotiation rounds
    /// requested versions down.
    pub fn for_version(version: &ProtocolVersion) -> Self {
        let v = version.as_str();
        Self {
            tools: true,
            prompts: true,
            resources: true,
            sampling: true,
            roots: true,
            ping: true,
            progress_notifications: true,
            tool_annotations: v >= V2025_03_26,
            audio_content: v >= V2025_03_26,
            completions: v >= V2025_03_26,
            progress_message: v >= V2025_03_26,
            json_rpc_batching: v >= V2025_03_26 && v < V2025_06_18,
            elicitation: v >= V2025_06_18,
            structured_outputs: v >= V2025_06_18,
            resource_links: v >= V2025_06_18,
            oauth_resource_server: v >= V2025_06_18,
            resource_indicators: v >= V2025_06_18,
        }
    }

    /// Whether a JSON-RPC method is enabled under this feature set.
    ///
    /// `initialize` is never gated: it is the method that establishes the
    /// version in the first place.
    pub fn allows_method(&self, method: &str) -> bool {
        match method {
            "initialize" => true,
            "ping" => self.ping,
            "tools/list" | "tools/call" => self.tools,
            "prompts/list" | "prompts/get" => self.prompts,
            "resources/list" | "resources/read" | "resources/templates/list" => self.resources,
            "completions/complete" => self.completions,
            "sampling/createMessage" => self.sampling,
            "roots/list" | "roots/read" | "roots/listDirectory" => self.roots,
            "elicitation/create" => self.elicitation,
            "notifications/progress" => self.progress_notifications,
            // Lifecycle notifications are always accepted
            "initialized" | "notifications/initialized" | "notifications/cancelled" => true,
            _ => false,
        }
    }

    /// Whether the method is known to this server at all, under any version.
    pub fn method_exists(method: &str) -> bool {
        matches!(
            method,
            "initialize"
                | "ping"
                | "tools/list"
                | "tools/call"
                | "prompts/list"
                | "prompts/get"
                | "resources/list"
                | "resources/read"
                | "resources/templates/list"
                | "completions/complete"
                | "sampling/createMessage"
                | "roots/list"
                | "roots/read"
                | "roots/listDirectory"
                | "elicitation/create"
                | "initialized"
                | "notifications/initialized"
                | "notifications/cancelled"
                | "notifications/progress"
        )
    }

    /// Build the capabilities object advertised by `initialize`.
    ///
    /// Every enabled feature family becomes a key whose value advertises its
    /// optional sub-capabilities.
    pub fn capabilities(&self) -> Value {
        let mut caps = serde_json::Map::new();
        if self.tools {
            caps.insert("tools".to_string(), json!({"listChanged": true}));
        }
        if self.prompts {
            caps.insert("prompts".to_string(), json!({"listChanged": true}));
        }
        if self.resources {
            caps.insert(
                "resources".to_string(),
                json!({"subscribe": false, "listChanged": true}),
            );
        }
        if self.sampling {
            caps.insert("sampling".to_string(), json!({}));
        }
        if self.roots {
            caps.insert("roots".to_string(), json!({"listChanged": true}));
        }
        if self.completions {
            caps.insert("completions".to_string(), json!({}));
        }
        if self.elicitation {
            caps.insert("elicitation".to_string(), json!({}));
        }
        if self.progress_notifications {
            caps.insert("logging".to_string(), json!({}));
        }
        Value::Object(caps)
    }

    /// Feature names advertised in protected-resource metadata.
    pub fn advertised_names(&self) -> Vec<&'static str> {
        let mut names = vec!["tools", "prompts", "resources", "sampling", "roots", "ping"];
        if self.tool_annotations {
            names.push("tool_annotations");
        }
        if self.audio_content {
            names.push("audio_content");
        }
        if self.completions {
            names.push("completions");
        }
        if self.json_rpc_batching {
            names.push("json_rpc_batching");
        }
        if self.elicitation {
            names.push("elicitation");
        }
        if self.structured_outputs {
            names.push("structured_outputs");
        }
        if self.resource_links {
            names.push("resource_links");
        }
        if self.resource_indicators {
            names.push("resource_indicators");
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::version::V2024_11_05;

    fn features(v: &str) -> FeatureSet {
        FeatureSet::for_version(&ProtocolVersion::new(v).unwrap())
    }

    #[test]
    fn test_base_features_on_all_versions() {
        for v in [V2024_11_05, V2025_03_26, V2025_06_18] {
            let f = features(v);
            assert!(f.tools && f.prompts && f.resources && f.sampling && f.roots && f.ping);
            assert!(f.progress_notifications);
        }
    }

    #[test]
    fn test_2025_03_26_additions() {
        let f = features(V2025_03_26);
        assert!(f.tool_annotations);
        assert!(f.audio_content);
        assert!(f.completions);
        assert!(f.progress_message);
        assert!(!f.elicitation);
        assert!(!f.structured_outputs);
    }

    #[test]
    fn test_batching_enabled_only_on_2025_03_26() {
        assert!(!features(V2024_11_05).json_rpc_batching);
        assert!(features(V2025_03_26).json_rpc_batching);
        assert!(!features(V2025_06_18).json_rpc_batching);
    }

    #[test]
    fn test_2025_06_18_additions() {
        let f = features(V2025_06_18);
        assert!(f.elicitation);
        assert!(f.structured_outputs);
        assert!(f.resource_links);
        assert!(f.oauth_resource_server);
        assert!(f.resource_indicators);
    }

    #[test]
    fn test_method_gating() {
        let old = features(V2024_11_05);
        assert!(old.allows_method("tools/call"));
        assert!(!old.allows_method("completions/complete"));
        assert!(!old.allows_method("elicitation/create"));
        assert!(old.allows_method("notifications/cancelled"));

        let mid = features(V2025_03_26);
        assert!(mid.allows_method("completions/complete"));
        assert!(!mid.allows_method("elicitation/create"));

        let new = features(V2025_06_18);
        assert!(new.allows_method("elicitation/create"));
    }

    #[test]
    fn test_unknown_method_never_allowed() {
        for v in [V2024_11_05, V2025_03_26, V2025_06_18] {
            assert!(!features(v).allows_method("tools/uninstall"));
        }
        assert!(!FeatureSet::method_exists("tools/uninstall"));
        assert!(FeatureSet::method_exists("elicitation/create"));
    }

    #[test]
    fn test_capabilities_reflect_version() {
        let old = features(V2024_11_05).capabilities();
        assert_eq!(old["tools"]["listChanged"], true);
        assert!(old.get("elicitation").is_none());
        assert!(old.get("completions").is_none());

        let new = features(V2025_06_18).capabilities();
        assert!(new.get("elicitation").is_some());
        assert!(new.get("completions").is_some());
    }

    #[test]
    fn test_advertised_names() {
        let names = features(V2025_06_18).advertised_names();
        assert!(names.contains(&"elicitation"));
        assert!(names.contains(&"resource_indicators"));
        assert!(!names.contains(&"json_rpc_batching"));

        let names = features(V2025_03_26).advertised_names();
        assert!(names.contains(&"json_rpc_batching"));
    }
}
