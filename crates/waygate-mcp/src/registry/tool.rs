//! Tool Registry

// Layer 1: Standard library imports
use std::sync::Arc;
use std::sync::RwLock;

// Layer 2: Third-party crate imports
use serde_json::{json, Value};
use tracing::warn;

// Layer 3: Internal module imports
use crate::error::RegistryError;
use crate::protocol::FeatureSet;
use crate::registry::{Handler, RequestContext};

/// Metadata a tool is registered with
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    /// Tool name, the `tools/call` lookup key
    pub name: String,
    /// Human-readable description
    pub description: Option<String>,
    /// JSON schema for the tool arguments
    pub input_schema: Value,
    /// Optional behavior annotations (2025-03-26 and newer)
    pub annotations: Option<Value>,
}

struct ToolEntry {
    definition: ToolDefinition,
    handler: Arc<dyn Handler>,
}

/// Registry of named tool handlers.
pub struct ToolRegistry {
    entries: RwLock<Vec<ToolEntry>>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Register a tool. Last write wins: an existing name keeps its listing
    /// position but gets the new definition and handler.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::InvalidSchema` when `input_schema` is not a
    /// JSON object.
    pub fn register(
        &self,
        definition: ToolDefinition,
        handler: Arc<dyn Handler>,
    ) -> Result<(), RegistryError> {
        if !definition.input_schema.is_object() {
            return Err(RegistryError::InvalidSchema {
                kind: "tool",
                name: definition.name.clone(),
                message: "input schema must be a JSON object".to_string(),
            });
        }
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(existing) = entries
            .iter_mut()
            .find(|entry| entry.definition.name == definition.name)
        {
            existing.definition = definition;
            existing.handler = handler;
        } else {
            entries.push(ToolEntry {
                definition,
                handler,
            });
        }
        Ok(())
    }

    /// Ordered metadata view, filtered by the caller's feature set. The
    /// `annotations` field is omitted on versions that predate it.
    pub fn list(&self, features: &FeatureSet) -> Vec<Value> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries
            .iter()
            .map(|entry| {
                let def = &entry.definition;
                let mut item = json!({
                    "name": def.name,
                    "inputSchema": def.input_schema,
                });
                if let Some(description) = &def.description {
                    item["description"] = json!(description);
                }
                if features.tool_annotations {
                    if let Some(annotations) = &def.annotations {
                        item["annotations"] = annotations.clone();
                    }
                }
                item
            })
            .collect()
    }

    /// Invoke a tool by name.
    pub fn execute(
        &self,
        name: &str,
        arguments: &Value,
        context: &RequestContext,
    ) -> Result<Value, RegistryError> {
        let handler = {
            let entries = self
                .entries
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            entries
                .iter()
                .find(|entry| entry.definition.name == name)
                .map(|entry| Arc::clone(&entry.handler))
        };
        let handler = handler.ok_or_else(|| RegistryError::NotFound {
            kind: "tool",
            name: name.to_string(),
        })?;
        handler.call(arguments, context).map_err(|e| {
            warn!(tool = name, error = %e, "tool handler failed");
            RegistryError::ExecutionFailed {
                kind: "tool",
                name: name.to_string(),
                message: e.to_string(),
            }
        })
    }

    /// Whether a tool with this name exists
    pub fn contains(&self, name: &str) -> bool {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.iter().any(|entry| entry.definition.name == name)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
