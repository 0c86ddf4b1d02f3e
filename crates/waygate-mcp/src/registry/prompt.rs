//! Prompt Registry

// Layer 1: Standard library imports
use std::sync::Arc;
use std::sync::RwLock;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

// Layer 3: Internal module imports
use crate::error::RegistryError;
use crate::protocol::FeatureSet;
use crate::registry::{Handler, RequestContext};

/// One declared prompt argument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name
    pub name: String,
    /// What the argument is for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether `prompts/get` requires it
    #[serde(default)]
    pub required: bool,
}

/// Metadata a prompt is registered with
#[derive(Debug, Clone)]
pub struct PromptDefinition {
    /// Prompt name, the `prompts/get` lookup key
    pub name: String,
    /// Human-readable description
    pub description: Option<String>,
    /// Declared arguments
    pub arguments: Vec<PromptArgument>,
}

struct PromptEntry {
    definition: PromptDefinition,
    handler: Arc<dyn Handler>,
}

/// Registry of named prompt handlers.
///
/// A prompt handler receives `{name, arguments}` params and returns the
/// `prompts/get` result object (`{description?, messages}`).
pub struct PromptRegistry {
    entries: RwLock<Vec<PromptEntry>>,
}

impl PromptRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Register a prompt; last write wins, listing position is kept.
    pub fn register(&self, definition: PromptDefinition, handler: Arc<dyn Handler>) {
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
            entries.push(PromptEntry {
                definition,
                handler,
            });
        }
    }

    /// Ordered metadata view.
    pub fn list(&self, _features: &FeatureSet) -> Vec<Value> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries
            .iter()
            .map(|entry| {
                let def = &entry.definition;
                let mut item = json!({"name": def.name});
                if let Some(description) = &def.description {
                    item["description"] = json!(description);
                }
                if !def.arguments.is_empty() {
                    item["arguments"] = json!(def.arguments);
                }
                item
            })
            .collect()
    }

    /// Resolve a prompt: validates required arguments, then invokes the
    /// handler.
    pub fn execute(
        &self,
        name: &str,
        params: &Value,
        context: &RequestContext,
    ) -> Result<Value, RegistryError> {
        let (required, handler) = {
            let entries = self
                .entries
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let entry = entries
                .iter()
                .find(|entry| entry.definition.name == name)
                .ok_or_else(|| RegistryError::NotFound {
                    kind: "prompt",
                    name: name.to_string(),
                })?;
            let required: Vec<String> = entry
                .definition
                .arguments
                .iter()
                .filter(|a| a.required)
                .map(|a| a.name.clone())
                .collect();
            (required, Arc::clone(&entry.handler))
        };

        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
        for arg in &required {
            if arguments.get(arg).is_none() {
                return Err(RegistryError::ExecutionFailed {
                    kind: "prompt",
                    name: name.to_string(),
                    message: format!("missing required argument: {arg}"),
                });
            }
        }

        handler.call(params, context).map_err(|e| {
            warn!(prompt = name, error = %e, "prompt handler failed");
            RegistryError::ExecutionFailed {
                kind: "prompt",
                name: name.to_string(),
                message: e.to_string(),
            }
        })
    }
}

impl Default for PromptRegistry {
    fn default() -> Self {
        Self::new()
    }
}
