//! Resource Registry
//!
//! Resources are addressed by URI. Registrations come in two forms: exact
//! URIs and templates with `{variable}` placeholders, each placeholder
//! matching one path segment (`[^/]+`). Lookup tries exact URIs first, then
//! templates in registration order.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::sync::RwLock;

// Layer 2: Third-party crate imports
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::warn;

// Layer 3: Internal module imports
use crate::error::RegistryError;
use crate::protocol::FeatureSet;
use crate::registry::{Handler, RequestContext};

/// Metadata a resource is registered with
#[derive(Debug, Clone)]
pub struct ResourceDefinition {
    /// Exact URI or `{variable}` template
    pub uri: String,
    /// Display name
    pub name: String,
    /// Human-readable description
    pub description: Option<String>,
    /// MIME type of the content the handler returns
    pub mime_type: Option<String>,
}

/// A compiled `{variable}` URI template
#[derive(Debug)]
struct UriTemplate {
    pattern: Regex,
    variables: Vec<String>,
}

impl UriTemplate {
    /// Compile a template; returns `None` for URIs without placeholders.
    fn compile(uri: &str) -> Result<Option<Self>, RegistryError> {
        if !uri.contains('{') {
            return Ok(None);
        }
        let mut pattern = String::from("^");
        let mut variables = Vec::new();
        let mut rest = uri;
        while let Some(open) = rest.find('{') {
            let (literal, tail) = rest.split_at(open);
            pattern.push_str(&regex::escape(literal));
            let Some(close) = tail.find('}') else {
                return Err(RegistryError::InvalidSchema {
                    kind: "resource",
                    name: uri.to_string(),
                    message: "unterminated template variable".to_string(),
                });
            };
            let variable = &tail[1..close];
            if variable.is_empty() {
                return Err(RegistryError::InvalidSchema {
                    kind: "resource",
                    name: uri.to_string(),
                    message: "empty template variable".to_string(),
                });
            }
            variables.push(variable.to_string());
            pattern.push_str("([^/]+)");
            rest = &tail[close + 1..];
        }
        pattern.push_str(&regex::escape(rest));
        pattern.push('$');
        let pattern = Regex::new(&pattern).map_err(|e| RegistryError::InvalidSchema {
            kind: "resource",
            name: uri.to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(Self { pattern, variables }))
    }

    /// Match a URI, yielding the extracted variables.
    fn matches(&self, uri: &str) -> Option<Map<String, Value>> {
        let captures = self.pattern.captures(uri)?;
        let mut variables = Map::new();
        for (index, name) in self.variables.iter().enumerate() {
            let value = captures.get(index + 1)?.as_str();
            variables.insert(name.clone(), Value::String(value.to_string()));
        }
        Some(variables)
    }
}

struct ResourceEntry {
    definition: ResourceDefinition,
    template: Option<UriTemplate>,
    handler: Arc<dyn Handler>,
}

/// Registry of URI-addressed resource handlers.
pub struct ResourceRegistry {
    entries: RwLock<Vec<ResourceEntry>>,
}

impl ResourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Register a resource or template; last write wins per URI, listing
    /// position is kept.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::InvalidSchema` for malformed templates.
    pub fn register(
        &self,
        definition: ResourceDefinition,
        handler: Arc<dyn Handler>,
    ) -> Result<(), RegistryError> {
        let template = UriTemplate::compile(&definition.uri)?;
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(existing) = entries
            .iter_mut()
            .find(|entry| entry.definition.uri == definition.uri)
        {
            existing.definition = definition;
            existing.template = template;
            existing.handler = handler;
        } else {
            entries.push(ResourceEntry {
                definition,
                template,
                handler,
            });
        }
        Ok(())
    }

    /// Ordered metadata for `resources/list` (exact URIs only).
    pub fn list(&self, _features: &FeatureSet) -> Vec<Value> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries
            .iter()
            .filter(|entry| entry.template.is_none())
            .map(|entry| Self::describe(&entry.definition, "uri"))
            .collect()
    }

    /// Ordered metadata for `resources/templates/list`.
    pub fn list_templates(&self, _features: &FeatureSet) -> Vec<Value> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries
            .iter()
            .filter(|entry| entry.template.is_some())
            .map(|entry| Self::describe(&entry.definition, "uriTemplate"))
            .collect()
    }

    fn describe(definition: &ResourceDefinition, uri_key: &str) -> Value {
        let mut item = json!({
            uri_key: definition.uri,
            "name": definition.name,
        });
        if let Some(description) = &definition.description {
            item["description"] = json!(description);
        }
        if let Some(mime_type) = &definition.mime_type {
            item["mimeType"] = json!(mime_type);
        }
        item
    }

    /// Read a resource by URI: exact match first, then templates in
    /// registration order (first registered wins). Template variables are
    /// merged into the params the handler sees under `"variables"`.
    pub fn execute(
        &self,
        uri: &str,
        context: &RequestContext,
    ) -> Result<Value, RegistryError> {
        let (handler, params) = {
            let entries = self
                .entries
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);

            let exact = entries
                .iter()
                .find(|entry| entry.template.is_none() && entry.definition.uri == uri)
                .map(|entry| (Arc::clone(&entry.handler), Map::new()));

            let matched = exact.or_else(|| {
                entries.iter().find_map(|entry| {
                    let template = entry.template.as_ref()?;
                    let variables = template.matches(uri)?;
                    Some((Arc::clone(&entry.handler), variables))
                })
            });

            let Some((handler, variables)) = matched else {
                return Err(RegistryError::NotFound {
                    kind: "resource",
                    name: uri.to_string(),
                });
            };

            let mut params = Map::new();
            params.insert("uri".to_string(), Value::String(uri.to_string()));
            if !variables.is_empty() {
                params.insert("variables".to_string(), Value::Object(variables));
            }
            (handler, Value::Object(params))
        };

        handler.call(&params, context).map_err(|e| {
            warn!(uri, error = %e, "resource handler failed");
            RegistryError::ExecutionFailed {
                kind: "resource",
                name: uri.to_string(),
                message: e.to_string(),
            }
        })
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
