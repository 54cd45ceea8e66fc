use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::ToolHandler;
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::Tool;

/// Maps stable tool names to handlers plus their declared schemas.
///
/// Built once during setup, then shared immutably (typically behind an
/// `Arc`) between the agent and the executor.
#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its declared name.
    ///
    /// Fails if the name is already taken; re-registration is not a way to
    /// toggle permissions — use the executor's allow-list for that.
    pub fn register(&mut self, handler: impl ToolHandler + 'static) -> AgentResult<()> {
        self.register_shared(Arc::new(handler))
    }

    /// Register an already-shared handler.
    pub fn register_shared(&mut self, handler: Arc<dyn ToolHandler>) -> AgentResult<()> {
        let name = handler.definition().name;
        if self.handlers.contains_key(&name) {
            return Err(AgentError::DuplicateTool(name));
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.handlers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Definitions of all registered tools, for the driver request.
    pub fn definitions(&self) -> Vec<Tool> {
        self.handlers.values().map(|h| h.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Check `arguments` against a declared JSON schema.
///
/// Covers required-field presence and primitive `type` tags on top-level
/// properties; nested object internals are the tool body's concern. Returns
/// a human-readable description of the first mismatch so it can be surfaced
/// to the model as a tool result.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    let Some(args) = arguments.as_object() else {
        return Err(format!("arguments must be a JSON object, got: {arguments}"));
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            if !args.contains_key(field) {
                return Err(format!("missing required argument '{field}'"));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Ok(());
    };

    for (name, value) in args {
        let Some(expected) = properties
            .get(name)
            .and_then(|p| p.get("type"))
            .and_then(|t| t.as_str())
        else {
            continue;
        };
        if !type_tag_matches(expected, value) {
            return Err(format!(
                "argument '{name}' should be of type {expected}, got: {value}"
            ));
        }
    }

    Ok(())
}

fn type_tag_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown tags are not enforced
        _ => true,
    }
}
