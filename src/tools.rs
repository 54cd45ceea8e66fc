//! Tool handling: a registry of named handlers with declared schemas, and
//! an executor that validates arguments, runs the handler and journals the
//! outcome on the event bus.

pub mod executor;
pub mod registry;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::AgentResult;
use crate::models::tool::Tool;

/// An invocable unit the model can call by name.
///
/// Side effects live entirely inside [`call`](ToolHandler::call); the
/// executor never touches the filesystem itself.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Name, description and parameter schema advertised to the model.
    fn definition(&self) -> Tool;

    /// Run the tool with validated arguments.
    async fn call(&self, arguments: Value) -> AgentResult<String>;
}

/// Outcome of one tool execution, fed back to the model as a tool message.
///
/// Validation and handler failures land here as `is_error = true` rather
/// than as error returns, so the conversation can surface them to the model
/// instead of crashing the turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success<S: Into<String>>(content: S) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error<S: Into<String>>(content: S) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}
