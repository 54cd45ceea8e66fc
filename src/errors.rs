use serde::{Deserialize, Serialize};
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("Tool not permitted: {0}")]
    ToolForbidden(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Empty prompt: a chat turn requires non-empty input")]
    EmptyPrompt,

    #[error("Turn limit of {0} exceeded without a final answer")]
    TurnLimitExceeded(u32),

    #[error("Driver stalled: {0}")]
    DriverStalled(String),

    #[error("Provider error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;
