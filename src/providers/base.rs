use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::message::Message;
use crate::models::tool::Tool;

/// Token accounting for one completed request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }

    /// Fold another turn's usage into a running total.
    pub fn accumulate(&mut self, other: &Usage) {
        fn add(a: &mut Option<i32>, b: Option<i32>) {
            if let Some(b) = b {
                *a = Some(a.unwrap_or(0) + b);
            }
        }
        add(&mut self.input_tokens, other.input_tokens);
        add(&mut self.output_tokens, other.output_tokens);
        add(&mut self.total_tokens, other.total_tokens);
    }
}

/// Base trait for AI providers (OpenAI, Anthropic, etc)
///
/// The single call shape the driver depends on: send the normalized
/// conversation plus optional tool schemas and system prompt, receive the
/// provider's response normalized into a [`Message`] with text parts and
/// tool-call parts. Implementations must tolerate responses with no usable
/// choices/candidates (return a message with empty content — the driver
/// reports those as an empty response).
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate the next message for the given conversation
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)>;
}
