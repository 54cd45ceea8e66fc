use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{Provider, Usage};
use super::configs::AnthropicProviderConfig;
use crate::models::message::{Message, MessageContent, META_TOOL_CALL_ID};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn get_usage(data: &Value) -> Usage {
        let usage = match data.get("usage") {
            Some(usage) => usage,
            None => return Usage::default(),
        };

        let input_tokens = usage
            .get("input_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);
        let output_tokens = usage
            .get("output_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);
        let total_tokens = match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        };

        Usage::new(input_tokens, output_tokens, total_tokens)
    }

    /// Convert internal messages to Anthropic's messages array.
    ///
    /// The system prompt travels as a top-level `system` field, not a
    /// message; tool results become `tool_result` blocks on user messages.
    fn messages_to_anthropic_spec(messages: &[Message]) -> Vec<Value> {
        let mut anthropic_messages = Vec::new();

        for message in messages {
            match message.role {
                // System text is carried separately; skip it here
                Role::System => {}
                Role::User => {
                    anthropic_messages.push(json!({
                        "role": "user",
                        "content": [{"type": "text", "text": message.text()}]
                    }));
                }
                Role::Assistant => {
                    let mut blocks = Vec::new();
                    for content in &message.content {
                        match content {
                            MessageContent::Text(text) => {
                                if !text.text.is_empty() {
                                    blocks.push(json!({"type": "text", "text": text.text}));
                                }
                            }
                            MessageContent::ToolRequest(request) => {
                                if let Ok(tool_call) = &request.tool_call {
                                    blocks.push(json!({
                                        "type": "tool_use",
                                        "id": request.id,
                                        "name": tool_call.name,
                                        "input": tool_call.arguments
                                    }));
                                }
                            }
                        }
                    }
                    if !blocks.is_empty() {
                        anthropic_messages.push(json!({
                            "role": "assistant",
                            "content": blocks
                        }));
                    }
                }
                Role::Tool => {
                    anthropic_messages.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": message.metadata_str(META_TOOL_CALL_ID)
                                .unwrap_or_default(),
                            "content": message.text()
                        }]
                    }));
                }
            }
        }

        anthropic_messages
    }

    fn tools_to_anthropic_spec(tools: &[Tool]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.parameters
                })
            })
            .collect()
    }

    /// Normalize an Anthropic response body into an internal message.
    ///
    /// An empty `content` array yields an empty message, which the driver
    /// reports as an empty response together with any `stop_reason` detail.
    fn response_to_message(response: &Value) -> Message {
        let mut message = Message::assistant();

        if let Some(stop_reason) = response.get("stop_reason").and_then(|s| s.as_str()) {
            message = message.with_metadata("stop_reason", stop_reason);
        }

        let Some(blocks) = response.get("content").and_then(|c| c.as_array()) else {
            return message;
        };

        for block in blocks {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                        if !text.is_empty() {
                            message = message.with_text(text);
                        }
                    }
                }
                Some("tool_use") => {
                    let id = block["id"].as_str().unwrap_or_default().to_string();
                    let name = block["name"].as_str().unwrap_or_default().to_string();
                    let input = block.get("input").cloned().unwrap_or(json!({}));
                    message = message.with_tool_request(id, Ok(ToolCall::new(name, input)));
                }
                _ => {}
            }
        }

        message
    }

    async fn post(&self, payload: Value) -> Result<Value> {
        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
                Err(anyhow!("Server error: {}", status))
            }
            status => {
                let error_text = response.text().await?;
                Err(anyhow!("Request failed: {} - {}", status, error_text))
            }
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        let anthropic_messages = Self::messages_to_anthropic_spec(messages);

        let mut payload = json!({
            "model": self.config.model,
            "messages": anthropic_messages,
            "max_tokens": self.config.max_tokens.unwrap_or(4096)
        });

        if !system.is_empty() {
            payload
                .as_object_mut()
                .unwrap()
                .insert("system".to_string(), json!(system));
        }
        if !tools.is_empty() {
            payload.as_object_mut().unwrap().insert(
                "tools".to_string(),
                json!(Self::tools_to_anthropic_spec(tools)),
            );
        }
        if let Some(temp) = self.config.temperature {
            payload
                .as_object_mut()
                .unwrap()
                .insert("temperature".to_string(), json!(temp));
        }

        // Make request
        let response = self.post(payload).await?;

        let message = Self::response_to_message(&response);
        let usage = Self::get_usage(&response);

        Ok((message, usage))
    }
}
