use anyhow::{anyhow, Result};
use regex::Regex;
use serde_json::{json, Value};

use crate::errors::AgentError;
use crate::models::message::{Message, MessageContent, META_TOOL_CALL_ID, META_TOOL_NAME};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

/// Convert internal Message format to OpenAI's API message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        match message.role {
            Role::System => {
                messages_spec.push(json!({
                    "role": "system",
                    "content": message.text()
                }));
            }
            Role::User => {
                messages_spec.push(json!({
                    "role": "user",
                    "content": message.text()
                }));
            }
            Role::Assistant => {
                let mut converted = json!({"role": "assistant"});
                let mut trailing = Vec::new();

                for content in &message.content {
                    match content {
                        MessageContent::Text(text) => {
                            if !text.text.is_empty() {
                                converted["content"] = json!(text.text);
                            }
                        }
                        MessageContent::ToolRequest(request) => match &request.tool_call {
                            Ok(tool_call) => {
                                let sanitized_name = sanitize_function_name(&tool_call.name);
                                let tool_calls = converted
                                    .as_object_mut()
                                    .unwrap()
                                    .entry("tool_calls")
                                    .or_insert(json!([]));

                                tool_calls.as_array_mut().unwrap().push(json!({
                                    "id": request.id,
                                    "type": "function",
                                    "function": {
                                        "name": sanitized_name,
                                        "arguments": tool_call.arguments.to_string(),
                                    }
                                }));
                            }
                            Err(e) => {
                                // A malformed call is answered with an error
                                // tool message so the model can correct it
                                trailing.push(json!({
                                    "role": "tool",
                                    "content": format!("Error: {}", e),
                                    "tool_call_id": request.id
                                }));
                            }
                        },
                    }
                }

                if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
                    messages_spec.push(converted);
                }
                messages_spec.extend(trailing);
            }
            Role::Tool => {
                messages_spec.push(json!({
                    "role": "tool",
                    "content": message.text(),
                    "tool_call_id": message.metadata_str(META_TOOL_CALL_ID).unwrap_or_default()
                }));
            }
        }
    }

    messages_spec
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            }
        }));
    }

    Ok(result)
}

/// Convert OpenAI's API response to internal Message format
///
/// A response with no choices normalizes to an assistant message with empty
/// content; the driver reports that as an empty response.
pub fn openai_response_to_message(response: Value) -> Result<Message> {
    let mut message = Message::assistant();
    let Some(original) = response["choices"].get(0).map(|c| c["message"].clone()) else {
        return Ok(message);
    };

    if let Some(text) = original.get("content").and_then(|t| t.as_str()) {
        if !text.is_empty() {
            message = message.with_text(text);
        }
    }

    if let Some(tool_calls) = original.get("tool_calls").and_then(|t| t.as_array()) {
        for tool_call in tool_calls {
            let id = tool_call["id"].as_str().unwrap_or_default().to_string();
            let function_name = tool_call["function"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let arguments = tool_call["function"]["arguments"]
                .as_str()
                .unwrap_or_default()
                .to_string();

            if !is_valid_function_name(&function_name) {
                let error = AgentError::ToolNotFound(format!(
                    "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
                    function_name
                ));
                message = message.with_tool_request(id, Err(error));
            } else {
                match serde_json::from_str::<Value>(&arguments) {
                    Ok(params) => {
                        message = message
                            .with_tool_request(id, Ok(ToolCall::new(&function_name, params)));
                    }
                    Err(e) => {
                        let error = AgentError::InvalidParameters(format!(
                            "Could not interpret tool use parameters for id {}: {}",
                            id, e
                        ));
                        message = message.with_tool_request(id, Err(error));
                    }
                }
            }
        }
    }

    Ok(message)
}

/// Build the tool-result message the agent appends to history.
pub fn tool_result_message(call_id: &str, name: &str, content: &str) -> Message {
    Message::tool()
        .with_text(content)
        .with_metadata(META_TOOL_NAME, name)
        .with_metadata(META_TOOL_CALL_ID, call_id)
}

pub fn sanitize_function_name(name: &str) -> String {
    let re = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
    re.replace_all(name, "_").to_string()
}

pub fn is_valid_function_name(name: &str) -> bool {
    let re = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
    re.is_match(name)
}

/// Detect OpenAI's context-length error object so it can be surfaced
/// distinctly from generic API failures.
pub fn check_openai_context_length_error(error: &Value) -> Option<anyhow::Error> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("no message");
        Some(anyhow!("Context length exceeded: {}", message))
    } else {
        None
    }
}
