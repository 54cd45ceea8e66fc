use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use super::registry::{validate_arguments, ToolRegistry};
use super::ToolOutput;
use crate::errors::{AgentError, AgentResult};
use crate::events::bus::EventBus;
use crate::events::types::{Event, RequestId, ToolEvent};

/// Validates, runs and journals tool calls resolved through a registry.
///
/// Lookup failures (`ToolNotFound`) and permission failures (`ToolForbidden`)
/// are error returns; argument validation failures and handler errors come
/// back in-band as [`ToolOutput`] with `is_error = true` so the turn loop can
/// surface them to the model and continue.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    bus: Arc<EventBus>,
    allowed: Mutex<Option<HashSet<String>>>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, bus: Arc<EventBus>) -> Self {
        Self {
            registry,
            bus,
            allowed: Mutex::new(None),
        }
    }

    /// Restrict execution to the named tools, without re-registering
    /// anything. `None` permits every registered tool.
    ///
    /// Supports runtime permission toggles, e.g. disabling write/execute
    /// tools mid-session.
    pub fn set_allowed(&self, allowed: Option<HashSet<String>>) {
        *self.allowed.lock().unwrap() = allowed;
    }

    fn is_permitted(&self, name: &str) -> bool {
        match self.allowed.lock().unwrap().as_ref() {
            Some(allowed) => allowed.contains(name),
            None => true,
        }
    }

    /// Resolve `name`, validate `arguments` and run the tool, correlating
    /// every emitted event with `request_id`.
    pub async fn execute_by_name(
        &self,
        name: &str,
        arguments: Value,
        request_id: RequestId,
    ) -> AgentResult<ToolOutput> {
        let Some(handler) = self.registry.get(name) else {
            self.emit_error(request_id, name, "tool not registered");
            return Err(AgentError::ToolNotFound(name.to_string()));
        };

        if !self.is_permitted(name) {
            self.emit_error(request_id, name, "tool not permitted");
            return Err(AgentError::ToolForbidden(name.to_string()));
        }

        let definition = handler.definition();
        if let Err(reason) = validate_arguments(&definition.parameters, &arguments) {
            // Returned, not raised: the model gets to see and correct its
            // own invocation.
            return Ok(ToolOutput::error(format!(
                "Invalid arguments for tool '{name}': {reason}"
            )));
        }

        self.bus
            .publish(&Event::Tool(ToolEvent::ToolCallStarted {
                request_id,
                name: name.to_string(),
            }));
        tracing::debug!(%request_id, tool = name, "executing tool call");

        match handler.call(arguments).await {
            Ok(result) => {
                self.bus
                    .publish(&Event::Tool(ToolEvent::ToolCallFinished {
                        request_id,
                        name: name.to_string(),
                        result: result.clone(),
                    }));
                Ok(ToolOutput::success(result))
            }
            Err(e) => {
                let error = e.to_string();
                self.emit_error(request_id, name, &error);
                Ok(ToolOutput::error(format!(
                    "The tool call failed with the following error:\n{error}"
                )))
            }
        }
    }

    fn emit_error(&self, request_id: RequestId, name: &str, error: &str) {
        tracing::warn!(%request_id, tool = name, error, "tool call failed");
        self.bus.publish(&Event::Tool(ToolEvent::ToolCallError {
            request_id,
            name: name.to_string(),
            error: error.to_string(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::EventKind;
    use crate::models::tool::Tool;
    use crate::tools::ToolHandler;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingEcho {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ToolHandler for CountingEcho {
        fn definition(&self) -> Tool {
            Tool::new(
                "echo",
                "Echoes back the input",
                json!({
                    "type": "object",
                    "properties": {"message": {"type": "string"}},
                    "required": ["message"]
                }),
            )
        }

        async fn call(&self, arguments: Value) -> AgentResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(arguments["message"].as_str().unwrap_or("").to_string())
        }
    }

    struct FailingTool;

    #[async_trait]
    impl ToolHandler for FailingTool {
        fn definition(&self) -> Tool {
            Tool::new("broken", "Always fails", json!({"type": "object"}))
        }

        async fn call(&self, _arguments: Value) -> AgentResult<String> {
            Err(AgentError::ExecutionError("disk on fire".to_string()))
        }
    }

    fn setup(calls: Arc<AtomicUsize>) -> (ToolExecutor, Arc<EventBus>, Arc<Mutex<Vec<EventKind>>>) {
        let mut registry = ToolRegistry::new();
        registry.register(CountingEcho { calls }).unwrap();
        registry.register(FailingTool).unwrap();

        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            bus.subscribe(EventKind::Tool, move |event| {
                seen.lock().unwrap().push(event.kind());
            });
        }

        let executor = ToolExecutor::new(Arc::new(registry), Arc::clone(&bus));
        (executor, bus, seen)
    }

    #[tokio::test]
    async fn test_successful_execution_emits_started_and_finished() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (executor, _bus, seen) = setup(Arc::clone(&calls));

        let output = executor
            .execute_by_name("echo", json!({"message": "hi"}), Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(output, ToolOutput::success("hi"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![EventKind::ToolCallStarted, EventKind::ToolCallFinished]
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_is_raised_and_journaled() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (executor, _bus, seen) = setup(calls);

        let err = executor
            .execute_by_name("missing", json!({}), Uuid::new_v4())
            .await
            .unwrap_err();

        assert_eq!(err, AgentError::ToolNotFound("missing".to_string()));
        assert_eq!(*seen.lock().unwrap(), vec![EventKind::ToolCallError]);
    }

    #[tokio::test]
    async fn test_forbidden_tool_is_raised_without_invocation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (executor, _bus, _seen) = setup(Arc::clone(&calls));

        executor.set_allowed(Some(HashSet::from(["broken".to_string()])));
        let err = executor
            .execute_by_name("echo", json!({"message": "hi"}), Uuid::new_v4())
            .await
            .unwrap_err();

        assert_eq!(err, AgentError::ToolForbidden("echo".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // Toggling back re-permits without re-registration
        executor.set_allowed(None);
        assert!(executor
            .execute_by_name("echo", json!({"message": "hi"}), Uuid::new_v4())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_invalid_arguments_never_reach_the_body() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (executor, _bus, seen) = setup(Arc::clone(&calls));

        let output = executor
            .execute_by_name("echo", json!({}), Uuid::new_v4())
            .await
            .unwrap();

        assert!(output.is_error);
        assert!(output.content.contains("missing required argument 'message'"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        // No Started event for a call that failed validation
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_handler_error_becomes_in_band_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (executor, _bus, seen) = setup(calls);

        let output = executor
            .execute_by_name("broken", json!({}), Uuid::new_v4())
            .await
            .unwrap();

        assert!(output.is_error);
        assert!(output.content.contains("disk on fire"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![EventKind::ToolCallStarted, EventKind::ToolCallError]
        );
    }
}
