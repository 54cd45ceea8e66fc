//! The agent turn loop: submit a request, wait for its terminal event,
//! execute any tool calls, resubmit, and return the final answer.

use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use futures::stream::BoxStream;

use crate::driver::{CancellationToken, Driver, DriverHandle, DriverRequest};
use crate::errors::{AgentError, AgentResult};
use crate::history::ConversationHistory;
use crate::models::message::{Message, ToolRequest};
use crate::providers::base::Usage;
use crate::providers::utils::tool_result_message;
use crate::tools::executor::ToolExecutor;
use crate::tools::registry::ToolRegistry;
use crate::tools::ToolOutput;
use crate::events::bus::EventBus;
use crate::events::types::{LifecycleEvent, RequestId};

/// Knobs for the turn loop.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Upper bound on generation turns per chat call. The loop fails with
    /// [`AgentError::TurnLimitExceeded`] instead of following an endless
    /// chain of tool calls.
    pub max_turns: u32,
    /// How long each poll of the driver handle waits. Short enough that an
    /// external cancellation request is picked up promptly.
    pub poll_interval: Duration,
    /// Maximum quiet period before the loop decides the worker died and
    /// surfaces a synthetic [`AgentError::DriverStalled`]. Must exceed the
    /// provider's own request timeout, since no events arrive while a call
    /// is in flight.
    pub idle_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 32,
            poll_interval: Duration::from_millis(100),
            idle_timeout: Duration::from_secs(630),
        }
    }
}

/// How one chat call ended.
///
/// Cancellation is a graceful stop, not a failure; retry policy for
/// retryable errors is the caller's decision.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    /// The model produced a final answer with no outstanding tool calls.
    Finished(Message),
    /// The provider failed; `retryable` distinguishes capacity/rate-limit
    /// failures from fatal ones.
    Error { message: String, retryable: bool },
    /// The provider returned no usable content.
    Empty { reason: String },
    /// The turn was cancelled at one of the driver's checkpoints.
    Cancelled,
}

enum TurnStep {
    Final(Message),
    ToolRound {
        assistant: Message,
        results: Vec<Message>,
    },
    Stopped(ChatOutcome),
}

/// Agent integrates a driver with a conversation history and a tool registry
pub struct Agent {
    driver: Driver,
    history: ConversationHistory,
    registry: Arc<ToolRegistry>,
    executor: ToolExecutor,
    system_prompt: Option<String>,
    config: AgentConfig,
    turns_taken: u32,
    usage: Usage,
}

impl Agent {
    pub fn new(driver: Driver, registry: Arc<ToolRegistry>, bus: Arc<EventBus>) -> Self {
        let executor = ToolExecutor::new(Arc::clone(&registry), bus);
        Self {
            driver,
            history: ConversationHistory::new(),
            registry,
            executor,
            system_prompt: None,
            config: AgentConfig::default(),
            turns_taken: 0,
            usage: Usage::default(),
        }
    }

    pub fn with_system_prompt<S: Into<String>>(mut self, system_prompt: S) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Clear the conversation; the next chat starts fresh.
    pub fn reset(&mut self) {
        self.history.reset();
    }

    /// Generation turns submitted over this agent's lifetime.
    pub fn turns_taken(&self) -> u32 {
        self.turns_taken
    }

    /// Token usage accumulated over all finished turns.
    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    /// Runtime permission toggles and other executor controls.
    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    /// Run one tool-augmented conversation round and return the final
    /// normalized message (or the surfaced error/empty/cancel outcome).
    pub async fn chat(&mut self, text: &str) -> AgentResult<ChatOutcome> {
        self.chat_with_cancellation(text, CancellationToken::new())
            .await
    }

    /// Like [`chat`](Agent::chat), with a caller-owned cancellation token.
    /// Cancelling the token stops the turn at the driver's next checkpoint.
    pub async fn chat_with_cancellation(
        &mut self,
        text: &str,
        token: CancellationToken,
    ) -> AgentResult<ChatOutcome> {
        self.prepare(text)?;

        let mut turns = 0u32;
        loop {
            if turns >= self.config.max_turns {
                return Err(AgentError::TurnLimitExceeded(self.config.max_turns));
            }
            turns += 1;

            match self.step(&token).await? {
                TurnStep::Final(message) => return Ok(ChatOutcome::Finished(message)),
                TurnStep::ToolRound { .. } => continue,
                TurnStep::Stopped(outcome) => return Ok(outcome),
            }
        }
    }

    /// Streaming variant of the turn loop: yields each message as it is
    /// produced — the assistant's turns (including tool-call turns) and one
    /// tool message per executed call — ending after the final answer.
    ///
    /// A cancelled turn or an empty response ends the stream; provider
    /// failures surface as [`AgentError::Provider`].
    pub fn chat_stream<'a>(
        &'a mut self,
        text: &str,
        token: CancellationToken,
    ) -> BoxStream<'a, AgentResult<Message>> {
        let text = text.to_string();
        Box::pin(try_stream! {
            self.prepare(&text)?;

            let mut turns = 0u32;
            loop {
                if turns >= self.config.max_turns {
                    Err(AgentError::TurnLimitExceeded(self.config.max_turns))?;
                }
                turns += 1;

                match self.step(&token).await? {
                    TurnStep::Final(message) => {
                        yield message;
                        break;
                    }
                    TurnStep::ToolRound { assistant, results } => {
                        yield assistant;
                        for result in results {
                            yield result;
                        }
                    }
                    TurnStep::Stopped(ChatOutcome::Error { message, retryable }) => {
                        Err(AgentError::Provider { message, retryable })?;
                    }
                    TurnStep::Stopped(_) => {
                        // Cancelled or empty: a graceful end of the stream;
                        // observers have the detail from the bus
                        break;
                    }
                }
            }
        })
    }

    fn prepare(&mut self, text: &str) -> AgentResult<()> {
        if text.trim().is_empty() {
            return Err(AgentError::EmptyPrompt);
        }
        if let Some(system_prompt) = self.system_prompt.clone() {
            self.history.ensure_system_prompt(system_prompt);
        }
        self.history.append(Message::user().with_text(text));
        Ok(())
    }

    /// Submit one request and fold its terminal event back into history.
    async fn step(&mut self, token: &CancellationToken) -> AgentResult<TurnStep> {
        let mut request = DriverRequest::new(self.history.messages().to_vec())
            .with_tools(self.registry.definitions());
        if let Some(system_prompt) = &self.system_prompt {
            request = request.with_system_prompt(system_prompt.clone());
        }

        let mut handle = self.driver.submit_with_cancellation(request, token.clone());
        let terminal = self.await_terminal(&mut handle).await?;
        self.turns_taken += 1;

        match terminal {
            LifecycleEvent::Cancelled { .. } => Ok(TurnStep::Stopped(ChatOutcome::Cancelled)),
            LifecycleEvent::RequestError {
                error, retryable, ..
            } => Ok(TurnStep::Stopped(ChatOutcome::Error {
                message: error,
                retryable,
            })),
            LifecycleEvent::EmptyResponse { reason, .. } => {
                Ok(TurnStep::Stopped(ChatOutcome::Empty { reason }))
            }
            LifecycleEvent::RequestFinished { message, usage, .. } => {
                self.usage.accumulate(&usage);
                let requests: Vec<ToolRequest> =
                    message.tool_requests().into_iter().cloned().collect();
                self.history.append(message.clone());

                if requests.is_empty() {
                    return Ok(TurnStep::Final(message));
                }

                let results = self
                    .execute_tool_round(&requests, handle.request_id())
                    .await;
                for result in &results {
                    self.history.append(result.clone());
                }
                Ok(TurnStep::ToolRound {
                    assistant: message,
                    results,
                })
            }
            LifecycleEvent::RequestStarted { .. } => {
                // await_terminal only returns terminal events
                Err(AgentError::Internal(
                    "non-terminal event escaped the wait loop".to_string(),
                ))
            }
        }
    }

    /// Poll the handle until a terminal event arrives. The bounded poll
    /// interval keeps the caller responsive to external cancellation; the
    /// idle timeout turns a silently dead worker into an error instead of a
    /// hang.
    async fn await_terminal(&self, handle: &mut DriverHandle) -> AgentResult<LifecycleEvent> {
        let mut idle = Duration::ZERO;
        loop {
            match tokio::time::timeout(self.config.poll_interval, handle.recv()).await {
                Ok(Some(event)) => {
                    if event.is_terminal() {
                        return Ok(event);
                    }
                    idle = Duration::ZERO;
                }
                Ok(None) => {
                    return Err(AgentError::DriverStalled(
                        "event channel closed without a terminal event".to_string(),
                    ));
                }
                Err(_) => {
                    idle += self.config.poll_interval;
                    if idle >= self.config.idle_timeout {
                        return Err(AgentError::DriverStalled(format!(
                            "no event within {}s",
                            self.config.idle_timeout.as_secs()
                        )));
                    }
                }
            }
        }
    }

    /// Execute every tool call from one assistant message concurrently,
    /// returning tool messages in request order.
    async fn execute_tool_round(
        &self,
        requests: &[ToolRequest],
        request_id: RequestId,
    ) -> Vec<Message> {
        let executor = &self.executor;
        let futures: Vec<_> = requests
            .iter()
            .map(|request| async move {
                match &request.tool_call {
                    Ok(call) => {
                        let output = executor
                            .execute_by_name(&call.name, call.arguments.clone(), request_id)
                            .await
                            .unwrap_or_else(|e| ToolOutput::error(e.to_string()));
                        (call.name.clone(), output)
                    }
                    Err(e) => (
                        "unknown".to_string(),
                        ToolOutput::error(format!("Error: {e}")),
                    ),
                }
            })
            .collect();

        let outputs = futures::future::join_all(futures).await;

        requests
            .iter()
            .zip(outputs)
            .map(|(request, (name, output))| {
                tool_result_message(&request.id, &name, &output.content)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::role::Role;
    use crate::models::tool::{Tool, ToolCall};
    use crate::models::message::META_TOOL_NAME;
    use crate::providers::base::Provider;
    use crate::providers::mock::MockProvider;
    use crate::tools::ToolHandler;
    use anyhow::Result;
    use async_trait::async_trait;
    use futures::TryStreamExt;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoTool {
        calls: Arc<AtomicUsize>,
    }

    impl EchoTool {
        fn new() -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn definition(&self) -> Tool {
            Tool::new(
                "echo",
                "Echoes back the input",
                json!({
                    "type": "object",
                    "properties": {"x": {"type": "integer"}},
                    "required": ["x"]
                }),
            )
        }

        async fn call(&self, arguments: Value) -> AgentResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(arguments["x"].to_string())
        }
    }

    /// Provider whose call never returns, for stall detection tests.
    struct SilentProvider;

    #[async_trait]
    impl Provider for SilentProvider {
        async fn complete(
            &self,
            _system: &str,
            _messages: &[Message],
            _tools: &[Tool],
        ) -> Result<(Message, Usage)> {
            futures::future::pending().await
        }
    }

    fn agent_with(provider: MockProvider, registry: ToolRegistry) -> (Agent, Arc<AtomicUsize>) {
        let calls = provider.call_counter();
        let bus = Arc::new(EventBus::new());
        let driver = Driver::new(Arc::new(provider), Arc::clone(&bus));
        let agent = Agent::new(driver, Arc::new(registry), bus)
            .with_system_prompt("You are a helpful assistant.");
        (agent, calls)
    }

    #[tokio::test]
    async fn test_simple_response() -> Result<()> {
        let provider = MockProvider::new(vec![Message::assistant().with_text("4")]);
        let (mut agent, calls) = agent_with(provider, ToolRegistry::new());

        let outcome = agent.chat("What is 2+2?").await?;

        match outcome {
            ChatOutcome::Finished(message) => assert_eq!(message.text(), "4"),
            other => panic!("expected Finished, got {other:?}"),
        }
        let roles: Vec<Role> = agent.history().messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(agent.turns_taken(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant().with_tool_request("1", Ok(ToolCall::new("echo", json!({"x": 1})))),
            Message::assistant().with_text("Done!"),
        ]);
        let echo = EchoTool::new();
        let tool_calls = Arc::clone(&echo.calls);
        let mut registry = ToolRegistry::new();
        registry.register(echo).unwrap();
        let (mut agent, provider_calls) = agent_with(provider, registry);

        let outcome = agent.chat("Echo 1 back to me").await?;

        match outcome {
            ChatOutcome::Finished(message) => assert_eq!(message.text(), "Done!"),
            other => panic!("expected Finished, got {other:?}"),
        }
        // The tool ran once and the loop resubmitted exactly once
        assert_eq!(tool_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider_calls.load(Ordering::SeqCst), 2);

        let tool_message = agent
            .history()
            .messages()
            .iter()
            .find(|m| m.role == Role::Tool)
            .expect("tool message appended");
        assert_eq!(tool_message.metadata_str(META_TOOL_NAME), Some("echo"));
        assert_eq!(tool_message.text(), "1");
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_tool_keeps_the_loop_alive() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant()
                .with_tool_request("1", Ok(ToolCall::new("invalid_tool", json!({})))),
            Message::assistant().with_text("Error occurred"),
        ]);
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool::new()).unwrap();
        let (mut agent, _) = agent_with(provider, registry);

        let outcome = agent.chat("Use a tool that does not exist").await?;

        match outcome {
            ChatOutcome::Finished(message) => assert_eq!(message.text(), "Error occurred"),
            other => panic!("expected Finished, got {other:?}"),
        }
        let tool_message = agent
            .history()
            .messages()
            .iter()
            .find(|m| m.role == Role::Tool)
            .expect("error surfaced as a tool message");
        assert!(tool_message.text().contains("Tool not found"));
        Ok(())
    }

    #[tokio::test]
    async fn test_multiple_tool_calls_append_in_order() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant()
                .with_tool_request("1", Ok(ToolCall::new("echo", json!({"x": 1}))))
                .with_tool_request("2", Ok(ToolCall::new("echo", json!({"x": 2})))),
            Message::assistant().with_text("All done!"),
        ]);
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool::new()).unwrap();
        let (mut agent, _) = agent_with(provider, registry);

        agent.chat("Echo twice").await?;

        let tool_texts: Vec<String> = agent
            .history()
            .messages()
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| m.text())
            .collect();
        assert_eq!(tool_texts, vec!["1", "2"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_prompt_is_rejected() {
        let provider = MockProvider::new(vec![]);
        let (mut agent, calls) = agent_with(provider, ToolRegistry::new());

        let err = agent.chat("   ").await.unwrap_err();
        assert_eq!(err, AgentError::EmptyPrompt);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(agent.history().is_empty());
    }

    #[tokio::test]
    async fn test_turn_limit_is_enforced() {
        let responses: Vec<Message> = (0..5)
            .map(|i| {
                Message::assistant()
                    .with_tool_request(i.to_string(), Ok(ToolCall::new("echo", json!({"x": 1}))))
            })
            .collect();
        let provider = MockProvider::new(responses);
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool::new()).unwrap();
        let (agent, _) = agent_with(provider, registry);
        let mut agent = agent.with_config(AgentConfig {
            max_turns: 2,
            ..AgentConfig::default()
        });

        let err = agent.chat("Loop forever").await.unwrap_err();
        assert_eq!(err, AgentError::TurnLimitExceeded(2));
    }

    #[tokio::test]
    async fn test_retryable_error_outcome() -> Result<()> {
        let provider = MockProvider::failing("Status 429: capacity exceeded");
        let bus = Arc::new(EventBus::new());
        let driver = Driver::new(Arc::new(provider), Arc::clone(&bus));
        let mut agent = Agent::new(driver, Arc::new(ToolRegistry::new()), bus);

        let outcome = agent.chat("hello").await?;

        match outcome {
            ChatOutcome::Error { message, retryable } => {
                assert!(message.contains("capacity exceeded"));
                assert!(retryable);
            }
            other => panic!("expected Error, got {other:?}"),
        }
        // Nothing beyond the user message was appended
        assert_eq!(agent.history().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancellation_is_a_graceful_stop() -> Result<()> {
        let provider = MockProvider::new(vec![Message::assistant().with_text("unused")]);
        let (mut agent, calls) = agent_with(provider, ToolRegistry::new());

        let token = CancellationToken::new();
        token.cancel();
        let outcome = agent.chat_with_cancellation("hello", token).await?;

        assert_eq!(outcome, ChatOutcome::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        // The produced message was discarded, not appended
        assert!(agent
            .history()
            .messages()
            .iter()
            .all(|m| m.role != Role::Assistant));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_response_outcome() -> Result<()> {
        let provider = MockProvider::new(vec![]);
        let (mut agent, _) = agent_with(provider, ToolRegistry::new());

        let outcome = agent.chat("hello").await?;

        match outcome {
            ChatOutcome::Empty { reason } => assert!(reason.contains("no usable content")),
            other => panic!("expected Empty, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_stalled_driver_surfaces_synthetic_error() {
        let bus = Arc::new(EventBus::new());
        let driver = Driver::new(Arc::new(SilentProvider), Arc::clone(&bus));
        let mut agent = Agent::new(driver, Arc::new(ToolRegistry::new()), bus).with_config(
            AgentConfig {
                poll_interval: Duration::from_millis(10),
                idle_timeout: Duration::from_millis(50),
                ..AgentConfig::default()
            },
        );

        let err = agent.chat("hello").await.unwrap_err();
        assert!(matches!(err, AgentError::DriverStalled(_)));
    }

    #[tokio::test]
    async fn test_chat_stream_yields_intermediate_messages() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant().with_tool_request("1", Ok(ToolCall::new("echo", json!({"x": 7})))),
            Message::assistant().with_text("Done!"),
        ]);
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool::new()).unwrap();
        let (mut agent, _) = agent_with(provider, registry);

        let stream = agent.chat_stream("Echo 7", CancellationToken::new());
        let messages: Vec<Message> = stream.try_collect().await?;

        // Tool-call turn, its result, then the final answer
        assert_eq!(messages.len(), 3);
        assert!(messages[0].has_tool_requests());
        assert_eq!(messages[1].role, Role::Tool);
        assert_eq!(messages[1].text(), "7");
        assert_eq!(messages[2].text(), "Done!");
        Ok(())
    }
}
