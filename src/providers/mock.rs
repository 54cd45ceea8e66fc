use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex;

use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::{Provider, Usage};

/// A mock provider that returns pre-configured responses for testing
///
/// Counts invocations so tests can assert how often the remote collaborator
/// was actually called (e.g. never, when cancellation lands first).
pub struct MockProvider {
    responses: Arc<Mutex<Vec<Message>>>,
    error: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            error: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a mock provider whose every call fails with `message`
    pub fn failing<S: Into<String>>(message: S) -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            error: Some(message.into()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// How many times `complete` has been invoked
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Shared counter handle, usable after the provider is boxed
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(
        &self,
        _system: &str,
        _messages: &[Message],
        _tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = &self.error {
            return Err(anyhow!("{}", error));
        }

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            // Out of scripted responses: an empty message, which the driver
            // reports as an empty response
            Ok((Message::assistant(), Usage::default()))
        } else {
            Ok((responses.remove(0), Usage::default()))
        }
    }
}
