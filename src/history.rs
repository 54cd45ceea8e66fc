//! Ordered log of the conversation, the single source of truth for what is
//! sent to the remote API each turn.

use crate::models::message::Message;
use crate::models::role::Role;

/// Role-tagged message log for one chat session.
///
/// Created per agent, survives across turns, cleared only by an explicit
/// [`reset`](ConversationHistory::reset). Not internally synchronized: the
/// agent is the only mutator, and the driver's worker never writes here —
/// it returns normalized messages which the agent appends.
///
/// Token or size limits are a provider concern, not enforced at this layer.
#[derive(Debug, Default, Clone)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to the end of the log.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Read-only view of the full log.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Insert a system message at the front unless one is already there.
    ///
    /// Idempotent: a second call, even with different text, leaves the
    /// existing system message untouched.
    pub fn ensure_system_prompt<S: Into<String>>(&mut self, text: S) {
        let has_system = self
            .messages
            .first()
            .map(|m| m.role == Role::System)
            .unwrap_or(false);
        if !has_system {
            self.messages.insert(0, Message::system().with_text(text));
        }
    }

    /// Drop all messages.
    pub fn reset(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}
