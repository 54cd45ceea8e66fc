use serde::{Deserialize, Serialize};
use strum_macros::Display;
use uuid::Uuid;

use crate::models::message::Message;
use crate::providers::base::Usage;

/// Correlates all events belonging to one generation turn.
pub type RequestId = Uuid;

/// Events emitted by a driver over the lifetime of one submitted request.
///
/// For a given request id, exactly one `RequestStarted` is emitted, followed
/// by at most one terminal variant (`RequestFinished`, `RequestError`,
/// `EmptyResponse` or `Cancelled`). Events are immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    RequestStarted {
        request_id: RequestId,
    },
    RequestFinished {
        request_id: RequestId,
        message: Message,
        usage: Usage,
    },
    RequestError {
        request_id: RequestId,
        error: String,
        retryable: bool,
    },
    EmptyResponse {
        request_id: RequestId,
        reason: String,
    },
    Cancelled {
        request_id: RequestId,
    },
}

impl LifecycleEvent {
    pub fn request_id(&self) -> RequestId {
        match self {
            LifecycleEvent::RequestStarted { request_id }
            | LifecycleEvent::RequestFinished { request_id, .. }
            | LifecycleEvent::RequestError { request_id, .. }
            | LifecycleEvent::EmptyResponse { request_id, .. }
            | LifecycleEvent::Cancelled { request_id } => *request_id,
        }
    }

    /// Whether this event ends the turn.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LifecycleEvent::RequestStarted { .. })
    }
}

/// Events emitted by the tool executor while running tool calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToolEvent {
    ToolCallStarted {
        request_id: RequestId,
        name: String,
    },
    ToolCallFinished {
        request_id: RequestId,
        name: String,
        result: String,
    },
    ToolCallError {
        request_id: RequestId,
        name: String,
        error: String,
    },
}

impl ToolEvent {
    pub fn name(&self) -> &str {
        match self {
            ToolEvent::ToolCallStarted { name, .. }
            | ToolEvent::ToolCallFinished { name, .. }
            | ToolEvent::ToolCallError { name, .. } => name,
        }
    }
}

/// Any event that can travel on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Lifecycle(LifecycleEvent),
    Tool(ToolEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Lifecycle(LifecycleEvent::RequestStarted { .. }) => EventKind::RequestStarted,
            Event::Lifecycle(LifecycleEvent::RequestFinished { .. }) => EventKind::RequestFinished,
            Event::Lifecycle(LifecycleEvent::RequestError { .. }) => EventKind::RequestError,
            Event::Lifecycle(LifecycleEvent::EmptyResponse { .. }) => EventKind::EmptyResponse,
            Event::Lifecycle(LifecycleEvent::Cancelled { .. }) => EventKind::Cancelled,
            Event::Tool(ToolEvent::ToolCallStarted { .. }) => EventKind::ToolCallStarted,
            Event::Tool(ToolEvent::ToolCallFinished { .. }) => EventKind::ToolCallFinished,
            Event::Tool(ToolEvent::ToolCallError { .. }) => EventKind::ToolCallError,
        }
    }
}

/// Subscription selector for bus callbacks.
///
/// Matching is hierarchical: `All` receives every event, `Lifecycle` and
/// `Tool` receive every event of their family, and a concrete kind receives
/// only that variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum EventKind {
    All,
    Lifecycle,
    Tool,
    RequestStarted,
    RequestFinished,
    RequestError,
    EmptyResponse,
    Cancelled,
    ToolCallStarted,
    ToolCallFinished,
    ToolCallError,
}

impl EventKind {
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            EventKind::All => true,
            EventKind::Lifecycle => matches!(event, Event::Lifecycle(_)),
            EventKind::Tool => matches!(event, Event::Tool(_)),
            kind => event.kind() == *kind,
        }
    }
}
