//! Per-provider request worker: turns one remote completion call into a
//! cancellable, event-emitting asynchronous operation.
//!
//! Each submission runs on its own spawned task and reports through two
//! channels at once: the returned [`DriverHandle`] (consumed by the agent's
//! wait loop) and the shared [`EventBus`] (consumed by observers). For one
//! request id the worker emits exactly one `RequestStarted` followed by at
//! most one terminal event, in order, and never a terminal event twice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::events::bus::EventBus;
use crate::events::types::{Event, LifecycleEvent, RequestId};
use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::Provider;

/// Shared cooperative cancellation flag.
///
/// Set by the agent (or any handle clone), read by the driver's worker at
/// two checkpoints: before the remote call and after it returns. The flag is
/// atomic but deliberately not linearizable with other state — an in-flight
/// HTTP call finishes on its own schedule and its result is discarded.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Immutable per-turn value: everything one generation turn sends upstream.
///
/// Built fresh by the agent from a history snapshot, owned by the driver for
/// the duration of the turn, discarded after the terminal event.
#[derive(Debug, Clone)]
pub struct DriverRequest {
    pub conversation: Vec<Message>,
    pub system_prompt: Option<String>,
    pub tools: Vec<Tool>,
}

impl DriverRequest {
    pub fn new(conversation: Vec<Message>) -> Self {
        Self {
            conversation,
            system_prompt: None,
            tools: Vec::new(),
        }
    }

    pub fn with_system_prompt<S: Into<String>>(mut self, system_prompt: S) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }
}

/// Caller-side end of one submission.
///
/// Polling `recv` never blocks the process: the worker runs elsewhere and
/// the channel closes once the terminal event has been delivered.
pub struct DriverHandle {
    request_id: RequestId,
    events: mpsc::UnboundedReceiver<LifecycleEvent>,
    token: CancellationToken,
}

impl DriverHandle {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Request cooperative cancellation of this turn.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Next lifecycle event for this request, `None` once the worker is done
    /// and the channel has drained.
    pub async fn recv(&mut self) -> Option<LifecycleEvent> {
        self.events.recv().await
    }
}

enum DriverState {
    Ready(Arc<dyn Provider + Send + Sync>),
    /// Construction failed (missing credentials, unsupported provider);
    /// submissions fail fast without a remote call.
    Unavailable(String),
}

/// Reusable submission front-end for one provider.
///
/// The driver itself is stateless across turns; each `submit` spawns a fresh
/// worker scoped to a new request id.
pub struct Driver {
    state: DriverState,
    bus: Arc<EventBus>,
}

impl Driver {
    pub fn new(provider: Arc<dyn Provider + Send + Sync>, bus: Arc<EventBus>) -> Self {
        Self {
            state: DriverState::Ready(provider),
            bus,
        }
    }

    /// A driver that reports `reason` as a non-retryable error on every
    /// submission. Used when provider construction fails, so the failure
    /// surfaces through the normal event flow instead of at startup.
    pub fn unavailable<S: Into<String>>(reason: S, bus: Arc<EventBus>) -> Self {
        Self {
            state: DriverState::Unavailable(reason.into()),
            bus,
        }
    }

    /// Submit a request; non-blocking. The worker emits `RequestStarted`
    /// and exactly one terminal event on the returned handle and the bus.
    pub fn submit(&self, request: DriverRequest) -> DriverHandle {
        self.submit_with_cancellation(request, CancellationToken::new())
    }

    /// Submit with a caller-owned cancellation token (the agent shares one
    /// token between the handle and its own interrupt handling).
    pub fn submit_with_cancellation(
        &self,
        request: DriverRequest,
        token: CancellationToken,
    ) -> DriverHandle {
        let request_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let provider = match &self.state {
            DriverState::Ready(provider) => Ok(Arc::clone(provider)),
            DriverState::Unavailable(reason) => Err(reason.clone()),
        };
        let bus = Arc::clone(&self.bus);
        let worker_token = token.clone();

        tokio::spawn(async move {
            run_request(request_id, request, provider, worker_token, tx, bus).await;
        });

        DriverHandle {
            request_id,
            events: rx,
            token,
        }
    }
}

/// Worker for one submission. Every exit path emits exactly one terminal
/// event; keep it single-return-per-branch so that stays true.
async fn run_request(
    request_id: RequestId,
    request: DriverRequest,
    provider: Result<Arc<dyn Provider + Send + Sync>, String>,
    token: CancellationToken,
    tx: mpsc::UnboundedSender<LifecycleEvent>,
    bus: Arc<EventBus>,
) {
    let emit = |event: LifecycleEvent| {
        bus.publish(&Event::Lifecycle(event.clone()));
        // The handle may have been dropped; the bus already saw the event
        let _ = tx.send(event);
    };

    emit(LifecycleEvent::RequestStarted { request_id });

    let provider = match provider {
        Ok(provider) => provider,
        Err(reason) => {
            tracing::warn!(%request_id, %reason, "driver unavailable");
            emit(LifecycleEvent::RequestError {
                request_id,
                error: reason,
                retryable: false,
            });
            return;
        }
    };

    // Checkpoint: cancellation requested before the remote call
    if token.is_cancelled() {
        emit(LifecycleEvent::Cancelled { request_id });
        return;
    }

    let system = request.system_prompt.as_deref().unwrap_or("");
    let result = provider
        .complete(system, &request.conversation, &request.tools)
        .await;

    // Checkpoint: cancellation requested while the call was in flight;
    // the result, if any, is discarded
    if token.is_cancelled() {
        emit(LifecycleEvent::Cancelled { request_id });
        return;
    }

    match result {
        Err(e) => {
            let error = format!("{e:#}");
            let retryable = classify_retryable(&error);
            tracing::warn!(%request_id, %error, retryable, "provider call failed");
            emit(LifecycleEvent::RequestError {
                request_id,
                error,
                retryable,
            });
        }
        Ok((message, usage)) => {
            if message.is_empty_content() {
                let reason = match message.metadata_str("stop_reason") {
                    Some(stop_reason) => {
                        format!("no usable content in provider response (stop_reason: {stop_reason})")
                    }
                    None => "no usable content in provider response".to_string(),
                };
                emit(LifecycleEvent::EmptyResponse { request_id, reason });
            } else {
                emit(LifecycleEvent::RequestFinished {
                    request_id,
                    message,
                    usage,
                });
            }
        }
    }
}

/// Classify a provider error message as retryable or fatal.
///
/// Rate-limit and capacity failures are worth retrying on the caller's
/// schedule; everything else (authentication, validation, malformed
/// requests) defaults to fatal. The core reports the classification but
/// never retries on its own.
pub fn classify_retryable(error: &str) -> bool {
    let lowered = error.to_lowercase();
    lowered.contains("429")
        || lowered.contains("capacity exceeded")
        || lowered.contains("rate limit")
        || lowered.contains("too many requests")
        || lowered.contains("overloaded")
}
