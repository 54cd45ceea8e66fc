//! Lifecycle and tool events plus the process-wide publish/subscribe bus.
//!
//! Every driver submission and tool execution is journaled as typed events.
//! The bus fans events out synchronously to subscribers (terminal UIs,
//! loggers, performance trackers); it is not a durable log.
pub mod bus;
pub mod types;
