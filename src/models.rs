//! These models represent the objects passed around by the agent
//!
//! There are several related formats we need to interact with:
//! - openai-style messages/tools, sent from the driver to the LLM
//! - anthropic messages/tools, sent from the driver to the LLM
//! - tool invocations, sent from the agent to registered tool handlers
//!
//! These overlap to varying degrees. Provider responses are immediately
//! converted into the internal structs using to/from helpers; because of the
//! need for compatibility the internal models are not an exact match to any
//! wire format.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
