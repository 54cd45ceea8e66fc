use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// The speaker of a message in a conversation.
///
/// If a `System` message is present in a history it is always the first
/// element; `Tool` messages carry the producing tool's name in the message
/// metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}
