//! Conversation messages stored in the `messages` state field
//!
//! Messages are serialized into the state as plain JSON objects so that the
//! checkpoint layer stays schema-less:
//!
//! ```json
//! {"role": "assistant", "content": "", "tool_calls": [{"id": "call_1", "name": "search", "args": {"query": "Turkey population"}}]}
//! {"role": "tool", "content": "85 million", "name": "search", "tool_call_id": "call_1"}
//! ```
//!
//! Message ids are optional and never generated implicitly, which keeps
//! replays of deterministic nodes byte-for-byte identical.

use crate::tool::ToolCall;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use threadgraph_checkpoint::{State, MESSAGES};

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    Human,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::Human => "human",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

/// One entry of the conversation transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub role: MessageRole,

    #[serde(default)]
    pub content: String,

    /// Tool name on tool results, optional author name otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tool invocations requested by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Call this tool result answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: None,
            role,
            content: content.into(),
            name: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            metadata: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Human, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(MessageRole::Tool, content)
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// True for an assistant message that still asks for tool execution.
    pub fn has_tool_calls(&self) -> bool {
        self.role == MessageRole::Assistant && !self.tool_calls.is_empty()
    }
}

/// Decode the full transcript held by `state`.
pub fn messages(state: &State) -> Result<Vec<Message>, serde_json::Error> {
    state
        .messages()
        .iter()
        .map(|raw| Message::deserialize(raw))
        .collect()
}

/// Decode the newest message, `None` if absent or malformed.
pub fn last_message(state: &State) -> Option<Message> {
    state
        .messages()
        .last()
        .and_then(|raw| Message::deserialize(raw).ok())
}

/// Tool calls carried by the newest message, if it is an assistant message.
pub fn pending_tool_calls(state: &State) -> Vec<ToolCall> {
    match last_message(state) {
        Some(message) if message.has_tool_calls() => message.tool_calls,
        _ => Vec::new(),
    }
}

/// State delta that appends `messages` to the transcript.
pub fn messages_update(
    messages: impl IntoIterator<Item = Message>,
) -> Result<State, serde_json::Error> {
    let encoded = messages
        .into_iter()
        .map(|m| serde_json::to_value(&m))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(State::new().with(MESSAGES, Value::Array(encoded)))
}
