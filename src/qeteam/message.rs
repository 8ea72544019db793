//! Conversation records shared by every participant of a group chat.
//!
//! A [`ChatMessage`] is immutable once appended to a [`Transcript`]. Only the
//! [`GroupChat`](crate::qeteam::group_chat::GroupChat) runner appends; agents, selectors and
//! termination conditions only ever see a read-only slice.
//!
//! # Examples
//!
//! ```
//! use qeteam::{ChatMessage, Role};
//!
//! let seed = ChatMessage::task("Test the login page");
//! assert_eq!(seed.role, Role::User);
//! assert_eq!(seed.text(), Some("Test the login page"));
//!
//! let reply = ChatMessage::new("writer", Role::Assistant, "id,title\n1,valid login")
//!     .with_metadata("turn", "1");
//! assert_eq!(reply.source, "writer");
//! assert_eq!(reply.metadata.get("turn").map(String::as_str), Some("1"));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::qeteam::client_wrapper::Role;
use crate::qeteam::tool_protocol::ToolResult;

/// Source label used for the seed message.
pub const TASK_SOURCE: &str = "user";
/// Source label used for synthetic error messages.
pub const SYSTEM_SOURCE: &str = "system";

/// Body of a message: plain text or the structured outcome of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MessageContent {
    Text(String),
    ToolResult { tool_name: String, result: ToolResult },
}

impl MessageContent {
    /// Text body, `None` for tool results.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::ToolResult { .. } => None,
        }
    }

    /// Location reported by a successful artifact-producing tool, if any.
    pub fn artifact_path(&self) -> Option<&str> {
        match self {
            MessageContent::ToolResult { result, .. } if result.success => {
                result.output.get("path").and_then(|path| path.as_str())
            }
            _ => None,
        }
    }

    pub fn is_tool_error(&self) -> bool {
        matches!(self, MessageContent::ToolResult { result, .. } if !result.success)
    }

    /// Flatten the content into the text an LLM (or a terminal) sees.
    pub fn render(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::ToolResult { tool_name, result } if result.success => format!(
                "Tool '{}' executed successfully: {}",
                tool_name, result.output
            ),
            MessageContent::ToolResult { tool_name, result } => format!(
                "Tool '{}' failed: {}",
                tool_name,
                result.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

impl fmt::Display for MessageContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// One conversational turn (or tool sub-step) in a group chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// UTC timestamp recorded when the message was created.
    pub timestamp: DateTime<Utc>,
    /// Participant id that produced the message, `"user"` for the seed task and
    /// `"system"` for synthetic error messages.
    pub source: String,
    pub role: Role,
    pub content: MessageContent,
    /// Free-form annotations, e.g. `"turn"` and `"error_kind"` set by the runner.
    pub metadata: HashMap<String, String>,
}

impl ChatMessage {
    fn build(source: impl Into<String>, role: Role, content: MessageContent) -> Self {
        Self {
            timestamp: Utc::now(),
            source: source.into(),
            role,
            content,
            metadata: HashMap::new(),
        }
    }

    /// The seed message that opens every run.
    pub fn task(content: impl Into<String>) -> Self {
        Self::build(TASK_SOURCE, Role::User, MessageContent::Text(content.into()))
    }

    /// A text message produced by `source`.
    pub fn new(source: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Self::build(source, role, MessageContent::Text(text.into()))
    }

    /// A role=tool message carrying the result of `tool_name`, attributed to the invoking agent.
    pub fn tool_result(
        source: impl Into<String>,
        tool_name: impl Into<String>,
        result: ToolResult,
    ) -> Self {
        Self::build(
            source,
            Role::Tool,
            MessageContent::ToolResult {
                tool_name: tool_name.into(),
                result,
            },
        )
    }

    /// Synthetic role=system message describing why a run failed.
    pub fn system_error(text: impl Into<String>) -> Self {
        Self::build(SYSTEM_SOURCE, Role::System, MessageContent::Text(text.into()))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn text(&self) -> Option<&str> {
        self.content.as_text()
    }
}

/// Append-only, ordered record of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }
}

impl From<Vec<ChatMessage>> for Transcript {
    fn from(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_result_rendering() {
        let ok = ChatMessage::tool_result(
            "writer",
            "write_file",
            ToolResult::success(json!({"path": "outputs/cases.csv"})),
        );
        assert_eq!(ok.role, Role::Tool);
        assert_eq!(ok.content.artifact_path(), Some("outputs/cases.csv"));
        assert!(ok
            .content
            .render()
            .starts_with("Tool 'write_file' executed successfully"));

        let failed = ChatMessage::tool_result(
            "writer",
            "write_file",
            ToolResult::failure("disk full".into()),
        );
        assert!(failed.content.is_tool_error());
        assert_eq!(failed.content.artifact_path(), None);
        assert_eq!(failed.content.render(), "Tool 'write_file' failed: disk full");
    }

    #[test]
    fn test_message_serialization() {
        let message = ChatMessage::system_error("selection failed");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["role"], "system");
        assert_eq!(value["source"], "system");
        assert_eq!(value["content"]["kind"], "text");

        let back: ChatMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, message);
    }
}
