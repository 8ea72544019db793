//! Group chat participants.
//!
//! Every participant implements [`ConversableAgent`]: given the transcript so far it produces
//! either a final text reply or a request to run one of its tools. The group chat runner never
//! branches on what kind of agent it is talking to; prompts, models and tools are injected when
//! the agent is constructed.
//!
//! [`AssistantAgent`] is the LLM-backed implementation. It renders the transcript into chat
//! messages (its own turns as `assistant`, everyone else's as `user` prefixed with the speaker),
//! advertises its tools in the system prompt and recognises tool requests of the form
//!
//! ```text
//! {"tool_call": {"name": "write_file", "parameters": {"content": "..."}}}
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use qeteam::{AssistantAgent, ChatMessage, ConversableAgent};
//! use qeteam::clients::openai::OpenAIClient;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let client = Arc::new(OpenAIClient::new_with_model_string(
//!     &std::env::var("OPENAI_API_KEY")?,
//!     "gpt-4o-mini",
//! ));
//! let reviewer = AssistantAgent::new("test_case_reviewer", "Reviews test cases", client)
//!     .with_system_prompt("Review the test cases. Reply APPROVED when complete.")
//!     .with_context_window(5);
//!
//! let reply = reviewer
//!     .produce(&[ChatMessage::task("Review: 1,valid login,PASS")])
//!     .await?;
//! println!("{:?}", reply);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::qeteam::client_wrapper::{ClientWrapper, Message, Role};
use crate::qeteam::message::{ChatMessage, MessageContent};
use crate::qeteam::tool_protocol::ToolRegistry;

/// A tool invocation requested by an agent reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// What an agent hands back for one step of its turn.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentReply {
    /// Final message for the turn.
    Text(String),
    /// Run a tool first; the agent is called again with the result appended.
    ToolCall(ToolCall),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentError {
    /// The backend answered with nothing usable.
    EmptyReply(String),
    /// The backend (model, human input, ...) failed.
    Backend(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::EmptyReply(agent) => write!(f, "Agent '{}' produced an empty reply", agent),
            AgentError::Backend(msg) => write!(f, "Agent backend failed: {}", msg),
        }
    }
}

impl Error for AgentError {}

/// A participant in a group chat.
#[async_trait]
pub trait ConversableAgent: Send + Sync {
    /// Identifier, unique within a group chat. Used as the `source` of its messages.
    fn id(&self) -> &str;

    /// Short description shown to model-driven speaker selection.
    fn description(&self) -> &str;

    /// Role attached to the agent's final messages.
    fn role(&self) -> Role {
        Role::Assistant
    }

    /// Tools this agent may request. The runner dispatches [`AgentReply::ToolCall`] against it.
    fn tools(&self) -> Option<&ToolRegistry> {
        None
    }

    /// Produce the next reply given the transcript up to now.
    async fn produce(
        &self,
        transcript: &[ChatMessage],
    ) -> Result<AgentReply, Box<dyn Error + Send + Sync>>;
}

const TOOL_INSTRUCTIONS: &str = "\nTo use a tool, respond with ONLY a JSON object in the following format:\n\
     {\"tool_call\": {\"name\": \"tool_name\", \"parameters\": {...}}}\n\
     After the tool runs you will see its result and can continue.\n";

/// LLM-backed participant.
pub struct AssistantAgent {
    id: String,
    description: String,
    system_prompt: String,
    client: Arc<dyn ClientWrapper>,
    tools: Option<ToolRegistry>,
    context_window: Option<usize>,
}

impl AssistantAgent {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        client: Arc<dyn ClientWrapper>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            system_prompt: String::new(),
            client,
            tools: None,
            context_window: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Only show the model the `size` most recent transcript messages.
    ///
    /// A `size` of 0 is clamped to 1: the agent always sees the latest message.
    pub fn with_context_window(mut self, size: usize) -> Self {
        self.context_window = Some(size.max(1));
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Render the transcript into the message list sent to the model.
    pub fn build_messages(&self, transcript: &[ChatMessage]) -> Vec<Message> {
        let mut system = self.system_prompt.clone();
        if let Some(tools) = self.tools.as_ref().filter(|t| !t.is_empty()) {
            system.push_str("\n\nYou have access to the following tools:\n");
            system.push_str(&tools.describe_for_prompt());
            system.push_str(TOOL_INSTRUCTIONS);
        }

        let window = match self.context_window {
            Some(size) if transcript.len() > size => &transcript[transcript.len() - size..],
            _ => transcript,
        };

        let mut messages = Vec::with_capacity(window.len() + 1);
        if !system.is_empty() {
            messages.push(Message::new(Role::System, system));
        }
        for entry in window {
            let own = entry.source == self.id;
            let message = match (&entry.content, own) {
                (MessageContent::ToolResult { .. }, _) => {
                    Message::new(Role::Tool, entry.content.render())
                }
                (MessageContent::Text(text), true) => Message::new(Role::Assistant, text),
                (MessageContent::Text(text), false) => {
                    Message::new(Role::User, format!("[{}]: {}", entry.source, text))
                }
            };
            messages.push(message);
        }
        messages
    }
}

#[async_trait]
impl ConversableAgent for AssistantAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn tools(&self) -> Option<&ToolRegistry> {
        self.tools.as_ref()
    }

    async fn produce(
        &self,
        transcript: &[ChatMessage],
    ) -> Result<AgentReply, Box<dyn Error + Send + Sync>> {
        let messages = self.build_messages(transcript);
        let response = self
            .client
            .send_message(&messages)
            .await
            .map_err(|e| AgentError::Backend(e.to_string()))?;

        let content = response.content.trim();
        if content.is_empty() {
            return Err(Box::new(AgentError::EmptyReply(self.id.clone())));
        }

        if self.tools.is_some() {
            if let Some(call) = parse_tool_call(content) {
                log::debug!("agent '{}' requested tool '{}'", self.id, call.name);
                return Ok(AgentReply::ToolCall(call));
            }
        }
        Ok(AgentReply::Text(content.to_string()))
    }
}

/// Find the first JSON object in `response` carrying a `tool_call` entry.
///
/// Brace matching skips braces inside JSON strings, so code or CSV content in the parameters
/// does not cut the object short. Both `parameters` and `arguments` keys are accepted.
pub fn parse_tool_call(response: &str) -> Option<ToolCall> {
    for (start, ch) in response.char_indices() {
        if ch != '{' {
            continue;
        }
        let end = match matching_brace(&response[start..]) {
            Some(len) => start + len,
            None => continue,
        };
        let parsed: serde_json::Value = match serde_json::from_str(&response[start..end]) {
            Ok(value) => value,
            Err(_) => continue,
        };
        if let Some(call) = parsed.get("tool_call") {
            let name = match call.get("name").and_then(|v| v.as_str()) {
                Some(name) => name,
                None => continue,
            };
            let arguments = call
                .get("parameters")
                .or_else(|| call.get("arguments"))
                .cloned()
                .unwrap_or_else(|| serde_json::json!({}));
            return Some(ToolCall::new(name, arguments));
        }
    }
    None
}

/// Byte length of the balanced `{...}` at the start of `text`.
fn matching_brace(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}
