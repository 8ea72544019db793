//! # qeteam
//!
//! qeteam coordinates a small team of cooperating conversational agents (a human proxy,
//! LLM-backed specialists and tool-executing writers) that turn a free-text requirement into
//! quality-engineering artifacts: user stories, acceptance criteria, CSV test cases and
//! step-definition code.
//!
//! The heart of the crate is the [`GroupChat`] runner, a turn-taking orchestrator that decides,
//! message by message, which participant speaks next, feeds it the shared transcript, dispatches
//! tool calls requested by the reply, applies a composable [`Termination`] policy and streams
//! every appended message to the consumer in order.
//!
//! * **Participants**: anything implementing [`ConversableAgent`]; [`AssistantAgent`] talks to
//!   an LLM through a [`ClientWrapper`], [`UserProxyAgent`] relays human input.
//! * **Speaker selection**: fixed [`RoundRobinSelector`] or adaptive [`ModelSelector`], both
//!   behind the [`SpeakerSelector`] trait. Adaptive picks are validated and never defaulted.
//! * **Termination**: text mentions, message-count bounds and their `|` / `&` compositions.
//! * **Tools**: a name-keyed [`tool_protocol::ToolRegistry`] that turns every failure into a
//!   structured result, plus the sandboxed artifact writer behind `write_file` and
//!   `write_java_file`.
//!
//! ## Running a group chat
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures_util::StreamExt;
//! use qeteam::{AssistantAgent, GroupChat, RunEvent, Termination};
//! use qeteam::clients::openai::OpenAIClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let client = Arc::new(OpenAIClient::new_with_model_string(
//!         &std::env::var("OPENAI_API_KEY")?,
//!         "gpt-4o-mini",
//!     ));
//!
//!     let writer = AssistantAgent::new("writer", "Writes test cases", client.clone())
//!         .with_system_prompt("Write test cases as CSV.");
//!     let reviewer = AssistantAgent::new("reviewer", "Reviews test cases", client)
//!         .with_system_prompt("Review the test cases. Reply APPROVED when they are complete.");
//!
//!     let mut chat = GroupChat::new("qe", "QE team")
//!         .with_termination(Termination::text_mention("APPROVED") | Termination::max_messages(8))
//!         .with_max_turns(6);
//!     chat.add_participant(Arc::new(writer))?;
//!     chat.add_participant(Arc::new(reviewer))?;
//!
//!     let mut stream = chat.run_stream("Test the login page")?;
//!     while let Some(event) = stream.next().await {
//!         match event {
//!             RunEvent::Message(message) => println!("[{}] {}", message.source, message.content),
//!             RunEvent::Finished(outcome) => println!("stopped: {}", outcome.stop_reason),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Logging
//!
//! The crate logs through the `log` facade. Call [`init_logger`] once to route records to
//! `env_logger` (configured with `RUST_LOG`).

pub mod qeteam;

pub use qeteam::agent::{AgentError, AgentReply, AssistantAgent, ConversableAgent, ToolCall};
pub use qeteam::client_wrapper::{ClientWrapper, Message, Role, TokenUsage};
pub use qeteam::clients;
pub use qeteam::config::{AgentSelection, ConfigError, SelectionMode, TeamConfig};
pub use qeteam::console::Console;
pub use qeteam::event::{EventHandler, GroupChatEvent};
pub use qeteam::group_chat::{
    GroupChat, GroupChatError, RunEvent, RunOutcome, RunStream, StopReason, ToolErrorPolicy,
};
pub use qeteam::message::{ChatMessage, MessageContent, Transcript};
pub use qeteam::selection::{
    resolve_speaker, ModelSelector, Participant, RoundRobinSelector, SelectionError,
    SpeakerSelector,
};
pub use qeteam::termination::Termination;
pub use qeteam::tool_protocol;
pub use qeteam::tool_protocols;
pub use qeteam::tools;
pub use qeteam::user_proxy::{FixedInput, InputSource, StdinInput, UserProxyAgent};
pub use qeteam::workflow::{build_qe_team, WorkflowError, QE_TASK};

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise `env_logger` exactly once for the whole process.
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}
