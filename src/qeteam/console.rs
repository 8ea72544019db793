//! Terminal presentation of a run.
//!
//! Messages arrive whole; chunking them word by word is purely a display effect.

use futures_util::StreamExt;
use std::io::{self, Write};

use crate::qeteam::client_wrapper::Role;
use crate::qeteam::group_chat::{GroupChatError, RunEvent, RunOutcome, RunStream};
use crate::qeteam::message::{ChatMessage, MessageContent};

/// One piece of rendered output.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayItem {
    /// Printed when the speaker changes.
    Header(String),
    Chunk(String),
    ArtifactCreated(String),
    Error(String),
}

/// Split `text` into words, each keeping one trailing space.
pub fn word_chunks(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace().map(|word| format!("{} ", word))
}

/// Render `message` into display items; `previous_source` controls the header.
pub fn render_message(message: &ChatMessage, previous_source: Option<&str>) -> Vec<DisplayItem> {
    let mut items = Vec::new();
    if previous_source != Some(message.source.as_str()) {
        items.push(DisplayItem::Header(message.source.clone()));
    }

    if let Some(path) = message.content.artifact_path() {
        items.push(DisplayItem::ArtifactCreated(path.to_string()));
        return items;
    }

    match &message.content {
        MessageContent::Text(text) if message.role == Role::System => {
            items.push(DisplayItem::Error(text.clone()));
        }
        MessageContent::Text(text) => items.extend(word_chunks(text).map(DisplayItem::Chunk)),
        content => items.push(DisplayItem::Error(content.render())),
    }
    items
}

/// Writes a run to any `io::Write` sink.
pub struct Console<W: Write> {
    out: W,
    current_source: Option<String>,
}

impl Console<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Console<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            current_source: None,
        }
    }

    pub fn print_message(&mut self, message: &ChatMessage) -> io::Result<()> {
        for item in render_message(message, self.current_source.as_deref()) {
            match item {
                DisplayItem::Header(source) => writeln!(self.out, "\n### {}", source)?,
                DisplayItem::Chunk(word) => write!(self.out, "{}", word)?,
                DisplayItem::ArtifactCreated(path) => writeln!(self.out, "File created: {}", path)?,
                DisplayItem::Error(text) => writeln!(self.out, "Error: {}", text)?,
            }
        }
        writeln!(self.out)?;
        self.out.flush()?;
        self.current_source = Some(message.source.clone());
        Ok(())
    }

    /// Print every message of `stream` and return the run outcome.
    pub async fn consume(&mut self, mut stream: RunStream) -> Result<RunOutcome, GroupChatError> {
        while let Some(event) = stream.next().await {
            match event {
                RunEvent::Message(message) => {
                    if let Err(err) = self.print_message(&message) {
                        log::warn!("console output failed: {}", err);
                    }
                }
                RunEvent::Finished(outcome) => {
                    if let Err(err) = writeln!(self.out, "\n--- {} ---", outcome.stop_reason) {
                        log::warn!("console output failed: {}", err);
                    }
                    return Ok(outcome);
                }
            }
        }
        Err(GroupChatError::RunAborted(
            "stream closed without an outcome".to_string(),
        ))
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qeteam::tool_protocol::ToolResult;
    use serde_json::json;

    #[test]
    fn test_word_chunks() {
        let chunks: Vec<String> = word_chunks("Given a  user\nWhen").collect();
        assert_eq!(chunks, vec!["Given ", "a ", "user ", "When "]);
    }

    #[test]
    fn test_header_only_on_speaker_change() {
        let message = ChatMessage::new("writer", Role::Assistant, "draft ready");
        let items = render_message(&message, None);
        assert_eq!(items[0], DisplayItem::Header("writer".to_string()));
        assert_eq!(items.len(), 3);

        let items = render_message(&message, Some("writer"));
        assert_eq!(
            items,
            vec![
                DisplayItem::Chunk("draft ".to_string()),
                DisplayItem::Chunk("ready ".to_string())
            ]
        );
    }

    #[test]
    fn test_artifact_and_error_rendering() {
        let tool = ChatMessage::tool_result(
            "writer",
            "write_file",
            ToolResult::success(json!({"path": "outputs/Test_Cases.csv"})),
        );
        assert_eq!(
            render_message(&tool, Some("writer")),
            vec![DisplayItem::ArtifactCreated(
                "outputs/Test_Cases.csv".to_string()
            )]
        );

        let failed = ChatMessage::system_error("Agent 'writer' failed: boom");
        let items = render_message(&failed, Some("system"));
        assert_eq!(
            items,
            vec![DisplayItem::Error("Agent 'writer' failed: boom".to_string())]
        );
    }

    /// Sink that rejects every write.
    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[tokio::test]
    async fn test_consume_survives_output_errors() {
        use crate::qeteam::group_chat::{GroupChat, StopReason};
        use crate::qeteam::user_proxy::{FixedInput, UserProxyAgent};
        use std::sync::Arc;

        let mut chat = GroupChat::new("console", "Console").with_max_turns(1);
        chat.add_participant(Arc::new(UserProxyAgent::new(
            "user_proxy",
            "Relays the requirement",
            FixedInput::new("add a login page test"),
        )))
        .unwrap();

        let outcome = Console::new(BrokenPipe)
            .consume(chat.run_stream("go").unwrap())
            .await
            .unwrap();
        assert_eq!(outcome.stop_reason, StopReason::MaxTurnsReached(1));
        assert_eq!(outcome.transcript.len(), 2);
    }

    #[test]
    fn test_print_message_output() {
        let mut console = Console::new(Vec::new());
        console
            .print_message(&ChatMessage::new("reviewer", Role::Assistant, "APPROVED"))
            .unwrap();
        let printed = String::from_utf8(console.into_inner()).unwrap();
        assert_eq!(printed, "\n### reviewer\nAPPROVED \n");
    }
}
