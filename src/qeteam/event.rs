//! Group chat event system.
//!
//! A callback-based observability layer alongside the message stream. Implement
//! [`EventHandler`] and register it with
//! [`GroupChat::with_event_handler`](crate::qeteam::group_chat::GroupChat::with_event_handler)
//! to be told about run boundaries, speaker choices, tool dispatches and completed turns.
//! Handlers are awaited inline by the runner, so keep them quick.
//!
//! # Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use qeteam::{EventHandler, GroupChatEvent};
//!
//! struct Progress;
//!
//! #[async_trait]
//! impl EventHandler for Progress {
//!     async fn on_group_chat_event(&self, event: &GroupChatEvent) {
//!         if let GroupChatEvent::SpeakerSelected { turn, speaker, .. } = event {
//!             println!("turn {}: {} is speaking", turn, speaker);
//!         }
//!     }
//! }
//! ```

use async_trait::async_trait;

/// Events emitted by a [`GroupChat`](crate::qeteam::group_chat::GroupChat) run.
#[derive(Debug, Clone)]
pub enum GroupChatEvent {
    RunStarted {
        chat_id: String,
        run_id: String,
        /// Number of participants in the chat.
        participants: usize,
    },
    SpeakerSelected {
        run_id: String,
        /// 1-based turn number about to be played.
        turn: usize,
        speaker: String,
        /// Name of the selector that made the choice.
        selector: String,
    },
    ToolInvoked {
        run_id: String,
        turn: usize,
        speaker: String,
        tool_name: String,
        success: bool,
    },
    TurnCompleted {
        run_id: String,
        turn: usize,
        speaker: String,
        /// Messages appended during the turn, tool results included.
        messages_appended: usize,
    },
    RunFinished {
        run_id: String,
        turns: usize,
        messages: usize,
        /// Display form of the stop reason.
        stop_reason: String,
    },
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Called for every group chat event. The default implementation is a no-op.
    async fn on_group_chat_event(&self, _event: &GroupChatEvent) {}
}
