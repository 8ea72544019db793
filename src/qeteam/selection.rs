//! Speaker selection strategies.
//!
//! A [`SpeakerSelector`] picks the id of the participant that speaks next. Two strategies are
//! provided:
//!
//! * [`RoundRobinSelector`]: fixed cyclic order, independent of message content.
//! * [`ModelSelector`]: asks a model to pick a name, then validates the answer with
//!   [`resolve_speaker`]. An answer that does not identify exactly one participant is a
//!   [`SelectionError`]; there is no fallback speaker.
//!
//! ```
//! use qeteam::{Participant, RoundRobinSelector, SpeakerSelector};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let participants = vec![
//!     Participant::new("writer", "Writes test cases"),
//!     Participant::new("reviewer", "Reviews test cases"),
//! ];
//! let selector = RoundRobinSelector;
//! let next = selector.select(&[], &participants, Some("writer")).await.unwrap();
//! assert_eq!(next, "reviewer");
//! let next = selector.select(&[], &participants, Some("reviewer")).await.unwrap();
//! assert_eq!(next, "writer");
//! # }
//! ```

use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::qeteam::client_wrapper::{ClientWrapper, Message, Role};
use crate::qeteam::message::ChatMessage;

/// What a selector knows about a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub description: String,
}

impl Participant {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionError {
    /// The selector named nobody we know.
    UnknownParticipant(String),
    /// The selector's answer mentions more than one participant.
    AmbiguousParticipant {
        reply: String,
        candidates: Vec<String>,
    },
    /// There is nobody to choose from.
    NoCandidates,
    /// The reasoning backend failed.
    Backend(String),
}

impl fmt::Display for SelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionError::UnknownParticipant(reply) => {
                write!(f, "Selected speaker is not a participant: {:?}", reply)
            }
            SelectionError::AmbiguousParticipant { reply, candidates } => write!(
                f,
                "Selection {:?} is ambiguous between: {}",
                reply,
                candidates.join(", ")
            ),
            SelectionError::NoCandidates => write!(f, "No participants to select from"),
            SelectionError::Backend(msg) => write!(f, "Speaker selection failed: {}", msg),
        }
    }
}

impl Error for SelectionError {}

#[async_trait]
pub trait SpeakerSelector: Send + Sync {
    /// Return the id of the next speaker.
    async fn select(
        &self,
        transcript: &[ChatMessage],
        participants: &[Participant],
        last_speaker: Option<&str>,
    ) -> Result<String, SelectionError>;

    fn name(&self) -> &str;
}

/// Cycles through participants in construction order.
///
/// Returns the participant after `last_speaker`, wrapping around; the first participant when
/// there is no last speaker (or it is not a participant, e.g. the seed task).
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobinSelector;

#[async_trait]
impl SpeakerSelector for RoundRobinSelector {
    async fn select(
        &self,
        _transcript: &[ChatMessage],
        participants: &[Participant],
        last_speaker: Option<&str>,
    ) -> Result<String, SelectionError> {
        if participants.is_empty() {
            return Err(SelectionError::NoCandidates);
        }
        let next = last_speaker
            .and_then(|last| participants.iter().position(|p| p.id == last))
            .map(|idx| (idx + 1) % participants.len())
            .unwrap_or(0);
        Ok(participants[next].id.clone())
    }

    fn name(&self) -> &str {
        "round_robin"
    }
}

pub const DEFAULT_SELECTOR_PROMPT: &str = "You are in a role play game. The following roles are available:\n\
{roles}.\n\
Read the following conversation. Then select the next role from {participants} to play. Only return the role.\n\
\n\
{history}\n\
\n\
Read the above conversation. Then select the next role from {participants} to play. Only return the role.";

/// Lets a model choose the next speaker.
///
/// The prompt template may use `{roles}` (one `id: description` line per candidate),
/// `{participants}` (candidate ids) and `{history}` (recent `source: content` lines).
pub struct ModelSelector {
    client: Arc<dyn ClientWrapper>,
    prompt_template: String,
    allow_repeated_speaker: bool,
    history_window: Option<usize>,
}

impl ModelSelector {
    pub fn new(client: Arc<dyn ClientWrapper>) -> Self {
        Self {
            client,
            prompt_template: DEFAULT_SELECTOR_PROMPT.to_string(),
            allow_repeated_speaker: false,
            history_window: None,
        }
    }

    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }

    /// Keep the previous speaker among the candidates (off by default).
    pub fn with_allow_repeated_speaker(mut self, allow: bool) -> Self {
        self.allow_repeated_speaker = allow;
        self
    }

    /// Only show the most recent `size` messages in `{history}`.
    pub fn with_history_window(mut self, size: usize) -> Self {
        self.history_window = Some(size);
        self
    }

    fn candidates<'a>(
        &self,
        participants: &'a [Participant],
        last_speaker: Option<&str>,
    ) -> Vec<&'a Participant> {
        let all: Vec<&Participant> = participants.iter().collect();
        match last_speaker {
            Some(last) if !self.allow_repeated_speaker && participants.len() > 1 => {
                let others: Vec<&Participant> =
                    all.iter().copied().filter(|p| p.id != last).collect();
                if others.is_empty() {
                    all
                } else {
                    others
                }
            }
            _ => all,
        }
    }

    pub fn build_prompt(&self, transcript: &[ChatMessage], candidates: &[&Participant]) -> String {
        let roles = candidates
            .iter()
            .map(|p| format!("{}: {}", p.id, p.description))
            .collect::<Vec<_>>()
            .join("\n");
        let names = format!(
            "[{}]",
            candidates
                .iter()
                .map(|p| p.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        let window = match self.history_window {
            Some(size) if transcript.len() > size => &transcript[transcript.len() - size..],
            _ => transcript,
        };
        let history = window
            .iter()
            .map(|m| format!("{}: {}", m.source, m.content))
            .collect::<Vec<_>>()
            .join("\n");

        self.prompt_template
            .replace("{roles}", &roles)
            .replace("{participants}", &names)
            .replace("{history}", &history)
    }
}

#[async_trait]
impl SpeakerSelector for ModelSelector {
    async fn select(
        &self,
        transcript: &[ChatMessage],
        participants: &[Participant],
        last_speaker: Option<&str>,
    ) -> Result<String, SelectionError> {
        let candidates = self.candidates(participants, last_speaker);
        match candidates.len() {
            0 => return Err(SelectionError::NoCandidates),
            1 => return Ok(candidates[0].id.clone()),
            _ => {}
        }

        let prompt = self.build_prompt(transcript, &candidates);
        let reply = self
            .client
            .send_message(&[Message::new(Role::System, prompt)])
            .await
            .map_err(|e| SelectionError::Backend(e.to_string()))?;

        let owned: Vec<Participant> = candidates.into_iter().cloned().collect();
        let idx = resolve_speaker(&reply.content, &owned)?;
        log::debug!(
            "model selector picked '{}' from reply {:?}",
            owned[idx].id,
            reply.content
        );
        Ok(owned[idx].id.clone())
    }

    fn name(&self) -> &str {
        "model"
    }
}

/// Map a free-text answer onto exactly one participant, returning its index.
///
/// An answer equal to a participant id (ignoring surrounding whitespace, quotes, backticks
/// and a trailing period) wins outright. Otherwise the answer must mention exactly one
/// participant id as a whole word.
pub fn resolve_speaker(reply: &str, participants: &[Participant]) -> Result<usize, SelectionError> {
    let cleaned = reply
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .trim_end_matches('.')
        .trim();

    if let Some(idx) = participants.iter().position(|p| p.id == cleaned) {
        return Ok(idx);
    }

    let mentioned: Vec<usize> = participants
        .iter()
        .enumerate()
        .filter(|(_, p)| mentions_word(reply, &p.id))
        .map(|(idx, _)| idx)
        .collect();

    match mentioned.as_slice() {
        [idx] => Ok(*idx),
        [] => Err(SelectionError::UnknownParticipant(reply.trim().to_string())),
        many => Err(SelectionError::AmbiguousParticipant {
            reply: reply.trim().to_string(),
            candidates: many.iter().map(|idx| participants[*idx].id.clone()).collect(),
        }),
    }
}

fn mentions_word(text: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    let is_word_char = |c: char| c.is_alphanumeric() || c == '_';
    text.match_indices(word).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + word.len()..].chars().next();
        !before.map(is_word_char).unwrap_or(false) && !after.map(is_word_char).unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team() -> Vec<Participant> {
        vec![
            Participant::new("test_case_writer", "Writes CSV test cases"),
            Participant::new("test_case_reviewer", "Reviews test cases"),
            Participant::new("bdd_coder", "Writes step definitions"),
        ]
    }

    #[test]
    fn test_word_boundaries() {
        assert!(mentions_word("next: bdd_coder.", "bdd_coder"));
        assert!(!mentions_word("bdd_coder_v2", "bdd_coder"));
        assert!(!mentions_word("mybdd_coder", "bdd_coder"));
    }

    #[test]
    fn test_prompt_lists_candidates_and_history() {
        struct Never;
        #[async_trait]
        impl ClientWrapper for Never {
            async fn send_message(
                &self,
                _messages: &[Message],
            ) -> Result<Message, Box<dyn Error + Send + Sync>> {
                Err("unused".into())
            }
            fn model_name(&self) -> &str {
                "never"
            }
        }

        let selector = ModelSelector::new(Arc::new(Never)).with_history_window(1);
        let participants = team();
        let candidates: Vec<&Participant> = participants.iter().collect();
        let transcript = vec![
            ChatMessage::task("old message"),
            ChatMessage::new("test_case_writer", Role::Assistant, "id,title"),
        ];
        let prompt = selector.build_prompt(&transcript, &candidates);

        assert!(prompt.contains("test_case_reviewer: Reviews test cases"));
        assert!(prompt.contains("[test_case_writer, test_case_reviewer, bdd_coder]"));
        assert!(prompt.contains("test_case_writer: id,title"));
        assert!(!prompt.contains("old message"));
    }
}
