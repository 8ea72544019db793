//! Termination conditions evaluated after every message appended to a run.
//!
//! Conditions are plain values: evaluating one never mutates it, so the same
//! [`Termination`] can be checked any number of times (and shared by concurrent runs) with
//! identical verdicts for identical transcripts.
//!
//! ```
//! use qeteam::{ChatMessage, Role, Termination};
//!
//! let stop = Termination::text_mention("TERMINATE") | Termination::max_messages(3);
//! let transcript = vec![
//!     ChatMessage::task("Write tests"),
//!     ChatMessage::new("writer", Role::Assistant, "draft"),
//! ];
//! assert_eq!(stop.check(&transcript), None);
//!
//! let mut transcript = transcript;
//! transcript.push(ChatMessage::new("reviewer", Role::Assistant, "looks fine"));
//! assert_eq!(
//!     stop.check(&transcript).as_deref(),
//!     Some("maximum of 3 messages reached")
//! );
//! ```

use std::fmt;
use std::ops::{BitAnd, BitOr};

use crate::qeteam::message::ChatMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Any text message (optionally restricted to the listed sources) contains `marker`.
    TextMention {
        marker: String,
        sources: Option<Vec<String>>,
    },
    /// The transcript, seed included, holds at least this many messages.
    MaxMessages(usize),
    Any(Box<Termination>, Box<Termination>),
    All(Box<Termination>, Box<Termination>),
}

impl Termination {
    pub fn text_mention(marker: impl Into<String>) -> Self {
        Termination::TextMention {
            marker: marker.into(),
            sources: None,
        }
    }

    /// Like [`Termination::text_mention`] but only messages from `sources` count.
    pub fn text_mention_from<I, S>(marker: impl Into<String>, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Termination::TextMention {
            marker: marker.into(),
            sources: Some(sources.into_iter().map(Into::into).collect()),
        }
    }

    pub fn max_messages(bound: usize) -> Self {
        Termination::MaxMessages(bound)
    }

    pub fn or(self, other: Termination) -> Self {
        Termination::Any(Box::new(self), Box::new(other))
    }

    pub fn and(self, other: Termination) -> Self {
        Termination::All(Box::new(self), Box::new(other))
    }

    /// Returns the reason the condition holds for `messages`, or `None`.
    ///
    /// `Any` short-circuits on its left operand; `All` reports both reasons.
    pub fn check(&self, messages: &[ChatMessage]) -> Option<String> {
        match self {
            Termination::TextMention { marker, sources } => messages
                .iter()
                .filter(|message| match sources {
                    Some(allowed) => allowed.iter().any(|source| *source == message.source),
                    None => true,
                })
                .find(|message| {
                    message
                        .text()
                        .map(|text| text.contains(marker.as_str()))
                        .unwrap_or(false)
                })
                .map(|message| format!("'{}' mentioned by {}", marker, message.source)),
            Termination::MaxMessages(bound) => {
                if messages.len() >= *bound {
                    Some(format!("maximum of {} messages reached", bound))
                } else {
                    None
                }
            }
            Termination::Any(left, right) => left.check(messages).or_else(|| right.check(messages)),
            Termination::All(left, right) => {
                let left = left.check(messages)?;
                let right = right.check(messages)?;
                Some(format!("{} and {}", left, right))
            }
        }
    }

    pub fn is_met(&self, messages: &[ChatMessage]) -> bool {
        self.check(messages).is_some()
    }

    /// True when every way of satisfying the condition is bounded by a message count, so a
    /// run using it stops even if no participant ever cooperates.
    pub fn guarantees_stop(&self) -> bool {
        match self {
            Termination::TextMention { .. } => false,
            Termination::MaxMessages(_) => true,
            Termination::Any(left, right) => left.guarantees_stop() || right.guarantees_stop(),
            Termination::All(left, right) => left.guarantees_stop() && right.guarantees_stop(),
        }
    }

    /// Reject conditions that can never be satisfied meaningfully.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Termination::TextMention { marker, sources } => {
                if marker.is_empty() {
                    return Err("text mention marker must not be empty".to_string());
                }
                if let Some(sources) = sources {
                    if sources.is_empty() {
                        return Err(format!(
                            "text mention '{}' has an empty source list",
                            marker
                        ));
                    }
                }
                Ok(())
            }
            Termination::MaxMessages(0) => Err("max_messages bound must be at least 1".to_string()),
            Termination::MaxMessages(_) => Ok(()),
            Termination::Any(left, right) | Termination::All(left, right) => {
                left.validate()?;
                right.validate()
            }
        }
    }
}

impl BitOr for Termination {
    type Output = Termination;

    fn bitor(self, rhs: Termination) -> Termination {
        self.or(rhs)
    }
}

impl BitAnd for Termination {
    type Output = Termination;

    fn bitand(self, rhs: Termination) -> Termination {
        self.and(rhs)
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::TextMention {
                marker,
                sources: None,
            } => write!(f, "text_mention({:?})", marker),
            Termination::TextMention {
                marker,
                sources: Some(sources),
            } => write!(f, "text_mention({:?}, from {})", marker, sources.join(", ")),
            Termination::MaxMessages(bound) => write!(f, "max_messages({})", bound),
            Termination::Any(left, right) => write!(f, "({} | {})", left, right),
            Termination::All(left, right) => write!(f, "({} & {})", left, right),
        }
    }
}
