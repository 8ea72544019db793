//! Turn-taking group chat runner.
//!
//! A [`GroupChat`] owns its participants and policies; every call to
//! [`GroupChat::run_stream`] starts an independent run with a fresh transcript. A run is one
//! spawned task that loops:
//!
//! ```text
//! select speaker ─▶ agent.produce(transcript) ─┬─▶ final text ─▶ append, turn += 1
//!       ▲                                      └─▶ tool call ─▶ dispatch, append role=tool,
//!       │                                                       produce again (same turn)
//!       └──── termination / max_turns / cancellation checks ◀──┘
//! ```
//!
//! Every appended message is sent through a bounded channel, in append order, before the run
//! moves on, so a slow consumer applies backpressure and never sees message N+1 before N.
//! The stream ends with a single [`RunEvent::Finished`] carrying the [`RunOutcome`].
//!
//! Agent and selection failures are written to the transcript as a role=system message and
//! end the run (fail-fast). Tool failures are role=tool messages; whether they end the run is
//! decided by [`ToolErrorPolicy`]. Only configuration problems are reported as `Err` before a
//! run starts.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use qeteam::{FixedInput, GroupChat, StopReason, Termination, UserProxyAgent};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let mut chat = GroupChat::new("qe", "QE team")
//!     .with_termination(Termination::text_mention("APPROVED"))
//!     .with_max_turns(4);
//! chat.add_participant(Arc::new(UserProxyAgent::new(
//!     "user_proxy",
//!     "Relays the requirement",
//!     FixedInput::new("add a login page test"),
//! )))?;
//!
//! let outcome = chat.run("Create test cases for the requirement").await?;
//! assert!(matches!(outcome.stop_reason, StopReason::MaxTurnsReached(4)));
//! # Ok(())
//! # }
//! ```

use futures_util::{FutureExt, Stream, StreamExt};
use std::convert::Infallible;
use std::error::Error;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::qeteam::agent::{AgentReply, ConversableAgent};
use crate::qeteam::event::{EventHandler, GroupChatEvent};
use crate::qeteam::message::{ChatMessage, Transcript};
use crate::qeteam::selection::{
    Participant, RoundRobinSelector, SelectionError, SpeakerSelector,
};
use crate::qeteam::termination::Termination;
use crate::qeteam::tool_protocol::{panic_message, ToolError, ToolResult};

const DEFAULT_MAX_TOOL_ROUNDS: usize = 5;
const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// What happens when a tool call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorPolicy {
    /// The failure is appended as a role=tool message and the agent continues its turn.
    #[default]
    Recoverable,
    /// The failure is appended, then the run ends with an agent failure.
    Fatal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupChatError {
    /// [`GroupChat::run_stream`] was called before any participant was added.
    NoParticipants,
    /// Two participants share the same id.
    DuplicateParticipant(String),
    /// Neither `max_turns` nor a termination condition that always stops is configured.
    Unbounded,
    InvalidConfig(String),
    Selection(SelectionError),
    /// An agent raised, timed out, returned an empty reply or a fatal tool failure occurred.
    AgentFailure { agent_id: String, reason: String },
    /// The run task ended without reporting an outcome.
    RunAborted(String),
}

impl fmt::Display for GroupChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupChatError::NoParticipants => write!(f, "No participants in group chat"),
            GroupChatError::DuplicateParticipant(id) => {
                write!(f, "Participant with id '{}' already exists", id)
            }
            GroupChatError::Unbounded => write!(
                f,
                "Run is unbounded: set max_turns or a termination condition with a message limit"
            ),
            GroupChatError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            GroupChatError::Selection(err) => write!(f, "Selection error: {}", err),
            GroupChatError::AgentFailure { agent_id, reason } => {
                write!(f, "Agent '{}' failed: {}", agent_id, reason)
            }
            GroupChatError::RunAborted(msg) => write!(f, "Run aborted: {}", msg),
        }
    }
}

impl Error for GroupChatError {}

impl From<SelectionError> for GroupChatError {
    fn from(err: SelectionError) -> Self {
        GroupChatError::Selection(err)
    }
}

impl GroupChatError {
    fn kind(&self) -> &'static str {
        match self {
            GroupChatError::Selection(_) => "selection_error",
            GroupChatError::AgentFailure { .. } => "agent_failure",
            _ => "run_error",
        }
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// The termination condition held; carries its explanation.
    Terminated(String),
    /// The configured turn budget was used up.
    MaxTurnsReached(usize),
    Failed(GroupChatError),
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Terminated(reason) => write!(f, "terminated: {}", reason),
            StopReason::MaxTurnsReached(turns) => write!(f, "reached max_turns ({})", turns),
            StopReason::Failed(err) => write!(f, "failed: {}", err),
            StopReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub transcript: Transcript,
    /// Completed agent turns (tool sub-steps are not counted).
    pub turns: usize,
    pub stop_reason: StopReason,
}

/// Items yielded by a [`RunStream`].
#[derive(Debug, Clone)]
pub enum RunEvent {
    Message(ChatMessage),
    Finished(RunOutcome),
}

/// Ordered, lazily produced events of one run.
///
/// Dropping the stream cancels the run at its next turn boundary.
pub struct RunStream {
    run_id: String,
    receiver: mpsc::Receiver<RunEvent>,
    cancel: CancellationToken,
}

impl RunStream {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Ask the run to stop before its next turn. A tool call already in flight completes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this run, for use from another task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Stream for RunStream {
    type Item = RunEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<RunEvent>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for RunStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A set of participants plus the policies that govern how they take turns.
pub struct GroupChat {
    id: String,
    name: String,
    participants: Vec<Arc<dyn ConversableAgent>>,
    selector: Arc<dyn SpeakerSelector>,
    termination: Option<Termination>,
    max_turns: Option<usize>,
    tool_error_policy: ToolErrorPolicy,
    max_tool_rounds: usize,
    agent_timeout: Option<Duration>,
    channel_capacity: usize,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl GroupChat {
    /// Create an empty group chat using round-robin selection.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            participants: Vec::new(),
            selector: Arc::new(RoundRobinSelector),
            termination: None,
            max_turns: None,
            tool_error_policy: ToolErrorPolicy::default(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            agent_timeout: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            event_handler: None,
        }
    }

    pub fn with_selector(mut self, selector: impl SpeakerSelector + 'static) -> Self {
        self.selector = Arc::new(selector);
        self
    }

    pub fn with_termination(mut self, termination: Termination) -> Self {
        self.termination = Some(termination);
        self
    }

    /// Stop after this many completed agent turns.
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn with_tool_error_policy(mut self, policy: ToolErrorPolicy) -> Self {
        self.tool_error_policy = policy;
        self
    }

    /// Tool calls one agent may make within a single turn (default 5).
    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    /// Bound each `produce` call and each speaker selection.
    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = Some(timeout);
        self
    }

    /// Events buffered between the run and its consumer (default 16).
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Add a participant. Insertion order is the round-robin order.
    pub fn add_participant(
        &mut self,
        agent: Arc<dyn ConversableAgent>,
    ) -> Result<(), GroupChatError> {
        let id = agent.id();
        if id.trim().is_empty() {
            return Err(GroupChatError::InvalidConfig(
                "participant id must not be empty".to_string(),
            ));
        }
        if self.participants.iter().any(|p| p.id() == id) {
            return Err(GroupChatError::DuplicateParticipant(id.to_string()));
        }
        self.participants.push(agent);
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.participants
            .iter()
            .map(|p| Participant::new(p.id(), p.description()))
            .collect()
    }

    /// Check that a run could start and is guaranteed to end.
    pub fn validate(&self) -> Result<(), GroupChatError> {
        if self.participants.is_empty() {
            return Err(GroupChatError::NoParticipants);
        }
        if self.max_turns == Some(0) {
            return Err(GroupChatError::InvalidConfig(
                "max_turns must be at least 1".to_string(),
            ));
        }
        if self.max_tool_rounds == 0 {
            return Err(GroupChatError::InvalidConfig(
                "max_tool_rounds must be at least 1".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(GroupChatError::InvalidConfig(
                "channel capacity must be at least 1".to_string(),
            ));
        }
        if let Some(termination) = &self.termination {
            termination
                .validate()
                .map_err(GroupChatError::InvalidConfig)?;
        }
        let bounded = self.max_turns.is_some()
            || self
                .termination
                .as_ref()
                .map(Termination::guarantees_stop)
                .unwrap_or(false);
        if !bounded {
            return Err(GroupChatError::Unbounded);
        }
        Ok(())
    }

    /// Start a run on the current tokio runtime and return its event stream.
    pub fn run_stream(&self, task: impl Into<String>) -> Result<RunStream, GroupChatError> {
        self.validate()?;

        let run_id = Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::channel(self.channel_capacity);
        let cancel = CancellationToken::new();

        let run = Run {
            settings: Arc::new(RunSettings {
                chat_id: self.id.clone(),
                participants: self.participants.clone(),
                roster: self.participants(),
                selector: self.selector.clone(),
                termination: self.termination.clone(),
                max_turns: self.max_turns,
                tool_error_policy: self.tool_error_policy,
                max_tool_rounds: self.max_tool_rounds,
                agent_timeout: self.agent_timeout,
                event_handler: self.event_handler.clone(),
            }),
            run_id: run_id.clone(),
            transcript: Transcript::new(),
            turns: 0,
            last_speaker: None,
            sender,
            cancel: cancel.clone(),
        };
        tokio::spawn(run.drive(task.into()));

        Ok(RunStream {
            run_id,
            receiver,
            cancel,
        })
    }

    /// Run to completion and return the outcome.
    ///
    /// Collaborator failures are part of a successful return: see
    /// [`RunOutcome::stop_reason`].
    pub async fn run(&self, task: impl Into<String>) -> Result<RunOutcome, GroupChatError> {
        let mut stream = self.run_stream(task)?;
        while let Some(event) = stream.next().await {
            if let RunEvent::Finished(outcome) = event {
                return Ok(outcome);
            }
        }
        Err(GroupChatError::RunAborted(
            "run ended without an outcome".to_string(),
        ))
    }
}

/// Per-run snapshot of the chat configuration.
struct RunSettings {
    chat_id: String,
    participants: Vec<Arc<dyn ConversableAgent>>,
    roster: Vec<Participant>,
    selector: Arc<dyn SpeakerSelector>,
    termination: Option<Termination>,
    max_turns: Option<usize>,
    tool_error_policy: ToolErrorPolicy,
    max_tool_rounds: usize,
    agent_timeout: Option<Duration>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

struct Run {
    settings: Arc<RunSettings>,
    run_id: String,
    transcript: Transcript,
    turns: usize,
    last_speaker: Option<String>,
    sender: mpsc::Sender<RunEvent>,
    cancel: CancellationToken,
}

impl Run {
    async fn drive(mut self, task: String) {
        log::info!(
            "group chat '{}' run {} started with {} participant(s)",
            self.settings.chat_id,
            self.run_id,
            self.settings.participants.len()
        );
        self.emit(GroupChatEvent::RunStarted {
            chat_id: self.settings.chat_id.clone(),
            run_id: self.run_id.clone(),
            participants: self.settings.participants.len(),
        })
        .await;

        let stop_reason = match self.play(task).await {
            Ok(never) => match never {},
            Err(reason) => reason,
        };

        log::info!(
            "group chat '{}' run {} stopped after {} turn(s): {}",
            self.settings.chat_id,
            self.run_id,
            self.turns,
            stop_reason
        );
        self.emit(GroupChatEvent::RunFinished {
            run_id: self.run_id.clone(),
            turns: self.turns,
            messages: self.transcript.len(),
            stop_reason: stop_reason.to_string(),
        })
        .await;

        let outcome = RunOutcome {
            run_id: self.run_id.clone(),
            transcript: std::mem::take(&mut self.transcript),
            turns: self.turns,
            stop_reason,
        };
        // The consumer may already be gone; nothing left to do then.
        let _ = self.publish(RunEvent::Finished(outcome)).await;
    }

    /// The run loop. Only ever returns through `Err(StopReason)`.
    async fn play(&mut self, task: String) -> Result<Infallible, StopReason> {
        self.append(ChatMessage::task(task)).await?;
        self.check_termination()?;

        loop {
            if self.cancel.is_cancelled() {
                return Err(StopReason::Cancelled);
            }

            let turn = self.turns + 1;
            let agent = self.select_speaker(turn).await?;
            self.play_turn(turn, agent).await?;

            if let Some(max_turns) = self.settings.max_turns {
                if self.turns >= max_turns {
                    return Err(StopReason::MaxTurnsReached(max_turns));
                }
            }
        }
    }

    async fn select_speaker(&mut self, turn: usize) -> Result<Arc<dyn ConversableAgent>, StopReason> {
        let settings = self.settings.clone();
        let selection = AssertUnwindSafe(settings.selector.select(
            self.transcript.messages(),
            &settings.roster,
            self.last_speaker.as_deref(),
        ))
        .catch_unwind();
        let selected = match settings.agent_timeout {
            Some(limit) => match tokio::time::timeout(limit, selection).await {
                Ok(result) => result,
                Err(_) => Ok(Err(SelectionError::Backend(format!(
                    "selection timed out after {:?}",
                    limit
                )))),
            },
            None => selection.await,
        };
        let selected = selected.unwrap_or_else(|payload| {
            Err(SelectionError::Backend(format!(
                "selector panicked: {}",
                panic_message(payload.as_ref())
            )))
        });

        let speaker = match selected {
            Ok(id) => id,
            Err(err) => return Err(self.fail(err.into()).await),
        };
        let agent = match settings.participants.iter().find(|p| p.id() == speaker) {
            Some(agent) => agent.clone(),
            None => {
                return Err(self
                    .fail(SelectionError::UnknownParticipant(speaker).into())
                    .await)
            }
        };

        log::debug!(
            "run {} turn {}: {} selected '{}'",
            self.run_id,
            turn,
            settings.selector.name(),
            agent.id()
        );
        self.emit(GroupChatEvent::SpeakerSelected {
            run_id: self.run_id.clone(),
            turn,
            speaker: agent.id().to_string(),
            selector: settings.selector.name().to_string(),
        })
        .await;
        Ok(agent)
    }

    /// One agent turn: tool sub-steps until a final reply (or a stop).
    async fn play_turn(
        &mut self,
        turn: usize,
        agent: Arc<dyn ConversableAgent>,
    ) -> Result<(), StopReason> {
        let agent_id = agent.id().to_string();
        let mut tool_rounds = 0;
        let mut appended = 0;

        loop {
            let reply = match self.produce(agent.as_ref()).await {
                Ok(reply) => reply,
                Err(reason) => return Err(self.agent_failure(&agent_id, reason).await),
            };

            match reply {
                AgentReply::Text(text) => {
                    if text.trim().is_empty() {
                        return Err(self
                            .agent_failure(&agent_id, "empty reply".to_string())
                            .await);
                    }
                    let message = ChatMessage::new(agent_id.clone(), agent.role(), text)
                        .with_metadata("turn", turn.to_string());
                    self.append(message).await?;
                    appended += 1;

                    self.turns = turn;
                    self.last_speaker = Some(agent_id.clone());
                    self.emit(GroupChatEvent::TurnCompleted {
                        run_id: self.run_id.clone(),
                        turn,
                        speaker: agent_id,
                        messages_appended: appended,
                    })
                    .await;
                    return self.check_termination();
                }
                AgentReply::ToolCall(call) => {
                    if tool_rounds >= self.settings.max_tool_rounds {
                        let reason = format!(
                            "exceeded {} tool call(s) in one turn",
                            self.settings.max_tool_rounds
                        );
                        return Err(self.agent_failure(&agent_id, reason).await);
                    }
                    tool_rounds += 1;

                    let result = match agent.tools() {
                        Some(registry) => registry.dispatch(&call.name, call.arguments).await,
                        None => ToolResult::from_error(&ToolError::NotFound(call.name.clone())),
                    };
                    let success = result.success;
                    let error = result.error.clone();
                    if success {
                        log::debug!("run {}: tool '{}' succeeded", self.run_id, call.name);
                    } else {
                        log::warn!(
                            "run {}: tool '{}' requested by '{}' failed: {}",
                            self.run_id,
                            call.name,
                            agent_id,
                            error.as_deref().unwrap_or("unknown error")
                        );
                    }
                    self.emit(GroupChatEvent::ToolInvoked {
                        run_id: self.run_id.clone(),
                        turn,
                        speaker: agent_id.clone(),
                        tool_name: call.name.clone(),
                        success,
                    })
                    .await;

                    let message = ChatMessage::tool_result(agent_id.clone(), &call.name, result)
                        .with_metadata("turn", turn.to_string());
                    self.append(message).await?;
                    appended += 1;

                    if !success && self.settings.tool_error_policy == ToolErrorPolicy::Fatal {
                        let reason = format!(
                            "tool '{}' failed: {}",
                            call.name,
                            error.unwrap_or_else(|| "unknown error".to_string())
                        );
                        return Err(self.agent_failure(&agent_id, reason).await);
                    }
                    self.check_termination()?;
                }
            }
        }
    }

    async fn produce(&self, agent: &dyn ConversableAgent) -> Result<AgentReply, String> {
        let call = AssertUnwindSafe(agent.produce(self.transcript.messages())).catch_unwind();
        let result = match self.settings.agent_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => return Err(format!("timed out after {:?}", limit)),
            },
            None => call.await,
        };
        match result {
            Ok(reply) => reply.map_err(|e| e.to_string()),
            Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
        }
    }

    fn check_termination(&self) -> Result<(), StopReason> {
        match self
            .settings
            .termination
            .as_ref()
            .and_then(|t| t.check(self.transcript.messages()))
        {
            Some(reason) => Err(StopReason::Terminated(reason)),
            None => Ok(()),
        }
    }

    async fn agent_failure(&mut self, agent_id: &str, reason: String) -> StopReason {
        self.fail(GroupChatError::AgentFailure {
            agent_id: agent_id.to_string(),
            reason,
        })
        .await
    }

    /// Record `error` as a role=system message and turn it into the stop reason.
    async fn fail(&mut self, error: GroupChatError) -> StopReason {
        log::error!("run {}: {}", self.run_id, error);
        let message = ChatMessage::system_error(error.to_string())
            .with_metadata("error_kind", error.kind());
        match self.append(message).await {
            Ok(()) => StopReason::Failed(error),
            Err(stop) => stop,
        }
    }

    /// Append to the transcript and hand the message to the consumer.
    async fn append(&mut self, message: ChatMessage) -> Result<(), StopReason> {
        self.transcript.push(message.clone());
        if self.publish(RunEvent::Message(message)).await {
            Ok(())
        } else {
            Err(StopReason::Cancelled)
        }
    }

    /// Waits for channel capacity; false once the consumer is gone.
    async fn publish(&self, event: RunEvent) -> bool {
        self.sender.send(event).await.is_ok()
    }

    async fn emit(&self, event: GroupChatEvent) {
        if let Some(handler) = &self.settings.event_handler {
            handler.on_group_chat_event(&event).await;
        }
    }
}
