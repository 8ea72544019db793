use async_trait::async_trait;
use qeteam::qeteam::selection::DEFAULT_SELECTOR_PROMPT;
use qeteam::{
    resolve_speaker, ChatMessage, ClientWrapper, Message, ModelSelector, Participant, Role,
    RoundRobinSelector, SelectionError, SpeakerSelector,
};
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn team() -> Vec<Participant> {
    vec![
        Participant::new("test_manager", "Writes the user story"),
        Participant::new("test_case_writer", "Writes CSV test cases"),
        Participant::new("test_case_reviewer", "Reviews test cases"),
    ]
}

/// Answers every prompt with a fixed reply and remembers the prompts it saw.
struct RecordingClient {
    reply: String,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl RecordingClient {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ClientWrapper for RecordingClient {
    async fn send_message(
        &self,
        messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(first) = messages.first() {
            self.prompts.lock().unwrap().push(first.content.to_string());
        }
        Ok(Message::new(Role::Assistant, &self.reply))
    }

    fn model_name(&self) -> &str {
        "recording"
    }
}

struct DownClient;

#[async_trait]
impl ClientWrapper for DownClient {
    async fn send_message(
        &self,
        _messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        Err("connection refused".into())
    }

    fn model_name(&self) -> &str {
        "down"
    }
}

#[tokio::test]
async fn test_round_robin_cycles_and_wraps() {
    let selector = RoundRobinSelector;
    let participants = team();

    assert_eq!(
        selector.select(&[], &participants, None).await.unwrap(),
        "test_manager"
    );
    assert_eq!(
        selector
            .select(&[], &participants, Some("test_manager"))
            .await
            .unwrap(),
        "test_case_writer"
    );
    assert_eq!(
        selector
            .select(&[], &participants, Some("test_case_reviewer"))
            .await
            .unwrap(),
        "test_manager"
    );
    // the seed task's source is not a participant
    assert_eq!(
        selector.select(&[], &participants, Some("user")).await.unwrap(),
        "test_manager"
    );
    assert_eq!(selector.name(), "round_robin");
}

#[tokio::test]
async fn test_round_robin_without_participants() {
    assert_eq!(
        RoundRobinSelector.select(&[], &[], None).await,
        Err(SelectionError::NoCandidates)
    );
}

#[test]
fn test_resolve_exact_name() {
    let participants = team();
    assert_eq!(resolve_speaker("test_case_writer", &participants), Ok(1));
    assert_eq!(resolve_speaker("  \"test_case_reviewer\".\n", &participants), Ok(2));
    assert_eq!(resolve_speaker("`test_manager`", &participants), Ok(0));
}

#[test]
fn test_resolve_single_mention() {
    let participants = team();
    assert_eq!(
        resolve_speaker("The next role should be test_case_reviewer.", &participants),
        Ok(2)
    );
}

#[test]
fn test_resolve_never_defaults() {
    let participants = team();
    assert_eq!(
        resolve_speaker("the project manager", &participants),
        Err(SelectionError::UnknownParticipant(
            "the project manager".to_string()
        ))
    );
    assert_eq!(
        resolve_speaker("test_case", &participants),
        Err(SelectionError::UnknownParticipant("test_case".to_string()))
    );

    match resolve_speaker("test_manager or test_case_writer", &participants) {
        Err(SelectionError::AmbiguousParticipant { candidates, .. }) => {
            assert_eq!(candidates, vec!["test_manager", "test_case_writer"])
        }
        other => panic!("expected ambiguity, got {:?}", other),
    }
}

#[tokio::test]
async fn test_model_selector_uses_model_reply() {
    let client = RecordingClient::new("test_case_reviewer");
    let selector = ModelSelector::new(client.clone());
    let transcript = vec![
        ChatMessage::task("Write login tests"),
        ChatMessage::new("test_case_writer", Role::Assistant, "TC_001,Valid login"),
    ];

    let next = selector
        .select(&transcript, &team(), Some("test_case_writer"))
        .await
        .unwrap();

    assert_eq!(next, "test_case_reviewer");
    let prompts = client.prompts.lock().unwrap();
    assert!(prompts[0].starts_with("You are in a role play game."));
    assert!(prompts[0].contains("[test_manager, test_case_reviewer]"));
    assert!(prompts[0].contains("test_case_writer: TC_001,Valid login"));
}

#[tokio::test]
async fn test_model_selector_rejects_previous_speaker_by_default() {
    let client = RecordingClient::new("test_case_writer");
    let selector = ModelSelector::new(client.clone());

    let result = selector
        .select(&[], &team(), Some("test_case_writer"))
        .await;
    assert_eq!(
        result,
        Err(SelectionError::UnknownParticipant(
            "test_case_writer".to_string()
        ))
    );

    let repeating = ModelSelector::new(client).with_allow_repeated_speaker(true);
    assert_eq!(
        repeating
            .select(&[], &team(), Some("test_case_writer"))
            .await
            .unwrap(),
        "test_case_writer"
    );
}

#[tokio::test]
async fn test_model_selector_skips_model_with_one_candidate() {
    let client = RecordingClient::new("nonsense");
    let selector = ModelSelector::new(client.clone());
    let pair = vec![
        Participant::new("writer", "Writes"),
        Participant::new("reviewer", "Reviews"),
    ];

    let next = selector.select(&[], &pair, Some("writer")).await.unwrap();

    assert_eq!(next, "reviewer");
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_model_selector_custom_template() {
    let client = RecordingClient::new("test_manager");
    let selector = ModelSelector::new(client.clone())
        .with_prompt_template("Pick one of {participants}.\n{history}");

    selector
        .select(&[ChatMessage::task("hello")], &team(), None)
        .await
        .unwrap();

    let prompts = client.prompts.lock().unwrap();
    assert_eq!(
        prompts[0],
        "Pick one of [test_manager, test_case_writer, test_case_reviewer].\nuser: hello"
    );
    assert!(DEFAULT_SELECTOR_PROMPT.contains("{history}"));
}

#[tokio::test]
async fn test_model_selector_backend_failure() {
    let selector = ModelSelector::new(Arc::new(DownClient));
    match selector.select(&[], &team(), None).await {
        Err(SelectionError::Backend(reason)) => assert!(reason.contains("connection refused")),
        other => panic!("expected backend error, got {:?}", other),
    }
}
