use std::sync::Mutex;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::*;
use crate::backend::{MockBackend, StreamError};
use crate::engine::testing::{answer_frames, byte_stream, drain, echo_backend, event_channel};
use crate::models::{CustomContent, MessageModel, MessageSettings, ReplayState};

struct Fixture {
    store: Arc<ConversationStore>,
    context: Arc<OrchestrationContext>,
    controller: ReplayController,
    event_rx: mpsc::UnboundedReceiver<Event>,
}

fn fixture(backend: MockBackend, models: Vec<ModelRef>) -> Fixture {
    let (event_tx, event_rx) = event_channel();
    let store = Arc::new(ConversationStore::new(event_tx));
    let context = Arc::new(OrchestrationContext::new());
    let coordinator = Arc::new(StreamCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&context),
        Arc::new(backend),
    ));
    let controller =
        ReplayController::new(Arc::clone(&store), Arc::clone(&context), coordinator)
            .with_models(models);
    Fixture {
        store,
        context,
        controller,
        event_rx,
    }
}

fn step(content: &str) -> Message {
    Message::user(content).with_model(MessageModel {
        id: "gpt-4".to_string(),
        name: None,
    })
}

fn replay_conversation(id: &str, steps: &[&str]) -> Conversation {
    let mut conv = Conversation::new("[Replay] chat", ModelRef::new("gpt-4")).with_id(id);
    conv.replay = ReplayState {
        is_replay: true,
        replay_as_is: true,
        replay_user_messages_stack: steps.iter().map(|s| step(s)).collect(),
        active_replay_index: 0,
        is_error: false,
    };
    conv
}

fn contents(conv: &Conversation) -> Vec<&str> {
    conv.messages.iter().map(|m| m.content.as_str()).collect()
}

#[tokio::test]
async fn test_replay_to_the_end() {
    let mut fx = fixture(echo_backend(), vec![]);
    fx.store.insert(replay_conversation("a", &["Q1", "Q2"])).await;

    let outcomes = fx.controller.replay_all(&["a".to_string()], false).await;
    assert_eq!(outcomes, vec![Ok(ReplayOutcome::Finished)]);

    let conv = fx.store.get("a").await.unwrap();
    assert_eq!(
        contents(&conv),
        vec!["Q1", "Answer to: Q1", "Q2", "Answer to: Q2"]
    );
    assert!(!conv.replay.is_replay);
    assert!(!conv.replay.replay_as_is);
    assert_eq!(conv.replay.active_replay_index, 2);
    // replay conversations keep their name
    assert_eq!(conv.name, "[Replay] chat");
    assert!(fx.context.is_replay_paused());

    let events = drain(&mut fx.event_rx);
    assert!(events.iter().any(
        |e| matches!(e, Event::ReplayFinished { conversation_id } if conversation_id == "a")
    ));
}

#[tokio::test]
async fn test_replay_failure_stops_the_run() {
    let mut backend = MockBackend::new();
    backend.expect_chat().returning(|body| {
        Box::pin(async move {
            let question = body.messages.last().map(|m| m.content.clone());
            if question.as_deref() == Some("Q2") {
                return Err(StreamError::transport(Some(500), None));
            }
            Ok(byte_stream(vec![answer_frames("ok")]))
        })
    });

    let fx = fixture(backend, vec![]);
    fx.store
        .insert(replay_conversation("a", &["Q1", "Q2", "Q3"]))
        .await;

    let outcomes = fx.controller.replay_all(&["a".to_string()], false).await;
    assert_eq!(outcomes, vec![Ok(ReplayOutcome::Failed)]);

    let conv = fx.store.get("a").await.unwrap();
    assert!(conv.replay.is_replay);
    assert!(conv.replay.is_error);
    assert_eq!(conv.replay.active_replay_index, 1);
    assert!(conv.messages[3].error_message.is_some());
    assert!(fx.context.is_replay_paused());
}

#[tokio::test]
async fn test_replay_restart_drops_incomplete_turn() {
    let fx = fixture(echo_backend(), vec![]);
    let mut conv = replay_conversation("a", &["Q1", "Q2"]);
    conv.messages = vec![
        Message::user("Q1"),
        Message::assistant("A1"),
        Message::user("Q2"),
        Message {
            error_message: Some("failed".to_string()),
            ..Message::assistant("")
        },
    ];
    conv.replay.active_replay_index = 1;
    conv.replay.is_error = true;
    fx.store.insert(conv).await;

    let outcomes = fx.controller.replay_all(&["a".to_string()], true).await;
    assert_eq!(outcomes, vec![Ok(ReplayOutcome::Finished)]);

    let conv = fx.store.get("a").await.unwrap();
    assert_eq!(contents(&conv), vec!["Q1", "A1", "Q2", "Answer to: Q2"]);
    assert!(conv.messages[3].error_message.is_none());
    assert!(!conv.replay.is_error);
}

#[tokio::test]
async fn test_replay_of_empty_stack_finishes() {
    let fx = fixture(MockBackend::new(), vec![]);
    fx.store.insert(replay_conversation("a", &[])).await;

    let outcomes = fx.controller.replay_all(&["a".to_string()], false).await;
    assert_eq!(outcomes, vec![Ok(ReplayOutcome::Finished)]);
    assert!(!fx.store.get("a").await.unwrap().replay.is_replay);
}

#[tokio::test]
async fn test_replay_unknown_conversation() {
    let fx = fixture(MockBackend::new(), vec![]);
    let outcomes = fx
        .controller
        .replay_all(&["missing".to_string()], false)
        .await;
    assert_eq!(
        outcomes,
        vec![Err(EngineError::ConversationNotFound("missing".to_string()))]
    );
}

/// Backend where conversation `slow` takes 50ms to answer. Records when
/// each request is issued.
fn timed_backend(calls: Arc<Mutex<Vec<(String, String, Instant)>>>) -> MockBackend {
    let mut backend = MockBackend::new();
    backend.expect_chat().returning(move |body| {
        let question = body
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        calls
            .lock()
            .unwrap()
            .push((body.id.clone(), question, Instant::now()));
        let slow = body.id == "slow";
        Box::pin(async move {
            if slow {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Ok(byte_stream(vec![answer_frames("ok")]))
        })
    });
    backend
}

#[tokio::test(start_paused = true)]
async fn test_replay_advances_in_lockstep() {
    let calls = Arc::new(Mutex::new(vec![]));
    let fx = fixture(timed_backend(Arc::clone(&calls)), vec![]);
    fx.store.insert(replay_conversation("fast", &["Q1", "Q2"])).await;
    fx.store.insert(replay_conversation("slow", &["Q1", "Q2"])).await;

    let start = Instant::now();
    let ids = vec!["fast".to_string(), "slow".to_string()];
    let outcomes = fx.controller.replay_all(&ids, false).await;
    assert_eq!(
        outcomes,
        vec![Ok(ReplayOutcome::Finished), Ok(ReplayOutcome::Finished)]
    );

    let calls = calls.lock().unwrap();
    let (_, _, fast_second_step) = calls
        .iter()
        .find(|(id, question, _)| id == "fast" && question == "Q2")
        .expect("second step of fast was never sent");
    assert!(*fast_second_step - start >= Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn test_replay_pause_between_steps() {
    let calls = Arc::new(Mutex::new(vec![]));
    let fx = fixture(timed_backend(Arc::clone(&calls)), vec![]);
    fx.store.insert(replay_conversation("fast", &["Q1", "Q2"])).await;
    fx.store.insert(replay_conversation("slow", &["Q1", "Q2"])).await;

    let ids = vec!["fast".to_string(), "slow".to_string()];
    let (outcomes, _) = tokio::join!(fx.controller.replay_all(&ids, false), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        fx.controller.pause();
    });
    assert_eq!(
        outcomes,
        vec![Ok(ReplayOutcome::Paused), Ok(ReplayOutcome::Paused)]
    );

    assert_eq!(calls.lock().unwrap().len(), 2);
    let fast = fx.store.get("fast").await.unwrap();
    assert!(fast.replay.is_replay);
    assert_eq!(fast.replay.active_replay_index, 0);
}

#[test]
fn test_prepare_step_restores_snapshot() {
    let models = vec![
        ModelRef::new("gpt-4"),
        ModelRef::new("claude").with_name("Claude"),
    ];
    let mut conv = replay_conversation("a", &[]);
    conv.messages = vec![
        Message::user("Q1"),
        Message::assistant("A1").with_custom_content(CustomContent {
            state: Some(json!({"k": 1})),
            ..Default::default()
        }),
    ];

    let step = Message::user("Q2")
        .with_model(MessageModel {
            id: "claude".to_string(),
            name: None,
        })
        .with_settings(MessageSettings {
            prompt: "short".to_string(),
            temperature: 0.2,
            ..Default::default()
        });

    prepare_step(&mut conv, &step, &models);
    assert_eq!(conv.model.name, "Claude");
    assert_eq!(conv.prompt, "short");
    assert_eq!(conv.temperature, 0.2);
    assert!(conv.messages[1].state().is_none());
}

#[test]
fn test_prepare_step_keeps_state_when_unchanged() {
    let mut conv = replay_conversation("a", &[]);
    conv.messages = vec![Message::assistant("A1").with_custom_content(CustomContent {
        state: Some(json!({"k": 1})),
        ..Default::default()
    })];
    let settings = conv.settings();

    prepare_step(&mut conv, &step("Q2").with_settings(settings), &[]);
    assert_eq!(conv.model.id, "gpt-4");
    assert!(conv.messages[0].state().is_some());
}

#[test]
fn test_prepare_step_unknown_model_keeps_current() {
    let mut conv = replay_conversation("a", &[]);
    conv.replay.is_error = true;
    let step = Message::user("Q").with_model(MessageModel {
        id: "retired".to_string(),
        name: None,
    });

    prepare_step(&mut conv, &step, &[]);
    assert_eq!(conv.model.id, "gpt-4");
    assert!(!conv.replay.is_error);
}

#[test]
fn test_restart_delete_count() {
    let conv = replay_conversation("a", &[]);
    assert_eq!(restart_delete_count(&conv), 0);

    let conv = conv.with_messages(vec![Message::user("Q")]);
    assert_eq!(restart_delete_count(&conv), 1);

    let conv = conv.with_messages(vec![Message::user("Q"), Message::assistant("A")]);
    assert_eq!(restart_delete_count(&conv), 2);
}
