use std::time::Duration;

use futures::stream;
use serde_json::json;

use super::*;
use crate::backend::{ByteStream, MockBackend, StreamError};
use crate::engine::testing::echo_backend;
use crate::models::{CustomContent, NoopEventTx, Stage, StageStatus};

fn engine(backend: MockBackend) -> Engine {
    let store = Arc::new(ConversationStore::new(Arc::new(NoopEventTx)));
    let options = EngineOptions {
        default_temperature: 0.7,
        models: vec![ModelRef::new("gpt-4").with_selected_addons(vec!["search".to_string()])],
        ..Default::default()
    };
    Engine::new(store, Arc::new(backend), options)
}

fn stalled_backend() -> MockBackend {
    let mut backend = MockBackend::new();
    backend.expect_chat().returning(|_| {
        Box::pin(async move {
            let stream: ByteStream =
                Box::pin(stream::pending::<Result<Vec<u8>, StreamError>>());
            Ok(stream)
        })
    });
    backend
}

#[tokio::test]
async fn test_create_conversations() {
    let engine = engine(MockBackend::new());
    let ids = engine
        .create_conversations(&["".to_string(), "Compare".to_string()], None)
        .await;

    assert_eq!(engine.store().selected_ids().await, ids);
    let first = engine.store().get(&ids[0]).await.unwrap();
    assert_eq!(first.name, "New conversation");
    assert_eq!(first.model.id, "gpt-4");
    assert_eq!(first.temperature, 0.7);
    assert_eq!(first.selected_addons.to_vec(), vec!["search"]);
    assert_eq!(engine.store().get(&ids[1]).await.unwrap().name, "Compare");
}

#[tokio::test]
async fn test_send_message_to_selection() {
    let engine = engine(echo_backend());
    let ids = engine
        .create_conversations(&["".to_string(), "".to_string()], None)
        .await;

    let outcomes = engine.send_message(Message::user("Hi"), 0).await;
    assert_eq!(
        outcomes,
        vec![Ok(StreamOutcome::Succeeded), Ok(StreamOutcome::Succeeded)]
    );
    for id in ids {
        let conv = engine.store().get(&id).await.unwrap();
        assert_eq!(conv.name, "Hi");
        assert_eq!(conv.messages[1].content, "Answer to: Hi");
    }
}

#[tokio::test]
async fn test_stop_streaming() {
    let engine = engine(stalled_backend());
    let ids = engine
        .create_conversations(&["".to_string(), "".to_string()], None)
        .await;

    let (outcomes, _) = tokio::join!(engine.send_message(Message::user("Hi"), 0), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(engine.store().any_streaming(&ids));
        engine
            .update_message(&ids[0], 1, |m| {
                m.custom_content = Some(CustomContent {
                    stages: vec![
                        Stage {
                            index: 0,
                            status: Some(StageStatus::Completed),
                            ..Default::default()
                        },
                        Stage {
                            index: 1,
                            ..Default::default()
                        },
                    ],
                    ..Default::default()
                })
            })
            .await
            .expect("failed to update message");
        engine.stop_streaming().await;
    });

    assert_eq!(
        outcomes,
        vec![Ok(StreamOutcome::Cancelled), Ok(StreamOutcome::Cancelled)]
    );
    assert!(!engine.store().any_streaming(&ids));

    let conv = engine.store().get(&ids[0]).await.unwrap();
    let stages = &conv.messages[1].custom_content.as_ref().unwrap().stages;
    assert_eq!(stages.len(), 1);
    assert_eq!(stages[0].index, 0);
    assert!(conv.messages[1].error_message.is_none());
}

#[tokio::test]
async fn test_replay_conversation_from_source() {
    let engine = engine(echo_backend());
    let source = engine.create_conversations(&["chat".to_string()], None).await;
    engine.send_message(Message::user("Q1"), 0).await;
    engine.send_message(Message::user("Q2"), 0).await;

    let id = engine
        .create_replay_conversation(&source[0])
        .await
        .expect("failed to create replay");
    assert_eq!(engine.store().selected_ids().await, vec![id.clone()]);

    let conv = engine.store().get(&id).await.unwrap();
    assert_eq!(conv.name, "[Replay] Q1");
    assert!(conv.messages.is_empty());
    assert_eq!(conv.replay.replay_user_messages_stack.len(), 2);

    let outcomes = engine
        .replay_conversations(std::slice::from_ref(&id), false)
        .await;
    assert_eq!(outcomes, vec![Ok(ReplayOutcome::Finished)]);
    assert_eq!(engine.store().get(&id).await.unwrap().messages.len(), 4);
}

#[tokio::test]
async fn test_create_derived_from_unknown_source() {
    let engine = engine(MockBackend::new());
    assert_eq!(
        engine.create_playback_conversation("missing").await,
        Err(EngineError::ConversationNotFound("missing".to_string()))
    );
}

#[tokio::test(start_paused = true)]
async fn test_playback_from_source() {
    let engine = engine(echo_backend());
    let source = engine.create_conversations(&["chat".to_string()], None).await;
    engine.send_message(Message::user("Q1"), 0).await;

    let id = engine
        .create_playback_conversation(&source[0])
        .await
        .expect("failed to create playback");
    assert_eq!(engine.playback_next().await, vec![id.clone()]);

    let conv = engine.store().get(&id).await.unwrap();
    assert_eq!(conv.messages.len(), 2);
    assert_eq!(conv.messages[1].content, "Answer to: Q1");

    engine.playback_cancel().await;
    assert!(!engine.store().get(&id).await.unwrap().is_playback());
}

#[tokio::test]
async fn test_delete_message_removes_answer() {
    let engine = engine(echo_backend());
    let ids = engine.create_conversations(&["".to_string()], None).await;
    engine.send_message(Message::user("Q1"), 0).await;
    engine.send_message(Message::user("Q2"), 0).await;

    engine.delete_message(0).await;
    let conv = engine.store().get(&ids[0]).await.unwrap();
    let contents: Vec<_> = conv.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["Q2", "Answer to: Q2"]);

    engine.delete_message(1).await;
    assert_eq!(engine.store().get(&ids[0]).await.unwrap().messages.len(), 1);
}

#[tokio::test]
async fn test_update_settings_clears_state() {
    let engine = engine(MockBackend::new());
    let ids = engine.create_conversations(&["".to_string()], None).await;
    engine
        .update_conversation(&ids[0], |c| {
            c.messages = vec![Message::assistant("A").with_custom_content(CustomContent {
                state: Some(json!({"k": 1})),
                ..Default::default()
            })];
        })
        .await
        .unwrap();

    let unchanged = engine.store().get(&ids[0]).await.unwrap().settings();
    engine
        .update_settings(&ids[0], unchanged, None)
        .await
        .unwrap();
    assert!(engine.store().get(&ids[0]).await.unwrap().messages[0]
        .state()
        .is_some());

    let settings = MessageSettings {
        temperature: 0.1,
        ..Default::default()
    };
    engine.update_settings(&ids[0], settings, None).await.unwrap();
    let conv = engine.store().get(&ids[0]).await.unwrap();
    assert_eq!(conv.temperature, 0.1);
    assert!(conv.messages[0].state().is_none());
}

#[tokio::test]
async fn test_rate_message() {
    let mut backend = MockBackend::new();
    backend
        .expect_rate()
        .withf(|body| body.response_id == "resp-1" && body.value && body.model_id == "gpt-4")
        .times(1)
        .returning(|_| Box::pin(async { Ok(()) }));

    let engine = engine(backend);
    let ids = engine.create_conversations(&["".to_string()], None).await;
    engine
        .update_conversation(&ids[0], |c| {
            c.messages = vec![
                Message::user("Q"),
                Message::assistant("A").with_response_id("resp-1"),
            ];
        })
        .await
        .unwrap();

    engine
        .rate_message(&ids[0], 1, true)
        .await
        .expect("failed to rate");
    let conv = engine.store().get(&ids[0]).await.unwrap();
    assert_eq!(conv.messages[1].like, Like::Positive);

    assert_eq!(
        engine.rate_message(&ids[0], 0, true).await,
        Err(EngineError::NotRatable)
    );
    assert!(matches!(
        engine.rate_message(&ids[0], 5, true).await,
        Err(EngineError::MessageNotFound { index: 5, .. })
    ));
}

#[tokio::test]
async fn test_rate_message_backend_failure() {
    let mut backend = MockBackend::new();
    backend
        .expect_rate()
        .returning(|_| Box::pin(async { Err(eyre::eyre!("rating failed (500)")) }));

    let engine = engine(backend);
    let ids = engine.create_conversations(&["".to_string()], None).await;
    engine
        .update_conversation(&ids[0], |c| {
            c.messages = vec![Message::assistant("A").with_response_id("resp-1")];
        })
        .await
        .unwrap();

    let result = engine.rate_message(&ids[0], 0, false).await;
    assert!(matches!(result, Err(EngineError::Rating(_))));
    let conv = engine.store().get(&ids[0]).await.unwrap();
    assert_eq!(conv.messages[0].like, Like::Unrated);
}

#[test]
fn test_options_from_configuration() {
    let mut config = Configuration::default();
    config.backend.stall_timeout_secs = 30;
    config.playback.step_delay_ms = 200;
    config.general.default_conversation_name = "Untitled".to_string();

    let options = EngineOptions::from(&config);
    assert_eq!(options.stall_timeout, Duration::from_secs(30));
    assert_eq!(options.step_delay, Duration::from_millis(200));
    assert_eq!(options.default_conversation_name, "Untitled");
}
