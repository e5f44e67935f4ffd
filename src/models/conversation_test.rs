use super::*;
use crate::models::Message;

fn build_convo() -> Conversation {
    Conversation::new("Greetings", ModelRef::new("gpt-4").with_name("GPT-4"))
        .with_temperature(0.5)
        .with_prompt("be nice")
        .with_selected_addons(vec!["search".to_string()])
        .with_messages(vec![
            Message::user("Hi"),
            Message::assistant("Hello!"),
            Message::user("How are you?"),
            Message::assistant("Fine."),
        ])
}

#[test]
fn test_derive_replay() {
    let convo = build_convo();
    let replay = convo.derive_replay();

    assert_ne!(replay.id, convo.id);
    assert_eq!(replay.name, "[Replay] Greetings");
    assert!(replay.messages.is_empty());
    assert!(replay.is_replay());
    assert!(replay.replay.replay_as_is);
    assert_eq!(replay.replay.active_replay_index, 0);
    assert_eq!(replay.replay.replay_user_messages_stack.len(), 2);
    assert_eq!(replay.replay.replay_user_messages_stack[1].content, "How are you?");
    assert!(!replay.is_playback());
    assert_eq!(replay.model, convo.model);
    assert_eq!(replay.temperature, 0.5);
}

#[test]
fn test_derive_playback() {
    let convo = build_convo();
    let playback = convo.derive_playback();

    assert_eq!(playback.name, "[Playback] Greetings");
    assert!(playback.messages.is_empty());
    assert!(playback.is_playback());
    assert!(!playback.is_replay());
    let state = playback.playback.as_ref().unwrap();
    assert_eq!(state.messages_stack, convo.messages);
    assert_eq!(state.active_playback_index, 0);
}

#[test]
fn test_settings_changed() {
    let convo = build_convo();
    let mut settings = convo.settings();
    assert!(!convo.is_settings_changed(&settings));

    settings.selected_addons = vec!["search".to_string(), "code".to_string()].into();
    assert!(convo.is_settings_changed(&settings));

    let mut settings = convo.settings();
    settings.temperature = 0.7;
    assert!(convo.is_settings_changed(&settings));
}

#[test]
fn test_apply_message_model() {
    let mut convo = build_convo();
    convo.apply_message_model(&MessageModel {
        id: "claude".to_string(),
        name: None,
    });
    assert_eq!(convo.model.id, "claude");
    // the name is kept when the snapshot carries none
    assert_eq!(convo.model.name, "GPT-4");
}

#[test]
fn test_streaming_flag_is_not_persisted() {
    let mut convo = build_convo();
    convo.is_message_streaming = true;

    let raw = serde_json::to_string(&convo).expect("failed to serialize conversation");
    assert!(!raw.contains("isMessageStreaming"));

    let loaded: Conversation = serde_json::from_str(&raw).expect("failed to parse conversation");
    assert!(!loaded.is_message_streaming);
    assert_eq!(loaded.messages, convo.messages);
    assert_eq!(loaded.selected_addons.as_slice(), ["search"]);
}
