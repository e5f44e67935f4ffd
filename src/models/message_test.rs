use super::*;
use serde_json::json;

fn message_with_stages() -> Message {
    Message::assistant("Searching").with_custom_content(CustomContent {
        state: Some(json!({"cursor": 3})),
        stages: vec![
            Stage {
                index: 0,
                name: Some("search".to_string()),
                status: Some(StageStatus::Completed),
                ..Default::default()
            },
            Stage {
                index: 1,
                name: Some("summarize".to_string()),
                status: None,
                ..Default::default()
            },
        ],
        attachments: vec![],
    })
}

#[test]
fn test_clear_state_for_messages() {
    let messages = vec![Message::user("Hi"), message_with_stages()];
    let cleared = clear_state_for_messages(&messages);

    assert_eq!(cleared.len(), 2);
    assert_eq!(cleared[0], messages[0]);
    assert!(cleared[1].state().is_none());
    // stages are untouched
    assert_eq!(cleared[1].custom_content.as_ref().unwrap().stages.len(), 2);
    // the source is not mutated
    assert!(messages[1].state().is_some());
}

#[test]
fn test_filter_unfinished_stages() {
    let messages = vec![message_with_stages()];
    let filtered = filter_unfinished_stages(&messages);

    let stages = &filtered[0].custom_content.as_ref().unwrap().stages;
    assert_eq!(stages.len(), 1);
    assert_eq!(stages[0].name.as_deref(), Some("search"));
    assert_eq!(filtered[0].state(), Some(&json!({"cursor": 3})));
}

#[test]
fn test_message_wire_format() {
    let msg = Message::assistant("Hello")
        .with_response_id("resp-1")
        .with_custom_content(CustomContent {
            state: Some(json!("opaque")),
            ..Default::default()
        });

    let value = serde_json::to_value(&msg).expect("failed to serialize message");
    assert_eq!(value["role"], "assistant");
    assert_eq!(value["responseId"], "resp-1");
    assert_eq!(value["custom_content"]["state"], "opaque");
    assert_eq!(value["like"], "unrated");
    assert!(value.get("errorMessage").is_none());

    let parsed: Message = serde_json::from_value(value).expect("failed to parse message");
    assert_eq!(parsed, msg);
}

#[test]
fn test_settings_keep_addon_order() {
    let settings: MessageSettings = serde_json::from_value(json!({
        "prompt": "be brief",
        "temperature": 0.3,
        "selectedAddons": ["b", "a", "b"]
    }))
    .expect("failed to parse settings");

    assert_eq!(settings.selected_addons.as_slice(), ["b", "a"]);
    assert!(settings.assistant_model_id.is_none());
}
