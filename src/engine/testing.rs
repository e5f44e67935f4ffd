use std::sync::Arc;

use tokio::sync::mpsc;

use crate::backend::{ByteStream, MockBackend};
use crate::models::{ArcEventTx, Event, MessageDelta, Role};

pub fn event_channel() -> (ArcEventTx, mpsc::UnboundedReceiver<Event>) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    (Arc::new(event_tx), event_rx)
}

/// Serialize `deltas` into NUL-terminated frames.
pub fn frames(deltas: &[MessageDelta]) -> Vec<u8> {
    let mut body = vec![];
    for delta in deltas {
        body.extend(serde_json::to_vec(delta).expect("failed to encode frame"));
        body.push(b'\0');
    }
    body
}

pub fn byte_stream(chunks: Vec<Vec<u8>>) -> ByteStream {
    Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)))
}

pub fn answer_frames(text: &str) -> Vec<u8> {
    frames(&[
        MessageDelta {
            role: Some(Role::Assistant),
            ..Default::default()
        },
        MessageDelta::content(text),
    ])
}

/// Backend answering every chat with `Answer to: <last user message>`.
pub fn echo_backend() -> MockBackend {
    let mut backend = MockBackend::new();
    backend.expect_chat().returning(|body| {
        Box::pin(async move {
            let question = body
                .messages
                .last()
                .map(|msg| msg.content.clone())
                .unwrap_or_default();
            Ok(byte_stream(vec![answer_frames(&format!(
                "Answer to: {}",
                question
            ))]))
        })
    });
    backend
}

pub fn drain(event_rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = vec![];
    while let Ok(event) = event_rx.try_recv() {
        events.push(event);
    }
    events
}
