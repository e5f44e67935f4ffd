#[cfg(test)]
#[path = "merger_test.rs"]
mod tests;

use crate::config::constants::CURSOR_MARKER;
use crate::models::{CustomContent, Message, MessageDelta, Stage};

/// Fold one frame into the accumulated assistant message.
///
/// `content` is appended, scalar fields are last-write-wins. Stages are
/// matched by their `index`: known stages get their content appended and
/// their other fields overwritten, unknown ones are appended. Attachments
/// are appended, `state` is replaced.
///
/// Servers may end a content fragment with the typing cursor. The cursor is
/// never stored, so a fragment that only carries the cursor leaves the
/// content untouched.
pub fn merge_message(mut message: Message, delta: &MessageDelta) -> Message {
    if let Some(role) = delta.role {
        message.role = role;
    }

    if let Some(content) = delta.content.as_deref() {
        let content = content.strip_suffix(CURSOR_MARKER).unwrap_or(content);
        message.content.push_str(content);
    }

    if let Some(response_id) = delta.response_id.as_ref() {
        message.response_id = Some(response_id.clone());
    }

    if let Some(error_message) = delta.error_message.as_ref() {
        message.error_message = Some(error_message.clone());
    }

    if let Some(custom_content) = delta.custom_content.as_ref() {
        let merged = merge_custom_content(message.custom_content.take(), custom_content);
        message.custom_content = Some(merged);
    }

    message
}

pub fn merge_deltas(message: Message, deltas: &[MessageDelta]) -> Message {
    deltas.iter().fold(message, merge_message)
}

fn merge_custom_content(current: Option<CustomContent>, delta: &CustomContent) -> CustomContent {
    let mut merged = current.unwrap_or_default();

    if let Some(state) = delta.state.as_ref() {
        merged.state = Some(state.clone());
    }

    merged.attachments.extend(delta.attachments.iter().cloned());

    for stage in &delta.stages {
        match merged.stages.iter_mut().find(|s| s.index == stage.index) {
            Some(existing) => merge_stage(existing, stage),
            None => merged.stages.push(stage.clone()),
        }
    }

    merged
}

fn merge_stage(stage: &mut Stage, delta: &Stage) {
    if let Some(content) = delta.content.as_deref() {
        stage
            .content
            .get_or_insert_with(String::new)
            .push_str(content);
    }
    if let Some(name) = delta.name.as_ref() {
        stage.name = Some(name.clone());
    }
    if delta.status.is_some() {
        stage.status = delta.status;
    }
    stage.attachments.extend(delta.attachments.iter().cloned());
}
