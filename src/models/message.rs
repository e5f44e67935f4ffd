#[cfg(test)]
#[path = "message_test.rs"]
mod tests;

use serde::{Deserialize, Serialize};
use std::fmt::Display;

use super::OrderedSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    #[default]
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Like {
    #[default]
    Unrated,
    Positive,
    Negative,
}

/// Snapshot of the model a message was sent with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageModel {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Snapshot of the conversation settings a message was sent with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSettings {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub selected_addons: OrderedSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_model_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub attachment_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// `None` while the stage is still running
    #[serde(default)]
    pub status: Option<StageStatus>,
}

/// Side-channel data attached to a message. `state` is opaque to the
/// engine and only forwarded to the backend with the next turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<Stage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(
        rename = "custom_content",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_content: Option<CustomContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<MessageModel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<MessageSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(default)]
    pub like: Like,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn with_model(mut self, model: MessageModel) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_settings(mut self, settings: MessageSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_response_id(mut self, response_id: impl Into<String>) -> Self {
        self.response_id = Some(response_id.into());
        self
    }

    pub fn with_custom_content(mut self, custom_content: CustomContent) -> Self {
        self.custom_content = Some(custom_content);
        self
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn state(&self) -> Option<&serde_json::Value> {
        self.custom_content.as_ref().and_then(|c| c.state.as_ref())
    }
}

/// Drop the per-turn `state` of every message. Used when the model or the
/// settings of a conversation change, the accumulated state belongs to the
/// previous configuration.
pub fn clear_state_for_messages(messages: &[Message]) -> Vec<Message> {
    messages
        .iter()
        .map(|msg| {
            let mut msg = msg.clone();
            if let Some(custom_content) = msg.custom_content.as_mut() {
                custom_content.state = None;
            }
            msg
        })
        .collect()
}

/// Drop the stages that never reported a status, i.e. stages interrupted by
/// a stopped stream.
pub fn filter_unfinished_stages(messages: &[Message]) -> Vec<Message> {
    messages
        .iter()
        .map(|msg| {
            let mut msg = msg.clone();
            if let Some(custom_content) = msg.custom_content.as_mut() {
                custom_content.stages.retain(|stage| stage.status.is_some());
            }
            msg
        })
        .collect()
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}
