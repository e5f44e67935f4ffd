#[cfg(test)]
#[path = "conversation_test.rs"]
mod tests;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::constants::{
    DEFAULT_TEMPERATURE, PLAYBACK_NAME_PREFIX, REPLAY_NAME_PREFIX,
};
use crate::models::{Message, MessageModel, MessageSettings, OrderedSet, Role};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    #[default]
    Model,
    Assistant,
    Application,
}

/// Model (or assistant/application) a conversation is bound to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "max_length")]
    pub max_length: usize,
    #[serde(default, alias = "request_limit")]
    pub request_limit: usize,
    #[serde(rename = "type", default)]
    pub model_type: ModelType,
    /// Addons the model always runs with
    #[serde(default, alias = "selected_addons")]
    pub selected_addons: Vec<String>,
}

impl ModelRef {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_type(mut self, model_type: ModelType) -> Self {
        self.model_type = model_type;
        self
    }

    pub fn with_selected_addons(mut self, addons: Vec<String>) -> Self {
        self.selected_addons = addons;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayState {
    #[serde(default)]
    pub is_replay: bool,
    #[serde(default)]
    pub replay_as_is: bool,
    #[serde(default)]
    pub replay_user_messages_stack: Vec<Message>,
    #[serde(default)]
    pub active_replay_index: usize,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    #[serde(default)]
    pub is_playback: bool,
    #[serde(default)]
    pub messages_stack: Vec<Message>,
    #[serde(default)]
    pub active_playback_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub model: ModelRef,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub selected_addons: OrderedSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_model_id: Option<String>,
    pub last_activity_date: DateTime<Utc>,
    /// Never persisted, a loaded conversation is never streaming
    #[serde(default, skip_serializing)]
    pub is_message_streaming: bool,
    #[serde(default)]
    pub replay: ReplayState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback: Option<PlaybackState>,
}

impl Conversation {
    pub fn new(name: impl Into<String>, model: ModelRef) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            messages: vec![],
            model,
            prompt: String::new(),
            temperature: DEFAULT_TEMPERATURE,
            selected_addons: OrderedSet::new(),
            assistant_model_id: None,
            last_activity_date: Utc::now(),
            is_message_streaming: false,
            replay: ReplayState::default(),
            playback: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_selected_addons(mut self, addons: Vec<String>) -> Self {
        self.selected_addons = addons.into();
        self
    }

    pub fn with_assistant_model_id(mut self, id: impl Into<String>) -> Self {
        self.assistant_model_id = Some(id.into());
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn is_replay(&self) -> bool {
        self.replay.is_replay
    }

    pub fn is_playback(&self) -> bool {
        self.playback.as_ref().is_some_and(|p| p.is_playback)
    }

    /// Current working settings, as they would be captured by a new message.
    pub fn settings(&self) -> MessageSettings {
        MessageSettings {
            prompt: self.prompt.clone(),
            temperature: self.temperature,
            selected_addons: self.selected_addons.clone(),
            assistant_model_id: self.assistant_model_id.clone(),
        }
    }

    pub fn message_model(&self) -> MessageModel {
        MessageModel {
            id: self.model.id.clone(),
            name: Some(self.model.name.clone()).filter(|name| !name.is_empty()),
        }
    }

    pub fn apply_settings(&mut self, settings: &MessageSettings) {
        self.prompt = settings.prompt.clone();
        self.temperature = settings.temperature;
        self.selected_addons = settings.selected_addons.clone();
        self.assistant_model_id = settings.assistant_model_id.clone();
    }

    /// Override the working model with the snapshot of a message. The fields
    /// the snapshot doesn't carry are kept from the current model.
    pub fn apply_message_model(&mut self, model: &MessageModel) {
        self.model.id = model.id.clone();
        if let Some(name) = model.name.as_ref() {
            self.model.name = name.clone();
        }
    }

    pub fn is_settings_changed(&self, settings: &MessageSettings) -> bool {
        self.prompt != settings.prompt
            || self.temperature != settings.temperature
            || self.selected_addons != settings.selected_addons
            || self.assistant_model_id != settings.assistant_model_id
    }

    /// A fresh conversation that resends the user turns of this one.
    pub fn derive_replay(&self) -> Conversation {
        let user_messages = self
            .messages
            .iter()
            .filter(|msg| msg.role == Role::User)
            .cloned()
            .collect();

        Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            name: format!("{} {}", REPLAY_NAME_PREFIX, self.name),
            messages: vec![],
            last_activity_date: Utc::now(),
            is_message_streaming: false,
            replay: ReplayState {
                is_replay: true,
                replay_as_is: true,
                replay_user_messages_stack: user_messages,
                active_replay_index: 0,
                is_error: false,
            },
            playback: Some(PlaybackState::default()),
            ..self.clone()
        }
    }

    /// A fresh conversation that re-presents the messages of this one.
    pub fn derive_playback(&self) -> Conversation {
        Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            name: format!("{} {}", PLAYBACK_NAME_PREFIX, self.name),
            messages: vec![],
            last_activity_date: Utc::now(),
            is_message_streaming: false,
            replay: ReplayState::default(),
            playback: Some(PlaybackState {
                is_playback: true,
                messages_stack: self.messages.clone(),
                active_playback_index: 0,
            }),
            ..self.clone()
        }
    }
}
