pub mod context;
pub mod decoder;
pub mod error;
pub mod merger;
pub mod playback;
pub mod replay;
pub mod store;
pub mod stream;

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

#[cfg(test)]
pub(crate) mod testing;

pub use context::OrchestrationContext;
pub use decoder::FrameDecoder;
pub use error::EngineError;
pub use merger::merge_message;
pub use playback::PlaybackController;
pub use replay::{ReplayController, ReplayOutcome};
pub use store::ConversationStore;
pub use stream::{SendRequest, StreamCoordinator, StreamOutcome, build_chat_body};

use std::sync::Arc;
use std::time::Duration;

use crate::backend::ArcBackend;
use crate::config::Configuration;
use crate::config::constants::{
    DEFAULT_CONVERSATION_NAME, DEFAULT_TEMPERATURE, PLAYBACK_STEP_DELAY, STALL_TIMEOUT,
};
use crate::models::{
    Conversation, Event, Like, Message, MessageSettings, ModelRef, RateBody,
    clear_state_for_messages, filter_unfinished_stages,
};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub stall_timeout: Duration,
    pub step_delay: Duration,
    pub default_conversation_name: String,
    pub default_temperature: f32,
    pub default_prompt: String,
    /// Model catalog, the first entry is the default model
    pub models: Vec<ModelRef>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            stall_timeout: STALL_TIMEOUT,
            step_delay: PLAYBACK_STEP_DELAY,
            default_conversation_name: DEFAULT_CONVERSATION_NAME.to_string(),
            default_temperature: DEFAULT_TEMPERATURE,
            default_prompt: String::new(),
            models: vec![],
        }
    }
}

impl From<&Configuration> for EngineOptions {
    fn from(config: &Configuration) -> Self {
        Self {
            stall_timeout: config.backend.stall_timeout(),
            step_delay: config.playback.step_delay(),
            default_conversation_name: config.general.default_conversation_name.clone(),
            default_temperature: config.general.default_temperature,
            default_prompt: config.general.default_prompt.clone(),
            models: config.models.clone(),
        }
    }
}

/// Entry point for every intent of the presentation layer.
pub struct Engine {
    store: Arc<ConversationStore>,
    context: Arc<OrchestrationContext>,
    coordinator: Arc<StreamCoordinator>,
    replay: ReplayController,
    playback: PlaybackController,
    options: EngineOptions,
}

impl Engine {
    pub fn new(store: Arc<ConversationStore>, backend: ArcBackend, options: EngineOptions) -> Self {
        let context = Arc::new(OrchestrationContext::new());
        let coordinator = Arc::new(
            StreamCoordinator::new(Arc::clone(&store), Arc::clone(&context), backend)
                .with_stall_timeout(options.stall_timeout)
                .with_default_name(options.default_conversation_name.clone()),
        );
        let replay = ReplayController::new(
            Arc::clone(&store),
            Arc::clone(&context),
            Arc::clone(&coordinator),
        )
        .with_models(options.models.clone());
        let playback = PlaybackController::new(Arc::clone(&store), Arc::clone(&context))
            .with_step_delay(options.step_delay);

        Self {
            store,
            context,
            coordinator,
            replay,
            playback,
            options,
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn context(&self) -> &Arc<OrchestrationContext> {
        &self.context
    }

    pub fn default_model(&self) -> ModelRef {
        self.options
            .models
            .first()
            .cloned()
            .unwrap_or_else(|| ModelRef::new("default"))
    }

    pub fn find_model(&self, id: &str) -> Option<&ModelRef> {
        self.options.models.iter().find(|m| m.id == id)
    }

    /// Create one empty conversation per name, bound to `model` (the default
    /// model when `None`). The new conversations become the selection.
    pub async fn create_conversations(
        &self,
        names: &[String],
        model: Option<ModelRef>,
    ) -> Vec<String> {
        let model = model.unwrap_or_else(|| self.default_model());
        let mut ids = vec![];
        for name in names {
            let name = if name.is_empty() {
                self.options.default_conversation_name.clone()
            } else {
                name.clone()
            };
            let conversation = Conversation::new(name, model.clone())
                .with_prompt(self.options.default_prompt.clone())
                .with_temperature(self.options.default_temperature)
                .with_selected_addons(model.selected_addons.clone());
            ids.push(conversation.id.clone());
            self.store.insert(conversation).await;
        }
        self.store.select(&ids).await;
        ids
    }

    pub async fn create_replay_conversation(&self, source_id: &str) -> Result<String, EngineError> {
        let source = self.source(source_id).await?;
        let conversation = source.derive_replay();
        let id = conversation.id.clone();
        log::info!("Created replay conversation {} from {}", id, source_id);
        self.store.insert(conversation).await;
        self.store.select(std::slice::from_ref(&id)).await;
        Ok(id)
    }

    pub async fn create_playback_conversation(
        &self,
        source_id: &str,
    ) -> Result<String, EngineError> {
        let source = self.source(source_id).await?;
        let conversation = source.derive_playback();
        let id = conversation.id.clone();
        log::info!("Created playback conversation {} from {}", id, source_id);
        self.store.insert(conversation).await;
        self.store.select(std::slice::from_ref(&id)).await;
        Ok(id)
    }

    pub async fn delete_conversations(&self, ids: &[String]) {
        self.store.delete(ids).await;
    }

    pub async fn select_conversations(&self, ids: &[String]) {
        let mut deduped = crate::models::OrderedSet::new();
        deduped.extend(ids.iter().cloned());
        self.store.select(deduped.as_slice()).await;
    }

    pub async fn unselect_conversations(&self, ids: &[String]) {
        self.store.unselect(ids).await;
    }

    pub async fn update_conversation<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Conversation) -> R,
    ) -> Result<R, EngineError> {
        self.store.try_update(id, |c| Ok(f(c))).await
    }

    pub async fn update_message(
        &self,
        id: &str,
        index: usize,
        f: impl FnOnce(&mut Message),
    ) -> Result<(), EngineError> {
        self.store
            .try_update(id, |c| {
                let message = c.messages.get_mut(index).ok_or(EngineError::MessageNotFound {
                    conversation_id: id.to_string(),
                    index,
                })?;
                f(message);
                Ok(())
            })
            .await
    }

    /// Change the working model and settings of a conversation. The per-turn
    /// state of the history is dropped when anything actually changed.
    pub async fn update_settings(
        &self,
        id: &str,
        settings: MessageSettings,
        model: Option<ModelRef>,
    ) -> Result<(), EngineError> {
        self.store
            .try_update(id, |c| {
                if c.is_message_streaming {
                    return Err(EngineError::AlreadyStreaming(c.id.clone()));
                }
                let model_changed = model.as_ref().is_some_and(|m| m.id != c.model.id);
                if model_changed || c.is_settings_changed(&settings) {
                    c.messages = clear_state_for_messages(&c.messages);
                }
                if let Some(model) = model {
                    c.model = model;
                }
                c.apply_settings(&settings);
                Ok(())
            })
            .await
    }

    /// Send `message` to every selected conversation as one batch.
    pub async fn send_message(
        &self,
        message: Message,
        delete_count: usize,
    ) -> Vec<Result<StreamOutcome, EngineError>> {
        let ids = self.store.selected_ids().await;
        self.send_messages(&ids, message, delete_count).await
    }

    pub async fn send_messages(
        &self,
        conversation_ids: &[String],
        message: Message,
        delete_count: usize,
    ) -> Vec<Result<StreamOutcome, EngineError>> {
        self.coordinator
            .send_batch(conversation_ids, message, delete_count)
            .await
    }

    /// Abort the current batch. An active replay of the selection is paused
    /// and stages left without a status are dropped.
    pub async fn stop_streaming(&self) {
        self.context.cancel_batch();

        let selected = self.store.selected_conversations().await;
        if selected.iter().any(|c| c.is_replay()) {
            self.replay.pause();
        }
        for conversation in selected {
            self.store
                .update(&conversation.id, |c| {
                    c.messages = filter_unfinished_stages(&c.messages);
                })
                .await;
        }
    }

    pub async fn replay_conversations(
        &self,
        conversation_ids: &[String],
        is_restart: bool,
    ) -> Vec<Result<ReplayOutcome, EngineError>> {
        self.replay.replay_all(conversation_ids, is_restart).await
    }

    pub fn pause_replay(&self) {
        self.replay.pause();
    }

    pub async fn playback_next(&self) -> Vec<String> {
        self.playback.next().await
    }

    pub async fn playback_prev(&self) {
        self.playback.prev().await
    }

    pub async fn playback_cancel(&self) {
        self.playback.cancel().await
    }

    /// Remove the message at `index` from every selected conversation,
    /// together with the answer that follows it.
    pub async fn delete_message(&self, index: usize) {
        for id in self.store.selected_ids().await {
            self.store
                .update(&id, |c| {
                    if index >= c.messages.len() {
                        return;
                    }
                    let count = match c.messages.get(index + 1) {
                        Some(next) if next.is_assistant() => 2,
                        _ => 1,
                    };
                    c.messages.drain(index..index + count);
                })
                .await;
        }
    }

    pub async fn rate_message(
        &self,
        conversation_id: &str,
        message_index: usize,
        positive: bool,
    ) -> Result<(), EngineError> {
        let conversation = self.source(conversation_id).await?;
        let message =
            conversation
                .messages
                .get(message_index)
                .ok_or(EngineError::MessageNotFound {
                    conversation_id: conversation_id.to_string(),
                    index: message_index,
                })?;
        let Some(response_id) = message.response_id.clone().filter(|_| message.is_assistant())
        else {
            return Err(EngineError::NotRatable);
        };

        let body = RateBody {
            response_id,
            model_id: conversation.model.id.clone(),
            id: conversation.id.to_lowercase(),
            value: positive,
        };
        self.coordinator
            .backend()
            .rate(body)
            .await
            .map_err(|e| EngineError::Rating(e.to_string()))?;

        let like = if positive { Like::Positive } else { Like::Negative };
        self.update_message(conversation_id, message_index, |m| m.like = like)
            .await?;
        self.store
            .publish(Event::MessageRated {
                conversation_id: conversation_id.to_string(),
                message_index,
                like,
            })
            .await;
        Ok(())
    }

    async fn source(&self, id: &str) -> Result<Conversation, EngineError> {
        self.store
            .get(id)
            .await
            .ok_or_else(|| EngineError::ConversationNotFound(id.to_string()))
    }
}
