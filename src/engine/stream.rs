#[cfg(test)]
#[path = "stream_test.rs"]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::backend::{ArcBackend, StreamError};
use crate::config::constants::{GENERAL_CLIENT_ERROR, MAX_NAME_LENGTH};
use crate::engine::decoder::FrameDecoder;
use crate::engine::merger::merge_deltas;
use crate::engine::{ConversationStore, EngineError, OrchestrationContext};
use crate::models::{ChatBody, ChatMessage, Conversation, Event, Message, ModelType};

#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Succeeded,
    /// Carries the text written on the assistant message
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub conversation_id: String,
    pub message: Message,
    /// Trailing messages removed before the new turn is appended
    pub delete_count: usize,
    pub replay_index: Option<usize>,
}

impl SendRequest {
    pub fn new(conversation_id: impl Into<String>, message: Message) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message,
            ..Default::default()
        }
    }

    pub fn with_delete_count(mut self, delete_count: usize) -> Self {
        self.delete_count = delete_count;
        self
    }

    pub fn with_replay_index(mut self, replay_index: usize) -> Self {
        self.replay_index = Some(replay_index);
        self
    }
}

/// Drives one chat turn: appends the user message and the assistant
/// placeholder, streams the response into the placeholder and settles the
/// conversation on success, failure, timeout or cancellation.
pub struct StreamCoordinator {
    store: Arc<ConversationStore>,
    context: Arc<OrchestrationContext>,
    backend: ArcBackend,
    stall_timeout: Duration,
    default_name: String,
}

impl StreamCoordinator {
    pub fn new(
        store: Arc<ConversationStore>,
        context: Arc<OrchestrationContext>,
        backend: ArcBackend,
    ) -> Self {
        Self {
            store,
            context,
            backend,
            stall_timeout: crate::config::constants::STALL_TIMEOUT,
            default_name: crate::config::constants::DEFAULT_CONVERSATION_NAME.to_string(),
        }
    }

    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }

    pub fn with_default_name(mut self, default_name: impl Into<String>) -> Self {
        self.default_name = default_name.into();
        self
    }

    pub fn backend(&self) -> &ArcBackend {
        &self.backend
    }

    /// Send the same message to several conversations at once. Starts a new
    /// batch, which cancels whatever the previous batch still streams.
    pub async fn send_batch(
        &self,
        conversation_ids: &[String],
        message: Message,
        delete_count: usize,
    ) -> Vec<Result<StreamOutcome, EngineError>> {
        let token = self.context.new_batch();
        let sends = conversation_ids.iter().map(|id| {
            let request =
                SendRequest::new(id.clone(), message.clone()).with_delete_count(delete_count);
            self.send(request, &token)
        });
        futures::future::join_all(sends).await
    }

    pub async fn send(
        &self,
        request: SendRequest,
        token: &CancellationToken,
    ) -> Result<StreamOutcome, EngineError> {
        let conversation_id = request.conversation_id.clone();
        let (body, index, placeholder) = self
            .store
            .try_update(&conversation_id, |conversation| {
                self.begin_turn(conversation, request)
            })
            .await?;

        log::debug!(
            "Streaming conversation {} with model {}",
            conversation_id,
            body.model_id
        );

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(StreamError::Cancelled),
            _ = tokio::time::sleep(self.stall_timeout) => Err(StreamError::Timeout(self.stall_timeout)),
            result = self.read_stream(&conversation_id, index, placeholder, body) => result,
        };

        Ok(self.finish(&conversation_id, index, result).await)
    }

    fn begin_turn(
        &self,
        conversation: &mut Conversation,
        request: SendRequest,
    ) -> Result<(ChatBody, usize, Message), EngineError> {
        if conversation.is_message_streaming {
            return Err(EngineError::AlreadyStreaming(conversation.id.clone()));
        }

        let keep = conversation.len().saturating_sub(request.delete_count);
        conversation.messages.truncate(keep);

        let user_message = request
            .message
            .with_model(conversation.message_model())
            .with_settings(conversation.settings());
        let placeholder = Message::assistant("")
            .with_model(conversation.message_model())
            .with_settings(conversation.settings());

        if !conversation.is_replay()
            && conversation.is_empty()
            && conversation.name == self.default_name
        {
            conversation.name = conversation_name(&user_message.content);
        }

        conversation.messages.push(user_message);
        conversation.messages.push(placeholder.clone());
        if let Some(replay_index) = request.replay_index {
            conversation.replay.active_replay_index = replay_index;
        }
        conversation.is_message_streaming = true;
        conversation.last_activity_date = Utc::now();

        Ok((
            build_chat_body(conversation),
            conversation.len() - 1,
            placeholder,
        ))
    }

    async fn read_stream(
        &self,
        conversation_id: &str,
        index: usize,
        mut message: Message,
        body: ChatBody,
    ) -> Result<(), StreamError> {
        let mut stream = self.backend.chat(body).await?;
        let mut pending = Vec::new();

        while let Some(chunk) = stream.next().await {
            pending.extend_from_slice(&chunk?);
            let deltas = FrameDecoder::decode(&mut pending)?;
            if deltas.is_empty() {
                continue;
            }

            message = merge_deltas(message, &deltas);
            let merged = message.clone();
            let updated = self
                .store
                .update(conversation_id, |conversation| {
                    if let Some(placeholder) = conversation.messages.get_mut(index) {
                        *placeholder = merged;
                    }
                })
                .await;

            if updated.is_none() {
                log::debug!("Conversation {} is gone, dropping stream", conversation_id);
                return Err(StreamError::Cancelled);
            }
        }

        if !pending.is_empty() {
            log::warn!(
                "Stream of {} ended with {} unterminated bytes",
                conversation_id,
                pending.len()
            );
        }
        Ok(())
    }

    async fn finish(
        &self,
        conversation_id: &str,
        index: usize,
        result: Result<(), StreamError>,
    ) -> StreamOutcome {
        match result {
            Ok(()) => {
                log::debug!("Stream of conversation {} completed", conversation_id);
                self.store
                    .update(conversation_id, |c| c.is_message_streaming = false)
                    .await;
                self.store
                    .publish(Event::StreamSucceeded {
                        conversation_id: conversation_id.to_string(),
                    })
                    .await;
                StreamOutcome::Succeeded
            }

            Err(StreamError::Cancelled) => {
                log::debug!("Stream of conversation {} cancelled", conversation_id);
                self.store
                    .update(conversation_id, |c| c.is_message_streaming = false)
                    .await;
                self.store
                    .publish(Event::StreamCancelled {
                        conversation_id: conversation_id.to_string(),
                    })
                    .await;
                StreamOutcome::Cancelled
            }

            Err(err) => {
                log::error!("Stream of conversation {} failed: {}", conversation_id, err);
                let message = err
                    .user_message()
                    .unwrap_or_else(|| GENERAL_CLIENT_ERROR.to_string());

                self.store
                    .update(conversation_id, |c| {
                        if let Some(assistant) = c.messages.get_mut(index) {
                            assistant.error_message = Some(message.clone());
                        }
                        if c.replay.is_replay {
                            c.replay.is_error = true;
                            self.context.pause_replay();
                        }
                        c.is_message_streaming = false;
                    })
                    .await;

                if err.is_unauthorized() {
                    self.store.publish(Event::AuthRequired).await;
                }
                self.store
                    .publish(Event::StreamFailed {
                        conversation_id: conversation_id.to_string(),
                        message: message.clone(),
                    })
                    .await;
                StreamOutcome::Failed(message)
            }
        }
    }
}

/// Request body for the current state of `conversation`. The trailing
/// assistant placeholder is not part of the history sent to the backend.
pub fn build_chat_body(conversation: &Conversation) -> ChatBody {
    let last = conversation.len().saturating_sub(1);
    let messages = conversation
        .messages
        .iter()
        .enumerate()
        .filter(|(i, msg)| !(*i == last && msg.is_assistant()))
        .map(|(_, msg)| ChatMessage::from(msg))
        .collect();

    let mut body = ChatBody {
        model_id: conversation.model.id.clone(),
        messages,
        id: conversation.id.to_lowercase(),
        ..Default::default()
    };

    let selected_addons = conversation
        .selected_addons
        .union(&conversation.model.selected_addons)
        .to_vec();

    match conversation.model.model_type {
        ModelType::Model => {
            body.prompt = Some(conversation.prompt.clone());
            body.temperature = Some(conversation.temperature);
            body.selected_addons = Some(selected_addons);
        }
        ModelType::Assistant => {
            if let Some(assistant_model_id) = conversation.assistant_model_id.as_ref() {
                body.assistant_model_id = Some(assistant_model_id.clone());
                body.temperature = Some(conversation.temperature);
                body.selected_addons = Some(selected_addons);
            }
        }
        ModelType::Application => {}
    }

    body
}

fn conversation_name(content: &str) -> String {
    if content.chars().count() > MAX_NAME_LENGTH {
        let name: String = content.chars().take(MAX_NAME_LENGTH).collect();
        format!("{}...", name)
    } else {
        content.to_string()
    }
}
