#[cfg(test)]
#[path = "replay_test.rs"]
mod tests;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::engine::{
    ConversationStore, EngineError, OrchestrationContext, SendRequest, StreamCoordinator,
    StreamOutcome,
};
use crate::models::{
    Conversation, Event, Message, ModelRef, Role, clear_state_for_messages,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ReplayOutcome {
    /// Every recorded user message was resent
    Finished,
    /// Stopped between two steps, the run can be resumed with a restart
    Paused,
    Failed,
    Cancelled,
}

/// Resends the recorded user messages of replay conversations, one step
/// at a time.
///
/// Conversations replayed together advance in lockstep: a conversation only
/// moves to its next step once every conversation of the run has finished
/// streaming the current one.
pub struct ReplayController {
    store: Arc<ConversationStore>,
    context: Arc<OrchestrationContext>,
    coordinator: Arc<StreamCoordinator>,
    models: Vec<ModelRef>,
}

impl ReplayController {
    pub fn new(
        store: Arc<ConversationStore>,
        context: Arc<OrchestrationContext>,
        coordinator: Arc<StreamCoordinator>,
    ) -> Self {
        Self {
            store,
            context,
            coordinator,
            models: vec![],
        }
    }

    pub fn with_models(mut self, models: Vec<ModelRef>) -> Self {
        self.models = models;
        self
    }

    /// Run the replay of `conversation_ids` until every one of them is
    /// finished, failed or paused. `is_restart` resumes an interrupted run:
    /// the trailing incomplete turn is dropped before its step is resent.
    pub async fn replay_all(
        &self,
        conversation_ids: &[String],
        is_restart: bool,
    ) -> Vec<Result<ReplayOutcome, EngineError>> {
        let token = self.context.new_batch();
        self.context.resume_replay();
        log::info!(
            "Replaying {} conversation(s), restart: {}",
            conversation_ids.len(),
            is_restart
        );

        let runs = conversation_ids
            .iter()
            .map(|id| self.replay_one(id, conversation_ids, is_restart, &token));
        let outcomes = futures::future::join_all(runs).await;

        self.context.pause_replay();
        outcomes
    }

    pub fn pause(&self) {
        self.context.pause_replay();
    }

    async fn replay_one(
        &self,
        conversation_id: &str,
        cohort: &[String],
        is_restart: bool,
        token: &CancellationToken,
    ) -> Result<ReplayOutcome, EngineError> {
        let mut is_restart = is_restart;

        loop {
            let conversation = self
                .store
                .get(conversation_id)
                .await
                .ok_or_else(|| EngineError::ConversationNotFound(conversation_id.to_string()))?;

            let index = conversation.replay.active_replay_index;
            let Some(step) = conversation
                .replay
                .replay_user_messages_stack
                .get(index)
                .cloned()
            else {
                self.end_replay(conversation_id).await;
                return Ok(ReplayOutcome::Finished);
            };

            let delete_count = if is_restart {
                restart_delete_count(&conversation)
            } else {
                0
            };
            is_restart = false;

            let models = &self.models;
            self.store
                .update(conversation_id, |c| prepare_step(c, &step, models))
                .await;

            log::debug!(
                "Replay step {} of conversation {}",
                index,
                conversation_id
            );
            let request = SendRequest::new(conversation_id, replayed_message(&step))
                .with_delete_count(delete_count)
                .with_replay_index(index);

            match self.coordinator.send(request, token).await? {
                StreamOutcome::Succeeded => {}
                StreamOutcome::Failed(_) => return Ok(ReplayOutcome::Failed),
                StreamOutcome::Cancelled => return Ok(ReplayOutcome::Cancelled),
            }

            self.store.wait_until_idle(cohort).await;
            if self.context.is_replay_paused() || token.is_cancelled() {
                log::debug!("Replay of conversation {} paused", conversation_id);
                return Ok(ReplayOutcome::Paused);
            }

            self.store
                .update(conversation_id, |c| {
                    c.replay.active_replay_index = index + 1;
                })
                .await;
        }
    }

    async fn end_replay(&self, conversation_id: &str) {
        log::info!("Replay of conversation {} finished", conversation_id);
        self.store
            .update(conversation_id, |c| {
                c.replay.is_replay = false;
                c.replay.replay_as_is = false;
            })
            .await;
        self.store
            .publish(Event::ReplayFinished {
                conversation_id: conversation_id.to_string(),
            })
            .await;
    }
}

/// Messages to drop when a run resumes: the incomplete turn left behind by
/// the interrupted step.
fn restart_delete_count(conversation: &Conversation) -> usize {
    match conversation.last_message() {
        Some(msg) if msg.is_assistant() => 2,
        Some(_) => 1,
        None => 0,
    }
}

/// Reset the error flag and, for an as-is replay, restore the model and the
/// settings the step was originally sent with. Changing either invalidates
/// the per-turn state of the history.
fn prepare_step(conversation: &mut Conversation, step: &Message, models: &[ModelRef]) {
    conversation.replay.is_error = false;

    if !conversation.replay.replay_as_is {
        return;
    }
    let Some(step_model) = step.model.as_ref().filter(|m| !m.id.is_empty()) else {
        return;
    };

    let settings = step
        .settings
        .clone()
        .unwrap_or_else(|| conversation.settings());
    let model = models
        .iter()
        .find(|m| m.id == step_model.id)
        .cloned()
        .unwrap_or_else(|| conversation.model.clone());

    if conversation.model.id != model.id || conversation.is_settings_changed(&settings) {
        conversation.messages = clear_state_for_messages(&conversation.messages);
    }
    conversation.model = model;
    conversation.apply_settings(&settings);
}

fn replayed_message(step: &Message) -> Message {
    Message {
        role: Role::User,
        content: step.content.clone(),
        custom_content: step.custom_content.clone(),
        ..Default::default()
    }
}
