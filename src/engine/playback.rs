#[cfg(test)]
#[path = "playback_test.rs"]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::config::constants::PLAYBACK_STEP_DELAY;
use crate::engine::{ConversationStore, OrchestrationContext};
use crate::models::{Conversation, Event, Message, PlaybackState, Role};

/// Re-presents a recorded conversation turn by turn, without any network
/// traffic.
///
/// A step shows the user message together with an empty assistant
/// placeholder, waits `step_delay`, then reveals the recorded answer. The
/// playback index moves past the user message when a step starts and past
/// the answer when it ends.
pub struct PlaybackController {
    store: Arc<ConversationStore>,
    context: Arc<OrchestrationContext>,
    step_delay: Duration,
}

impl PlaybackController {
    pub fn new(store: Arc<ConversationStore>, context: Arc<OrchestrationContext>) -> Self {
        Self {
            store,
            context,
            step_delay: PLAYBACK_STEP_DELAY,
        }
    }

    pub fn with_step_delay(mut self, step_delay: Duration) -> Self {
        self.step_delay = step_delay;
        self
    }

    /// Advance every selected playback conversation by one turn. Returns the
    /// ids whose step was completed.
    pub async fn next(&self) -> Vec<String> {
        let ids = self.store.selected_ids().await;
        self.context.resume_playback();
        let token = self.context.playback_token();

        let mut started = vec![];
        for id in ids {
            if self.start_step(&id).await {
                started.push(id);
            }
        }
        if started.is_empty() {
            return started;
        }

        tokio::select! {
            _ = token.cancelled() => {
                log::debug!("Playback step interrupted");
                return vec![];
            }
            _ = tokio::time::sleep(self.step_delay) => {}
        }
        if self.context.is_playback_paused() {
            return vec![];
        }

        let mut finished = vec![];
        for id in started {
            if self.end_step(&id).await {
                finished.push(id);
            }
        }
        finished
    }

    /// Step back one turn. A step in progress is abandoned instead.
    pub async fn prev(&self) {
        let ids = self.store.selected_ids().await;
        if self.store.any_streaming(&ids) {
            self.context.stop_playback();
        }

        for id in ids {
            self.store.update(&id, step_back).await;
        }
    }

    /// Leave playback: the placeholder of a step in progress is dropped and
    /// the playback state of every selected conversation is reset.
    pub async fn cancel(&self) {
        self.context.stop_playback();

        for id in self.store.selected_ids().await {
            self.store
                .update(&id, |c| {
                    let Some(playback) = c.playback.as_mut().filter(|p| p.is_playback) else {
                        return;
                    };
                    if c.is_message_streaming {
                        c.messages.truncate(playback.active_playback_index);
                    }
                    *playback = PlaybackState::default();
                    c.is_message_streaming = false;
                })
                .await;
        }
    }

    async fn start_step(&self, conversation_id: &str) -> bool {
        let started = self
            .store
            .update(conversation_id, begin_step)
            .await
            .unwrap_or(false);
        if !started {
            log::debug!("No playback step for conversation {}", conversation_id);
        }
        started
    }

    async fn end_step(&self, conversation_id: &str) -> bool {
        let finished = self
            .store
            .update(conversation_id, |c| {
                let Some(playback) = c.playback.as_mut().filter(|p| p.is_playback) else {
                    return false;
                };
                if !c.is_message_streaming {
                    return false;
                }
                let active = playback.active_playback_index;
                let Some(answer) = playback.messages_stack.get(active).cloned() else {
                    return false;
                };

                c.messages.truncate(active);
                c.messages.push(answer);
                playback.active_playback_index = active + 1;
                c.is_message_streaming = false;
                true
            })
            .await
            .unwrap_or(false);

        if finished {
            self.store
                .publish(Event::PlaybackStepFinished {
                    conversation_id: conversation_id.to_string(),
                })
                .await;
        }
        finished
    }
}

fn begin_step(c: &mut Conversation) -> bool {
    let Some(playback) = c.playback.as_ref().filter(|p| p.is_playback) else {
        return false;
    };
    if c.is_message_streaming {
        return false;
    }

    let index = playback.active_playback_index;
    let (Some(user), Some(answer)) = (
        playback.messages_stack.get(index).cloned(),
        playback.messages_stack.get(index + 1).cloned(),
    ) else {
        return false;
    };

    // the answer's snapshot wins, older recordings only stamp the question
    if let Some(settings) = answer.settings.as_ref().or(user.settings.as_ref()) {
        c.apply_settings(settings);
    }
    if let Some(model) = answer.model.as_ref().or(user.model.as_ref()) {
        c.apply_message_model(model);
    }

    c.messages.push(user);
    c.messages.push(Message {
        role: Role::Assistant,
        content: String::new(),
        ..answer
    });
    if let Some(playback) = c.playback.as_mut() {
        playback.active_playback_index = index + 1;
    }
    c.is_message_streaming = true;
    c.last_activity_date = Utc::now();
    true
}

fn step_back(c: &mut Conversation) {
    let Some(playback) = c.playback.as_ref().filter(|p| p.is_playback) else {
        return;
    };
    let step = if c.is_message_streaming { 1 } else { 2 };
    let Some(target) = playback.active_playback_index.checked_sub(step) else {
        return;
    };

    let removed = c.messages.split_off(target.min(c.messages.len()));
    restore_working_settings(c, &removed);
    if let Some(playback) = c.playback.as_mut() {
        playback.active_playback_index = target;
    }
    c.is_message_streaming = false;
}

/// Working model and settings follow the last turn still shown. Back at the
/// start they come from the first turn that was just removed.
fn restore_working_settings(c: &mut Conversation, removed: &[Message]) {
    let settings = c
        .messages
        .iter()
        .rev()
        .chain(removed)
        .find_map(|m| m.settings.clone());
    let model = c
        .messages
        .iter()
        .rev()
        .chain(removed)
        .find_map(|m| m.model.clone());

    if let Some(settings) = settings {
        c.apply_settings(&settings);
    }
    if let Some(model) = model {
        c.apply_message_model(&model);
    }
}
