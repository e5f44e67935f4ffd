#[cfg(test)]
#[path = "runner_test.rs"]
mod tests;

use std::io::Write;
use std::sync::Arc;

use eyre::{Result, bail, eyre};

use crate::engine::{Engine, ReplayOutcome, StreamOutcome};
use crate::models::{Conversation, Message};

use super::Action;

/// Executes one command line action against the engine.
pub struct Runner {
    engine: Arc<Engine>,
}

impl Runner {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub async fn run(&self, action: &Action) -> Result<()> {
        match action {
            Action::List => {
                let conversations = self.engine.store().conversations().await;
                let selected = self.engine.store().selected_ids().await;
                print_conversations(&mut std::io::stdout(), &conversations, &selected)?;
            }
            Action::Chat {
                conversation,
                model,
                text,
            } => {
                self.chat(conversation.as_deref(), model.as_deref(), text)
                    .await?;
            }
            Action::Replay { id, restart } => {
                let outcome = self.replay(id, *restart).await?;
                if outcome == ReplayOutcome::Paused {
                    println!("replay paused, resume with `replay {} --restart`", id);
                }
            }
            Action::Playback { id } => {
                let steps = self.playback(id).await?;
                log::info!("Played back {} turns of {}", steps, id);
            }
        }
        Ok(())
    }

    /// Send `text` and wait for the answer. Returns the conversation id.
    pub async fn chat(
        &self,
        conversation_id: Option<&str>,
        model_id: Option<&str>,
        text: &str,
    ) -> Result<String> {
        let id = match conversation_id {
            Some(id) => {
                self.existing(id).await?;
                self.engine.select_conversations(&[id.to_string()]).await;
                id.to_string()
            }
            None => {
                let model = match model_id {
                    Some(model_id) => Some(
                        self.engine
                            .find_model(model_id)
                            .cloned()
                            .ok_or_else(|| eyre!("unknown model {}", model_id))?,
                    ),
                    None => None,
                };
                self.engine
                    .create_conversations(&[String::new()], model)
                    .await
                    .into_iter()
                    .next()
                    .ok_or_else(|| eyre!("no conversation created"))?
            }
        };

        let outcomes = self
            .engine
            .send_messages(std::slice::from_ref(&id), Message::user(text), 0)
            .await;
        for outcome in outcomes {
            match outcome? {
                StreamOutcome::Succeeded => {}
                StreamOutcome::Failed(message) => bail!(message),
                StreamOutcome::Cancelled => log::info!("Chat in {} cancelled", id),
            }
        }
        Ok(id)
    }

    /// Replay `id`. A conversation that is not a replay yet gets a replay copy.
    pub async fn replay(&self, id: &str, restart: bool) -> Result<ReplayOutcome> {
        let source = self.existing(id).await?;
        let replay_id = if source.is_replay() {
            self.engine.select_conversations(&[id.to_string()]).await;
            id.to_string()
        } else {
            self.engine.create_replay_conversation(id).await?
        };

        let outcome = self
            .engine
            .replay_conversations(std::slice::from_ref(&replay_id), restart)
            .await
            .into_iter()
            .next()
            .ok_or_else(|| eyre!("no replay outcome for {}", replay_id))??;
        if outcome == ReplayOutcome::Failed {
            bail!("replay of {} failed", replay_id);
        }
        Ok(outcome)
    }

    /// Play `id` back to the end. Returns the number of turns shown.
    pub async fn playback(&self, id: &str) -> Result<usize> {
        let source = self.existing(id).await?;
        if source.is_playback() {
            self.engine.select_conversations(&[id.to_string()]).await;
        } else {
            self.engine.create_playback_conversation(id).await?;
        }

        let mut steps = 0;
        while !self.engine.playback_next().await.is_empty() {
            steps += 1;
        }
        Ok(steps)
    }

    async fn existing(&self, id: &str) -> Result<Conversation> {
        match self.engine.store().get(id).await {
            Some(conversation) => Ok(conversation),
            None => bail!("conversation {} not found", id),
        }
    }
}

pub fn print_conversations(
    out: &mut impl Write,
    conversations: &[Conversation],
    selected: &[String],
) -> Result<()> {
    for conversation in conversations {
        let marker = if selected.contains(&conversation.id) {
            "*"
        } else {
            " "
        };
        let kind = if conversation.is_replay() {
            " [replay]"
        } else if conversation.is_playback() {
            " [playback]"
        } else {
            ""
        };
        writeln!(
            out,
            "{} {}  {}  {} messages  {}{}",
            marker,
            conversation.id,
            conversation.last_activity_date.format("%Y-%m-%d %H:%M"),
            conversation.messages.len(),
            conversation.name,
            kind
        )?;
    }
    Ok(())
}
