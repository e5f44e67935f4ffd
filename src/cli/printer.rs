#[cfg(test)]
#[path = "printer_test.rs"]
mod tests;

use std::collections::HashMap;
use std::io::Write;

use eyre::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::{Conversation, Event};

/// Position of the last printed answer
#[derive(Debug, Clone, Copy, PartialEq)]
struct Cursor {
    message_index: usize,
    printed: usize,
}

/// Prints assistant content as it streams in, plus one line per terminal
/// transition.
pub struct EventPrinter<W: Write> {
    out: W,
    cursors: HashMap<String, Cursor>,
    show_names: bool,
}

impl<W: Write> EventPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            cursors: HashMap::new(),
            show_names: false,
        }
    }

    /// Prefix every answer with its conversation name.
    pub fn with_names(mut self, show_names: bool) -> Self {
        self.show_names = show_names;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub async fn run(
        &mut self,
        mut event_rx: mpsc::UnboundedReceiver<Event>,
        cancel_token: CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    while let Ok(event) = event_rx.try_recv() {
                        self.handle(event)?;
                    }
                    log::debug!("Event printer cancelled");
                    return Ok(());
                }

                event = event_rx.recv() => {
                    let Some(event) = event else {
                        return Ok(());
                    };
                    self.handle(event)?;
                }
            }
        }
    }

    pub fn handle(&mut self, event: Event) -> Result<()> {
        match event {
            Event::ConversationUpdated(conversation) => self.print_answer(&conversation)?,
            Event::StreamSucceeded { .. } | Event::PlaybackStepFinished { .. } => {
                writeln!(self.out)?;
            }
            Event::StreamFailed {
                conversation_id,
                message,
            } => {
                writeln!(self.out)?;
                writeln!(self.out, "[{}] error: {}", conversation_id, message)?;
            }
            Event::StreamCancelled { conversation_id } => {
                writeln!(self.out)?;
                writeln!(self.out, "[{}] cancelled", conversation_id)?;
            }
            Event::AuthRequired => writeln!(self.out, "authentication required")?,
            Event::ReplayFinished { conversation_id } => {
                writeln!(self.out, "[{}] replay finished", conversation_id)?;
            }
            Event::ConversationsDeleted(ids) => {
                for id in ids {
                    self.cursors.remove(&id);
                }
            }
            Event::SelectionChanged(_) | Event::MessageRated { .. } => {}
        }
        self.out.flush().wrap_err("flushing output")
    }

    fn print_answer(&mut self, conversation: &Conversation) -> Result<()> {
        let Some(message_index) = conversation.messages.len().checked_sub(1) else {
            self.cursors.remove(&conversation.id);
            return Ok(());
        };
        let message = &conversation.messages[message_index];
        if !message.is_assistant() {
            return Ok(());
        }

        let cursor = self.cursors.get(&conversation.id).copied();
        let printed = match cursor {
            Some(cursor)
                if cursor.message_index == message_index
                    && cursor.printed <= message.content.len()
                    && message.content.is_char_boundary(cursor.printed) =>
            {
                cursor.printed
            }
            _ => {
                if self.show_names {
                    write!(self.out, "[{}] ", conversation.name)?;
                }
                0
            }
        };

        write!(self.out, "{}", &message.content[printed..])?;
        self.cursors.insert(
            conversation.id.clone(),
            Cursor {
                message_index,
                printed: message.content.len(),
            },
        );
        Ok(())
    }
}
