use std::sync::Arc;

use tokio::sync::mpsc;

use super::{Conversation, Like};

/// Transitions published by the engine for presentation collaborators.
#[derive(Debug, Clone)]
pub enum Event {
    ConversationUpdated(Conversation),
    ConversationsDeleted(Vec<String>),
    SelectionChanged(Vec<String>),

    StreamSucceeded {
        conversation_id: String,
    },
    StreamFailed {
        conversation_id: String,
        message: String,
    },
    StreamCancelled {
        conversation_id: String,
    },
    /// The backend answered 401, the login flow is owned outside the engine
    AuthRequired,

    ReplayFinished {
        conversation_id: String,
    },
    PlaybackStepFinished {
        conversation_id: String,
    },
    MessageRated {
        conversation_id: String,
        message_index: usize,
        like: Like,
    },
}

#[async_trait::async_trait]
pub trait EventTx {
    async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>>;
}

#[async_trait::async_trait]
impl EventTx for mpsc::Sender<Event> {
    async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        self.send(event).await
    }
}

#[async_trait::async_trait]
impl EventTx for mpsc::UnboundedSender<Event> {
    async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        self.send(event)
    }
}

/// Sink that drops every event, for callers that only read the store.
pub struct NoopEventTx;

#[async_trait::async_trait]
impl EventTx for NoopEventTx {
    async fn send(&self, _event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        Ok(())
    }
}

pub type ArcEventTx = Arc<dyn EventTx + Send + Sync>;
