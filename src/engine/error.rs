use thiserror::Error;

/// Intents rejected by the engine before any state transition happens.
#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("conversation {0} not found")]
    ConversationNotFound(String),

    #[error("conversation {0} is already streaming")]
    AlreadyStreaming(String),

    #[error("message {index} not found in conversation {conversation_id}")]
    MessageNotFound {
        conversation_id: String,
        index: usize,
    },

    #[error("message cannot be rated")]
    NotRatable,

    #[error("rating failed: {0}")]
    Rating(String),
}
