use std::time::Duration;
use thiserror::Error;

use crate::config::constants::{GENERAL_CLIENT_ERROR, GENERAL_SERVER_ERROR, TIMEOUT_ERROR};

/// Terminal failure kinds of a chat stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Aborted by the user, never surfaced
    #[error("stream cancelled")]
    Cancelled,

    #[error("stream did not complete within {0:?}")]
    Timeout(Duration),

    /// Non-2xx answer, unreadable or malformed body
    #[error("transport failure (status: {status:?}): {}", message.as_deref().unwrap_or("no message"))]
    Transport {
        status: Option<u16>,
        message: Option<String>,
    },

    /// Anything else that went wrong on our side
    #[error("client failure: {0}")]
    Client(String),
}

impl StreamError {
    pub fn transport(status: Option<u16>, message: Option<String>) -> Self {
        Self::Transport { status, message }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            StreamError::Transport { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamError::Cancelled)
    }

    /// Text written on the failed assistant message. `None` for
    /// cancellation, which is silent.
    pub fn user_message(&self) -> Option<String> {
        match self {
            StreamError::Cancelled => None,
            StreamError::Timeout(_) => Some(TIMEOUT_ERROR.to_string()),
            StreamError::Transport { message, .. } => Some(
                message
                    .as_deref()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or(GENERAL_SERVER_ERROR)
                    .to_string(),
            ),
            StreamError::Client(_) => Some(GENERAL_CLIENT_ERROR.to_string()),
        }
    }
}
