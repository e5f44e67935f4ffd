use std::time::Duration;

/// Budget for a whole stream, measured from the moment the request is sent
pub const STALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Pacing between the two halves of a playback step
pub const PLAYBACK_STEP_DELAY: Duration = Duration::from_millis(1000);

/// Frames of the chat stream are terminated by a NUL byte
pub const FRAME_TERMINATOR: u8 = b'\0';

/// Typing cursor some backends append to the streamed content
pub const CURSOR_MARKER: &str = "▍";

pub const MAX_NAME_LENGTH: usize = 160;

pub const DEFAULT_CONVERSATION_NAME: &str = "New conversation";

pub const DEFAULT_TEMPERATURE: f32 = 1.0;

pub const REPLAY_NAME_PREFIX: &str = "[Replay]";

pub const PLAYBACK_NAME_PREFIX: &str = "[Playback]";

pub const LOG_FILE_PATH: &str = "/tmp/parley.log";
/// Environment variable whose `env_logger` filters override `[log]`.
pub const LOG_FILTER_ENV: &str = "PARLEY_LOG";

pub const CHAT_PATH: &str = "api/chat";

pub const RATE_PATH: &str = "api/rate";

pub const TIMEOUT_ERROR: &str = "Server is taking too long to respond due to either poor connectivity or excessive load. Please check your internet connection and try again. You also may try a different model.";

pub const GENERAL_SERVER_ERROR: &str = "Sorry, we were unable to process your request at this time due to a server error. Please try again later. Thank you for your patience and understanding.";

pub const GENERAL_CLIENT_ERROR: &str = "Sorry, we were unable to process your request at this time due to a client error. Please try again later. Thank you for your patience and understanding.";
