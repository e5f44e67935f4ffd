use super::constants::*;

pub(crate) fn default_conversation_name() -> String {
    DEFAULT_CONVERSATION_NAME.to_string()
}

pub(crate) fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

pub(crate) fn log_level() -> Option<String> {
    Some("info".to_string())
}

pub(crate) fn log_file_path() -> String {
    LOG_FILE_PATH.to_string()
}

pub(crate) fn stall_timeout_secs() -> u64 {
    STALL_TIMEOUT.as_secs()
}

pub(crate) fn step_delay_ms() -> u64 {
    PLAYBACK_STEP_DELAY.as_millis() as u64
}

pub(crate) fn chat_path() -> String {
    CHAT_PATH.to_string()
}

pub(crate) fn rate_path() -> String {
    RATE_PATH.to_string()
}
