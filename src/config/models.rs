use eyre::Result;
use serde::{Deserialize, Serialize};
use std::time;

use crate::models::ModelRef;

#[cfg(not(test))]
static CONFIG: std::sync::OnceLock<Configuration> = std::sync::OnceLock::new();

#[cfg(test)]
thread_local! {
    static TEST_CONFIG: std::cell::RefCell<&'static Configuration> =
        std::cell::RefCell::new(Box::leak(Box::new(Configuration::default())));
}

use super::constants::{
    CHAT_PATH, DEFAULT_CONVERSATION_NAME, DEFAULT_TEMPERATURE, LOG_FILE_PATH, PLAYBACK_STEP_DELAY,
    RATE_PATH, STALL_TIMEOUT,
};
use super::defaults::*;

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Configuration {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Model catalog, the first entry is the default model
    #[serde(default)]
    pub models: Vec<ModelRef>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GeneralConfig {
    #[serde(default)]
    pub verbose: bool,

    #[serde(default = "default_conversation_name")]
    pub default_conversation_name: String,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    #[serde(default)]
    pub default_prompt: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LogConfig {
    #[serde(default = "log_level")]
    pub level: Option<String>,

    #[serde(default)]
    pub filters: Option<Vec<LogFilter>>,

    #[serde(default)]
    pub file: LogFile,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LogFilter {
    #[serde(default)]
    pub module: Option<String>,

    #[serde(default)]
    pub level: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LogFile {
    #[serde(default = "log_file_path")]
    pub path: String,

    #[serde(default)]
    pub append: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct BackendConfig {
    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Transport level timeout, independent from the stall timeout
    #[serde(default)]
    pub timeout_secs: Option<u16>,

    #[serde(default = "stall_timeout_secs")]
    pub stall_timeout_secs: u64,

    #[serde(default = "chat_path")]
    pub chat_path: String,

    #[serde(default = "rate_path")]
    pub rate_path: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PlaybackConfig {
    #[serde(default = "step_delay_ms")]
    pub step_delay_ms: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub enum StorageConfig {
    #[serde(rename = "sqlite")]
    Sqlite(SqliteStorage),
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct SqliteStorage {
    pub path: Option<String>,
}

impl Configuration {
    #[cfg(not(test))]
    pub fn instance() -> &'static Configuration {
        CONFIG.get_or_init(Configuration::default)
    }

    #[cfg(not(test))]
    pub fn init(config: Configuration) -> Result<()> {
        CONFIG
            .set(config)
            .map_err(|_| eyre::eyre!("Config already initialized"))?;
        Ok(())
    }

    #[cfg(test)]
    pub fn instance() -> &'static Configuration {
        TEST_CONFIG.with(|config| *config.borrow())
    }

    #[cfg(test)]
    pub fn init(config: Configuration) -> Result<()> {
        TEST_CONFIG.with(|test_config| {
            *test_config.borrow_mut() = Box::leak(Box::new(config));
        });
        Ok(())
    }

    pub fn default_model(&self) -> Option<&ModelRef> {
        self.models.first()
    }

    pub fn find_model(&self, id: &str) -> Option<&ModelRef> {
        self.models.iter().find(|m| m.id == id)
    }
}

impl BackendConfig {
    pub fn stall_timeout(&self) -> time::Duration {
        time::Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn timeout(&self) -> Option<time::Duration> {
        self.timeout_secs
            .map(|secs| time::Duration::from_secs(secs as u64))
    }
}

impl PlaybackConfig {
    pub fn step_delay(&self) -> time::Duration {
        time::Duration::from_millis(self.step_delay_ms)
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            default_conversation_name: DEFAULT_CONVERSATION_NAME.to_string(),
            default_temperature: DEFAULT_TEMPERATURE,
            default_prompt: String::new(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Some("info".to_string()),
            file: LogFile::default(),
            filters: None,
        }
    }
}

impl Default for LogFile {
    fn default() -> Self {
        Self {
            path: LOG_FILE_PATH.to_string(),
            append: false,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            timeout_secs: None,
            stall_timeout_secs: STALL_TIMEOUT.as_secs(),
            chat_path: CHAT_PATH.to_string(),
            rate_path: RATE_PATH.to_string(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            step_delay_ms: PLAYBACK_STEP_DELAY.as_millis() as u64,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Sqlite(SqliteStorage::default())
    }
}

impl SqliteStorage {
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}
