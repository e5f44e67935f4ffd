#[cfg(test)]
#[path = "command_test.rs"]
mod tests;

use clap::{Parser, Subcommand};
use eyre::{Context, Result};

use crate::config::{self, Configuration, load_configuration, lookup_config_path};

#[derive(Debug, Parser)]
#[command(
    version,
    about,
    long_about = r#"Stream, replay and play back chat conversations

Default configuration file location looks up in the following order:
    * $XDG_CONFIG_HOME/parley/config.toml
    * $HOME/.config/parley/config.toml
    * $HOME/.parley.toml
"#,
    disable_version_flag = true
)]
pub struct Command {
    /// Configuration file path
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<String>,

    /// Show the version
    #[arg(short, long)]
    version: bool,

    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Action {
    /// List stored conversations
    List,

    /// Send a message and print the streamed answer
    Chat {
        /// Continue an existing conversation instead of starting a new one
        #[arg(long, value_name = "ID")]
        conversation: Option<String>,

        /// Model of the new conversation
        #[arg(long, value_name = "ID")]
        model: Option<String>,

        text: String,
    },

    /// Re-send the user messages of a conversation to the backend
    Replay {
        /// Source conversation, or a replay conversation to resume
        id: String,

        /// Drop the turn that did not complete before resuming
        #[arg(long)]
        restart: bool,
    },

    /// Step through the recorded turns of a conversation
    Playback {
        /// Source conversation
        id: String,
    },
}

impl Command {
    pub fn new() -> Command {
        Self::parse()
    }

    pub fn get_config(&self) -> Result<Configuration> {
        let config_path = self
            .config
            .clone()
            .unwrap_or_else(|| lookup_config_path().unwrap_or_default());

        if config_path.is_empty() {
            return Ok(Configuration::default());
        }
        load_configuration(config_path.as_str()).wrap_err("loading configuration")
    }

    pub fn version(&self) -> bool {
        self.version
    }

    pub fn print_version(&self) {
        println!("{}", config::version())
    }

    pub fn action(&self) -> Option<&Action> {
        self.action.as_ref()
    }
}
