pub mod constants;
pub(crate) mod defaults;
pub mod models;
pub mod utils;

pub use models::*;
pub use utils::*;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_SHA: &str = match option_env!("GIT_SHA") {
    Some(v) => v,
    None => "unknown",
};

/// Sent with every backend request.
pub fn user_agent() -> String {
    format!("parley/{} ({})", VERSION, GIT_SHA)
}

pub fn version() -> String {
    format!("{} {} (commit {})", APP_NAME, VERSION, GIT_SHA)
}

/// Print to stderr when `general.verbose` is set. Used for startup progress,
/// which happens before the logger writes anywhere.
#[macro_export]
macro_rules! verbose {
    ($($arg:tt)*) => {
        if $crate::config::Configuration::instance().general.verbose {
            eprintln!($($arg)*);
        }
    };
}

pub use verbose;
