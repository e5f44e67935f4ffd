pub mod command;
pub mod printer;
pub mod runner;

pub use command::{Action, Command};
pub use printer::EventPrinter;
pub use runner::{Runner, print_conversations};
