mod command;
mod config;

pub use command::execute;
pub use config::{load, AppConfig, Cli, Command};
