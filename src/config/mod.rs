//! Command line and configuration file

mod args;
mod settings;

pub use args::{Args, Command};
pub use settings::{ConfigError, StreamerSettings};
