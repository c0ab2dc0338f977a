//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ds4stream - DualShock 4 Bluetooth audio
///
/// Stream what the PC is playing to the controller's speaker or headset jack
#[derive(Parser, Debug)]
#[command(name = "ds4stream")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Verbose output (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log output to file
    #[arg(long, global = true)]
    pub log: Option<String>,

    /// Configuration file (default: <config dir>/ds4stream/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start streaming to a controller
    Start {
        /// HID device path of the controller
        #[arg(short, long)]
        device: Option<String>,

        /// Play through the headset jack instead of the speaker
        #[arg(long)]
        headset: bool,

        /// Skip the LED/volume configuration report
        #[arg(long)]
        no_init: bool,

        /// SBC bitpool (default: 48)
        #[arg(long)]
        bitpool: Option<u8>,

        /// Capture the default microphone instead of system output
        #[arg(long)]
        microphone: bool,
    },

    /// Print a sample configuration file
    Config {
        /// Write the sample to the configuration path instead of printing it
        #[arg(long)]
        write: bool,
    },
}

impl Args {
    /// Log level from the verbose/quiet flags, if either was given
    pub fn log_level(&self) -> Option<tracing::Level> {
        if self.quiet {
            Some(tracing::Level::ERROR)
        } else {
            match self.verbose {
                0 => None,
                1 => Some(tracing::Level::DEBUG),
                _ => Some(tracing::Level::TRACE),
            }
        }
    }
}

impl Default for Command {
    fn default() -> Self {
        Command::Start {
            device: None,
            headset: false,
            no_init: false,
            bitpool: None,
            microphone: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_flags() {
        let args = Args::try_parse_from([
            "ds4stream",
            "start",
            "--device",
            "\\\\?\\hid#vid_054c&pid_09cc",
            "--headset",
            "--bitpool",
            "40",
        ])
        .unwrap();

        assert_eq!(
            args.command,
            Some(Command::Start {
                device: Some("\\\\?\\hid#vid_054c&pid_09cc".to_string()),
                headset: true,
                no_init: false,
                bitpool: Some(40),
                microphone: false,
            })
        );
    }

    #[test]
    fn test_default_command_is_start() {
        let args = Args::try_parse_from(["ds4stream"]).unwrap();
        assert!(args.command.is_none());
        assert!(matches!(Command::default(), Command::Start { device: None, .. }));
    }

    #[test]
    fn test_log_level_flags() {
        let args = Args::try_parse_from(["ds4stream", "-vv", "config"]).unwrap();
        assert_eq!(args.log_level(), Some(tracing::Level::TRACE));

        let args = Args::try_parse_from(["ds4stream", "config", "-q"]).unwrap();
        assert_eq!(args.log_level(), Some(tracing::Level::ERROR));

        let args = Args::try_parse_from(["ds4stream", "config"]).unwrap();
        assert_eq!(args.log_level(), None);
    }

    #[test]
    fn test_bitpool_must_be_numeric() {
        assert!(Args::try_parse_from(["ds4stream", "start", "--bitpool", "lots"]).is_err());
    }
}
