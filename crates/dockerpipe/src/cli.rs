use crate::commands::ensure_channel::{execute_ensure_channel, EnsureChannelArgs};
use crate::commands::run::{execute_run, RunArgs};
use crate::commands::send::{execute_send, SendArgs};
use crate::commands::show_config::execute_show_config;
use crate::commands::unit::{execute_unit, UnitArgs};
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use dockerpipe_core::config::{ConfigLoader, DispatcherConfig, PartialConfig};
use dockerpipe_core::source::Framing;
use std::path::PathBuf;

/// Log format options
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

/// Log level options
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Error messages only
    Error,
    /// Warning and error messages
    Warn,
    /// Informational messages and above
    Info,
    /// Debug messages and above
    Debug,
    /// All messages including trace
    Trace,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Message framing options
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum FramingOption {
    /// One message per writer open/close cycle
    Close,
    /// One message per newline-terminated line
    Line,
    /// 4-byte big-endian length, then the payload
    LengthPrefixed,
}

impl From<FramingOption> for Framing {
    fn from(option: FramingOption) -> Self {
        match option {
            FramingOption::Close => Framing::Close,
            FramingOption::Line => Framing::Line,
            FramingOption::LengthPrefixed => Framing::LengthPrefixed,
        }
    }
}

/// Host-side command pipe dispatcher
#[derive(Debug, Parser)]
#[command(name = "dockerpipe")]
#[command(
    about = "Execute commands written by containers to a named pipe on the host",
    long_about = None
)]
#[command(version)]
pub struct Cli {
    /// Log format (text or json, can be set via DOCKERPIPE_LOG_FORMAT env var)
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Log level (DOCKERPIPE_LOG or RUST_LOG take precedence)
    #[arg(long, global = true, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Configuration file path
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Channel (FIFO) path
    #[arg(long, global = true, value_name = "PATH")]
    pub channel: Option<PathBuf>,

    /// Application directory; commands run here and relative log paths resolve against it
    #[arg(long, global = true, value_name = "PATH")]
    pub app_dir: Option<PathBuf>,

    /// Command log file path
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Message framing on the channel
    #[arg(long, global = true, value_enum)]
    pub framing: Option<FramingOption>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the dispatcher in the foreground (default)
    Run {
        /// Do not create the channel; fail if it is missing
        #[arg(long)]
        no_create: bool,
    },

    /// Create the channel if needed and apply its permissions
    EnsureChannel {
        /// Only report the channel state; change nothing
        #[arg(long)]
        check: bool,
    },

    /// Write one command to the channel
    Send {
        /// Send this string verbatim instead of joining words
        #[arg(long, value_name = "COMMAND", conflicts_with = "words")]
        raw: Option<String>,

        /// Command words, shell-quoted and joined with spaces
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required_unless_present = "raw")]
        words: Vec<String>,
    },

    /// Print a systemd service unit for the dispatcher
    Unit {
        /// Write the unit to this file instead of stdout
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

impl Cli {
    /// Configuration layer built from command-line flags
    pub fn overrides(&self) -> PartialConfig {
        PartialConfig {
            channel_path: self.channel.clone(),
            app_dir: self.app_dir.clone(),
            log_file: self.log_file.clone(),
            framing: self.framing.map(Framing::from),
            ..PartialConfig::default()
        }
    }

    fn resolve_config(&self) -> Result<DispatcherConfig> {
        Ok(ConfigLoader::resolve(
            self.config.as_deref(),
            self.overrides(),
        )?)
    }

    /// Dispatch the command
    pub fn dispatch(self) -> Result<()> {
        let log_format = match self.log_format {
            Some(LogFormat::Text) => Some("text"),
            Some(LogFormat::Json) => Some("json"),
            None => None,
        };
        let level = self.log_level.as_str();
        let default_filter = format!("dockerpipe={},dockerpipe_core={}", level, level);
        dockerpipe_core::logging::init(log_format, &default_filter)?;

        tracing::debug!("CLI initialized with log level: {}", level);

        let config = self.resolve_config()?;

        match self.command {
            None => execute_run(RunArgs { create: true }, &config),
            Some(Commands::Run { no_create }) => execute_run(RunArgs { create: !no_create }, &config),
            Some(Commands::EnsureChannel { check }) => {
                execute_ensure_channel(EnsureChannelArgs { check }, &config)
            }
            Some(Commands::Send { raw, words }) => execute_send(SendArgs { raw, words }, &config),
            Some(Commands::Unit { output }) => execute_unit(
                UnitArgs {
                    output,
                    config_file: self.config,
                },
                &config,
            ),
            Some(Commands::ShowConfig) => execute_show_config(&config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_defaults_to_run() {
        let cli = Cli::try_parse_from(["dockerpipe"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_global_overrides() {
        let cli = Cli::try_parse_from([
            "dockerpipe",
            "show-config",
            "--channel",
            "/tmp/pipe",
            "--framing",
            "length-prefixed",
        ])
        .unwrap();
        let overrides = cli.overrides();
        assert_eq!(overrides.channel_path, Some(PathBuf::from("/tmp/pipe")));
        assert_eq!(overrides.framing, Some(Framing::LengthPrefixed));
        assert_eq!(overrides.shell, None);
    }

    #[test]
    fn test_send_words_and_raw() {
        let cli = Cli::try_parse_from(["dockerpipe", "send", "--", "echo", "-n", "hi there"]).unwrap();
        match cli.command {
            Some(Commands::Send { raw, words }) => {
                assert!(raw.is_none());
                assert_eq!(words, vec!["echo", "-n", "hi there"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["dockerpipe", "send", "--raw", "ls | wc -l"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Send { raw: Some(ref r), .. }) if r == "ls | wc -l"
        ));

        assert!(Cli::try_parse_from(["dockerpipe", "send"]).is_err());
    }
}
