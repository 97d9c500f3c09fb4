//! Error types and handling
//!
//! The error taxonomy follows the failure classes of the dispatcher:
//! channel setup and read failures are fatal and surface to the operator or
//! the service manager, configuration errors abort startup, and execution
//! errors are recorded in the command log without stopping the loop. Each
//! domain enum is wrapped by [`DockerpipeError`] for unified handling.

use std::path::PathBuf;
use thiserror::Error;

/// FIFO channel errors (setup and read side)
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Something other than a FIFO already occupies the channel path
    #[error("Channel path {path} exists but is a {kind}, not a FIFO; refusing to replace it")]
    NotAFifo { path: PathBuf, kind: String },

    /// Creating the FIFO special file failed
    #[error("Failed to create FIFO at {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Setting the channel permissions failed
    #[error("Failed to set permissions {mode:o} on {path}: {source}")]
    Permissions {
        path: PathBuf,
        mode: u32,
        #[source]
        source: std::io::Error,
    },

    /// The channel disappeared while the dispatcher was running
    #[error("Channel not found: {path}")]
    Missing { path: PathBuf },

    /// Opening or reading the channel failed
    #[error("Failed to read from channel {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Opening or writing the channel failed
    #[error("Failed to write to channel {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A length-prefixed frame ended before its declared length
    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// A message does not fit the selected framing
    #[error("Message cannot be framed: {message}")]
    Unframeable { message: String },

    /// FIFOs are only available on unix hosts
    #[error("Named pipes are not supported on this platform")]
    Unsupported,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file parsing error
    #[error("Failed to parse configuration file {path}: {message}")]
    Parsing { path: PathBuf, message: String },

    /// Configuration validation error
    #[error("Configuration validation error: {message}")]
    Validation { message: String },

    /// Explicitly requested configuration file does not exist
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Configuration file I/O error
    #[error("Failed to read configuration file")]
    Io(#[from] std::io::Error),

    /// Rendering the effective configuration failed
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Command execution errors
///
/// These never stop the dispatcher loop; they end up in the command log.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The shell process could not be started; nothing ran
    #[error("Failed to spawn shell {shell}: {source}")]
    Spawn {
        shell: String,
        #[source]
        source: std::io::Error,
    },

    /// The command was started but collecting its output or status failed
    #[error("Failed to collect command output: {0}")]
    Io(#[from] std::io::Error),
}

/// Command log errors
#[derive(Error, Debug)]
pub enum LogError {
    /// Opening or appending to the command log failed
    #[error("Failed to write command log {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Main error enum wrapping all domain-specific errors
#[derive(Error, Debug)]
pub enum DockerpipeError {
    /// Channel errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Execution errors
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Command log errors
    #[error("Command log error: {0}")]
    Log(#[from] LogError),
}

/// Convenience type alias for Results with DockerpipeError
pub type Result<T> = std::result::Result<T, DockerpipeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_channel_error_display() {
        let error = ChannelError::NotAFifo {
            path: PathBuf::from("/opt/cmdpipe/dockerpipe"),
            kind: "regular file".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "Channel path /opt/cmdpipe/dockerpipe exists but is a regular file, not a FIFO; refusing to replace it"
        );

        let error = ChannelError::Truncated {
            expected: 12,
            actual: 3,
        };
        assert_eq!(
            format!("{}", error),
            "Truncated frame: expected 12 bytes, got 3"
        );

        let error = ChannelError::Permissions {
            path: PathBuf::from("/tmp/p"),
            mode: 0o666,
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(
            format!("{}", error),
            "Failed to set permissions 666 on /tmp/p: denied"
        );
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::Validation {
            message: "shell must not be empty".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "Configuration validation error: shell must not be empty"
        );

        let error = ConfigError::NotFound {
            path: PathBuf::from("/etc/dockerpipe/missing.toml"),
        };
        assert_eq!(
            format!("{}", error),
            "Configuration file not found: /etc/dockerpipe/missing.toml"
        );
    }

    #[test]
    fn test_wrapping_into_dockerpipe_error() {
        let error: DockerpipeError = ChannelError::Unsupported.into();
        assert!(matches!(error, DockerpipeError::Channel(_)));

        let error: DockerpipeError = ConfigError::Validation {
            message: "x".to_string(),
        }
        .into();
        assert!(matches!(error, DockerpipeError::Config(_)));
        assert!(error.to_string().starts_with("Configuration error:"));
    }

    #[test]
    fn test_error_source_chain() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error = DockerpipeError::Channel(ChannelError::Read {
            path: PathBuf::from("/tmp/p"),
            source: io_error,
        });

        let source = error.source().expect("channel error source");
        assert!(source.source().is_some());
    }

    #[test]
    fn test_anyhow_conversion() {
        let error = DockerpipeError::Exec(ExecError::Spawn {
            shell: "nosuchshell".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        });
        let anyhow_error = anyhow::Error::from(error);
        assert!(anyhow_error.to_string().contains("Execution error"));
    }
}
