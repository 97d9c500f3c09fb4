//! Send command implementation
//!
//! Implements `dockerpipe send`, the writer side of the channel contract.
//! It blocks until a dispatcher has the channel open for reading.

use anyhow::{bail, Result};
use dockerpipe_core::config::DispatcherConfig;
use dockerpipe_core::source::send_message;
use tracing::{debug, instrument};

/// Send command arguments
#[derive(Debug, Clone)]
pub struct SendArgs {
    /// Verbatim command line
    pub raw: Option<String>,
    /// Words to quote and join
    pub words: Vec<String>,
}

impl SendArgs {
    /// The command line that will be written to the channel
    pub fn command_line(&self) -> String {
        match &self.raw {
            Some(raw) => raw.clone(),
            None => shell_words::join(&self.words),
        }
    }
}

/// Execute the send command
#[instrument(skip_all, fields(channel = %config.channel_path.display()))]
pub fn execute_send(args: SendArgs, config: &DispatcherConfig) -> Result<()> {
    let command = args.command_line();
    if command.trim().is_empty() {
        bail!("Refusing to send an empty command");
    }

    debug!("Sending command: {}", command);
    send_message(&config.channel_path, &command, config.framing)?;
    Ok(())
}
