//! Ensure-channel command implementation
//!
//! Implements `dockerpipe ensure-channel`, the install-time setup step.

use anyhow::Result;
use dockerpipe_core::channel::{ensure_channel, inspect_channel, ChannelStatus};
use dockerpipe_core::config::DispatcherConfig;
use dockerpipe_core::errors::ChannelError;
use tracing::instrument;

/// Ensure-channel command arguments
#[derive(Debug, Clone)]
pub struct EnsureChannelArgs {
    /// Report only, change nothing
    pub check: bool,
}

/// Execute the ensure-channel command
#[instrument(skip_all, fields(channel = %config.channel_path.display(), check = args.check))]
pub fn execute_ensure_channel(args: EnsureChannelArgs, config: &DispatcherConfig) -> Result<()> {
    let path = &config.channel_path;

    if !args.check {
        let outcome = ensure_channel(path, config.channel_mode)?;
        println!(
            "{}: fifo {:04o} ({})",
            path.display(),
            config.channel_mode,
            outcome.as_str()
        );
        return Ok(());
    }

    match inspect_channel(path)? {
        ChannelStatus::Fifo { mode } => {
            println!("{}: fifo {:04o}", path.display(), mode);
            Ok(())
        }
        ChannelStatus::Missing => {
            println!("{}: missing", path.display());
            Err(ChannelError::Missing { path: path.clone() }.into())
        }
        ChannelStatus::Other { kind } => {
            println!("{}: {}", path.display(), kind);
            Err(ChannelError::NotAFifo {
                path: path.clone(),
                kind,
            }
            .into())
        }
    }
}
