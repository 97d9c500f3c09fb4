use anyhow::Result;
use clap::Parser;
use dockerpipe_core::errors::{ChannelError, DockerpipeError};

mod cli;
mod commands;

/// Exit code for configuration errors
const EXIT_CONFIG: i32 = 2;
/// Exit code for channel setup errors
const EXIT_CHANNEL_SETUP: i32 = 3;
/// Exit code for every other failure
const EXIT_FAILURE: i32 = 1;

fn main() -> Result<()> {
    let parsed = cli::Cli::parse();

    match parsed.dispatch() {
        Ok(()) => Ok(()),
        Err(err) => {
            // The core error's message already carries its cause
            if let Some(error) = err.downcast_ref::<DockerpipeError>() {
                eprintln!("Error: {}", error);
                std::process::exit(exit_code(error));
            }

            Err(err)
        }
    }
}

fn exit_code(error: &DockerpipeError) -> i32 {
    match error {
        DockerpipeError::Config(_) => EXIT_CONFIG,
        DockerpipeError::Channel(
            ChannelError::NotAFifo { .. }
            | ChannelError::Create { .. }
            | ChannelError::Permissions { .. }
            | ChannelError::Unsupported,
        ) => EXIT_CHANNEL_SETUP,
        _ => EXIT_FAILURE,
    }
}
