//! Run command implementation
//!
//! Implements `dockerpipe run`, the foreground dispatcher loop. The process
//! only returns when the channel becomes unreadable; restarting it is the
//! service manager's job.

use anyhow::Result;
use dockerpipe_core::channel::prepare_channel;
use dockerpipe_core::command_log::CommandLog;
use dockerpipe_core::config::DispatcherConfig;
use dockerpipe_core::dispatcher::Dispatcher;
use dockerpipe_core::errors::DockerpipeError;
use dockerpipe_core::executor::ShellExecutor;
use dockerpipe_core::source::FifoSource;
use tracing::{info, instrument};

/// Run command arguments
#[derive(Debug, Clone)]
pub struct RunArgs {
    /// Create the channel if it is missing
    pub create: bool,
}

/// Execute the run command
#[instrument(skip_all, fields(channel = %config.channel_path.display()))]
pub fn execute_run(args: RunArgs, config: &DispatcherConfig) -> Result<()> {
    if args.create {
        let outcome = prepare_channel(&config.channel_path, config.channel_mode)?;
        info!(
            "Channel {} ({})",
            config.channel_path.display(),
            outcome.as_str()
        );
    }

    let log = CommandLog::open(&config.log_file).map_err(DockerpipeError::from)?;
    info!("Writing command log to {}", log.path().display());

    let source = FifoSource::new(&config.channel_path, config.framing);
    let executor =
        ShellExecutor::new(config.shell.clone()).with_working_directory(config.app_dir.clone());

    let mut dispatcher = Dispatcher::new(source, executor, log);
    dispatcher.run()?;
    Ok(())
}
