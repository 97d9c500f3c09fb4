//! Unit command implementation
//!
//! Implements `dockerpipe unit`, which renders the systemd service that keeps
//! the dispatcher running.

use anyhow::{Context, Result};
use dockerpipe_core::config::DispatcherConfig;
use dockerpipe_core::supervisor::ServiceUnit;
use std::path::PathBuf;
use tracing::{info, instrument};

/// Unit command arguments
#[derive(Debug, Clone)]
pub struct UnitArgs {
    /// Destination file; stdout when absent
    pub output: Option<PathBuf>,
    /// Configuration file the service should be started with
    pub config_file: Option<PathBuf>,
}

/// Execute the unit command
#[instrument(skip_all)]
pub fn execute_unit(args: UnitArgs, config: &DispatcherConfig) -> Result<()> {
    let service = &config.service;
    let config_file = args
        .config_file
        .map(|path| std::path::absolute(&path).unwrap_or(path));

    let unit = ServiceUnit::new(
        &service.exec_path,
        config_file.as_deref(),
        &service.user,
        &config.app_dir,
        service.restart_policy(),
    );
    let rendered = unit.render();

    match args.output {
        Some(path) => {
            std::fs::write(&path, rendered)
                .with_context(|| format!("Failed to write unit file {}", path.display()))?;
            info!("Wrote service unit to {}", path.display());
        }
        None => print!("{}", rendered),
    }
    Ok(())
}
