//! Show-config command implementation

use anyhow::Result;
use dockerpipe_core::config::DispatcherConfig;

/// Print the effective configuration as TOML
pub fn execute_show_config(config: &DispatcherConfig) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}
