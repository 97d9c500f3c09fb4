//! Core library for the dockerpipe host command dispatcher
//!
//! This crate contains the FIFO channel setup, message framing, the
//! receive/execute/log dispatcher loop, host command execution, the command
//! audit log, configuration resolution, logging and error handling.

pub mod channel;
pub mod command_log;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod executor;
pub mod logging;
pub mod source;
pub mod supervisor;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
