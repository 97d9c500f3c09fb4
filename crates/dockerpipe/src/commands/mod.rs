//! Command implementations

pub mod ensure_channel;
pub mod run;
pub mod send;
pub mod show_config;
pub mod unit;
