//! Command audit log
//!
//! Append-only, best-effort record of everything the dispatcher executed.
//! Each event is one line of the form
//!
//! ```text
//! [2024-05-01 13:37:00] - Command received: sudo reboot
//! ```
//!
//! followed, for executed commands, by the command's combined output. There
//! is no rotation and no locking; a single dispatcher owns the file.

use crate::errors::LogError;
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Timestamp layout used in log records (local time)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Default log location relative to the application directory
pub const DEFAULT_LOG_RELATIVE_PATH: &str = "logs/system/commands.log";

/// Event markers written to the command log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// A command arrived and is about to run
    Received,
    /// The iteration for a message is complete
    Finished,
}

impl Marker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Marker::Received => "Command received",
            Marker::Finished => "Command finished",
        }
    }
}

/// Format one log record without a trailing newline
pub fn format_record(timestamp: &DateTime<Local>, marker: Marker, detail: &str) -> String {
    format!(
        "[{}] - {}: {}",
        timestamp.format(TIMESTAMP_FORMAT),
        marker.as_str(),
        detail
    )
}

/// Append-only writer for the command log
#[derive(Debug)]
pub struct CommandLog {
    path: PathBuf,
    file: File,
}

impl CommandLog {
    /// Open (or create) the log at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, LogError> {
        let write_error = |source| LogError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(write_error)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record an event stamped with the current local time
    pub fn log_event(&mut self, marker: Marker, detail: &str) -> Result<(), LogError> {
        self.log_event_at(&Local::now(), marker, detail)
    }

    /// Record an event with an explicit timestamp
    pub fn log_event_at(
        &mut self,
        timestamp: &DateTime<Local>,
        marker: Marker,
        detail: &str,
    ) -> Result<(), LogError> {
        let mut line = format_record(timestamp, marker, detail);
        line.push('\n');
        self.append(line.as_bytes())?;
        trace!("{}", line.trim_end());
        Ok(())
    }

    /// Append captured command output verbatim, newline-terminated
    pub fn log_output(&mut self, output: &str) -> Result<(), LogError> {
        if output.is_empty() {
            return Ok(());
        }
        if output.ends_with('\n') {
            self.append(output.as_bytes())
        } else {
            let mut text = String::with_capacity(output.len() + 1);
            text.push_str(output);
            text.push('\n');
            self.append(text.as_bytes())
        }
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), LogError> {
        self.file
            .write_all(bytes)
            .and_then(|_| self.file.flush())
            .map_err(|source| LogError::Write {
                path: self.path.clone(),
                source,
            })
    }
}
