//! Service manager integration
//!
//! Keeping the dispatcher alive is not the dispatcher's job. It runs in the
//! foreground, never daemonizes and never retries internally; the restart
//! policy here is configuration handed to the host service manager. The
//! only thing this module does with it is render a systemd unit.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Restart delay used on deployed nodes
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(10);

/// Service account the dispatcher runs under
pub const DEFAULT_SERVICE_USER: &str = "pi";

/// Default install location of the binary
pub const DEFAULT_EXEC_PATH: &str = "/usr/local/bin/dockerpipe";

/// Restart strategy kinds as written in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartKind {
    /// Restart unconditionally, forever
    #[default]
    Always,
    /// Restart after failures, up to a maximum count
    Bounded,
}

/// Restart policy delegated to the service manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Restart after every exit with a fixed delay
    Always { delay: Duration },
    /// Restart after failed exits, giving up after `max_restarts`
    Bounded { max_restarts: u32, delay: Duration },
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::Always {
            delay: DEFAULT_RESTART_DELAY,
        }
    }
}

impl RestartPolicy {
    pub fn delay(&self) -> Duration {
        match self {
            Self::Always { delay } | Self::Bounded { delay, .. } => *delay,
        }
    }

    /// Value for systemd's `Restart=`
    pub fn systemd_restart(&self) -> &'static str {
        match self {
            Self::Always { .. } => "always",
            Self::Bounded { .. } => "on-failure",
        }
    }

    /// `(StartLimitIntervalSec, StartLimitBurst)` for the `[Unit]` section.
    ///
    /// An interval of 0 disables rate limiting so `always` really is
    /// unconditional. For bounded policies the window must be longer than
    /// `burst * RestartSec`, otherwise the limit never trips.
    pub fn start_limit(&self) -> (u64, Option<u32>) {
        match self {
            Self::Always { .. } => (0, None),
            Self::Bounded {
                max_restarts,
                delay,
            } => {
                let window = (u64::from(*max_restarts) + 1) * delay.as_secs().max(1) * 2;
                (window, Some(*max_restarts))
            }
        }
    }
}

/// A systemd service unit for the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnit {
    pub description: String,
    pub exec_path: PathBuf,
    pub exec_args: Vec<String>,
    pub user: String,
    pub working_directory: PathBuf,
    pub policy: RestartPolicy,
}

impl ServiceUnit {
    /// Unit for `exec_path run`, optionally pinned to a configuration file
    pub fn new(
        exec_path: &Path,
        config_file: Option<&Path>,
        user: &str,
        working_directory: &Path,
        policy: RestartPolicy,
    ) -> Self {
        let mut exec_args = Vec::new();
        if let Some(config_file) = config_file {
            exec_args.push("--config".to_string());
            exec_args.push(config_file.display().to_string());
        }
        exec_args.push("run".to_string());

        Self {
            description: "dockerpipe host command dispatcher".to_string(),
            exec_path: exec_path.to_path_buf(),
            exec_args,
            user: user.to_string(),
            working_directory: working_directory.to_path_buf(),
            policy,
        }
    }

    /// Render the unit file
    pub fn render(&self) -> String {
        let mut out = String::new();
        let (interval, burst) = self.policy.start_limit();

        out.push_str("[Unit]\n");
        let _ = writeln!(out, "Description={}", self.description);
        out.push_str("After=local-fs.target docker.service\n");
        let _ = writeln!(out, "StartLimitIntervalSec={}", interval);
        if let Some(burst) = burst {
            let _ = writeln!(out, "StartLimitBurst={}", burst);
        }

        out.push_str("\n[Service]\n");
        out.push_str("Type=simple\n");
        let _ = writeln!(out, "User={}", self.user);
        let _ = writeln!(
            out,
            "WorkingDirectory={}",
            quote_systemd(&self.working_directory.display().to_string())
        );
        let mut exec_start = quote_systemd(&self.exec_path.display().to_string());
        for arg in &self.exec_args {
            exec_start.push(' ');
            exec_start.push_str(&quote_systemd(arg));
        }
        let _ = writeln!(out, "ExecStart={}", exec_start);
        let _ = writeln!(out, "Restart={}", self.policy.systemd_restart());
        let _ = writeln!(out, "RestartSec={}", self.policy.delay().as_secs());

        out.push_str("\n[Install]\n");
        out.push_str("WantedBy=multi-user.target\n");
        out
    }
}

/// Double-quote a value for systemd if it contains whitespace or quotes
fn quote_systemd(value: &str) -> String {
    if value.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\') {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{}\"", escaped)
    } else {
        value.to_string()
    }
}
