//! Host command execution
//!
//! Every command received from the channel reaches the host through a
//! [`CommandExecutor`]. This is the privilege boundary of the whole system:
//! any process able to write to the channel can run arbitrary commands with
//! the dispatcher's privileges. [`ShellExecutor`] is the only production
//! implementation and passes the command to `sh -c` unmodified, with full
//! shell semantics (pipes, redirects, expansions).

use crate::errors::ExecError;
use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Default shell used to interpret commands
pub const DEFAULT_SHELL: &str = "sh";

/// How a command process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Normal exit with a status code
    Exited(i32),
    /// Killed by a signal
    Signaled(i32),
    /// Neither a code nor a signal was reported
    Unknown,
}

impl Termination {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signaled(signal);
            }
        }
        Self::Unknown
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit {}", code),
            Self::Signaled(signal) => write!(f, "signal {}", signal),
            Self::Unknown => write!(f, "unknown status"),
        }
    }
}

/// Result of running one command
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// How the process ended
    pub termination: Termination,
    /// Combined stdout and stderr, in emission order
    pub output: String,
    /// Wall-clock duration
    pub duration: Duration,
}

impl ExecutionOutcome {
    pub fn success(&self) -> bool {
        self.termination.success()
    }
}

/// Capability to run a command line on the host.
///
/// Implementations must not interpret a non-zero exit as an error; only a
/// failure to run the command at all is an `Err`.
pub trait CommandExecutor {
    fn execute(&self, command: &str) -> Result<ExecutionOutcome, ExecError>;
}

impl<E: CommandExecutor + ?Sized> CommandExecutor for Box<E> {
    fn execute(&self, command: &str) -> Result<ExecutionOutcome, ExecError> {
        (**self).execute(command)
    }
}

/// Executes commands via `<shell> -c <command>`
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
    working_directory: Option<PathBuf>,
    environment: HashMap<String, String>,
}

impl ShellExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            working_directory: None,
            environment: HashMap::new(),
        }
    }

    /// Set working directory for executed commands
    pub fn with_working_directory(mut self, dir: PathBuf) -> Self {
        self.working_directory = Some(dir);
        self
    }

    /// Add an environment variable for executed commands
    pub fn with_env(mut self, key: String, value: String) -> Self {
        self.environment.insert(key, value);
        self
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_SHELL)
    }
}

impl CommandExecutor for ShellExecutor {
    #[instrument(level = "debug", skip_all, fields(shell = %self.shell))]
    fn execute(&self, command: &str) -> Result<ExecutionOutcome, ExecError> {
        let start_time = Instant::now();

        let spawn_error = |source| ExecError::Spawn {
            shell: self.shell.clone(),
            source,
        };

        // stdout and stderr share one pipe so the output keeps its interleaving
        let (mut reader, writer) = std::io::pipe().map_err(spawn_error)?;
        let writer_err = writer.try_clone().map_err(spawn_error)?;

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(writer_err);

        if let Some(ref dir) = self.working_directory {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.environment {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(spawn_error)?;
        // Release our copies of the write end, otherwise the read never sees EOF
        drop(cmd);

        // Blocks until every holder of the write end is gone, including
        // background processes started by the command.
        let mut raw = Vec::new();
        let collected = reader.read_to_end(&mut raw);
        drop(reader);
        // Reap the child even when collecting output failed
        let status = child.wait();
        collected?;
        let status = status?;

        let termination = Termination::from_status(status);
        let duration = start_time.elapsed();
        debug!(
            "Command completed with {} in {:?} ({} output bytes)",
            termination,
            duration,
            raw.len()
        );

        Ok(ExecutionOutcome {
            termination,
            output: String::from_utf8_lossy(&raw).into_owned(),
            duration,
        })
    }
}
