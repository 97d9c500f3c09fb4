//! Command dispatcher loop
//!
//! The dispatcher alternates between two states: `Idle`, blocked on the
//! message source, and `Executing`, running one command. It is strictly
//! sequential; a command that hangs stalls every later message. There is no
//! terminal state: [`Dispatcher::run`] returns only when the source fails,
//! and recovery from that is left to the service manager.
//!
//! Per message the contract is:
//!
//! 1. `receive` returns, then the timestamp is taken
//! 2. "Command received" is logged
//! 3. the command is executed and its combined output appended
//! 4. "Command finished" is logged
//!
//! An empty message skips steps 2 and 3 and spawns no process.

use crate::command_log::{CommandLog, Marker};
use crate::errors::{ExecError, LogError, Result};
use crate::executor::{CommandExecutor, ExecutionOutcome};
use crate::source::{Message, MessageSource};
use chrono::{DateTime, Local};
use tracing::{debug, field, info, info_span, warn};

/// Detail recorded for an empty message
pub const EMPTY_MESSAGE_DETAIL: &str = "(empty message)";

/// Dispatcher state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Blocked waiting for the next message
    Idle,
    /// Running a command
    Executing,
}

/// What happened to one message
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// The command ran (successfully or not)
    Executed(ExecutionOutcome),
    /// The message was empty; nothing was run
    Skipped,
    /// The shell could not be started; nothing ran
    SpawnFailed(String),
    /// The command was started but its output or exit status was lost
    CollectFailed(String),
}

/// Report for one loop iteration
#[derive(Debug, Clone)]
pub struct DispatchReport {
    /// Command text as received
    pub command: String,
    /// Local time taken right after the message was received
    pub received_at: DateTime<Local>,
    pub outcome: StepOutcome,
}

impl DispatchReport {
    /// Text used for the "finished" record
    fn finished_detail(&self) -> String {
        match &self.outcome {
            StepOutcome::Executed(outcome) => {
                format!("{} ({})", self.command, outcome.termination)
            }
            StepOutcome::Skipped => EMPTY_MESSAGE_DETAIL.to_string(),
            StepOutcome::SpawnFailed(reason) => {
                format!("{} (spawn failed: {})", self.command, reason)
            }
            StepOutcome::CollectFailed(reason) => {
                format!("{} (output lost: {})", self.command, reason)
            }
        }
    }
}

/// Receive/execute/log loop over a message source and an executor
pub struct Dispatcher<S, E> {
    source: S,
    executor: E,
    log: CommandLog,
    state: DispatcherState,
    processed: u64,
}

impl<S: MessageSource, E: CommandExecutor> Dispatcher<S, E> {
    pub fn new(source: S, executor: E, log: CommandLog) -> Self {
        Self {
            source,
            executor,
            log,
            state: DispatcherState::Idle,
            processed: 0,
        }
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    /// Number of messages handled so far
    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn log(&self) -> &CommandLog {
        &self.log
    }

    /// Block until the next message arrives.
    pub fn receive(&mut self) -> Result<Message> {
        self.state = DispatcherState::Idle;
        self.source.next_message()
    }

    /// Execute one command through the executor.
    ///
    /// Failures never escape: a non-zero exit is part of the outcome, a
    /// spawn failure becomes [`StepOutcome::SpawnFailed`] and a failure after
    /// the spawn becomes [`StepOutcome::CollectFailed`]. The dispatcher stays
    /// `Executing` until the "finished" record is written by [`Dispatcher::step`]
    /// or the next [`Dispatcher::receive`].
    pub fn dispatch(&mut self, command: &str) -> StepOutcome {
        self.state = DispatcherState::Executing;
        match self.executor.execute(command) {
            Ok(outcome) => StepOutcome::Executed(outcome),
            Err(e @ ExecError::Spawn { .. }) => {
                warn!("Failed to start command: {}", e);
                StepOutcome::SpawnFailed(e.to_string())
            }
            Err(e @ ExecError::Io(_)) => {
                warn!("Command started but its result was lost: {}", e);
                StepOutcome::CollectFailed(e.to_string())
            }
        }
    }

    /// Run exactly one receive/dispatch/log iteration.
    ///
    /// Only source errors are returned; command and log failures are
    /// recorded and the iteration still completes.
    pub fn step(&mut self) -> Result<DispatchReport> {
        let message = self.receive()?;
        let received_at = Local::now();
        let empty = message.is_empty();
        let command = message.into_command();

        let span = info_span!(
            "dispatcher.step",
            command_len = command.len(),
            status = field::Empty
        );
        let _guard = span.enter();

        let report = if empty {
            debug!("Received empty message, skipping execution");
            DispatchReport {
                command,
                received_at,
                outcome: StepOutcome::Skipped,
            }
        } else {
            info!("Received command: {}", command);
            self.state = DispatcherState::Executing;
            let result = self.log.log_event_at(&received_at, Marker::Received, &command);
            record(result);

            let outcome = self.dispatch(&command);
            if let StepOutcome::Executed(ref executed) = outcome {
                record(self.log.log_output(&executed.output));
            }
            DispatchReport {
                command,
                received_at,
                outcome,
            }
        };

        let detail = report.finished_detail();
        record(self.log.log_event(Marker::Finished, &detail));

        if let StepOutcome::Executed(ref executed) = report.outcome {
            span.record("status", field::display(executed.termination));
            info!(
                "Command finished with {} in {:?}",
                executed.termination, executed.duration
            );
        }

        self.state = DispatcherState::Idle;
        self.processed += 1;
        Ok(report)
    }

    /// Run `iterations` loop iterations, stopping at the first source error.
    pub fn run_for(&mut self, iterations: usize) -> Result<Vec<DispatchReport>> {
        let mut reports = Vec::with_capacity(iterations);
        for _ in 0..iterations {
            reports.push(self.step()?);
        }
        Ok(reports)
    }

    /// Run forever. Returns only when the message source fails.
    pub fn run(&mut self) -> Result<()> {
        info!("Dispatcher listening on {}", self.source.describe());
        loop {
            self.step()?;
        }
    }
}

/// The command log is best-effort; write failures are only traced.
fn record(result: std::result::Result<(), LogError>) {
    if let Err(e) = result {
        warn!("{}", e);
    }
}
