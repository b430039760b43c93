//! Error types for scheduling and dispatch.

use crate::scheduler::EntryId;
use thiserror::Error;

/// Result type for jobrunner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors surfaced to callers of the dispatcher.
///
/// Job failures are not in here: they are intercepted by the guard and only
/// ever reach the log sinks.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Invalid calendar expression
    #[error("Invalid cron expression: {0}")]
    InvalidExpression(String),

    /// Invalid interval in an `@every` expression
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    /// No entry registered under this id
    #[error("Entry not found: {0}")]
    EntryNotFound(EntryId),

    /// Scheduler not running
    #[error("Scheduler not running")]
    SchedulerNotRunning,

    /// Scheduler already running
    #[error("Scheduler already running")]
    SchedulerAlreadyRunning,

    /// Starting the scheduler needs a Tokio runtime
    #[error("No Tokio runtime available")]
    NoRuntime,

    /// The concurrency limiter was closed while waiting for a slot
    #[error("Concurrency limiter closed")]
    LimiterClosed,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
