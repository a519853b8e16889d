use thiserror::Error;

/// Stream-level failures surfaced through the `on_error` callback.
///
/// These are informational unless the state machine escalates them:
/// transport failures are recovered locally via status re-checks, and
/// only confirmed termination or explicit error signals become terminal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("transport failure for run {run_id}: {message}")]
    Transport { run_id: String, message: String },

    #[error("connection attempt for run {run_id} timed out")]
    ConnectTimeout { run_id: String },

    #[error("run {run_id} is not running")]
    RunNotRunning { run_id: String },

    #[error("authorization rejected for run {run_id}: {message}")]
    Unauthorized { run_id: String, message: String },

    #[error("agent reported an error: {message}")]
    Agent { message: String },
}
