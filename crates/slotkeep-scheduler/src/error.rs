use thiserror::Error;

/// Conditions the scheduler itself produces. Job error types convert from
/// this so that `ctx.checkpoint()?` works inside jobs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("task cancelled")]
    Cancelled,

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("scheduler is shutting down")]
    ShuttingDown,
}
