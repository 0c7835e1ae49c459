use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(&'static str),
    #[error("session queue is empty")]
    EmptyQueue,
    #[error("scheduler unavailable: {0}")]
    SchedulerUnavailable(&'static str),
    #[error("inconsistent review commit: {0}")]
    InconsistentCommit(&'static str),
    #[error("invalid input: {0}")]
    Invalid(&'static str),
    #[error("conflict: {0}")]
    Conflict(&'static str),
    #[error("storage error: {0}")]
    Storage(&'static str),
}
