use model::Retryable;
use state::StateError;

/// Failures of the durable execution machinery itself.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// A side effect failed permanently or ran out of retries. Replays of the
    /// same step report the identical failure.
    #[error("step {name} failed: {reason}")]
    StepFailed {
        name: String,
        reason: String,
        retries_exhausted: bool,
    },
    /// The journal holds a different step at this position than the operation
    /// asked for, so the operation changed under a pending invocation.
    #[error("step {index} was recorded as {recorded} but replayed as {expected}")]
    UnexpectedStep {
        index: u32,
        expected: String,
        recorded: String,
    },
    #[error("invocation {0} was aborted: {1}")]
    Aborted(String, String),
    #[error("worker for {0} stopped before finishing the invocation")]
    WorkerLost(String),
    /// Another invocation holds the key, or this one is running elsewhere.
    #[error("{key} is held by invocation {holder}")]
    Busy { key: String, holder: String },
    #[error(transparent)]
    State(#[from] StateError),
    #[error("failed to (de)serialize step value: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Retryable for ExecutionError {
    fn is_transient(&self) -> bool {
        match self {
            ExecutionError::State(err) => err.is_transient(),
            ExecutionError::WorkerLost(_) | ExecutionError::Busy { .. } => true,
            _ => false,
        }
    }
}
