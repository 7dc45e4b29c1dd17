use async_trait::async_trait;
use model::invocation::InvocationRecord;
use model::lease::Lease;
use model::step::StepRecord;
use model::{Error, Retryable};
use std::fmt::Debug;

/// Field holding the lifecycle status of a resource
pub const STATUS: &str = "status";
/// Field holding the last committed configuration snapshot
pub const CONFIGURATION: &str = "configuration";
/// Field holding the execution role bound to the resource
pub const ROLE_REFERENCE: &str = "roleReference";
/// Field holding the provisioned function identifier
pub const FUNCTION_ARN: &str = "functionArn";

/// Durable key -> field -> value storage for resource records.
///
/// Every read and write for a key is issued from that key's serialized
/// execution context, so implementations only need each call to be atomic.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str, field: &str) -> Result<Option<serde_json::Value>, StateError>;

    async fn set(&self, key: &str, field: &str, value: serde_json::Value) -> Result<(), StateError>;

    /// Write several fields in one atomic operation.
    async fn set_many(
        &self,
        key: &str,
        fields: Vec<(&str, serde_json::Value)>,
    ) -> Result<(), StateError>;

    async fn clear(&self, key: &str, field: &str) -> Result<(), StateError>;
}

/// Append-only log of invocations and the outcome of each side effect.
///
/// An invocation is the original request to an operation.
/// A step is one side effect performed from within that operation.
/// A lease names the one invocation allowed to run against a key.
#[async_trait]
pub trait EffectJournal: Send + Sync {
    /// Record a new pending invocation. Fails with `Conflict` if it already exists.
    async fn insert_invocation(&self, invocation: &InvocationRecord) -> Result<(), StateError>;

    /// Replace a pending invocation with its final state and stamp its steps
    /// with the same expiry. Fails with `Conflict` if it is no longer pending.
    async fn finish_invocation(&self, invocation: &InvocationRecord) -> Result<(), StateError>;

    async fn get_invocation(
        &self,
        key: &str,
        invocation_id: &str,
    ) -> Result<Option<InvocationRecord>, StateError>;

    /// Every invocation not yet completed or aborted, oldest first.
    async fn pending_invocations(&self) -> Result<Vec<InvocationRecord>, StateError>;

    /// Record a step outcome. Fails with `Conflict` if the step already exists.
    async fn append_step(&self, step: &StepRecord) -> Result<(), StateError>;

    async fn get_step(
        &self,
        key: &str,
        invocation_id: &str,
        step_index: u32,
    ) -> Result<Option<StepRecord>, StateError>;

    /// Store `lease` for `key` unless a lease that does not yield to it is held.
    ///
    /// Returns `None` when granted, otherwise the lease currently held.
    async fn acquire_lease(&self, key: &str, lease: &Lease) -> Result<Option<Lease>, StateError>;

    /// Drop the lease of `key` if it is held by `invocation_id`.
    async fn release_lease(&self, key: &str, invocation_id: &str) -> Result<(), StateError>;
}

/// Errors arising from reading or writing state.
#[derive(Debug, thiserror::Error)]
#[error("{operation:?} failed for {state_key}: {reason}")]
pub struct StateError {
    pub state_key: String,

    pub operation: StateOperation,
    pub reason: StateErrorReason,
}

#[derive(Debug, thiserror::Error)]
pub enum StateErrorReason {
    // An expected state entry was missing.
    #[error("missing entry")]
    MissingEntry,
    // The state was not of the expected type
    #[error("bad state: {0}")]
    BadState(String),
    // An append-only entry was written twice, or a conditional write lost
    #[error("entry already exists")]
    Conflict,
    // An error from the underlying state store
    #[error("backend failure: {0}")]
    BackendFailure(Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateOperation {
    GetField,
    SetField,
    ClearField,
    GetInvocation,
    InsertInvocation,
    FinishInvocation,
    ListInvocations,
    GetStep,
    AppendStep,
    AcquireLease,
    ReleaseLease,
}

impl StateError {
    pub fn new(
        state_key: impl Into<String>,
        operation: StateOperation,
        reason: StateErrorReason,
    ) -> Self {
        StateError {
            state_key: state_key.into(),
            operation,
            reason,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.reason, StateErrorReason::Conflict)
    }
}

impl Retryable for StateError {
    fn is_transient(&self) -> bool {
        matches!(self.reason, StateErrorReason::BackendFailure(_))
    }
}

/// Compose the storage key of a step within an invocation.
pub fn step_key(invocation_id: &str, step_index: u32) -> String {
    format!("{invocation_id}#{step_index:05}")
}
