//! Durable execution for keyed operations.
//!
//! Operations run inside an [`OperationContext`] which journals every side
//! effect, on a [`KeyedRuntime`] which serializes operations per key and
//! records each invocation so it can be deduplicated or resumed.

mod batch_handler;
pub mod context;
mod error;
pub mod retry;
pub mod runtime;

pub use crate::batch_handler::batch_handler;
pub use crate::context::OperationContext;
pub use crate::error::ExecutionError;
pub use crate::retry::RetryPolicy;
pub use crate::runtime::{
    Invocation, InvocationHandler, KeyedRuntime, Recovered, RuntimeError, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_JOURNAL_RETENTION_DAYS, DEFAULT_LEASE_SECONDS,
};
