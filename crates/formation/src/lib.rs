//! Durable provisioning of serverless functions.
//!
//! Operations are keyed by function name and run on a
//! [`workflow::KeyedRuntime`]: one at a time per function, every external
//! action journaled so retries and restarts never repeat completed work.

pub mod config;
pub mod handler;
pub mod provisioner;
pub mod status;
pub mod validate;

pub use crate::config::{EventSource, FormationConfig, StateBackend};
pub use crate::handler::{FormationHandler, OperationOutcome};
pub use crate::provisioner::{Provisioner, ProvisioningError, DEFAULT_ROLE_NAME};
pub use crate::validate::{FieldIssue, ValidationError};
