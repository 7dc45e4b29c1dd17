use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};

pub mod env;
pub mod function;
pub mod invocation;
pub mod lease;
pub mod step;

pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Anything that belongs to one invocation.
///
/// The id addresses journal entries and leases and tags log lines.
pub trait InvocationId {
    fn invocation_id(&self) -> &str;
}

/// Classifies a failure as worth retrying or not.
///
/// Side effects are only retried when their error reports itself transient,
/// anything else is recorded as a terminal failure straight away.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for Infallible {
    fn is_transient(&self) -> bool {
        match *self {}
    }
}

/// Lifecycle status of a single resource key.
///
/// A key with no stored status is `Unprovisioned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisioningStatus {
    Unprovisioned,
    Provisioning,
    Available,
    Failed,
    Deleted,
}

impl ProvisioningStatus {
    pub const ALL: [ProvisioningStatus; 5] = [
        ProvisioningStatus::Unprovisioned,
        ProvisioningStatus::Provisioning,
        ProvisioningStatus::Available,
        ProvisioningStatus::Failed,
        ProvisioningStatus::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningStatus::Unprovisioned => "UNPROVISIONED",
            ProvisioningStatus::Provisioning => "PROVISIONING",
            ProvisioningStatus::Available => "AVAILABLE",
            ProvisioningStatus::Failed => "FAILED",
            ProvisioningStatus::Deleted => "DELETED",
        }
    }

    /// Parse the stored representation, `None` for anything outside the enum.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == raw)
    }
}

impl Display for ProvisioningStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operations a caller can invoke against a resource key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    Describe,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::Describe => "describe",
        }
    }

    /// Whether the operation may perform side effects and is therefore journaled.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, OperationKind::Describe)
    }
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_stored_form() {
        for status in ProvisioningStatus::ALL {
            let stored: serde_json::Value = serde_json::to_value(status).unwrap();

            assert_eq!(serde_json::Value::String(status.as_str().to_string()), stored);
            assert_eq!(Some(status), ProvisioningStatus::parse(status.as_str()));
        }
    }

    #[test]
    fn status_parse_rejects_unknown_values() {
        assert_eq!(None, ProvisioningStatus::parse("NEW"));
        assert_eq!(None, ProvisioningStatus::parse("available"));
    }
}
