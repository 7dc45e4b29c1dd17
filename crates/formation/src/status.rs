use model::{OperationKind, ProvisioningStatus};
use serde_json::Value;

/// Why an operation may not run against a key in its current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Another operation is still provisioning the key
    Busy,
    /// Create against a function which already exists
    AlreadyStable,
    /// Create against a failed function, it has to be deleted first
    CleanupRequired,
    NotFound,
    NotReady,
}

impl Rejection {
    pub fn reason(&self, key: &str, status: ProvisioningStatus) -> String {
        match self {
            Rejection::Busy => format!("Function {key} is busy in status: {status}"),
            Rejection::AlreadyStable => {
                "This function is already in a stable state. Please use update instead.".to_string()
            }
            Rejection::CleanupRequired => {
                format!("Function {key} failed to provision. Delete it before creating it again.")
            }
            Rejection::NotFound if status == ProvisioningStatus::Failed => {
                format!("Not found: {key}. Provisioning failed, delete it to clean up.")
            }
            Rejection::NotFound => format!("Not found: {key}"),
            Rejection::NotReady => format!("Cannot describe function in status: {status}"),
        }
    }
}

/// Decide whether `operation` may run for a key in `status`.
pub fn check_transition(
    operation: OperationKind,
    status: ProvisioningStatus,
) -> Result<(), Rejection> {
    use OperationKind::*;
    use ProvisioningStatus::*;

    match (operation, status) {
        (Create, Unprovisioned | Deleted) => Ok(()),
        (Create, Provisioning) => Err(Rejection::Busy),
        (Create, Available) => Err(Rejection::AlreadyStable),
        (Create, Failed) => Err(Rejection::CleanupRequired),

        (Update, Available) => Ok(()),
        (Update, Provisioning) => Err(Rejection::Busy),
        (Update, Unprovisioned | Failed | Deleted) => Err(Rejection::NotFound),

        (Delete, Available | Failed) => Ok(()),
        (Delete, Provisioning) => Err(Rejection::Busy),
        (Delete, Unprovisioned | Deleted) => Err(Rejection::NotFound),

        (Describe, Available) => Ok(()),
        (Describe, Provisioning) => Err(Rejection::NotReady),
        (Describe, Unprovisioned | Failed | Deleted) => Err(Rejection::NotFound),
    }
}

/// Interpret the stored status field. Absent means `Unprovisioned`, anything
/// outside the enum is returned as the raw value for the caller to report.
pub fn parse_status(stored: Option<&Value>) -> Result<ProvisioningStatus, String> {
    match stored {
        None | Some(Value::Null) => Ok(ProvisioningStatus::Unprovisioned),
        Some(Value::String(raw)) => ProvisioningStatus::parse(raw).ok_or_else(|| raw.clone()),
        Some(other) => Err(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_only_proceeds_without_a_live_function() {
        let allowed: Vec<ProvisioningStatus> = ProvisioningStatus::ALL
            .into_iter()
            .filter(|status| check_transition(OperationKind::Create, *status).is_ok())
            .collect();

        assert_eq!(
            vec![ProvisioningStatus::Unprovisioned, ProvisioningStatus::Deleted],
            allowed
        );
    }

    #[test]
    fn failed_functions_can_only_be_deleted() {
        for operation in [
            OperationKind::Create,
            OperationKind::Update,
            OperationKind::Describe,
        ] {
            assert!(check_transition(operation, ProvisioningStatus::Failed).is_err());
        }

        assert_eq!(
            Ok(()),
            check_transition(OperationKind::Delete, ProvisioningStatus::Failed)
        );
    }

    #[test]
    fn provisioning_rejects_everything() {
        for operation in [
            OperationKind::Create,
            OperationKind::Update,
            OperationKind::Delete,
        ] {
            assert_eq!(
                Err(Rejection::Busy),
                check_transition(operation, ProvisioningStatus::Provisioning)
            );
        }
        assert_eq!(
            Err(Rejection::NotReady),
            check_transition(OperationKind::Describe, ProvisioningStatus::Provisioning)
        );
    }

    #[test]
    fn absent_status_is_unprovisioned() {
        assert_eq!(Ok(ProvisioningStatus::Unprovisioned), parse_status(None));
        assert_eq!(
            Ok(ProvisioningStatus::Unprovisioned),
            parse_status(Some(&Value::Null))
        );
        assert_eq!(
            Ok(ProvisioningStatus::Available),
            parse_status(Some(&json!("AVAILABLE")))
        );
    }

    #[test]
    fn unknown_status_is_not_coerced() {
        assert_eq!(Err("NEW".to_string()), parse_status(Some(&json!("NEW"))));
        assert_eq!(Err("3".to_string()), parse_status(Some(&json!(3))));
    }

    #[test]
    fn already_stable_reason_points_to_update() {
        assert_eq!(
            "This function is already in a stable state. Please use update instead.",
            Rejection::AlreadyStable.reason("fn", ProvisioningStatus::Available)
        );
    }
}
