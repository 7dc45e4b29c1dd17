use crate::ProvisioningStatus;
use serde::{Deserialize, Serialize};

/// Last applied configuration of a function, committed alongside `AVAILABLE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionConfiguration {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_megabytes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_retention_days: Option<u32>,
}

impl FunctionConfiguration {
    /// Overlay the submitted fields of an update, keeping everything omitted.
    pub fn apply(&self, update: &UpdateFunction) -> FunctionConfiguration {
        FunctionConfiguration {
            code: update.code.clone().unwrap_or_else(|| self.code.clone()),
            memory_megabytes: update.memory_megabytes.or(self.memory_megabytes),
            timeout_seconds: update.timeout_seconds.or(self.timeout_seconds),
            log_retention_days: update.log_retention_days.or(self.log_retention_days),
        }
    }
}

/// A validated create request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFunction {
    pub function_name: String,
    pub code: String,
    pub memory_megabytes: Option<u32>,
    pub timeout_seconds: Option<u32>,
    pub log_retention_days: Option<u32>,
}

impl From<&CreateFunction> for FunctionConfiguration {
    fn from(request: &CreateFunction) -> Self {
        FunctionConfiguration {
            code: request.code.clone(),
            memory_megabytes: request.memory_megabytes,
            timeout_seconds: request.timeout_seconds,
            log_retention_days: request.log_retention_days,
        }
    }
}

/// A validated update request, `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFunction {
    pub function_name: String,
    pub code: Option<String>,
    pub memory_megabytes: Option<u32>,
    pub timeout_seconds: Option<u32>,
    pub log_retention_days: Option<u32>,
}

/// Outcome of create, update and delete.
///
/// Rejections are reported here with `success: false` rather than as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl OperationResult {
    pub fn succeeded() -> Self {
        OperationResult {
            success: true,
            reason: None,
        }
    }

    pub fn succeeded_with(reason: impl Into<String>) -> Self {
        OperationResult {
            success: true,
            reason: Some(reason.into()),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        OperationResult {
            success: false,
            reason: Some(reason.into()),
        }
    }
}

/// The last committed snapshot of an available function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribeResult {
    pub success: bool,
    pub status: ProvisioningStatus,
    pub configuration: FunctionConfiguration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn existing() -> FunctionConfiguration {
        FunctionConfiguration {
            code: "{ ... }".to_string(),
            memory_megabytes: Some(128),
            timeout_seconds: Some(3),
            log_retention_days: None,
        }
    }

    #[test]
    fn apply_keeps_omitted_fields() {
        let update: UpdateFunction = UpdateFunction {
            function_name: "fn".to_string(),
            timeout_seconds: Some(5),
            ..Default::default()
        };

        let applied: FunctionConfiguration = existing().apply(&update);

        assert_eq!("{ ... }", applied.code);
        assert_eq!(Some(128), applied.memory_megabytes);
        assert_eq!(Some(5), applied.timeout_seconds);
    }

    #[test]
    fn configuration_omits_unset_fields_when_stored() {
        let stored: serde_json::Value = serde_json::to_value(existing()).unwrap();

        assert_eq!(
            serde_json::json!({"code": "{ ... }", "memoryMegabytes": 128, "timeoutSeconds": 3}),
            stored
        );
    }

    #[test]
    fn rejected_result_serializes_reason() {
        let result: serde_json::Value =
            serde_json::to_value(OperationResult::rejected("Not found: fn")).unwrap();

        assert_eq!(
            serde_json::json!({"success": false, "reason": "Not found: fn"}),
            result
        );
    }
}
