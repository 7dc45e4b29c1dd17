use model::function::{CreateFunction, UpdateFunction};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};
use std::ops::RangeInclusive;

pub const MEMORY_MEGABYTES: RangeInclusive<u32> = 128..=10240;
pub const TIMEOUT_SECONDS: RangeInclusive<u32> = 1..=900;
/// Retention periods CloudWatch Logs accepts
pub const LOG_RETENTION_DAYS: [u32; 22] = [
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922,
    3288, 3653,
];
const MAX_FUNCTION_NAME_LENGTH: usize = 64;

/// One malformed or missing field. `$` stands for the payload itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

/// Every problem found in a payload, reported together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub struct ValidationError {
    pub issues: Vec<FieldIssue>,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Validation error")?;

        for (i, issue) in self.issues.iter().enumerate() {
            let separator: &str = if i == 0 { ": " } else { "; " };
            write!(f, "{separator}{} {}", issue.field, issue.message)?;
        }

        Ok(())
    }
}

impl ValidationError {
    pub fn has_issue(&self, field: &str) -> bool {
        self.issues.iter().any(|issue| issue.field == field)
    }
}

#[derive(Default)]
struct Issues(Vec<FieldIssue>);

impl Issues {
    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.0.push(FieldIssue {
            field: field.to_string(),
            message: message.into(),
        });
    }

    fn finish<T>(self, value: T) -> Result<T, ValidationError> {
        match self.0.is_empty() {
            true => Ok(value),
            false => Err(ValidationError { issues: self.0 }),
        }
    }
}

/// Check a create payload. `code` is required, everything else optional.
pub fn validate_create(key: &str, payload: &Value) -> Result<CreateFunction, ValidationError> {
    let mut issues: Issues = Issues::default();
    check_function_name(key, &mut issues);

    let empty: Map<String, Value> = Map::new();
    let fields: &Map<String, Value> = match payload {
        Value::Object(fields) => fields,
        _ => {
            issues.push("$", "must be an object");
            &empty
        }
    };

    let code: Option<String> = string_field(fields, "code", &mut issues);
    if code.is_none() && payload.is_object() && !has_value(fields, "code") {
        issues.push("code", "is required");
    }

    let request: CreateFunction = CreateFunction {
        function_name: key.to_string(),
        code: code.unwrap_or_default(),
        memory_megabytes: integer_field(fields, "memoryMegabytes", MEMORY_MEGABYTES, &mut issues),
        timeout_seconds: integer_field(fields, "timeoutSeconds", TIMEOUT_SECONDS, &mut issues),
        log_retention_days: retention_field(fields, &mut issues),
    };

    issues.finish(request)
}

/// Check an update payload. Every field is optional, `null` counts as empty.
pub fn validate_update(key: &str, payload: &Value) -> Result<UpdateFunction, ValidationError> {
    let mut issues: Issues = Issues::default();
    check_function_name(key, &mut issues);

    let empty: Map<String, Value> = Map::new();
    let fields: &Map<String, Value> = match payload {
        Value::Object(fields) => fields,
        Value::Null => &empty,
        _ => {
            issues.push("$", "must be an object");
            &empty
        }
    };

    let request: UpdateFunction = UpdateFunction {
        function_name: key.to_string(),
        code: string_field(fields, "code", &mut issues),
        memory_megabytes: integer_field(fields, "memoryMegabytes", MEMORY_MEGABYTES, &mut issues),
        timeout_seconds: integer_field(fields, "timeoutSeconds", TIMEOUT_SECONDS, &mut issues),
        log_retention_days: retention_field(fields, &mut issues),
    };

    issues.finish(request)
}

fn check_function_name(key: &str, issues: &mut Issues) {
    let valid_characters: bool = key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if key.is_empty() || key.len() > MAX_FUNCTION_NAME_LENGTH || !valid_characters {
        issues.push(
            "functionName",
            "must be 1 to 64 letters, digits, hyphens or underscores",
        );
    }
}

// Explicit null is the same as leaving the field out
fn has_value(fields: &Map<String, Value>, field: &str) -> bool {
    fields.get(field).is_some_and(|value| !value.is_null())
}

fn string_field(fields: &Map<String, Value>, field: &str, issues: &mut Issues) -> Option<String> {
    match fields.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(value)) if value.is_empty() => {
            issues.push(field, "must not be empty");
            None
        }
        Some(Value::String(value)) => Some(value.clone()),
        Some(_) => {
            issues.push(field, "must be a string");
            None
        }
    }
}

fn integer_field(
    fields: &Map<String, Value>,
    field: &str,
    range: RangeInclusive<u32>,
    issues: &mut Issues,
) -> Option<u32> {
    let value: &Value = match fields.get(field) {
        None | Some(Value::Null) => return None,
        Some(value) => value,
    };

    match as_integer(value) {
        Some(number) if range.contains(&number) => Some(number),
        Some(_) => {
            issues.push(
                field,
                format!("must be between {} and {}", range.start(), range.end()),
            );
            None
        }
        None => {
            issues.push(field, "must be an integer");
            None
        }
    }
}

fn retention_field(fields: &Map<String, Value>, issues: &mut Issues) -> Option<u32> {
    let value: &Value = match fields.get("logRetentionDays") {
        None | Some(Value::Null) => return None,
        Some(value) => value,
    };

    match as_integer(value) {
        Some(days) if LOG_RETENTION_DAYS.contains(&days) => Some(days),
        _ => {
            issues.push(
                "logRetentionDays",
                "must be one of the retention periods CloudWatch Logs accepts",
            );
            None
        }
    }
}

// Whole floats such as 128.0 are accepted, anything outside u32 is not
fn as_integer(value: &Value) -> Option<u32> {
    if let Some(number) = value.as_u64() {
        return u32::try_from(number).ok();
    }

    value
        .as_f64()
        .filter(|number| number.fract() == 0.0 && *number >= 0.0 && *number <= u32::MAX as f64)
        .map(|number| number as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_accepts_minimal_payload() {
        let request: CreateFunction =
            validate_create("fn", &json!({"code": "export const handler = 1;"})).unwrap();

        assert_eq!("fn", request.function_name);
        assert_eq!(None, request.memory_megabytes);
        assert_eq!(None, request.log_retention_days);
    }

    #[test]
    fn create_requires_code() {
        let err: ValidationError = validate_create("fn", &json!({"memoryMegabytes": 128})).unwrap_err();

        assert_eq!(
            vec![FieldIssue {
                field: "code".to_string(),
                message: "is required".to_string()
            }],
            err.issues
        );
    }

    #[test]
    fn every_issue_is_reported_at_once() {
        let err: ValidationError = validate_create(
            "not a name!",
            &json!({"code": 7, "memoryMegabytes": 64, "timeoutSeconds": 1.5, "logRetentionDays": 2}),
        )
        .unwrap_err();

        for field in [
            "functionName",
            "code",
            "memoryMegabytes",
            "timeoutSeconds",
            "logRetentionDays",
        ] {
            assert!(err.has_issue(field), "missing issue for {field}");
        }
        assert_eq!(5, err.issues.len());
    }

    #[test]
    fn payload_function_name_is_ignored() {
        let request: CreateFunction =
            validate_create("fn", &json!({"code": "x", "functionName": "other"})).unwrap();

        assert_eq!("fn", request.function_name);
    }

    #[test]
    fn create_rejects_non_objects() {
        for payload in [json!(null), json!("code"), json!([1])] {
            let err: ValidationError = validate_create("fn", &payload).unwrap_err();

            assert!(err.has_issue("$"));
        }
    }

    #[test]
    fn update_treats_null_as_absent() {
        let request: UpdateFunction = validate_update(
            "fn",
            &json!({"code": null, "timeoutSeconds": 5, "memoryMegabytes": null}),
        )
        .unwrap();

        assert_eq!(None, request.code);
        assert_eq!(None, request.memory_megabytes);
        assert_eq!(Some(5), request.timeout_seconds);

        assert_eq!(
            UpdateFunction {
                function_name: "fn".to_string(),
                ..Default::default()
            },
            validate_update("fn", &Value::Null).unwrap()
        );
    }

    #[test]
    fn bounds_are_inclusive() {
        let request: UpdateFunction = validate_update(
            "fn",
            &json!({"memoryMegabytes": 10240, "timeoutSeconds": 900, "logRetentionDays": 3653}),
        )
        .unwrap();

        assert_eq!(Some(10240), request.memory_megabytes);
        assert_eq!(Some(900), request.timeout_seconds);

        let err: ValidationError =
            validate_update("fn", &json!({"memoryMegabytes": 10241, "timeoutSeconds": 0})).unwrap_err();
        assert_eq!(2, err.issues.len());
    }

    #[test]
    fn whole_floats_count_as_integers() {
        let request: UpdateFunction = validate_update("fn", &json!({"memoryMegabytes": 256.0})).unwrap();

        assert_eq!(Some(256), request.memory_megabytes);
    }

    #[test]
    fn display_lists_issues() {
        let err: ValidationError = validate_update("fn", &json!({"code": ""})).unwrap_err();

        assert_eq!("Validation error: code must not be empty", err.to_string());
    }
}
