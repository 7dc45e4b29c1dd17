use crate::InvocationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepOutcome {
    Completed {
        value: serde_json::Value,
    },
    Failed {
        reason: String,
        // False when the failure was permanent on the first attempt
        retries_exhausted: bool,
    },
}

/// One journaled side effect, addressed by its position within an invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub key: String,
    pub invocation_id: String,
    pub step_index: u32,
    pub name: String,
    pub outcome: StepOutcome,
    pub recorded_at: DateTime<Utc>,
    /// Stamped with the expiry of the invocation once it finished
    #[serde(
        default,
        rename = "expiresAt",
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    pub fn new(
        key: impl Into<String>,
        invocation_id: impl Into<String>,
        step_index: u32,
        name: impl Into<String>,
        outcome: StepOutcome,
    ) -> Self {
        StepRecord {
            key: key.into(),
            invocation_id: invocation_id.into(),
            step_index,
            name: name.into(),
            outcome,
            recorded_at: Utc::now(),
            expires_at: None,
        }
    }
}

impl InvocationId for StepRecord {
    fn invocation_id(&self) -> &str {
        &self.invocation_id
    }
}
