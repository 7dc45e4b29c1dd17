use crate::{InvocationId, OperationKind};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Where an invocation is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvocationState {
    /// Accepted but not finished, replayed on recovery
    Pending,
    /// Finished with a result which is returned to duplicate submissions
    Completed(serde_json::Value),
    /// Stopped by a terminal error
    Aborted(String),
}

/// The original request of one operation against a resource key.
///
/// The request payload is kept unvalidated so a replay goes through exactly
/// the same path as the first attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub invocation_id: String,
    pub key: String,
    pub operation: OperationKind,
    pub request: serde_json::Value,
    pub state: InvocationState,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Epoch seconds after which a finished invocation may be dropped from the journal
    #[serde(
        default,
        rename = "expiresAt",
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub expires_at: Option<DateTime<Utc>>,
}

impl InvocationRecord {
    pub fn pending(
        invocation_id: impl Into<String>,
        key: impl Into<String>,
        operation: OperationKind,
        request: serde_json::Value,
    ) -> Self {
        InvocationRecord {
            invocation_id: invocation_id.into(),
            key: key.into(),
            operation,
            request,
            state: InvocationState::Pending,
            submitted_at: Utc::now(),
            completed_at: None,
            expires_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, InvocationState::Pending)
    }

    /// Close the invocation with its final state.
    pub fn finish(mut self, state: InvocationState) -> Self {
        self.state = state;
        self.completed_at = Some(Utc::now());
        self
    }

    /// Keep a finished invocation in the journal for `retention` after it completed.
    pub fn expire_after(mut self, retention: Duration) -> Self {
        self.expires_at = self
            .completed_at
            .and_then(|completed_at| completed_at.checked_add_signed(retention));
        self
    }
}

impl InvocationId for InvocationRecord {
    fn invocation_id(&self) -> &str {
        &self.invocation_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pending_invocations_never_expire() {
        let pending: InvocationRecord =
            InvocationRecord::pending("inv-1", "fn", OperationKind::Create, json!({}))
                .expire_after(Duration::days(7));

        assert_eq!(None, pending.expires_at);
        assert!(serde_json::to_value(&pending)
            .unwrap()
            .get("expiresAt")
            .is_none());
    }

    #[test]
    fn finished_invocations_expire_after_retention() {
        let finished: InvocationRecord =
            InvocationRecord::pending("inv-1", "fn", OperationKind::Delete, json!(null))
                .finish(InvocationState::Aborted("rejected".to_string()))
                .expire_after(Duration::days(7));

        let completed_at: DateTime<Utc> = finished.completed_at.unwrap();
        assert_eq!(Some(completed_at + Duration::days(7)), finished.expires_at);

        let stored: serde_json::Value = serde_json::to_value(&finished).unwrap();
        assert_eq!(
            json!((completed_at + Duration::days(7)).timestamp()),
            stored["expiresAt"]
        );
    }
}
