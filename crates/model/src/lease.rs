use crate::InvocationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exclusive claim of one invocation on a resource key.
///
/// Only the invocation holding the lease may run against the key. A lease
/// outlives transient failures of its invocation so no other invocation can
/// start on the key until that one is finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub invocation_id: String,
    /// The runtime instance running the invocation
    pub holder: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(
        invocation_id: impl Into<String>,
        holder: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Lease {
            invocation_id: invocation_id.into(),
            holder: holder.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether `claim` may replace this lease.
    ///
    /// Only the same invocation can take a lease over, either from the same
    /// holder or once the current holder let it expire.
    pub fn yields_to(&self, claim: &Lease, now: DateTime<Utc>) -> bool {
        self.invocation_id == claim.invocation_id
            && (self.holder == claim.holder || self.is_expired(now))
    }
}

impl InvocationId for Lease {
    fn invocation_id(&self) -> &str {
        &self.invocation_id
    }
}
