//! Layout of the single table.
//!
//! Every item of a resource shares the partition `RESOURCE#<key>`:
//!
//! | sort key                   | item                          |
//! |----------------------------|-------------------------------|
//! | `RECORD`                   | status, configuration, ...    |
//! | `INVOCATION#<id>`          | an `InvocationRecord`         |
//! | `STEP#<id>#<index:05>`     | a `StepRecord`                |
//!
//! The lease of a resource lives on its `RECORD` item. Finished invocations
//! and their steps carry `expiresAt` in epoch seconds, the attribute to
//! enable as the table's TTL.

use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::HashMap;

pub(crate) const PARTITION_KEY: &str = "pk";
pub(crate) const SORT_KEY: &str = "sk";

pub(crate) const RECORD_SORT_KEY: &str = "RECORD";
pub(crate) const INVOCATION_PREFIX: &str = "INVOCATION#";
pub(crate) const STEP_PREFIX: &str = "STEP#";

pub(crate) const LEASE_ATTRIBUTE: &str = "lease";
pub(crate) const EXPIRES_AT_ATTRIBUTE: &str = "expiresAt";

pub(crate) fn partition(key: &str) -> String {
    format!("RESOURCE#{key}")
}

pub(crate) fn invocation_sort_key(invocation_id: &str) -> String {
    format!("{INVOCATION_PREFIX}{invocation_id}")
}

pub(crate) fn step_sort_key(invocation_id: &str, step_index: u32) -> String {
    format!("{STEP_PREFIX}{}", state::step_key(invocation_id, step_index))
}

/// Common prefix of every step of one invocation.
pub(crate) fn steps_prefix(invocation_id: &str) -> String {
    format!("{STEP_PREFIX}{invocation_id}#")
}

pub(crate) fn primary_key(key: &str, sort_key: String) -> HashMap<String, AttributeValue> {
    HashMap::from([
        (PARTITION_KEY.to_string(), AttributeValue::S(partition(key))),
        (SORT_KEY.to_string(), AttributeValue::S(sort_key)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_sort_keys_nest_under_their_invocation() {
        assert_eq!("STEP#inv-1#00002", step_sort_key("inv-1", 2));
        assert_eq!("INVOCATION#inv-1", invocation_sort_key("inv-1"));
        assert_eq!("RESOURCE#fn", partition("fn"));
        assert!(step_sort_key("inv-1", 2).starts_with(&steps_prefix("inv-1")));
        assert!(!step_sort_key("inv-10", 2).starts_with(&steps_prefix("inv-1")));
    }
}
