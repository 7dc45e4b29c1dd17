use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::invocation::InvocationRecord;
use model::lease::Lease;
use model::step::StepRecord;
use model::InvocationId;
use state::StateErrorReason::{BackendFailure, Conflict};
use state::StateOperation::{
    AcquireLease, AppendStep, ClearField, FinishInvocation, GetField, GetInvocation, GetStep,
    InsertInvocation, ListInvocations, ReleaseLease, SetField,
};
use state::{step_key, EffectJournal, StateError, StateOperation, StateStore};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

type Fields = HashMap<String, serde_json::Value>;

/// Keeps records and the journal in process memory.
///
/// Cloning shares the underlying maps, which lets tests inspect what an
/// orchestrator wrote.
#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    records: Arc<Mutex<HashMap<String, Fields>>>,
    invocations: Arc<Mutex<HashMap<(String, String), InvocationRecord>>>,
    // Ordered so a key's steps list in position order
    steps: Arc<Mutex<BTreeMap<(String, String), StepRecord>>>,
    leases: Arc<Mutex<HashMap<String, Lease>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All journaled steps for an invocation, in position order.
    pub fn steps_for(&self, key: &str, invocation_id: &str) -> Vec<StepRecord> {
        let prefix: String = format!("{invocation_id}#");

        self.steps
            .lock()
            .map(|steps| {
                steps
                    .iter()
                    .filter(|((step_owner, id), _)| step_owner == key && id.starts_with(&prefix))
                    .map(|(_, step)| step.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The lease currently stored for a key, expired or not.
    pub fn lease(&self, key: &str) -> Option<Lease> {
        self.leases
            .lock()
            .ok()
            .and_then(|leases| leases.get(key).cloned())
    }

    /// Forget every step of an invocation, as if the journal never saw it.
    pub fn forget_steps(&self, key: &str, invocation_id: &str) {
        let prefix: String = format!("{invocation_id}#");

        if let Ok(mut steps) = self.steps.lock() {
            steps.retain(|(step_owner, id), _| !(step_owner == key && id.starts_with(&prefix)));
        }
    }

    // Plays the part of a table TTL, dropping entries whose expiry has passed
    fn prune_expired(&self, key: &str, now: DateTime<Utc>) -> Result<(), StateError> {
        let expired = |expires_at: Option<DateTime<Utc>>| expires_at.is_some_and(|at| at <= now);

        lock(&self.invocations, key, FinishInvocation)?
            .retain(|_, invocation| !expired(invocation.expires_at));
        lock(&self.steps, key, FinishInvocation)?.retain(|_, step| !expired(step.expires_at));

        Ok(())
    }
}

// A poisoned lock means a writer panicked mid-update, surface it as a backend failure
fn lock<'a, T>(
    mutex: &'a Mutex<T>,
    state_key: &str,
    operation: StateOperation,
) -> Result<MutexGuard<'a, T>, StateError> {
    mutex
        .lock()
        .map_err(|err| StateError::new(state_key, operation, BackendFailure(err.to_string().into())))
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str, field: &str) -> Result<Option<serde_json::Value>, StateError> {
        let records = lock(&self.records, key, GetField)?;

        Ok(records.get(key).and_then(|fields| fields.get(field)).cloned())
    }

    async fn set(&self, key: &str, field: &str, value: serde_json::Value) -> Result<(), StateError> {
        lock(&self.records, key, SetField)?
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);

        Ok(())
    }

    async fn set_many(
        &self,
        key: &str,
        fields: Vec<(&str, serde_json::Value)>,
    ) -> Result<(), StateError> {
        let mut records = lock(&self.records, key, SetField)?;
        let record: &mut Fields = records.entry(key.to_string()).or_default();

        for (field, value) in fields {
            record.insert(field.to_string(), value);
        }

        Ok(())
    }

    async fn clear(&self, key: &str, field: &str) -> Result<(), StateError> {
        if let Some(fields) = lock(&self.records, key, ClearField)?.get_mut(key) {
            fields.remove(field);
        }

        Ok(())
    }
}

#[async_trait]
impl EffectJournal for InMemoryStateStore {
    async fn insert_invocation(&self, invocation: &InvocationRecord) -> Result<(), StateError> {
        let mut invocations = lock(&self.invocations, &invocation.key, InsertInvocation)?;
        let id: (String, String) = (
            invocation.key.clone(),
            invocation.invocation_id().to_string(),
        );

        if invocations.contains_key(&id) {
            return Err(StateError::new(id.0, InsertInvocation, Conflict));
        }
        invocations.insert(id, invocation.clone());

        Ok(())
    }

    async fn finish_invocation(&self, invocation: &InvocationRecord) -> Result<(), StateError> {
        let key: &str = invocation.key.as_str();
        {
            let mut invocations = lock(&self.invocations, key, FinishInvocation)?;
            let id: (String, String) = (key.to_string(), invocation.invocation_id().to_string());

            if !invocations.get(&id).is_some_and(InvocationRecord::is_pending) {
                return Err(StateError::new(key, FinishInvocation, Conflict));
            }
            invocations.insert(id, invocation.clone());
        }

        let prefix: String = format!("{}#", invocation.invocation_id());
        for ((step_owner, id), step) in lock(&self.steps, key, FinishInvocation)?.iter_mut() {
            if step_owner == key && id.starts_with(&prefix) {
                step.expires_at = invocation.expires_at;
            }
        }

        self.prune_expired(key, Utc::now())
    }

    async fn get_invocation(
        &self,
        key: &str,
        invocation_id: &str,
    ) -> Result<Option<InvocationRecord>, StateError> {
        let invocations = lock(&self.invocations, key, GetInvocation)?;

        Ok(invocations
            .get(&(key.to_string(), invocation_id.to_string()))
            .cloned())
    }

    async fn pending_invocations(&self) -> Result<Vec<InvocationRecord>, StateError> {
        let invocations = lock(&self.invocations, "*", ListInvocations)?;

        let mut pending: Vec<InvocationRecord> = invocations
            .values()
            .filter(|invocation| invocation.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|invocation| invocation.submitted_at);

        Ok(pending)
    }

    async fn append_step(&self, step: &StepRecord) -> Result<(), StateError> {
        let mut steps = lock(&self.steps, &step.key, AppendStep)?;
        let id: (String, String) = (
            step.key.clone(),
            step_key(step.invocation_id(), step.step_index),
        );

        if steps.contains_key(&id) {
            return Err(StateError::new(id.1, AppendStep, Conflict));
        }
        steps.insert(id, step.clone());

        Ok(())
    }

    async fn get_step(
        &self,
        key: &str,
        invocation_id: &str,
        step_index: u32,
    ) -> Result<Option<StepRecord>, StateError> {
        let steps = lock(&self.steps, key, GetStep)?;

        Ok(steps
            .get(&(key.to_string(), step_key(invocation_id, step_index)))
            .cloned())
    }

    async fn acquire_lease(&self, key: &str, lease: &Lease) -> Result<Option<Lease>, StateError> {
        let mut leases = lock(&self.leases, key, AcquireLease)?;

        if let Some(held) = leases.get(key) {
            if !held.yields_to(lease, Utc::now()) {
                return Ok(Some(held.clone()));
            }
        }
        leases.insert(key.to_string(), lease.clone());

        Ok(None)
    }

    async fn release_lease(&self, key: &str, invocation_id: &str) -> Result<(), StateError> {
        let mut leases = lock(&self.leases, key, ReleaseLease)?;

        if leases
            .get(key)
            .is_some_and(|held| held.invocation_id() == invocation_id)
        {
            leases.remove(key);
        }

        Ok(())
    }
}
