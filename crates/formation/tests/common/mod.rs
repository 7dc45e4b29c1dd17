#![allow(dead_code)]

use formation::{Provisioner, ProvisioningError};
use model::OperationKind;
use serde_json::Value;
use state::{EffectJournal, StateStore};
use state_in_memory::InMemoryStateStore;
use std::sync::Arc;
use std::time::Duration;
use test_utils::{FakeFunctionClient, FakeLogRetentionClient, FakeRoleClient};
use workflow::{Invocation, KeyedRuntime, RetryPolicy, RuntimeError};

pub type OperationResponse = Result<Value, RuntimeError<ProvisioningError>>;

/// A runtime wired to fakes, with handles to inspect every collaborator.
pub struct Harness {
    pub store: InMemoryStateStore,
    pub state: Arc<dyn StateStore>,
    pub journal: Arc<dyn EffectJournal>,
    pub functions: Arc<FakeFunctionClient>,
    pub roles: Arc<FakeRoleClient>,
    pub logs: Arc<FakeLogRetentionClient>,
    pub runtime: KeyedRuntime<Provisioner>,
}

pub fn retry_policy() -> RetryPolicy {
    RetryPolicy::default()
        .with_initial_delay(Duration::from_millis(1))
        .with_max_retries(3)
}

/// Long enough to outwait an operation held up by a delayed fake.
pub fn contention_policy() -> RetryPolicy {
    RetryPolicy::default()
        .with_initial_delay(Duration::from_millis(1))
        .with_max_retries(10)
}

impl Harness {
    pub fn new() -> Self {
        let store: InMemoryStateStore = InMemoryStateStore::new();
        Self::with_journal(store.clone(), Arc::new(store))
    }

    pub fn with_journal(store: InMemoryStateStore, journal: Arc<dyn EffectJournal>) -> Self {
        Self::with_state(store.clone(), Arc::new(store), journal)
    }

    /// `store` stays inspectable while the runtime goes through `state` and `journal`.
    pub fn with_state(
        store: InMemoryStateStore,
        state: Arc<dyn StateStore>,
        journal: Arc<dyn EffectJournal>,
    ) -> Self {
        let functions: Arc<FakeFunctionClient> = Arc::new(FakeFunctionClient::new());
        let roles: Arc<FakeRoleClient> = Arc::new(FakeRoleClient::new());
        let logs: Arc<FakeLogRetentionClient> = Arc::new(FakeLogRetentionClient::new());

        let mut harness: Harness = Harness {
            store,
            state,
            journal,
            functions,
            roles,
            logs,
            runtime: KeyedRuntime::new(
                Provisioner::new(
                    Arc::new(FakeFunctionClient::new()),
                    Arc::new(FakeRoleClient::new()),
                    Arc::new(FakeLogRetentionClient::new()),
                ),
                Arc::new(InMemoryStateStore::new()),
                Arc::new(InMemoryStateStore::new()),
            ),
        };
        harness.runtime = harness.runtime_sharing_state();

        harness
    }

    /// Another runtime instance over the same state and remote services.
    pub fn runtime_sharing_state(&self) -> KeyedRuntime<Provisioner> {
        let provisioner: Provisioner =
            Provisioner::new(self.functions.clone(), self.roles.clone(), self.logs.clone())
                .with_retry_policy(retry_policy());

        KeyedRuntime::new(provisioner, self.state.clone(), self.journal.clone())
            .with_contention_policy(contention_policy())
    }

    pub async fn submit(
        &self,
        operation: OperationKind,
        key: &str,
        request: Value,
    ) -> OperationResponse {
        self.runtime
            .submit(Invocation {
                invocation_id: None,
                key: key.to_string(),
                operation,
                request,
            })
            .await
    }

    pub async fn create(&self, key: &str, request: Value) -> OperationResponse {
        self.submit(OperationKind::Create, key, request).await
    }

    pub async fn update(&self, key: &str, request: Value) -> OperationResponse {
        self.submit(OperationKind::Update, key, request).await
    }

    pub async fn delete(&self, key: &str) -> OperationResponse {
        self.submit(OperationKind::Delete, key, Value::Null).await
    }

    pub async fn describe(&self, key: &str) -> OperationResponse {
        self.submit(OperationKind::Describe, key, Value::Null).await
    }

    pub async fn field(&self, key: &str, field: &str) -> Option<Value> {
        self.store.get(key, field).await.unwrap()
    }
}
