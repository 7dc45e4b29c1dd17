use crate::error::ExecutionError;
use crate::retry::RetryPolicy;
use lambda_runtime::tracing;
use model::step::{StepOutcome, StepRecord};
use model::{InvocationId, Retryable};
use serde::de::DeserializeOwned;
use serde::Serialize;
use state::{EffectJournal, StateStore};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Everything an operation sees while it runs for one resource key.
///
/// State access goes straight to the record store. Side effects go through
/// [`OperationContext::side_effect`] which journals their outcome, so running
/// the same invocation again replays recorded outcomes in order instead of
/// repeating the actions.
pub struct OperationContext {
    key: String,
    invocation_id: String,
    next_step: AtomicU32,
    store: Arc<dyn StateStore>,
    journal: Arc<dyn EffectJournal>,
}

impl OperationContext {
    pub fn new(
        key: impl Into<String>,
        invocation_id: impl Into<String>,
        store: Arc<dyn StateStore>,
        journal: Arc<dyn EffectJournal>,
    ) -> Self {
        OperationContext {
            key: key.into(),
            invocation_id: invocation_id.into(),
            next_step: AtomicU32::new(0),
            store,
            journal,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn get(&self, field: &str) -> Result<Option<serde_json::Value>, ExecutionError> {
        Ok(self.store.get(&self.key, field).await?)
    }

    pub async fn set(&self, field: &str, value: serde_json::Value) -> Result<(), ExecutionError> {
        Ok(self.store.set(&self.key, field, value).await?)
    }

    pub async fn set_many(
        &self,
        fields: Vec<(&str, serde_json::Value)>,
    ) -> Result<(), ExecutionError> {
        Ok(self.store.set_many(&self.key, fields).await?)
    }

    pub async fn clear(&self, field: &str) -> Result<(), ExecutionError> {
        Ok(self.store.clear(&self.key, field).await?)
    }

    /// Run `action` at most once per invocation and position, retrying
    /// transient failures according to `policy`.
    ///
    /// The outcome, success or terminal failure, is journaled before it is
    /// returned. A step found in the journal is returned as recorded and the
    /// action is not called.
    pub async fn side_effect<T, E, F, Fut>(
        &self,
        name: &str,
        policy: &RetryPolicy,
        mut action: F,
    ) -> Result<T, ExecutionError>
    where
        T: Serialize + DeserializeOwned,
        E: Retryable + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let step_index: u32 = self.next_step.fetch_add(1, Ordering::SeqCst);

        if let Some(recorded) = self
            .journal
            .get_step(&self.key, self.invocation_id(), step_index)
            .await?
        {
            tracing::debug!(step = name, step_index, "Replaying journaled step");

            return replay(recorded, name);
        }

        let mut retry: u32 = 0;
        let outcome: StepOutcome = loop {
            match action().await {
                Ok(value) => {
                    break StepOutcome::Completed {
                        value: serde_json::to_value(&value)?,
                    }
                }
                Err(err) if err.is_transient() && retry < policy.max_retries => {
                    let delay: Duration = policy.delay_for(retry);
                    tracing::warn!(
                        step = name,
                        retry = retry + 1,
                        max_retries = policy.max_retries,
                        ?delay,
                        "Step failed transiently, retrying: {err}"
                    );

                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(err) => {
                    let retries_exhausted: bool = err.is_transient();
                    tracing::error!(
                        step = name,
                        invocation_id = self.invocation_id(),
                        retries_exhausted,
                        "Step failed: {err}"
                    );

                    break StepOutcome::Failed {
                        reason: err.to_string(),
                        retries_exhausted,
                    };
                }
            }
        };

        let step: StepRecord = StepRecord::new(
            self.key.as_str(),
            self.invocation_id(),
            step_index,
            name,
            outcome,
        );

        match self.journal.append_step(&step).await {
            Ok(()) => replay(step, name),
            // Someone else journaled this position first, their outcome wins
            Err(err) if err.is_conflict() => {
                match self
                    .journal
                    .get_step(&self.key, self.invocation_id(), step_index)
                    .await?
                {
                    Some(recorded) => replay(recorded, name),
                    None => Err(err.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl InvocationId for OperationContext {
    fn invocation_id(&self) -> &str {
        &self.invocation_id
    }
}

fn replay<T: DeserializeOwned>(step: StepRecord, name: &str) -> Result<T, ExecutionError> {
    if step.name != name {
        return Err(ExecutionError::UnexpectedStep {
            index: step.step_index,
            expected: name.to_string(),
            recorded: step.name,
        });
    }

    match step.outcome {
        StepOutcome::Completed { value } => Ok(serde_json::from_value(value)?),
        StepOutcome::Failed {
            reason,
            retries_exhausted,
        } => Err(ExecutionError::StepFailed {
            name: step.name,
            reason,
            retries_exhausted,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use state_in_memory::InMemoryStateStore;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug)]
    enum TestError {
        Throttled,
        Rejected,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Throttled => f.write_str("throttled"),
                TestError::Rejected => f.write_str("rejected"),
            }
        }
    }

    impl Retryable for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Throttled)
        }
    }

    fn context(store: &InMemoryStateStore, invocation_id: &str) -> OperationContext {
        OperationContext::new(
            "fn",
            invocation_id,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
        )
    }

    #[tokio::test]
    async fn completed_steps_are_not_repeated_on_replay() {
        let store: InMemoryStateStore = InMemoryStateStore::new();
        let calls: &AtomicUsize = &AtomicUsize::new(0);

        let action = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<String, TestError>("arn:role".to_string())
        };

        let first: String = context(&store, "inv-1")
            .side_effect("ensure-role", &RetryPolicy::none(), action)
            .await
            .unwrap();
        let replayed: String = context(&store, "inv-1")
            .side_effect("ensure-role", &RetryPolicy::none(), action)
            .await
            .unwrap();

        assert_eq!("arn:role", first);
        assert_eq!(first, replayed);
        assert_eq!(1, calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn steps_of_other_invocations_are_independent() {
        let store: InMemoryStateStore = InMemoryStateStore::new();
        let calls: &AtomicUsize = &AtomicUsize::new(0);

        let action = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<u32, TestError>(1)
        };

        for invocation_id in ["inv-1", "inv-2"] {
            context(&store, invocation_id)
                .side_effect("count", &RetryPolicy::none(), action)
                .await
                .unwrap();
        }

        assert_eq!(2, calls.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_with_backoff() {
        let store: InMemoryStateStore = InMemoryStateStore::new();
        let calls: &AtomicUsize = &AtomicUsize::new(0);
        let started: tokio::time::Instant = tokio::time::Instant::now();

        let value: u32 = context(&store, "inv-1")
            .side_effect("flaky", &RetryPolicy::default(), move || async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err(TestError::Throttled),
                    _ => Ok(7),
                }
            })
            .await
            .unwrap();

        assert_eq!(7, value);
        assert_eq!(3, calls.load(Ordering::SeqCst));
        // 500ms then 1000ms
        assert_eq!(Duration::from_millis(1500), started.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_are_journaled_as_failure() {
        let store: InMemoryStateStore = InMemoryStateStore::new();
        let calls: &AtomicUsize = &AtomicUsize::new(0);
        let policy: RetryPolicy = RetryPolicy::default().with_max_retries(2);

        let action = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<u32, TestError>(TestError::Throttled)
        };

        let err: ExecutionError = context(&store, "inv-1")
            .side_effect("create-function", &policy, action)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExecutionError::StepFailed {
                retries_exhausted: true,
                ..
            }
        ));
        assert_eq!(3, calls.load(Ordering::SeqCst));

        // The failure is replayed without calling the action again
        let replayed: ExecutionError = context(&store, "inv-1")
            .side_effect("create-function", &policy, action)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), replayed.to_string());
        assert_eq!(3, calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let store: InMemoryStateStore = InMemoryStateStore::new();
        let calls: &AtomicUsize = &AtomicUsize::new(0);

        let err: ExecutionError = context(&store, "inv-1")
            .side_effect("create-function", &RetryPolicy::default(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u32, TestError>(TestError::Rejected)
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExecutionError::StepFailed {
                retries_exhausted: false,
                ..
            }
        ));
        assert_eq!(1, calls.load(Ordering::SeqCst));

        let steps: Vec<StepRecord> = store.steps_for("fn", "inv-1");
        assert_eq!(1, steps.len());
        assert_eq!(
            StepOutcome::Failed {
                reason: "rejected".to_string(),
                retries_exhausted: false
            },
            steps[0].outcome
        );
    }

    #[tokio::test]
    async fn replay_with_a_different_step_name_is_unexpected() {
        let store: InMemoryStateStore = InMemoryStateStore::new();

        context(&store, "inv-1")
            .side_effect("ensure-role", &RetryPolicy::none(), || async {
                Ok::<u32, TestError>(1)
            })
            .await
            .unwrap();

        let err: ExecutionError = context(&store, "inv-1")
            .side_effect("create-function", &RetryPolicy::none(), || async {
                Ok::<u32, TestError>(1)
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::UnexpectedStep { index: 0, .. }));
    }

    #[tokio::test]
    async fn steps_are_numbered_in_call_order() {
        let store: InMemoryStateStore = InMemoryStateStore::new();
        let ctx: OperationContext = context(&store, "inv-1");

        for name in ["observe-status", "ensure-role", "create-function"] {
            ctx.side_effect(name, &RetryPolicy::none(), || async {
                Ok::<(), TestError>(())
            })
            .await
            .unwrap();
        }

        let names: Vec<String> = store
            .steps_for("fn", "inv-1")
            .into_iter()
            .map(|step| step.name)
            .collect();

        assert_eq!(vec!["observe-status", "ensure-role", "create-function"], names);
    }
}
