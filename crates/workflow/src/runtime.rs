use crate::context::OperationContext;
use crate::error::ExecutionError;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use lambda_runtime::tracing::{self, Instrument, Span};
use model::invocation::{InvocationRecord, InvocationState};
use model::lease::Lease;
use model::{InvocationId, OperationKind, Retryable};
use serde::{Deserialize, Serialize};
use state::{EffectJournal, StateStore};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

/// How long a key's worker waits for more work before it is collected.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// How long an invocation keeps its key before another runtime may take over.
pub const DEFAULT_LEASE_SECONDS: i64 = 15 * 60;

/// How long finished invocations and their steps stay in the journal.
pub const DEFAULT_JOURNAL_RETENTION_DAYS: i64 = 7;

/// Executes one operation for one key inside an [`OperationContext`].
#[async_trait]
pub trait InvocationHandler: Send + Sync + 'static {
    /// Transient errors leave the invocation pending for recovery, any other
    /// error aborts it.
    type Error: StdError + Retryable + Send + Sync + 'static;

    async fn handle(
        &self,
        ctx: &OperationContext,
        operation: OperationKind,
        request: &serde_json::Value,
    ) -> Result<serde_json::Value, Self::Error>;
}

/// One operation submitted against a resource key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    /// Reusing an id makes a resubmission idempotent, a fresh one is generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    #[serde(rename = "functionName")]
    pub key: String,
    pub operation: OperationKind,
    #[serde(default)]
    pub request: serde_json::Value,
}

impl From<InvocationRecord> for Invocation {
    fn from(record: InvocationRecord) -> Self {
        Invocation {
            invocation_id: Some(record.invocation_id),
            key: record.key,
            operation: record.operation,
            request: record.request,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError<E: StdError + 'static> {
    #[error(transparent)]
    Handler(E),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl<E: StdError + Retryable + 'static> Retryable for RuntimeError<E> {
    fn is_transient(&self) -> bool {
        match self {
            RuntimeError::Handler(err) => err.is_transient(),
            RuntimeError::Execution(err) => err.is_transient(),
        }
    }
}

/// A pending invocation resubmitted by [`KeyedRuntime::recover`].
#[derive(Debug)]
pub struct Recovered<E: StdError + 'static> {
    pub invocation_id: String,
    pub key: String,
    pub result: Result<serde_json::Value, RuntimeError<E>>,
}

const HANDLER_PANICKED: &str = "handler panicked";

type Outcome<E> = Result<serde_json::Value, RuntimeError<E>>;
type Job = Pin<Box<dyn Future<Output = ()> + Send>>;
type Workers = Arc<Mutex<HashMap<String, UnboundedSender<Job>>>>;

/// Runs invocations one at a time per key and in parallel across keys.
///
/// Each key gets a worker task the first time it is used. The worker drains
/// its queue in arrival order and removes itself once idle for
/// `idle_timeout`. Mutating operations are bracketed by an invocation record
/// in the journal so they can be deduplicated and recovered.
///
/// Runtimes sharing a journal coordinate through a lease per key. A mutating
/// invocation first claims the key, and any unfinished invocation left
/// holding it is driven to completion before the new one starts.
pub struct KeyedRuntime<H: InvocationHandler> {
    executor: Executor<H>,
    workers: Workers,
    idle_timeout: Duration,
}

impl<H: InvocationHandler> KeyedRuntime<H> {
    pub fn new(handler: H, store: Arc<dyn StateStore>, journal: Arc<dyn EffectJournal>) -> Self {
        KeyedRuntime {
            executor: Executor {
                handler: Arc::new(handler),
                store,
                journal,
                holder: uuid::Uuid::new_v4().to_string(),
                lease_duration: chrono::Duration::seconds(DEFAULT_LEASE_SECONDS),
                contention: RetryPolicy::default(),
                retention: chrono::Duration::days(DEFAULT_JOURNAL_RETENTION_DAYS),
            },
            workers: Default::default(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Must outlast the longest invocation, or a second runtime may resume it
    /// while it still runs.
    pub fn with_lease_duration(mut self, lease_duration: chrono::Duration) -> Self {
        self.executor.lease_duration = lease_duration;
        self
    }

    /// How long to wait for a key held by an invocation running elsewhere.
    pub fn with_contention_policy(mut self, contention: RetryPolicy) -> Self {
        self.executor.contention = contention;
        self
    }

    pub fn with_journal_retention(mut self, retention: chrono::Duration) -> Self {
        self.executor.retention = retention;
        self
    }

    pub fn handler(&self) -> &H {
        &self.executor.handler
    }

    /// Identifies this runtime in the leases it holds.
    pub fn holder(&self) -> &str {
        &self.executor.holder
    }

    /// Number of keys that currently have a live worker.
    pub fn active_keys(&self) -> usize {
        lock_workers(&self.workers).len()
    }

    /// Queue an invocation behind its key and wait for the result.
    ///
    /// Dropping the returned future does not cancel the invocation.
    pub async fn submit(&self, invocation: Invocation) -> Outcome<H::Error> {
        let key: String = invocation.key.clone();

        self.enqueue(invocation)
            .await
            .map_err(|_| ExecutionError::WorkerLost(key))?
    }

    /// Resubmit every pending invocation, oldest first.
    ///
    /// All of them are queued before any is awaited so invocations of the same
    /// key keep their original order. An invocation still running on another
    /// runtime is left alone and reported as busy.
    pub async fn recover(&self) -> Result<Vec<Recovered<H::Error>>, ExecutionError> {
        let pending: Vec<InvocationRecord> = self.executor.journal.pending_invocations().await?;

        tracing::info!("Recovering [{}] pending invocations", pending.len());

        let queued: Vec<_> = pending
            .into_iter()
            .map(|record: InvocationRecord| {
                let invocation_id: String = record.invocation_id().to_string();
                let key: String = record.key.clone();

                (invocation_id, key, self.enqueue(Invocation::from(record)))
            })
            .collect();

        let mut recovered: Vec<Recovered<H::Error>> = Vec::with_capacity(queued.len());
        for (invocation_id, key, receiver) in queued {
            let result = receiver
                .await
                .unwrap_or_else(|_| Err(ExecutionError::WorkerLost(key.clone()).into()));

            recovered.push(Recovered {
                invocation_id,
                key,
                result,
            });
        }

        Ok(recovered)
    }

    fn enqueue(&self, invocation: Invocation) -> oneshot::Receiver<Outcome<H::Error>> {
        let (sender, receiver) = oneshot::channel();

        let key: String = invocation.key.clone();
        let invocation_id: String = invocation
            .invocation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let span: Span = invocation_span(&invocation, &invocation_id);

        let executor: Executor<H> = self.executor.clone();

        let job: Job = Box::pin(
            async move {
                let result = executor.execute(invocation_id, invocation).await;

                // The caller may have stopped waiting, the work is done regardless
                let _ = sender.send(result);
            }
            .instrument(span),
        );

        self.dispatch(key, job);

        receiver
    }

    fn dispatch(&self, key: String, job: Job) {
        let mut workers = lock_workers(&self.workers);

        let job: Job = match workers.get(&key) {
            Some(worker) => match worker.send(job) {
                Ok(()) => return,
                // The worker died with a panicking job, start a new one
                Err(SendError(job)) => {
                    tracing::warn!(key, "Replacing stopped worker");
                    job
                }
            },
            None => job,
        };

        let (sender, receiver) = unbounded_channel::<Job>();
        // The receiver is alive until the worker starts, this cannot fail
        let _ = sender.send(job);
        workers.insert(key.clone(), sender);

        tokio::spawn(run_worker(
            self.workers.clone(),
            key,
            receiver,
            self.idle_timeout,
        ));
    }
}

fn lock_workers(workers: &Workers) -> MutexGuard<'_, HashMap<String, UnboundedSender<Job>>> {
    // Nothing panics while holding the lock, recover the map if it ever happens
    workers.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_worker(
    workers: Workers,
    key: String,
    mut jobs: UnboundedReceiver<Job>,
    idle_timeout: Duration,
) {
    tracing::debug!(key, "Started worker");

    loop {
        let job: Job = match tokio::time::timeout(idle_timeout, jobs.recv()).await {
            Ok(Some(job)) => job,
            // Every sender is gone, the runtime was dropped
            Ok(None) => return,
            Err(_) => {
                // Senders only send while holding the lock, so an empty queue
                // here stays empty until the entry is removed
                let mut workers = lock_workers(&workers);

                match jobs.try_recv() {
                    Ok(job) => job,
                    Err(_) => {
                        workers.remove(&key);
                        tracing::debug!(key, "Stopped idle worker");
                        return;
                    }
                }
            }
        };

        job.await;
    }
}

fn invocation_span(invocation: &Invocation, invocation_id: &str) -> Span {
    tracing::span!(
        tracing::Level::INFO,
        "Invocation",
        key = invocation.key,
        invocation_id,
        operation = %invocation.operation
    )
}

fn expiry_after(duration: chrono::Duration) -> DateTime<Utc> {
    Utc::now()
        .checked_add_signed(duration)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Everything a job needs to run one invocation, shared by all workers.
struct Executor<H: InvocationHandler> {
    handler: Arc<H>,
    store: Arc<dyn StateStore>,
    journal: Arc<dyn EffectJournal>,
    holder: String,
    lease_duration: chrono::Duration,
    contention: RetryPolicy,
    retention: chrono::Duration,
}

impl<H: InvocationHandler> Clone for Executor<H> {
    fn clone(&self) -> Self {
        Executor {
            handler: self.handler.clone(),
            store: self.store.clone(),
            journal: self.journal.clone(),
            holder: self.holder.clone(),
            lease_duration: self.lease_duration,
            contention: self.contention.clone(),
            retention: self.retention,
        }
    }
}

impl<H: InvocationHandler> Executor<H> {
    // Boxed as resuming an abandoned invocation re-enters it
    fn execute(
        &self,
        invocation_id: String,
        invocation: Invocation,
    ) -> Pin<Box<dyn Future<Output = Outcome<H::Error>> + Send + '_>> {
        Box::pin(async move {
            let key: &str = invocation.key.as_str();

            // Reads are never journaled
            if !invocation.operation.is_mutating() {
                return self
                    .handler
                    .handle(
                        &self.context(key, &invocation_id),
                        invocation.operation,
                        &invocation.request,
                    )
                    .await
                    .map_err(RuntimeError::Handler);
            }

            self.claim(key, &invocation_id).await?;

            let record: InvocationRecord = match self
                .journal
                .get_invocation(key, &invocation_id)
                .await
                .map_err(ExecutionError::from)?
            {
                Some(record) => match &record.state {
                    InvocationState::Completed(result) => {
                        tracing::info!("Invocation already completed, returning recorded result");
                        let result: serde_json::Value = result.clone();
                        self.release(key, &invocation_id).await?;

                        return Ok(result);
                    }
                    InvocationState::Aborted(reason) => {
                        let reason: String = reason.clone();
                        self.release(key, &invocation_id).await?;

                        return Err(ExecutionError::Aborted(invocation_id, reason).into());
                    }
                    InvocationState::Pending => {
                        tracing::info!("Resuming pending invocation");
                        record
                    }
                },
                None => {
                    let record: InvocationRecord = InvocationRecord::pending(
                        invocation_id.as_str(),
                        key,
                        invocation.operation,
                        invocation.request.clone(),
                    );

                    if let Err(err) = self.journal.insert_invocation(&record).await {
                        // Nothing was recorded, so nothing is left to hold the key for
                        self.release(key, &invocation_id).await?;
                        return Err(ExecutionError::from(err).into());
                    }
                    record
                }
            };

            // Replay the recorded request so a resumed invocation takes the same path
            let ctx: OperationContext = self.context(key, &invocation_id);
            let outcome = AssertUnwindSafe(self.handler.handle(
                &ctx,
                record.operation,
                &record.request,
            ))
            .catch_unwind()
            .await;

            let Ok(outcome) = outcome else {
                tracing::error!("Invocation aborted, handler panicked");
                self.finish(record, InvocationState::Aborted(HANDLER_PANICKED.to_string()))
                    .await?;

                return Err(
                    ExecutionError::Aborted(invocation_id, HANDLER_PANICKED.to_string()).into(),
                );
            };

            match outcome {
                Ok(result) => {
                    self.finish(record, InvocationState::Completed(result.clone()))
                        .await?;

                    Ok(result)
                }
                Err(err) if err.is_transient() => {
                    tracing::warn!("Invocation left pending after transient failure: {err}");
                    self.park(key, &invocation_id).await;

                    Err(RuntimeError::Handler(err))
                }
                Err(err) => {
                    tracing::error!("Invocation aborted: {err}");
                    self.finish(record, InvocationState::Aborted(err.to_string()))
                        .await?;

                    Err(RuntimeError::Handler(err))
                }
            }
        })
    }

    fn context(&self, key: &str, invocation_id: &str) -> OperationContext {
        OperationContext::new(key, invocation_id, self.store.clone(), self.journal.clone())
    }

    /// Take the lease of `key` for `invocation_id`.
    ///
    /// A lease left by an unfinished invocation, parked or expired or held by
    /// this runtime, is resolved first by resuming that invocation. A lease
    /// held live by another runtime is waited on per the contention policy.
    async fn claim(&self, key: &str, invocation_id: &str) -> Result<(), RuntimeError<H::Error>> {
        let mut attempt: u32 = 0;

        loop {
            let lease: Lease = Lease::new(
                invocation_id,
                self.holder.as_str(),
                expiry_after(self.lease_duration),
            );

            let Some(held) = self
                .journal
                .acquire_lease(key, &lease)
                .await
                .map_err(ExecutionError::from)?
            else {
                return Ok(());
            };

            let abandoned: bool = held.invocation_id() != invocation_id
                && (held.holder == self.holder || held.is_expired(Utc::now()));
            if abandoned {
                self.take_over(key, held).await?;
                continue;
            }

            if attempt >= self.contention.max_retries {
                tracing::warn!(holder = held.invocation_id(), "Key is still held, giving up");

                return Err(ExecutionError::Busy {
                    key: key.to_string(),
                    holder: held.invocation_id,
                }
                .into());
            }

            let delay: Duration = self.contention.delay_for(attempt);
            tracing::debug!(holder = held.invocation_id(), ?delay, "Key is held, waiting");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Finish whatever invocation left `held` behind so the key can move on.
    async fn take_over(&self, key: &str, held: Lease) -> Result<(), RuntimeError<H::Error>> {
        let record: Option<InvocationRecord> = self
            .journal
            .get_invocation(key, held.invocation_id())
            .await
            .map_err(ExecutionError::from)?;

        match record {
            Some(record) if record.is_pending() => {
                tracing::warn!(
                    abandoned = held.invocation_id(),
                    "Resuming unfinished invocation before taking the key"
                );

                let invocation_id: String = record.invocation_id().to_string();
                let invocation: Invocation = Invocation::from(record);
                let span: Span = invocation_span(&invocation, &invocation_id);

                match self.execute(invocation_id, invocation).instrument(span).await {
                    Err(err) if err.is_transient() => {
                        tracing::warn!("Unfinished invocation is still pending: {err}");

                        Err(ExecutionError::Busy {
                            key: key.to_string(),
                            holder: held.invocation_id,
                        }
                        .into())
                    }
                    // Completed or aborted, either way the key is free again
                    _ => Ok(()),
                }
            }
            // Finished or never recorded, only the lease was left behind
            _ => {
                self.release(key, held.invocation_id()).await?;
                Ok(())
            }
        }
    }

    async fn finish(
        &self,
        record: InvocationRecord,
        state: InvocationState,
    ) -> Result<(), ExecutionError> {
        let finished: InvocationRecord = record.finish(state).expire_after(self.retention);

        self.journal.finish_invocation(&finished).await?;
        self.release(&finished.key, finished.invocation_id()).await
    }

    async fn release(&self, key: &str, invocation_id: &str) -> Result<(), ExecutionError> {
        Ok(self.journal.release_lease(key, invocation_id).await?)
    }

    /// Keep the key for a pending invocation but let any runtime resume it.
    async fn park(&self, key: &str, invocation_id: &str) {
        let parked: Lease = Lease::new(invocation_id, self.holder.as_str(), Utc::now());

        if let Err(err) = self.journal.acquire_lease(key, &parked).await {
            tracing::warn!("Failed to park lease, it is held until it expires: {err}");
        }
    }
}
