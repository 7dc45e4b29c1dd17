use async_trait::async_trait;
use aws_lambda_events::sqs::SqsMessageObj;
use aws_sdk_sqs::operation::send_message::SendMessageOutput;
use aws_smithy_mocks::{mock, mock_client, Rule};
use serde::Serialize;
use service::{
    ConfigurationUpdate, CreatedFunction, Dispatcher, FunctionClient, FunctionSnapshot,
    FunctionSpec, LogRetentionClient, RoleClient, ServiceError,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Create a dummy SQS message with a set body
pub fn sqs_message_with_body<T>(body: T) -> SqsMessageObj<T>
where
    T: Serialize + Clone,
{
    SqsMessageObj {
        message_id: None,
        receipt_handle: None,
        body,
        md5_of_body: None,
        md5_of_message_attributes: None,
        attributes: Default::default(),
        message_attributes: Default::default(),
        event_source_arn: None,
        event_source: None,
        aws_region: None,
    }
}

/// A default mock SQS client which returns an empty response
pub fn create_mock_sqs_client() -> aws_sdk_sqs::Client {
    let send_message_rule: Rule = mock!(aws_sdk_sqs::Client::send_message)
        .match_requests(|_| true)
        .sequence()
        .output(|| SendMessageOutput::builder().build())
        .repeatedly()
        .build();

    mock_client!(aws_sdk_sqs, [&send_message_rule])
}

pub const TEST_ACCOUNT: &str = "123456789012";

pub fn function_arn(function_name: &str) -> String {
    format!("arn:aws:lambda:us-east-1:{TEST_ACCOUNT}:function:{function_name}")
}

pub fn role_arn(role_name: &str) -> String {
    format!("arn:aws:iam::{TEST_ACCOUNT}:role/{role_name}")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("Fake state lock should not be poisoned")
}

/// Errors queued per operation name, handed out one per call.
#[derive(Default)]
struct Script {
    failures: Mutex<HashMap<&'static str, VecDeque<ServiceError>>>,
}

impl Script {
    fn push(&self, operation: &'static str, err: ServiceError, times: usize) {
        lock(&self.failures)
            .entry(operation)
            .or_default()
            .extend(std::iter::repeat(err).take(times));
    }

    fn next(&self, operation: &'static str) -> Result<(), ServiceError> {
        match lock(&self.failures)
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub const CREATE_FUNCTION: &str = "create_function";
pub const UPDATE_FUNCTION_CODE: &str = "update_function_code";
pub const UPDATE_FUNCTION_CONFIGURATION: &str = "update_function_configuration";
pub const DELETE_FUNCTION: &str = "delete_function";
pub const GET_FUNCTION: &str = "get_function";

/// A call observed by [`FakeFunctionClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionCall {
    Create(FunctionSpec),
    UpdateCode {
        function_name: String,
        code: String,
    },
    UpdateConfiguration {
        function_name: String,
        update: ConfigurationUpdate,
    },
    Delete(String),
    Get(String),
}

/// In-memory stand in for the compute service.
///
/// Keeps the functions it has created, records every call and fails the next
/// calls of an operation when told to with [`FakeFunctionClient::fail_next`].
#[derive(Default)]
pub struct FakeFunctionClient {
    functions: Mutex<HashMap<String, FunctionSnapshot>>,
    calls: Mutex<Vec<FunctionCall>>,
    script: Script,
}

impl FakeFunctionClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls of `operation` with `err`.
    pub fn fail_next(&self, operation: &'static str, err: ServiceError, times: usize) {
        self.script.push(operation, err, times);
    }

    /// Pretend a function already exists remotely, running as `role_arn`.
    pub fn insert_existing(&self, function_name: &str, role_arn: &str) {
        lock(&self.functions).insert(
            function_name.to_string(),
            FunctionSnapshot {
                function_name: function_name.to_string(),
                arn: function_arn(function_name),
                role: Some(role_arn.to_string()),
                memory_size: None,
                timeout: None,
            },
        );
    }

    pub fn exists(&self, function_name: &str) -> bool {
        lock(&self.functions).contains_key(function_name)
    }

    pub fn calls(&self) -> Vec<FunctionCall> {
        lock(&self.calls).clone()
    }

    pub fn creates(&self) -> usize {
        self.count(|call| matches!(call, FunctionCall::Create(_)))
    }

    pub fn code_updates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                FunctionCall::UpdateCode { code, .. } => Some(code),
                _ => None,
            })
            .collect()
    }

    pub fn configuration_updates(&self) -> Vec<ConfigurationUpdate> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                FunctionCall::UpdateConfiguration { update, .. } => Some(update),
                _ => None,
            })
            .collect()
    }

    pub fn deletes(&self) -> usize {
        self.count(|call| matches!(call, FunctionCall::Delete(_)))
    }

    fn count(&self, predicate: impl Fn(&FunctionCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: FunctionCall) {
        lock(&self.calls).push(call);
    }

    fn not_found(function_name: &str) -> ServiceError {
        ServiceError::NotFound(format!("Function not found: {function_name}"))
    }
}

#[async_trait]
impl FunctionClient for FakeFunctionClient {
    async fn create_function(&self, spec: &FunctionSpec) -> Result<CreatedFunction, ServiceError> {
        self.record(FunctionCall::Create(spec.clone()));
        self.script.next(CREATE_FUNCTION)?;

        let mut functions = lock(&self.functions);
        if functions.contains_key(&spec.function_name) {
            return Err(ServiceError::AlreadyExists(format!(
                "Function already exist: {}",
                spec.function_name
            )));
        }

        let arn: String = function_arn(&spec.function_name);
        functions.insert(
            spec.function_name.clone(),
            FunctionSnapshot {
                function_name: spec.function_name.clone(),
                arn: arn.clone(),
                role: Some(spec.role_arn.clone()),
                memory_size: spec.memory_megabytes,
                timeout: spec.timeout_seconds,
            },
        );

        Ok(CreatedFunction { arn })
    }

    async fn update_function_code(
        &self,
        function_name: &str,
        code: &str,
    ) -> Result<(), ServiceError> {
        self.record(FunctionCall::UpdateCode {
            function_name: function_name.to_string(),
            code: code.to_string(),
        });
        self.script.next(UPDATE_FUNCTION_CODE)?;

        match lock(&self.functions).contains_key(function_name) {
            true => Ok(()),
            false => Err(Self::not_found(function_name)),
        }
    }

    async fn update_function_configuration(
        &self,
        function_name: &str,
        update: &ConfigurationUpdate,
    ) -> Result<(), ServiceError> {
        self.record(FunctionCall::UpdateConfiguration {
            function_name: function_name.to_string(),
            update: update.clone(),
        });
        self.script.next(UPDATE_FUNCTION_CONFIGURATION)?;

        let mut functions = lock(&self.functions);
        let function: &mut FunctionSnapshot = functions
            .get_mut(function_name)
            .ok_or_else(|| Self::not_found(function_name))?;

        function.memory_size = update.memory_size.or(function.memory_size);
        function.timeout = update.timeout.or(function.timeout);

        Ok(())
    }

    async fn delete_function(&self, function_name: &str) -> Result<(), ServiceError> {
        self.record(FunctionCall::Delete(function_name.to_string()));
        self.script.next(DELETE_FUNCTION)?;

        lock(&self.functions).remove(function_name);

        Ok(())
    }

    async fn get_function(&self, function_name: &str) -> Result<FunctionSnapshot, ServiceError> {
        self.record(FunctionCall::Get(function_name.to_string()));
        self.script.next(GET_FUNCTION)?;

        lock(&self.functions)
            .get(function_name)
            .cloned()
            .ok_or_else(|| Self::not_found(function_name))
    }
}

/// Hands out a role ARN derived from the role name, counting calls.
#[derive(Default)]
pub struct FakeRoleClient {
    calls: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
    script: Script,
}

impl FakeRoleClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, err: ServiceError, times: usize) {
        self.script.push("ensure_role", err, times);
    }

    /// Keep every call in flight for `delay` before it answers.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl RoleClient for FakeRoleClient {
    async fn ensure_role(&self, role_name: &str) -> Result<String, ServiceError> {
        lock(&self.calls).push(role_name.to_string());

        let delay: Option<Duration> = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.script.next("ensure_role")?;

        Ok(role_arn(role_name))
    }
}

#[derive(Default)]
pub struct FakeLogRetentionClient {
    calls: Mutex<Vec<(String, u32)>>,
}

impl FakeLogRetentionClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, u32)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl LogRetentionClient for FakeLogRetentionClient {
    async fn put_retention(&self, function_name: &str, days: u32) -> Result<(), ServiceError> {
        lock(&self.calls).push((function_name.to_string(), days));

        Ok(())
    }
}

/// A message captured by [`RecordingDispatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub group_id: String,
    pub deduplication_id: String,
    pub payload: String,
}

#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn send_message(
        &self,
        group_id: &str,
        deduplication_id: &str,
        payload: String,
    ) -> Result<(), ServiceError> {
        lock(&self.sent).push(SentMessage {
            group_id: group_id.to_string(),
            deduplication_id: deduplication_id.to_string(),
            payload,
        });

        Ok(())
    }
}
