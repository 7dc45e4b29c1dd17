use crate::status::{check_transition, parse_status, Rejection};
use crate::validate::{validate_create, validate_update, ValidationError};
use async_trait::async_trait;
use lambda_runtime::tracing;
use model::function::{
    CreateFunction, DescribeResult, FunctionConfiguration, OperationResult, UpdateFunction,
};
use model::{OperationKind, ProvisioningStatus, Retryable};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use service::{
    ConfigurationUpdate, FunctionClient, FunctionSnapshot, FunctionSpec, LogRetentionClient,
    RoleClient, ServiceError,
};
use state::{StateError, CONFIGURATION, FUNCTION_ARN, ROLE_REFERENCE, STATUS};
use std::sync::Arc;
use workflow::{ExecutionError, InvocationHandler, OperationContext, RetryPolicy};

pub const DEFAULT_ROLE_NAME: &str = "formation-fn-execution-role";

// Journaled step names
const OBSERVE_STATUS: &str = "observe-status";
const ENSURE_ROLE: &str = "ensure-role";
const CREATE_FUNCTION: &str = "create-function";
const PUT_LOG_RETENTION: &str = "put-log-retention";
const UPDATE_CODE: &str = "update-function-code";
const UPDATE_CONFIGURATION: &str = "update-function-configuration";
const DELETE_FUNCTION: &str = "delete-function";

#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Unexpected state for {key}: {detail}")]
    UnexpectedState { key: String, detail: String },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    NotReady(String),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("failed to (de)serialize: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Retryable for ProvisioningError {
    fn is_transient(&self) -> bool {
        match self {
            ProvisioningError::Execution(err) => err.is_transient(),
            ProvisioningError::State(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// Drives functions through their lifecycle.
///
/// Every mutating operation first journals the status it observed, so a
/// replay takes the same branch even though the operation itself already
/// moved the status on. External actions then run as journaled side effects
/// and the outcome is committed to the record store last.
pub struct Provisioner {
    functions: Arc<dyn FunctionClient>,
    roles: Arc<dyn RoleClient>,
    log_retention: Arc<dyn LogRetentionClient>,
    role_name: String,
    retry: RetryPolicy,
}

impl Provisioner {
    pub fn new(
        functions: Arc<dyn FunctionClient>,
        roles: Arc<dyn RoleClient>,
        log_retention: Arc<dyn LogRetentionClient>,
    ) -> Self {
        Provisioner {
            functions,
            roles,
            log_retention,
            role_name: DEFAULT_ROLE_NAME.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_role_name(mut self, role_name: impl Into<String>) -> Self {
        self.role_name = role_name.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn create(
        &self,
        ctx: &OperationContext,
        payload: &Value,
    ) -> Result<OperationResult, ProvisioningError> {
        let request: CreateFunction = validate_create(ctx.key(), payload)?;

        tracing::info!(?request, "Creating function");

        let status: ProvisioningStatus = self.observe_status(ctx).await?;
        if let Err(rejection) = check_transition(OperationKind::Create, status) {
            return Ok(reject(ctx, rejection, status));
        }

        ctx.set(STATUS, json!(ProvisioningStatus::Provisioning)).await?;

        let role_arn: String = match ctx
            .side_effect(ENSURE_ROLE, &self.retry, || {
                self.roles.ensure_role(&self.role_name)
            })
            .await
        {
            Ok(role_arn) => role_arn,
            Err(err) => return self.fail(ctx, err).await,
        };

        let spec: FunctionSpec = FunctionSpec {
            function_name: request.function_name.clone(),
            code: request.code.clone(),
            role_arn: role_arn.clone(),
            memory_megabytes: request.memory_megabytes,
            timeout_seconds: request.timeout_seconds,
        };
        let placement: Placement = match ctx
            .side_effect(CREATE_FUNCTION, &self.retry, || self.create_or_adopt(&spec))
            .await
        {
            Ok(placement) => placement,
            Err(err) => return self.fail(ctx, err).await,
        };

        if placement.adopted.is_some() {
            if let Err(err) = self.reconcile(ctx, &spec, &placement).await {
                return self.fail(ctx, err).await;
            }
        }
        let function_arn: String = placement.arn;

        if let Some(days) = request.log_retention_days {
            if let Err(err) = self.put_log_retention(ctx, days).await {
                return self.fail(ctx, err).await;
            }
        }

        let configuration: FunctionConfiguration = FunctionConfiguration::from(&request);
        ctx.set_many(vec![
            (STATUS, json!(ProvisioningStatus::Available)),
            (CONFIGURATION, serde_json::to_value(&configuration)?),
            (ROLE_REFERENCE, json!(role_arn)),
            (FUNCTION_ARN, json!(function_arn)),
        ])
        .await?;

        tracing::info!(function_arn, "Function available");

        Ok(OperationResult::succeeded_with(function_arn))
    }

    pub async fn update(
        &self,
        ctx: &OperationContext,
        payload: &Value,
    ) -> Result<OperationResult, ProvisioningError> {
        let request: UpdateFunction = validate_update(ctx.key(), payload)?;

        tracing::info!(?request, "Updating function");

        let status: ProvisioningStatus = self.observe_status(ctx).await?;
        if let Err(rejection) = check_transition(OperationKind::Update, status) {
            return Ok(reject(ctx, rejection, status));
        }

        let current: FunctionConfiguration = self.snapshot(ctx).await?;

        if let Some(code) = request.code.as_deref().filter(|code| *code != current.code) {
            let updated = ctx
                .side_effect(UPDATE_CODE, &self.retry, || {
                    self.functions.update_function_code(ctx.key(), code)
                })
                .await;

            if let Err(err) = updated {
                return self.fail(ctx, err).await;
            }
        }

        if configuration_changed(&current, &request) {
            // Only what was submitted, omitted fields stay as they are remotely
            let update: ConfigurationUpdate = ConfigurationUpdate {
                memory_size: request.memory_megabytes,
                timeout: request.timeout_seconds,
            };
            let updated = ctx
                .side_effect(UPDATE_CONFIGURATION, &self.retry, || {
                    self.functions
                        .update_function_configuration(ctx.key(), &update)
                })
                .await;

            if let Err(err) = updated {
                return self.fail(ctx, err).await;
            }
        }

        if let Some(days) = request
            .log_retention_days
            .filter(|days| Some(*days) != current.log_retention_days)
        {
            if let Err(err) = self.put_log_retention(ctx, days).await {
                return self.fail(ctx, err).await;
            }
        }

        let configuration: FunctionConfiguration = current.apply(&request);
        ctx.set_many(vec![
            (STATUS, json!(ProvisioningStatus::Available)),
            (CONFIGURATION, serde_json::to_value(&configuration)?),
        ])
        .await?;

        Ok(OperationResult::succeeded())
    }

    pub async fn delete(
        &self,
        ctx: &OperationContext,
    ) -> Result<OperationResult, ProvisioningError> {
        let status: ProvisioningStatus = self.observe_status(ctx).await?;

        tracing::info!(%status, "Deleting function");

        if let Err(rejection) = check_transition(OperationKind::Delete, status) {
            return Ok(reject(ctx, rejection, status));
        }

        let deleted = ctx
            .side_effect(DELETE_FUNCTION, &self.retry, move || async move {
                match self.functions.delete_function(ctx.key()).await {
                    // Already gone is what we wanted
                    Err(ServiceError::NotFound(_)) => Ok(()),
                    result => result,
                }
            })
            .await;

        if let Err(err) = deleted {
            return self.fail(ctx, err).await;
        }

        ctx.set(STATUS, json!(ProvisioningStatus::Deleted)).await?;
        for field in [CONFIGURATION, ROLE_REFERENCE, FUNCTION_ARN] {
            ctx.clear(field).await?;
        }

        Ok(OperationResult::succeeded())
    }

    /// Return the last committed snapshot. Never contacts the compute service.
    pub async fn describe(
        &self,
        ctx: &OperationContext,
    ) -> Result<DescribeResult, ProvisioningError> {
        let stored: Option<Value> = ctx.get(STATUS).await?;
        let status: ProvisioningStatus = self.parse_status(ctx, stored.as_ref())?;

        match check_transition(OperationKind::Describe, status) {
            Ok(()) => {}
            Err(Rejection::NotReady) => {
                return Err(ProvisioningError::NotReady(
                    Rejection::NotReady.reason(ctx.key(), status),
                ))
            }
            Err(_) => {
                return Err(ProvisioningError::NotFound(format!(
                    "No such function: {}",
                    ctx.key()
                )))
            }
        }

        Ok(DescribeResult {
            success: true,
            status,
            configuration: self.snapshot(ctx).await?,
        })
    }

    /// Read the status once per invocation and journal it, so a replay sees
    /// what the first attempt saw.
    async fn observe_status(
        &self,
        ctx: &OperationContext,
    ) -> Result<ProvisioningStatus, ProvisioningError> {
        let stored: Option<Value> = ctx
            .side_effect(OBSERVE_STATUS, &self.retry, || ctx.get(STATUS))
            .await?;

        self.parse_status(ctx, stored.as_ref())
    }

    fn parse_status(
        &self,
        ctx: &OperationContext,
        stored: Option<&Value>,
    ) -> Result<ProvisioningStatus, ProvisioningError> {
        parse_status(stored).map_err(|raw| ProvisioningError::UnexpectedState {
            key: ctx.key().to_string(),
            detail: format!("unknown status {raw}"),
        })
    }

    async fn snapshot(
        &self,
        ctx: &OperationContext,
    ) -> Result<FunctionConfiguration, ProvisioningError> {
        match ctx.get(CONFIGURATION).await? {
            Some(stored) => Ok(serde_json::from_value(stored)?),
            None => Err(ProvisioningError::UnexpectedState {
                key: ctx.key().to_string(),
                detail: "available without a configuration snapshot".to_string(),
            }),
        }
    }

    async fn create_or_adopt(&self, spec: &FunctionSpec) -> Result<Placement, ServiceError> {
        let existing: FunctionSnapshot = match self.functions.create_function(spec).await {
            Ok(created) => {
                return Ok(Placement {
                    arn: created.arn,
                    adopted: None,
                })
            }
            // An earlier attempt created it but never got to journal the result
            Err(ServiceError::AlreadyExists(_)) => {
                self.functions.get_function(&spec.function_name).await?
            }
            Err(err) => return Err(err),
        };

        if existing.role.as_deref() != Some(spec.role_arn.as_str()) {
            return Err(ServiceError::Permanent(format!(
                "Function {} already exists with role {}",
                spec.function_name,
                existing.role.as_deref().unwrap_or("none"),
            )));
        }

        tracing::info!("Function exists already, adopting it");

        Ok(Placement {
            arn: existing.arn,
            adopted: Some(Adopted {
                memory_size: existing.memory_size,
                timeout: existing.timeout,
            }),
        })
    }

    /// Bring an adopted function in line with the create request.
    ///
    /// Code is always pushed since the remote code cannot be compared.
    async fn reconcile(
        &self,
        ctx: &OperationContext,
        spec: &FunctionSpec,
        placement: &Placement,
    ) -> Result<(), ExecutionError> {
        tracing::info!(function_arn = placement.arn, "Reconciling adopted function");

        ctx.side_effect(UPDATE_CODE, &self.retry, || {
            self.functions
                .update_function_code(&spec.function_name, &spec.code)
        })
        .await?;

        let remote: Option<&Adopted> = placement.adopted.as_ref();
        let update: ConfigurationUpdate = ConfigurationUpdate {
            memory_size: spec
                .memory_megabytes
                .filter(|memory| Some(*memory) != remote.and_then(|remote| remote.memory_size)),
            timeout: spec
                .timeout_seconds
                .filter(|timeout| Some(*timeout) != remote.and_then(|remote| remote.timeout)),
        };

        if update != ConfigurationUpdate::default() {
            ctx.side_effect(UPDATE_CONFIGURATION, &self.retry, || {
                self.functions
                    .update_function_configuration(&spec.function_name, &update)
            })
            .await?;
        }

        Ok(())
    }

    async fn put_log_retention(
        &self,
        ctx: &OperationContext,
        days: u32,
    ) -> Result<(), ExecutionError> {
        ctx.side_effect(PUT_LOG_RETENTION, &self.retry, || {
            self.log_retention.put_retention(ctx.key(), days)
        })
        .await
    }

    /// A side effect failed for good. Mark the key failed and report the
    /// failure as a result, anything else aborts the call.
    async fn fail(
        &self,
        ctx: &OperationContext,
        err: ExecutionError,
    ) -> Result<OperationResult, ProvisioningError> {
        match err {
            ExecutionError::StepFailed { name, reason, .. } => {
                tracing::error!(step = name, "Provisioning failed: {reason}");

                ctx.set(STATUS, json!(ProvisioningStatus::Failed)).await?;

                Ok(OperationResult::rejected(reason))
            }
            err => Err(err.into()),
        }
    }
}

/// Journaled outcome of the create step.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Placement {
    arn: String,
    /// Set when the function existed already, with what it reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    adopted: Option<Adopted>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Adopted {
    memory_size: Option<u32>,
    timeout: Option<u32>,
}

fn reject(
    ctx: &OperationContext,
    rejection: Rejection,
    status: ProvisioningStatus,
) -> OperationResult {
    let reason: String = rejection.reason(ctx.key(), status);

    tracing::info!(%status, "Rejected: {reason}");

    OperationResult::rejected(reason)
}

fn configuration_changed(current: &FunctionConfiguration, request: &UpdateFunction) -> bool {
    let memory_changed: bool = request
        .memory_megabytes
        .is_some_and(|memory| Some(memory) != current.memory_megabytes);
    let timeout_changed: bool = request
        .timeout_seconds
        .is_some_and(|timeout| Some(timeout) != current.timeout_seconds);

    memory_changed || timeout_changed
}

#[async_trait]
impl InvocationHandler for Provisioner {
    type Error = ProvisioningError;

    async fn handle(
        &self,
        ctx: &OperationContext,
        operation: OperationKind,
        request: &Value,
    ) -> Result<Value, ProvisioningError> {
        let result: Value = match operation {
            OperationKind::Create => serde_json::to_value(self.create(ctx, request).await?)?,
            OperationKind::Update => serde_json::to_value(self.update(ctx, request).await?)?,
            OperationKind::Delete => serde_json::to_value(self.delete(ctx).await?)?,
            OperationKind::Describe => serde_json::to_value(self.describe(ctx).await?)?,
        };

        Ok(result)
    }
}
