use async_trait::async_trait;
use model::Retryable;

/// Everything needed to create a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    pub function_name: String,
    pub code: String,
    pub role_arn: String,
    pub memory_megabytes: Option<u32>,
    pub timeout_seconds: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedFunction {
    pub arn: String,
}

/// Configuration fields to change, `None` leaves the remote value as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationUpdate {
    pub memory_size: Option<u32>,
    pub timeout: Option<u32>,
}

/// What the remote service currently reports for a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSnapshot {
    pub function_name: String,
    pub arn: String,
    /// Execution role the function runs as
    pub role: Option<String>,
    pub memory_size: Option<u32>,
    pub timeout: Option<u32>,
}

/// The remote compute service.
///
/// Deleting something which does not exist must succeed, every caller relies
/// on it to make deletion safe to repeat.
#[async_trait]
pub trait FunctionClient: Send + Sync {
    async fn create_function(&self, spec: &FunctionSpec) -> Result<CreatedFunction, ServiceError>;

    async fn update_function_code(&self, function_name: &str, code: &str)
        -> Result<(), ServiceError>;

    async fn update_function_configuration(
        &self,
        function_name: &str,
        update: &ConfigurationUpdate,
    ) -> Result<(), ServiceError>;

    async fn delete_function(&self, function_name: &str) -> Result<(), ServiceError>;

    async fn get_function(&self, function_name: &str) -> Result<FunctionSnapshot, ServiceError>;
}

/// The remote identity service.
#[async_trait]
pub trait RoleClient: Send + Sync {
    /// Return the ARN of the named role, creating it with the assume-role and
    /// logging policies when it does not exist yet.
    async fn ensure_role(&self, role_name: &str) -> Result<String, ServiceError>;
}

/// Retention of the logs a function writes.
#[async_trait]
pub trait LogRetentionClient: Send + Sync {
    async fn put_retention(&self, function_name: &str, days: u32) -> Result<(), ServiceError>;
}

/// Delivers operation results to whoever submitted them asynchronously.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// `group_id` orders messages of one resource key, `deduplication_id`
    /// identifies the invocation the message reports on.
    async fn send_message(
        &self,
        group_id: &str,
        deduplication_id: &str,
        payload: String,
    ) -> Result<(), ServiceError>;
}

/// Failures reported by a remote service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    // Throttling, outages and eventual consistency lag, worth another attempt
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
}

impl Retryable for ServiceError {
    fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(ServiceError::Transient("throttled".to_string()).is_transient());
        assert!(!ServiceError::Permanent("quota exceeded".to_string()).is_transient());
        assert!(!ServiceError::NotFound("fn".to_string()).is_transient());
    }

    #[test]
    fn permanent_failures_display_the_remote_message() {
        let err: ServiceError = ServiceError::Permanent("Code storage limit exceeded".to_string());

        assert_eq!("Code storage limit exceeded", err.to_string());
    }
}
