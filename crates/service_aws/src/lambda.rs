use crate::bundle::{bundle_code, HANDLER};
use crate::classify;
use async_trait::async_trait;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::{Architecture, FunctionCode, Runtime};
use service::{
    ConfigurationUpdate, CreatedFunction, FunctionClient, FunctionSnapshot, FunctionSpec,
    ServiceError,
};

pub const DEFAULT_RUNTIME: &str = "nodejs18.x";
pub const DEFAULT_ARCHITECTURE: &str = "arm64";

/// Manages functions through the AWS Lambda API.
#[derive(Clone)]
pub struct LambdaFunctionClient {
    lambda: aws_sdk_lambda::Client,
    runtime: Runtime,
    architecture: Architecture,
}

impl LambdaFunctionClient {
    pub fn new(lambda: aws_sdk_lambda::Client) -> Self {
        LambdaFunctionClient {
            lambda,
            runtime: Runtime::from(DEFAULT_RUNTIME),
            architecture: Architecture::from(DEFAULT_ARCHITECTURE),
        }
    }

    pub fn with_runtime(mut self, runtime: &str) -> Self {
        self.runtime = Runtime::from(runtime);
        self
    }

    pub fn with_architecture(mut self, architecture: &str) -> Self {
        self.architecture = Architecture::from(architecture);
        self
    }
}

// On an existing function a conflict means another update is still being applied
fn update_in_progress(err: ServiceError) -> ServiceError {
    match err {
        ServiceError::AlreadyExists(message) => ServiceError::Transient(message),
        other => other,
    }
}

fn to_i32(value: Option<u32>) -> Option<i32> {
    value.and_then(|value| i32::try_from(value).ok())
}

#[async_trait]
impl FunctionClient for LambdaFunctionClient {
    async fn create_function(&self, spec: &FunctionSpec) -> Result<CreatedFunction, ServiceError> {
        tracing::info!(function_name = spec.function_name, "Creating function");

        let code: FunctionCode = FunctionCode::builder()
            .zip_file(Blob::new(bundle_code(&spec.code)?))
            .build();

        let output = self
            .lambda
            .create_function()
            .function_name(&spec.function_name)
            .role(&spec.role_arn)
            .runtime(self.runtime.clone())
            .architectures(self.architecture.clone())
            .handler(HANDLER)
            .code(code)
            .set_memory_size(to_i32(spec.memory_megabytes))
            .set_timeout(to_i32(spec.timeout_seconds))
            .send()
            .await
            .map_err(classify)?;

        let arn: String = output.function_arn.ok_or_else(|| {
            ServiceError::Permanent(format!(
                "No ARN returned for function {}",
                spec.function_name
            ))
        })?;

        Ok(CreatedFunction { arn })
    }

    async fn update_function_code(
        &self,
        function_name: &str,
        code: &str,
    ) -> Result<(), ServiceError> {
        tracing::info!(function_name, "Updating function code");

        self.lambda
            .update_function_code()
            .function_name(function_name)
            .zip_file(Blob::new(bundle_code(code)?))
            .send()
            .await
            .map_err(|err| update_in_progress(classify(err)))?;

        Ok(())
    }

    async fn update_function_configuration(
        &self,
        function_name: &str,
        update: &ConfigurationUpdate,
    ) -> Result<(), ServiceError> {
        tracing::info!(function_name, ?update, "Updating function configuration");

        self.lambda
            .update_function_configuration()
            .function_name(function_name)
            .set_memory_size(to_i32(update.memory_size))
            .set_timeout(to_i32(update.timeout))
            .send()
            .await
            .map_err(|err| update_in_progress(classify(err)))?;

        Ok(())
    }

    async fn delete_function(&self, function_name: &str) -> Result<(), ServiceError> {
        tracing::info!(function_name, "Deleting function");

        match self
            .lambda
            .delete_function()
            .function_name(function_name)
            .send()
            .await
            .map_err(|err| update_in_progress(classify(err)))
        {
            Ok(_) => Ok(()),
            // Already gone is what we wanted
            Err(ServiceError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn get_function(&self, function_name: &str) -> Result<FunctionSnapshot, ServiceError> {
        let output = self
            .lambda
            .get_function()
            .function_name(function_name)
            .send()
            .await
            .map_err(classify)?;

        let configuration = output.configuration.ok_or_else(|| {
            ServiceError::Permanent(format!("No configuration returned for {function_name}"))
        })?;

        Ok(FunctionSnapshot {
            function_name: configuration
                .function_name
                .unwrap_or_else(|| function_name.to_string()),
            arn: configuration.function_arn.unwrap_or_default(),
            role: configuration.role,
            memory_size: configuration
                .memory_size
                .and_then(|memory| u32::try_from(memory).ok()),
            timeout: configuration
                .timeout
                .and_then(|timeout| u32::try_from(timeout).ok()),
        })
    }
}
