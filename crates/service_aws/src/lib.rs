//! AWS backed implementations of the `service` interfaces.
//!
//! All clients share one error mapping: missing entities become `NotFound`,
//! duplicates `AlreadyExists`, throttling and server side trouble `Transient`,
//! everything else `Permanent`.

use aws_sdk_lambda::config::http::HttpResponse;
use aws_sdk_lambda::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use service::ServiceError;

mod bundle;
mod iam;
mod lambda;
mod logs;
mod sqs;

pub use bundle::{bundle_code, ENTRY_POINT, HANDLER};
pub use iam::IamRoleClient;
pub use lambda::{LambdaFunctionClient, DEFAULT_ARCHITECTURE, DEFAULT_RUNTIME};
pub use logs::CloudWatchLogRetentionClient;
pub use sqs::SqsDispatcher;

const NOT_FOUND_CODES: &[&str] = &[
    "ResourceNotFoundException",
    "NoSuchEntity",
    "NoSuchEntityException",
];

const ALREADY_EXISTS_CODES: &[&str] = &[
    "ResourceConflictException",
    "EntityAlreadyExists",
    "EntityAlreadyExistsException",
    "ResourceAlreadyExistsException",
];

const TRANSIENT_CODES: &[&str] = &[
    "TooManyRequestsException",
    "ThrottlingException",
    "Throttling",
    "ServiceException",
    "ServiceUnavailableException",
    "ServiceFailure",
    "ServiceFailureException",
    "ConcurrentModification",
    "ConcurrentModificationException",
    "OperationAbortedException",
    "EC2ThrottledException",
    "ResourceNotReadyException",
];

/// Map an SDK failure onto the service error taxonomy.
pub(crate) fn classify<E>(err: SdkError<E, HttpResponse>) -> ServiceError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ServiceError::Transient(DisplayErrorContext(&err).to_string())
        }
        SdkError::ServiceError(context) => {
            let code: &str = context.err().code().unwrap_or_default();
            let message: String = context
                .err()
                .message()
                .map(|message| format!("{code}: {message}"))
                .unwrap_or_else(|| code.to_string());
            let status: u16 = context.raw().status().as_u16();

            if NOT_FOUND_CODES.contains(&code) {
                ServiceError::NotFound(message)
            } else if ALREADY_EXISTS_CODES.contains(&code) {
                ServiceError::AlreadyExists(message)
            } else if TRANSIENT_CODES.contains(&code) || status == 429 || status >= 500 {
                ServiceError::Transient(message)
            } else if is_role_propagation_lag(code, &message) {
                // A freshly created role takes a few seconds to become assumable
                ServiceError::Transient(message)
            } else {
                ServiceError::Permanent(message)
            }
        }
        _ => ServiceError::Permanent(DisplayErrorContext(&err).to_string()),
    }
}

fn is_role_propagation_lag(code: &str, message: &str) -> bool {
    code == "InvalidParameterValueException" && message.contains("cannot be assumed")
}
