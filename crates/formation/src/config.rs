use crate::provisioner::DEFAULT_ROLE_NAME;
use model::env;
use service_aws::{DEFAULT_ARCHITECTURE, DEFAULT_RUNTIME};
use std::str::FromStr;
use std::time::Duration;
use workflow::{RetryPolicy, DEFAULT_JOURNAL_RETENTION_DAYS, DEFAULT_LEASE_SECONDS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateBackend {
    DynamoDb { table_name: String },
    InMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    /// The event is a single invocation
    Direct,
    /// The event is a batch of invocations from SQS
    Sqs,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing {0} environment variable")]
    Missing(&'static str),
    #[error("Invalid value {value:?} for {name}")]
    Invalid { name: &'static str, value: String },
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct FormationConfig {
    pub role_name: String,
    pub state_backend: StateBackend,
    pub event_source: EventSource,
    pub output_queue_url: Option<String>,
    pub retry: RetryPolicy,
    pub lease: chrono::Duration,
    pub journal_retention: chrono::Duration,
    pub function_runtime: String,
    pub function_architecture: String,
}

impl FormationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name: &str| std::env::var(name).ok())
    }

    /// Build the configuration from any variable source, blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let state_backend: StateBackend = match var(env::STATE_BACKEND).as_deref() {
            None | Some("dynamodb") => StateBackend::DynamoDb {
                table_name: var(env::STATE_TABLE).ok_or(ConfigError::Missing(env::STATE_TABLE))?,
            },
            Some("memory") => StateBackend::InMemory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: env::STATE_BACKEND,
                    value: other.to_string(),
                })
            }
        };

        let event_source: EventSource = match var(env::EVENT_SOURCE).as_deref() {
            None | Some("direct") => EventSource::Direct,
            Some("sqs") => EventSource::Sqs,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: env::EVENT_SOURCE,
                    value: other.to_string(),
                })
            }
        };

        let defaults: RetryPolicy = RetryPolicy::default();
        let retry: RetryPolicy = RetryPolicy::default()
            .with_initial_delay(Duration::from_millis(parse_or(
                &var,
                env::RETRY_INITIAL_DELAY_MS,
                defaults.initial_delay.as_millis() as u64,
            )?))
            .with_max_retries(parse_or(&var, env::RETRY_MAX_RETRIES, defaults.max_retries)?)
            .with_max_delay(Duration::from_millis(parse_or(
                &var,
                env::RETRY_MAX_DELAY_MS,
                defaults.max_delay.as_millis() as u64,
            )?));

        Ok(FormationConfig {
            role_name: var(env::ROLE_NAME).unwrap_or_else(|| DEFAULT_ROLE_NAME.to_string()),
            state_backend,
            event_source,
            output_queue_url: var(env::OUTPUT_QUEUE_URL),
            retry,
            lease: chrono::Duration::seconds(parse_or(
                &var,
                env::LEASE_SECONDS,
                DEFAULT_LEASE_SECONDS,
            )?),
            journal_retention: chrono::Duration::days(parse_or(
                &var,
                env::JOURNAL_RETENTION_DAYS,
                DEFAULT_JOURNAL_RETENTION_DAYS,
            )?),
            function_runtime: var(env::FUNCTION_RUNTIME)
                .unwrap_or_else(|| DEFAULT_RUNTIME.to_string()),
            function_architecture: var(env::FUNCTION_ARCHITECTURE)
                .unwrap_or_else(|| DEFAULT_ARCHITECTURE.to_string()),
        })
    }
}

fn parse_or<T: FromStr>(
    var: impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
