/// Stable name of the execution role shared by every provisioned function
pub const ROLE_NAME: &str = "FORMATION_ROLE_NAME";
/// Which record store to use, `dynamodb` or `memory`
pub const STATE_BACKEND: &str = "FORMATION_STATE_BACKEND";
/// DynamoDB table holding resource records and the effect journal
pub const STATE_TABLE: &str = "FORMATION_STATE_TABLE";
/// How events reach the handler, `direct` or `sqs`
pub const EVENT_SOURCE: &str = "FORMATION_EVENT_SOURCE";
/// Optional queue which receives operation results
pub const OUTPUT_QUEUE_URL: &str = "FORMATION_OUTPUT_QUEUE_URL";
/// Delay before the first retry of a failed side effect
pub const RETRY_INITIAL_DELAY_MS: &str = "FORMATION_RETRY_INITIAL_DELAY_MS";
/// Retries attempted after the first failure of a side effect
pub const RETRY_MAX_RETRIES: &str = "FORMATION_RETRY_MAX_RETRIES";
/// Upper bound on the backoff between retries
pub const RETRY_MAX_DELAY_MS: &str = "FORMATION_RETRY_MAX_DELAY_MS";
/// Runtime identifier for created functions
pub const FUNCTION_RUNTIME: &str = "FORMATION_FUNCTION_RUNTIME";
/// Instruction set for created functions
pub const FUNCTION_ARCHITECTURE: &str = "FORMATION_FUNCTION_ARCHITECTURE";
/// How long an invocation holds its key before another runtime may resume it
pub const LEASE_SECONDS: &str = "FORMATION_LEASE_SECONDS";
/// How long finished invocations stay in the journal
pub const JOURNAL_RETENTION_DAYS: &str = "FORMATION_JOURNAL_RETENTION_DAYS";
