use crate::classify;
use async_trait::async_trait;
use service::{LogRetentionClient, ServiceError};

fn log_group_name(function_name: &str) -> String {
    format!("/aws/lambda/{function_name}")
}

/// Sets retention on the log group a function writes to.
#[derive(Clone)]
pub struct CloudWatchLogRetentionClient {
    logs: aws_sdk_cloudwatchlogs::Client,
}

impl CloudWatchLogRetentionClient {
    pub fn new(logs: aws_sdk_cloudwatchlogs::Client) -> Self {
        CloudWatchLogRetentionClient { logs }
    }

    async fn put_policy(&self, log_group: &str, days: u32) -> Result<(), ServiceError> {
        let days: i32 = i32::try_from(days)
            .map_err(|_| ServiceError::Permanent(format!("Invalid retention of {days} days")))?;

        self.logs
            .put_retention_policy()
            .log_group_name(log_group)
            .retention_in_days(days)
            .send()
            .await
            .map_err(classify)?;

        Ok(())
    }
}

#[async_trait]
impl LogRetentionClient for CloudWatchLogRetentionClient {
    async fn put_retention(&self, function_name: &str, days: u32) -> Result<(), ServiceError> {
        let log_group: String = log_group_name(function_name);
        tracing::info!(log_group, days, "Setting log retention");

        match self.put_policy(&log_group, days).await {
            Err(ServiceError::NotFound(_)) => {}
            result => return result,
        }

        // The group only appears once the function first logs, so create it up front
        match self
            .logs
            .create_log_group()
            .log_group_name(&log_group)
            .send()
            .await
            .map_err(classify)
        {
            Ok(_) | Err(ServiceError::AlreadyExists(_)) => {}
            Err(err) => return Err(err),
        }

        self.put_policy(&log_group, days).await
    }
}
