use crate::classify;
use async_trait::async_trait;
use service::{Dispatcher, ServiceError};

/// Publishes operation results to an SQS queue.
///
/// FIFO queues get the resource key as message group so results of one
/// resource arrive in order, and the invocation id for deduplication.
#[derive(Clone)]
pub struct SqsDispatcher {
    pub sqs: aws_sdk_sqs::Client,
    pub queue_url: String,
}

impl SqsDispatcher {
    pub fn new(sqs: aws_sdk_sqs::Client, queue_url: String) -> Self {
        Self { sqs, queue_url }
    }

    fn is_fifo(&self) -> bool {
        self.queue_url.ends_with(".fifo")
    }
}

#[async_trait]
impl Dispatcher for SqsDispatcher {
    async fn send_message(
        &self,
        group_id: &str,
        deduplication_id: &str,
        payload: String,
    ) -> Result<(), ServiceError> {
        let mut request = self
            .sqs
            .send_message()
            .queue_url(self.queue_url.as_str())
            .message_body(payload);

        if self.is_fifo() {
            request = request
                .message_group_id(group_id)
                .message_deduplication_id(deduplication_id);
        }

        request.send().await.map_err(classify)?;

        Ok(())
    }
}
