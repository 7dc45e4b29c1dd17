use aws_lambda_events::sqs::{BatchItemFailure, SqsBatchResponse, SqsEventObj, SqsMessageObj};
use lambda_runtime::tracing::instrument::Instrumented;
use lambda_runtime::tracing::{Instrument, Span};
use lambda_runtime::{tracing, LambdaEvent};
use model::Error;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;

/// Process every message of an SQS batch concurrently.
///
/// Messages whose handler fails are reported back in `batchItemFailures` so
/// only they are redelivered. The function *must* have
/// `ReportBatchItemFailures` enabled on its event source mapping.
pub async fn batch_handler<Handler, Body, Fut>(
    handler: Handler,
    event: LambdaEvent<SqsEventObj<Body>>,
) -> Result<SqsBatchResponse, Error>
where
    Handler: Fn(Body) -> Fut,
    Fut: Future<Output = Result<(), Error>>,
    Body: DeserializeOwned + Serialize + Clone,
{
    let records: Vec<SqsMessageObj<Body>> = event.payload.records;

    tracing::info!("Handling batch of [{}] from SQS", records.len());

    // Start a task for each SQS message
    let (ids, tasks): (Vec<String>, Vec<_>) = records
        .into_iter()
        .map(|message: SqsMessageObj<Body>| {
            // We need to keep the message_id to report failures to SQS
            let message_id: String = message.message_id.unwrap_or_default();
            let body: Body = message.body;

            let message_span: Span =
                tracing::span!(tracing::Level::INFO, "SQS Handler", message_id);

            let task: Instrumented<_> = handler(body).instrument(message_span);

            (message_id, task)
        })
        .unzip();

    // Process all messages concurrently
    let results: Vec<Result<(), Error>> = futures::future::join_all(tasks).await;

    Ok(SqsBatchResponse {
        batch_item_failures: collect_batch_failures(ids.into_iter().zip(results)),
    })
}

fn collect_batch_failures(
    results: impl Iterator<Item = (String, Result<(), Error>)>,
) -> Vec<BatchItemFailure> {
    results
        .filter_map(|(message_id, result): (String, Result<(), Error>)| match result {
            Ok(()) => None,
            Err(err) => {
                tracing::error!("Failed to process msg {message_id}, {err}");

                Some(message_id)
            }
        })
        .map(|id| BatchItemFailure {
            item_identifier: id,
        })
        .collect()
}
