use crate::provisioner::{ProvisioningError, Provisioner};
use aws_lambda_events::sqs::{SqsBatchResponse, SqsEventObj};
use lambda_runtime::{tracing, LambdaEvent};
use model::{Error, OperationKind, Retryable};
use serde::Serialize;
use service::Dispatcher;
use std::sync::Arc;
use workflow::{batch_handler, Invocation, KeyedRuntime, Recovered, RuntimeError};

/// What gets published for every finished invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub invocation_id: String,
    pub function_name: String,
    pub operation: OperationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Lambda entry points in front of the keyed runtime.
pub struct FormationHandler {
    runtime: KeyedRuntime<Provisioner>,
    // Receives outcomes when an output queue is configured
    dispatcher: Option<Arc<dyn Dispatcher>>,
}

impl FormationHandler {
    pub fn new(
        runtime: KeyedRuntime<Provisioner>,
        dispatcher: Option<Arc<dyn Dispatcher>>,
    ) -> Self {
        FormationHandler {
            runtime,
            dispatcher,
        }
    }

    pub fn runtime(&self) -> &KeyedRuntime<Provisioner> {
        &self.runtime
    }

    /// Run one invocation and publish its outcome.
    ///
    /// Transient failures are not published, the invocation stays pending and
    /// will be retried.
    pub async fn invoke(&self, mut invocation: Invocation) -> Result<serde_json::Value, Error> {
        // Fix the id up front so the published outcome can be deduplicated
        let invocation_id: String = invocation
            .invocation_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone();
        let key: String = invocation.key.clone();
        let operation: OperationKind = invocation.operation;

        let result: Result<serde_json::Value, RuntimeError<ProvisioningError>> =
            self.runtime.submit(invocation).await;

        let outcome: Option<OperationOutcome> = match &result {
            Err(err) if err.is_transient() => None,
            Ok(value) => Some(OperationOutcome {
                invocation_id,
                function_name: key,
                operation,
                result: Some(value.clone()),
                error: None,
            }),
            Err(err) => Some(OperationOutcome {
                invocation_id,
                function_name: key,
                operation,
                result: None,
                error: Some(err.to_string()),
            }),
        };

        if let Some(outcome) = outcome {
            self.publish(&outcome).await?;
        }

        result.map_err(Error::from)
    }

    /// Handle a direct invocation, returning the operation result.
    pub async fn handle_direct(
        &self,
        event: LambdaEvent<Invocation>,
    ) -> Result<serde_json::Value, Error> {
        self.invoke(event.payload).await
    }

    /// Handle a batch of invocations delivered by SQS.
    pub async fn handle_sqs(
        &self,
        event: LambdaEvent<SqsEventObj<Invocation>>,
    ) -> Result<SqsBatchResponse, Error> {
        batch_handler(
            move |invocation: Invocation| async move { self.invoke(invocation).await.map(|_| ()) },
            event,
        )
        .await
    }

    /// Resume whatever a previous process left pending.
    pub async fn recover(&self) -> Result<(), Error> {
        let recovered: Vec<Recovered<ProvisioningError>> = self.runtime.recover().await?;

        for invocation in recovered {
            match invocation.result {
                Ok(_) => tracing::info!(
                    invocation_id = invocation.invocation_id,
                    key = invocation.key,
                    "Recovered invocation"
                ),
                Err(err) => tracing::error!(
                    invocation_id = invocation.invocation_id,
                    key = invocation.key,
                    "Recovered invocation failed: {err}"
                ),
            }
        }

        Ok(())
    }

    async fn publish(&self, outcome: &OperationOutcome) -> Result<(), Error> {
        let Some(dispatcher) = &self.dispatcher else {
            return Ok(());
        };

        dispatcher
            .send_message(
                &outcome.function_name,
                &outcome.invocation_id,
                serde_json::to_string(outcome)?,
            )
            .await?;

        Ok(())
    }
}
