use aws_config::{BehaviorVersion, SdkConfig};
use aws_lambda_events::sqs::SqsEventObj;
use formation::{EventSource, FormationConfig, FormationHandler, Provisioner, StateBackend};
use lambda_runtime::{service_fn, tracing, LambdaEvent};
use model::Error;
use service::Dispatcher;
use service_aws::{CloudWatchLogRetentionClient, IamRoleClient, LambdaFunctionClient, SqsDispatcher};
use state::{EffectJournal, StateStore};
use state_dynamodb::DynamoDbStateStore;
use state_in_memory::InMemoryStateStore;
use std::sync::Arc;
use workflow::{Invocation, KeyedRuntime};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing::init_default_subscriber();

    let config: FormationConfig = FormationConfig::from_env()?;
    let aws_config: SdkConfig = aws_config::load_defaults(BehaviorVersion::latest()).await;

    let (store, journal): (Arc<dyn StateStore>, Arc<dyn EffectJournal>) =
        match &config.state_backend {
            StateBackend::DynamoDb { table_name } => {
                let state: Arc<DynamoDbStateStore> = Arc::new(DynamoDbStateStore::new(
                    aws_sdk_dynamodb::Client::new(&aws_config),
                    table_name.clone(),
                ));
                (state.clone() as Arc<dyn StateStore>, state as Arc<dyn EffectJournal>)
            }
            StateBackend::InMemory => {
                tracing::warn!("Using in-memory state, nothing survives a restart");

                let state: Arc<InMemoryStateStore> = Arc::new(InMemoryStateStore::new());
                (state.clone() as Arc<dyn StateStore>, state as Arc<dyn EffectJournal>)
            }
        };

    let functions: LambdaFunctionClient =
        LambdaFunctionClient::new(aws_sdk_lambda::Client::new(&aws_config))
            .with_runtime(&config.function_runtime)
            .with_architecture(&config.function_architecture);

    let provisioner: Provisioner = Provisioner::new(
        Arc::new(functions),
        Arc::new(IamRoleClient::new(aws_sdk_iam::Client::new(&aws_config))),
        Arc::new(CloudWatchLogRetentionClient::new(
            aws_sdk_cloudwatchlogs::Client::new(&aws_config),
        )),
    )
    .with_role_name(config.role_name.clone())
    .with_retry_policy(config.retry.clone());

    let dispatcher: Option<Arc<dyn Dispatcher>> =
        config.output_queue_url.clone().map(|queue_url: String| {
            Arc::new(SqsDispatcher::new(
                aws_sdk_sqs::Client::new(&aws_config),
                queue_url,
            )) as Arc<dyn Dispatcher>
        });

    let handler: Arc<FormationHandler> = Arc::new(FormationHandler::new(
        KeyedRuntime::new(provisioner, store, journal)
            .with_lease_duration(config.lease)
            .with_journal_retention(config.journal_retention),
        dispatcher,
    ));

    // Finish what a previous instance left pending before taking new work
    handler.recover().await?;

    match config.event_source {
        EventSource::Direct => {
            lambda_runtime::run(service_fn(|event: LambdaEvent<Invocation>| {
                let handler: Arc<FormationHandler> = handler.clone();
                async move { handler.handle_direct(event).await }
            }))
            .await
        }
        EventSource::Sqs => {
            lambda_runtime::run(service_fn(|event: LambdaEvent<SqsEventObj<Invocation>>| {
                let handler: Arc<FormationHandler> = handler.clone();
                async move { handler.handle_sqs(event).await }
            }))
            .await
        }
    }
}
