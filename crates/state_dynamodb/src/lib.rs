use crate::item::{
    invocation_sort_key, partition, primary_key, step_sort_key, steps_prefix,
    EXPIRES_AT_ATTRIBUTE, INVOCATION_PREFIX, LEASE_ATTRIBUTE, PARTITION_KEY, RECORD_SORT_KEY,
    SORT_KEY,
};
use async_trait::async_trait;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::update_item::UpdateItemError;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::Utc;
use model::invocation::InvocationRecord;
use model::lease::Lease;
use model::step::StepRecord;
use model::InvocationId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use state::StateErrorReason::{BackendFailure, BadState, Conflict};
use state::StateOperation::{
    AcquireLease, AppendStep, ClearField, FinishInvocation, GetField, GetInvocation, GetStep,
    InsertInvocation, ListInvocations, ReleaseLease, SetField,
};
use state::{EffectJournal, StateError, StateOperation, StateStore};
use std::collections::HashMap;

mod item;

type Item = HashMap<String, AttributeValue>;

const LEASE_ATTEMPTS: usize = 3;

/// Record store and effect journal backed by one DynamoDB table.
///
/// The table needs a string partition key `pk` and a string sort key `sk`.
#[derive(Clone)]
pub struct DynamoDbStateStore {
    table_name: String,
    dynamodb_client: aws_sdk_dynamodb::Client,
    consistent_read: bool,
}

impl DynamoDbStateStore {
    pub fn new(dynamodb_client: aws_sdk_dynamodb::Client, table_name: impl Into<String>) -> Self {
        DynamoDbStateStore {
            table_name: table_name.into(),
            dynamodb_client,
            consistent_read: true,
        }
    }

    /// Eventually consistent reads are cheaper but may observe a stale status.
    pub fn with_consistent_read(mut self, consistent_read: bool) -> Self {
        self.consistent_read = consistent_read;
        self
    }

    async fn get_item(
        &self,
        key: &str,
        sort_key: String,
        operation: StateOperation,
    ) -> Result<Option<Item>, StateError> {
        let output = self
            .dynamodb_client
            .get_item()
            .table_name(&self.table_name)
            .consistent_read(self.consistent_read)
            .set_key(Some(primary_key(key, sort_key)))
            .send()
            .await
            .map_err(|err| StateError::new(key, operation, BackendFailure(err.into())))?;

        Ok(output.item)
    }

    async fn put_item<T: Serialize>(
        &self,
        key: &str,
        sort_key: String,
        value: &T,
        operation: StateOperation,
    ) -> Result<(), StateError> {
        let mut item: Item = to_item(key, value, operation)?;
        item.extend(primary_key(key, sort_key));

        let request = self
            .dynamodb_client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item));

        let request = match operation {
            AppendStep | InsertInvocation => request
                .condition_expression("attribute_not_exists(#sk)")
                .expression_attribute_names("#sk", SORT_KEY),
            FinishInvocation => request
                .condition_expression("#state.#status = :pending")
                .expression_attribute_names("#state", "state")
                .expression_attribute_names("#status", "status")
                .expression_attribute_values(":pending", AttributeValue::S("PENDING".to_string())),
            _ => request,
        };

        request.send().await.map_err(|err| {
            let conflict: bool = err
                .as_service_error()
                .map(|service_err| service_err.is_conditional_check_failed_exception())
                .unwrap_or(false);

            if conflict {
                StateError::new(key, operation, Conflict)
            } else {
                StateError::new(key, operation, BackendFailure(err.into()))
            }
        })?;

        Ok(())
    }

    async fn update_record(
        &self,
        key: &str,
        update_expression: String,
        names: HashMap<String, String>,
        values: Option<Item>,
        operation: StateOperation,
    ) -> Result<(), StateError> {
        self.dynamodb_client
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(primary_key(key, RECORD_SORT_KEY.to_string())))
            .update_expression(update_expression)
            .set_expression_attribute_names(Some(names))
            .set_expression_attribute_values(values)
            .send()
            .await
            .map_err(|err| StateError::new(key, operation, BackendFailure(err.into())))?;

        Ok(())
    }

    /// Sort keys of every journaled step of an invocation.
    async fn step_sort_keys(
        &self,
        key: &str,
        invocation_id: &str,
    ) -> Result<Vec<String>, StateError> {
        let mut sort_keys: Vec<String> = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let output = self
                .dynamodb_client
                .query()
                .table_name(&self.table_name)
                .consistent_read(self.consistent_read)
                .key_condition_expression("#pk = :pk AND begins_with(#sk, :prefix)")
                .projection_expression("#sk")
                .expression_attribute_names("#pk", PARTITION_KEY)
                .expression_attribute_names("#sk", SORT_KEY)
                .expression_attribute_values(":pk", AttributeValue::S(partition(key)))
                .expression_attribute_values(
                    ":prefix",
                    AttributeValue::S(steps_prefix(invocation_id)),
                )
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|err| {
                    StateError::new(key, FinishInvocation, BackendFailure(err.into()))
                })?;

            for mut item in output.items.unwrap_or_default() {
                if let Some(AttributeValue::S(sort_key)) = item.remove(SORT_KEY) {
                    sort_keys.push(sort_key);
                }
            }

            match output.last_evaluated_key {
                Some(last_key) if !last_key.is_empty() => start_key = Some(last_key),
                _ => break,
            }
        }

        Ok(sort_keys)
    }

    async fn current_lease(&self, key: &str) -> Result<Option<Lease>, StateError> {
        self.get_item(key, RECORD_SORT_KEY.to_string(), AcquireLease)
            .await?
            .and_then(|mut item| item.remove(LEASE_ATTRIBUTE))
            .map(|lease| {
                serde_dynamo::from_attribute_value(lease)
                    .map_err(|err| StateError::new(key, AcquireLease, BadState(err.to_string())))
            })
            .transpose()
    }
}

#[async_trait]
impl StateStore for DynamoDbStateStore {
    async fn get(&self, key: &str, field: &str) -> Result<Option<serde_json::Value>, StateError> {
        let item: Option<Item> = self
            .get_item(key, RECORD_SORT_KEY.to_string(), GetField)
            .await?;

        item.and_then(|mut item| item.remove(field))
            .map(|value| from_attribute(key, value, GetField))
            .transpose()
    }

    async fn set(&self, key: &str, field: &str, value: serde_json::Value) -> Result<(), StateError> {
        self.set_many(key, vec![(field, value)]).await
    }

    async fn set_many(
        &self,
        key: &str,
        fields: Vec<(&str, serde_json::Value)>,
    ) -> Result<(), StateError> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut assignments: Vec<String> = Vec::with_capacity(fields.len());
        let mut names: HashMap<String, String> = HashMap::new();
        let mut values: Item = HashMap::new();

        for (index, (field, value)) in fields.into_iter().enumerate() {
            assignments.push(format!("#f{index} = :v{index}"));
            names.insert(format!("#f{index}"), field.to_string());
            values.insert(format!(":v{index}"), to_attribute(key, &value, SetField)?);
        }

        self.update_record(
            key,
            format!("SET {}", assignments.join(", ")),
            names,
            Some(values),
            SetField,
        )
        .await
    }

    async fn clear(&self, key: &str, field: &str) -> Result<(), StateError> {
        self.update_record(
            key,
            "REMOVE #f0".to_string(),
            HashMap::from([("#f0".to_string(), field.to_string())]),
            None,
            ClearField,
        )
        .await
    }
}

#[async_trait]
impl EffectJournal for DynamoDbStateStore {
    async fn insert_invocation(&self, invocation: &InvocationRecord) -> Result<(), StateError> {
        self.put_item(
            &invocation.key,
            invocation_sort_key(invocation.invocation_id()),
            invocation,
            InsertInvocation,
        )
        .await
    }

    async fn finish_invocation(&self, invocation: &InvocationRecord) -> Result<(), StateError> {
        let key: &str = invocation.key.as_str();

        self.put_item(
            key,
            invocation_sort_key(invocation.invocation_id()),
            invocation,
            FinishInvocation,
        )
        .await?;

        let Some(expires_at) = invocation.expires_at else {
            return Ok(());
        };

        for sort_key in self.step_sort_keys(key, invocation.invocation_id()).await? {
            self.dynamodb_client
                .update_item()
                .table_name(&self.table_name)
                .set_key(Some(primary_key(key, sort_key)))
                .update_expression("SET #expires = :expires")
                .expression_attribute_names("#expires", EXPIRES_AT_ATTRIBUTE)
                .expression_attribute_values(
                    ":expires",
                    AttributeValue::N(expires_at.timestamp().to_string()),
                )
                .send()
                .await
                .map_err(|err| {
                    StateError::new(key, FinishInvocation, BackendFailure(err.into()))
                })?;
        }

        Ok(())
    }

    async fn get_invocation(
        &self,
        key: &str,
        invocation_id: &str,
    ) -> Result<Option<InvocationRecord>, StateError> {
        self.get_item(key, invocation_sort_key(invocation_id), GetInvocation)
            .await?
            .map(|item| from_item(key, item, GetInvocation))
            .transpose()
    }

    async fn pending_invocations(&self) -> Result<Vec<InvocationRecord>, StateError> {
        let mut pending: Vec<InvocationRecord> = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let output = self
                .dynamodb_client
                .scan()
                .table_name(&self.table_name)
                .consistent_read(self.consistent_read)
                .filter_expression("begins_with(#sk, :prefix) AND #state.#status = :pending")
                .expression_attribute_names("#sk", SORT_KEY)
                .expression_attribute_names("#state", "state")
                .expression_attribute_names("#status", "status")
                .expression_attribute_values(
                    ":prefix",
                    AttributeValue::S(INVOCATION_PREFIX.to_string()),
                )
                .expression_attribute_values(":pending", AttributeValue::S("PENDING".to_string()))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|err| StateError::new("*", ListInvocations, BackendFailure(err.into())))?;

            for item in output.items.unwrap_or_default() {
                let owner: String = match item.get(PARTITION_KEY) {
                    Some(AttributeValue::S(partition)) => partition.clone(),
                    _ => "*".to_string(),
                };
                pending.push(from_item(&owner, item, ListInvocations)?);
            }

            match output.last_evaluated_key {
                Some(last_key) if !last_key.is_empty() => start_key = Some(last_key),
                _ => break,
            }
        }

        pending.sort_by_key(|invocation| invocation.submitted_at);

        Ok(pending)
    }

    async fn append_step(&self, step: &StepRecord) -> Result<(), StateError> {
        self.put_item(
            &step.key,
            step_sort_key(step.invocation_id(), step.step_index),
            step,
            AppendStep,
        )
        .await
    }

    async fn get_step(
        &self,
        key: &str,
        invocation_id: &str,
        step_index: u32,
    ) -> Result<Option<StepRecord>, StateError> {
        self.get_item(key, step_sort_key(invocation_id, step_index), GetStep)
            .await?
            .map(|item| from_item(key, item, GetStep))
            .transpose()
    }

    async fn acquire_lease(&self, key: &str, lease: &Lease) -> Result<Option<Lease>, StateError> {
        let claimed: AttributeValue = serde_dynamo::to_attribute_value(lease)
            .map_err(|err| StateError::new(key, AcquireLease, BadState(err.to_string())))?;

        // The held lease can be released between a lost condition and reading it back
        for _ in 0..LEASE_ATTEMPTS {
            let result = self
                .dynamodb_client
                .update_item()
                .table_name(&self.table_name)
                .set_key(Some(primary_key(key, RECORD_SORT_KEY.to_string())))
                .update_expression("SET #lease = :lease")
                .condition_expression(
                    "attribute_not_exists(#lease) OR (#lease.#invocation = :invocation \
                     AND (#lease.#holder = :holder OR #lease.#expires <= :now))",
                )
                .expression_attribute_names("#lease", LEASE_ATTRIBUTE)
                .expression_attribute_names("#invocation", "invocationId")
                .expression_attribute_names("#holder", "holder")
                .expression_attribute_names("#expires", "expiresAt")
                .expression_attribute_values(":lease", claimed.clone())
                .expression_attribute_values(
                    ":invocation",
                    AttributeValue::S(lease.invocation_id().to_string()),
                )
                .expression_attribute_values(":holder", AttributeValue::S(lease.holder.clone()))
                .expression_attribute_values(
                    ":now",
                    AttributeValue::N(Utc::now().timestamp_millis().to_string()),
                )
                .send()
                .await;

            match result {
                Ok(_) => return Ok(None),
                Err(err) if !condition_failed(&err) => {
                    return Err(StateError::new(key, AcquireLease, BackendFailure(err.into())))
                }
                Err(_) => {
                    if let Some(held) = self.current_lease(key).await? {
                        return Ok(Some(held));
                    }
                }
            }
        }

        Err(StateError::new(key, AcquireLease, Conflict))
    }

    async fn release_lease(&self, key: &str, invocation_id: &str) -> Result<(), StateError> {
        let result = self
            .dynamodb_client
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(primary_key(key, RECORD_SORT_KEY.to_string())))
            .update_expression("REMOVE #lease")
            .condition_expression("#lease.#invocation = :invocation")
            .expression_attribute_names("#lease", LEASE_ATTRIBUTE)
            .expression_attribute_names("#invocation", "invocationId")
            .expression_attribute_values(":invocation", AttributeValue::S(invocation_id.to_string()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            // Already released, or claimed by another invocation since
            Err(err) if condition_failed(&err) => Ok(()),
            Err(err) => Err(StateError::new(key, ReleaseLease, BackendFailure(err.into()))),
        }
    }
}

fn condition_failed<R>(err: &SdkError<UpdateItemError, R>) -> bool {
    err.as_service_error()
        .is_some_and(UpdateItemError::is_conditional_check_failed_exception)
}

fn to_item<T: Serialize>(key: &str, value: &T, operation: StateOperation) -> Result<Item, StateError> {
    serde_dynamo::to_item(value)
        .map_err(|err| StateError::new(key, operation, BadState(err.to_string())))
}

fn from_item<T: DeserializeOwned>(
    key: &str,
    item: Item,
    operation: StateOperation,
) -> Result<T, StateError> {
    serde_dynamo::from_item(item)
        .map_err(|err| StateError::new(key, operation, BadState(err.to_string())))
}

fn to_attribute(
    key: &str,
    value: &serde_json::Value,
    operation: StateOperation,
) -> Result<AttributeValue, StateError> {
    serde_dynamo::to_attribute_value(value)
        .map_err(|err| StateError::new(key, operation, BadState(err.to_string())))
}

fn from_attribute(
    key: &str,
    value: AttributeValue,
    operation: StateOperation,
) -> Result<serde_json::Value, StateError> {
    serde_dynamo::from_attribute_value(value)
        .map_err(|err| StateError::new(key, operation, BadState(err.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_dynamodb::operation::get_item::GetItemOutput;
    use aws_sdk_dynamodb::operation::put_item::{PutItemError, PutItemOutput};
    use aws_sdk_dynamodb::operation::query::QueryOutput;
    use aws_sdk_dynamodb::operation::update_item::UpdateItemOutput;
    use aws_sdk_dynamodb::types::error::ConditionalCheckFailedException;
    use aws_smithy_mocks::{mock, mock_client, Rule, RuleMode};
    use model::invocation::InvocationState;
    use model::step::StepOutcome;
    use serde_json::json;

    fn store(client: aws_sdk_dynamodb::Client) -> DynamoDbStateStore {
        DynamoDbStateStore::new(client, "formation-state")
    }

    #[tokio::test]
    async fn get_reads_a_single_field_of_the_record() {
        let get_rule: Rule = mock!(aws_sdk_dynamodb::Client::get_item)
            .match_requests(|req| {
                req.table_name() == Some("formation-state")
                    && req.key().and_then(|key| key.get("sk"))
                        == Some(&AttributeValue::S("RECORD".to_string()))
            })
            .then_output(|| {
                GetItemOutput::builder()
                    .item("pk", AttributeValue::S("RESOURCE#fn".to_string()))
                    .item("sk", AttributeValue::S("RECORD".to_string()))
                    .item("status", AttributeValue::S("AVAILABLE".to_string()))
                    .build()
            });

        let store: DynamoDbStateStore = store(mock_client!(aws_sdk_dynamodb, [&get_rule]));

        let status: Option<serde_json::Value> = store.get("fn", "status").await.unwrap();

        assert_eq!(Some(json!("AVAILABLE")), status);
    }

    #[tokio::test]
    async fn get_of_missing_record_is_absent() {
        let get_rule: Rule = mock!(aws_sdk_dynamodb::Client::get_item)
            .then_output(|| GetItemOutput::builder().build());

        let store: DynamoDbStateStore = store(mock_client!(aws_sdk_dynamodb, [&get_rule]));

        assert_eq!(None, store.get("fn", "status").await.unwrap());
    }

    #[tokio::test]
    async fn set_many_issues_one_update() {
        let update_rule: Rule = mock!(aws_sdk_dynamodb::Client::update_item)
            .match_requests(|req| {
                req.update_expression() == Some("SET #f0 = :v0, #f1 = :v1")
                    && req
                        .expression_attribute_names()
                        .and_then(|names| names.get("#f0"))
                        .map(String::as_str)
                        == Some("status")
            })
            .then_output(|| UpdateItemOutput::builder().build());

        let store: DynamoDbStateStore = store(mock_client!(aws_sdk_dynamodb, [&update_rule]));

        store
            .set_many(
                "fn",
                vec![("status", json!("AVAILABLE")), ("configuration", json!({"code": "x"}))],
            )
            .await
            .unwrap();

        assert_eq!(1, update_rule.num_calls());
    }

    #[tokio::test]
    async fn appending_an_existing_step_conflicts() {
        let put_rule: Rule = mock!(aws_sdk_dynamodb::Client::put_item)
            .match_requests(|req| req.condition_expression() == Some("attribute_not_exists(#sk)"))
            .then_error(|| {
                PutItemError::ConditionalCheckFailedException(
                    ConditionalCheckFailedException::builder().build(),
                )
            });

        let store: DynamoDbStateStore = store(mock_client!(aws_sdk_dynamodb, [&put_rule]));
        let step: StepRecord = StepRecord::new(
            "fn",
            "inv-1",
            0,
            "ensure-role",
            StepOutcome::Completed { value: json!("arn") },
        );

        let err: StateError = store.append_step(&step).await.unwrap_err();

        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn inserting_an_existing_invocation_conflicts() {
        let put_rule: Rule = mock!(aws_sdk_dynamodb::Client::put_item)
            .match_requests(|req| {
                req.condition_expression() == Some("attribute_not_exists(#sk)")
                    && req.item().and_then(|item| item.get("sk"))
                        == Some(&AttributeValue::S("INVOCATION#inv-1".to_string()))
            })
            .then_error(|| {
                PutItemError::ConditionalCheckFailedException(
                    ConditionalCheckFailedException::builder().build(),
                )
            });

        let store: DynamoDbStateStore = store(mock_client!(aws_sdk_dynamodb, [&put_rule]));
        let invocation: InvocationRecord = InvocationRecord::pending(
            "inv-1",
            "fn",
            model::OperationKind::Create,
            json!({"code": "x"}),
        );

        let err: StateError = store.insert_invocation(&invocation).await.unwrap_err();

        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn finishing_stamps_the_expiry_on_every_step() {
        let put_rule: Rule = mock!(aws_sdk_dynamodb::Client::put_item)
            .match_requests(|req| {
                req.condition_expression() == Some("#state.#status = :pending")
                    && req.item().and_then(|item| item.get("expiresAt")).is_some()
            })
            .then_output(|| PutItemOutput::builder().build());
        let query_rule: Rule = mock!(aws_sdk_dynamodb::Client::query)
            .match_requests(|req| {
                req.expression_attribute_values()
                    .and_then(|values| values.get(":prefix"))
                    == Some(&AttributeValue::S("STEP#inv-1#".to_string()))
            })
            .then_output(|| {
                QueryOutput::builder()
                    .items(HashMap::from([(
                        "sk".to_string(),
                        AttributeValue::S("STEP#inv-1#00000".to_string()),
                    )]))
                    .items(HashMap::from([(
                        "sk".to_string(),
                        AttributeValue::S("STEP#inv-1#00001".to_string()),
                    )]))
                    .build()
            });
        let update_rule: Rule = mock!(aws_sdk_dynamodb::Client::update_item)
            .match_requests(|req| req.update_expression() == Some("SET #expires = :expires"))
            .sequence()
            .output(|| UpdateItemOutput::builder().build())
            .repeatedly()
            .build();

        let store: DynamoDbStateStore = store(mock_client!(
            aws_sdk_dynamodb,
            RuleMode::MatchAny,
            [&put_rule, &query_rule, &update_rule]
        ));
        let finished: InvocationRecord =
            InvocationRecord::pending("inv-1", "fn", model::OperationKind::Delete, json!(null))
                .finish(InvocationState::Completed(json!({"success": true})))
                .expire_after(chrono::Duration::days(7));

        store.finish_invocation(&finished).await.unwrap();

        assert_eq!(1, put_rule.num_calls());
        assert_eq!(2, update_rule.num_calls());
    }

    #[tokio::test]
    async fn finishing_an_invocation_twice_conflicts() {
        let put_rule: Rule = mock!(aws_sdk_dynamodb::Client::put_item).then_error(|| {
            PutItemError::ConditionalCheckFailedException(
                ConditionalCheckFailedException::builder().build(),
            )
        });
        let query_rule: Rule = mock!(aws_sdk_dynamodb::Client::query)
            .then_output(|| QueryOutput::builder().build());

        let store: DynamoDbStateStore = store(mock_client!(
            aws_sdk_dynamodb,
            RuleMode::MatchAny,
            [&put_rule, &query_rule]
        ));
        let finished: InvocationRecord =
            InvocationRecord::pending("inv-1", "fn", model::OperationKind::Delete, json!(null))
                .finish(InvocationState::Aborted("rejected".to_string()));

        let err: StateError = store.finish_invocation(&finished).await.unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(0, query_rule.num_calls());
    }

    #[tokio::test]
    async fn free_lease_is_granted_with_one_conditional_update() {
        let update_rule: Rule = mock!(aws_sdk_dynamodb::Client::update_item)
            .match_requests(|req| {
                req.update_expression() == Some("SET #lease = :lease")
                    && req
                        .condition_expression()
                        .is_some_and(|condition| condition.starts_with("attribute_not_exists(#lease)"))
                    && req
                        .key()
                        .and_then(|key| key.get("sk"))
                        == Some(&AttributeValue::S("RECORD".to_string()))
            })
            .then_output(|| UpdateItemOutput::builder().build());

        let store: DynamoDbStateStore = store(mock_client!(aws_sdk_dynamodb, [&update_rule]));
        let lease: Lease = Lease::new("inv-1", "runtime-a", Utc::now());

        assert_eq!(None, store.acquire_lease("fn", &lease).await.unwrap());
        assert_eq!(1, update_rule.num_calls());
    }

    #[tokio::test]
    async fn contended_lease_reports_the_current_holder() {
        let held: Lease = Lease::new(
            "inv-1",
            "runtime-a",
            Utc::now() + chrono::Duration::minutes(5),
        );
        let held_attribute: AttributeValue = serde_dynamo::to_attribute_value(&held).unwrap();

        let update_rule: Rule = mock!(aws_sdk_dynamodb::Client::update_item).then_error(|| {
            UpdateItemError::ConditionalCheckFailedException(
                ConditionalCheckFailedException::builder().build(),
            )
        });
        let get_rule: Rule = mock!(aws_sdk_dynamodb::Client::get_item).then_output(move || {
            GetItemOutput::builder()
                .item("status", AttributeValue::S("PROVISIONING".to_string()))
                .item("lease", held_attribute.clone())
                .build()
        });

        let store: DynamoDbStateStore = store(mock_client!(
            aws_sdk_dynamodb,
            RuleMode::MatchAny,
            [&update_rule, &get_rule]
        ));
        let claim: Lease = Lease::new("inv-2", "runtime-b", Utc::now());

        assert_eq!(Some(held), store.acquire_lease("fn", &claim).await.unwrap());
    }

    #[tokio::test]
    async fn releasing_a_lease_held_elsewhere_is_a_no_op() {
        let update_rule: Rule = mock!(aws_sdk_dynamodb::Client::update_item)
            .match_requests(|req| {
                req.update_expression() == Some("REMOVE #lease")
                    && req.condition_expression() == Some("#lease.#invocation = :invocation")
            })
            .then_error(|| {
                UpdateItemError::ConditionalCheckFailedException(
                    ConditionalCheckFailedException::builder().build(),
                )
            });

        let store: DynamoDbStateStore = store(mock_client!(aws_sdk_dynamodb, [&update_rule]));

        store.release_lease("fn", "inv-1").await.unwrap();
        assert_eq!(1, update_rule.num_calls());
    }
}
