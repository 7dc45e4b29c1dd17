use crate::classify;
use async_trait::async_trait;
use serde_json::{json, Value};
use service::{RoleClient, ServiceError};

const LOGGING_POLICY_NAME: &str = "LogToCloudWatch";

fn assume_role_policy() -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": "lambda.amazonaws.com" },
            "Action": "sts:AssumeRole",
        }],
    })
}

fn logging_policy() -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Action": ["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"],
            "Resource": "arn:aws:logs:*:*:log-group:/aws/lambda/*:*",
        }],
    })
}

/// Looks up or creates the execution role shared by provisioned functions.
#[derive(Clone)]
pub struct IamRoleClient {
    iam: aws_sdk_iam::Client,
}

impl IamRoleClient {
    pub fn new(iam: aws_sdk_iam::Client) -> Self {
        IamRoleClient { iam }
    }

    async fn find_role(&self, role_name: &str) -> Result<String, ServiceError> {
        let output = self
            .iam
            .get_role()
            .role_name(role_name)
            .send()
            .await
            .map_err(classify)?;

        output
            .role
            .map(|role| role.arn)
            .ok_or_else(|| ServiceError::NotFound(format!("Role {role_name} has no ARN")))
    }

    async fn create_role(&self, role_name: &str) -> Result<String, ServiceError> {
        tracing::info!(role_name, "Creating execution role");

        let output = self
            .iam
            .create_role()
            .role_name(role_name)
            .assume_role_policy_document(assume_role_policy().to_string())
            .send()
            .await
            .map_err(classify)?;

        output
            .role
            .map(|role| role.arn)
            .ok_or_else(|| ServiceError::Permanent(format!("Failed to create role {role_name}")))
    }

    // Overwrites the inline policy, so it is safe to repeat on every call
    async fn put_logging_policy(&self, role_name: &str) -> Result<(), ServiceError> {
        self.iam
            .put_role_policy()
            .role_name(role_name)
            .policy_name(LOGGING_POLICY_NAME)
            .policy_document(logging_policy().to_string())
            .send()
            .await
            .map_err(classify)?;

        Ok(())
    }
}

#[async_trait]
impl RoleClient for IamRoleClient {
    async fn ensure_role(&self, role_name: &str) -> Result<String, ServiceError> {
        let arn: String = match self.find_role(role_name).await {
            Err(ServiceError::NotFound(_)) => match self.create_role(role_name).await {
                // Someone else created it in the meantime
                Err(ServiceError::AlreadyExists(_)) => self.find_role(role_name).await?,
                created => created?,
            },
            found => found?,
        };

        // A found role may come from an attempt that failed before attaching it
        self.put_logging_policy(role_name).await?;

        Ok(arn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_iam::error::ErrorMetadata;
    use aws_sdk_iam::operation::create_role::CreateRoleOutput;
    use aws_sdk_iam::operation::get_role::{GetRoleError, GetRoleOutput};
    use aws_sdk_iam::operation::put_role_policy::{PutRolePolicyError, PutRolePolicyOutput};
    use aws_sdk_iam::primitives::DateTime;
    use aws_sdk_iam::types::error::{NoSuchEntityException, ServiceFailureException};
    use aws_sdk_iam::types::Role;
    use aws_smithy_mocks::{mock, mock_client, Rule, RuleMode};

    const ROLE_ARN: &str = "arn:aws:iam::123456789012:role/formation-fn-execution-role";

    fn role() -> Role {
        Role::builder()
            .path("/")
            .role_name("formation-fn-execution-role")
            .role_id("AROAEXAMPLE")
            .arn(ROLE_ARN)
            .create_date(DateTime::from_secs(0))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn existing_role_is_reused() {
        let get_rule: Rule = mock!(aws_sdk_iam::Client::get_role)
            .match_requests(|req| req.role_name() == Some("formation-fn-execution-role"))
            .then_output(|| GetRoleOutput::builder().role(role()).build());
        let create_rule: Rule = mock!(aws_sdk_iam::Client::create_role)
            .then_output(|| CreateRoleOutput::builder().role(role()).build());
        let policy_rule: Rule = mock!(aws_sdk_iam::Client::put_role_policy)
            .then_output(|| PutRolePolicyOutput::builder().build());

        let client: IamRoleClient = IamRoleClient::new(mock_client!(
            aws_sdk_iam,
            RuleMode::MatchAny,
            [&get_rule, &create_rule, &policy_rule]
        ));

        let arn: String = client
            .ensure_role("formation-fn-execution-role")
            .await
            .unwrap();

        assert_eq!(ROLE_ARN, arn);
        assert_eq!(0, create_rule.num_calls());
        assert_eq!(1, policy_rule.num_calls());
    }

    #[tokio::test]
    async fn missing_role_is_created_with_logging_policy() {
        let get_rule: Rule = mock!(aws_sdk_iam::Client::get_role).then_error(|| {
            GetRoleError::NoSuchEntityException(
                NoSuchEntityException::builder()
                    .meta(ErrorMetadata::builder().code("NoSuchEntity").build())
                    .build(),
            )
        });
        let create_rule: Rule = mock!(aws_sdk_iam::Client::create_role)
            .match_requests(|req| {
                req.assume_role_policy_document()
                    .is_some_and(|policy| policy.contains("lambda.amazonaws.com"))
            })
            .then_output(|| CreateRoleOutput::builder().role(role()).build());
        let policy_rule: Rule = mock!(aws_sdk_iam::Client::put_role_policy)
            .match_requests(|req| req.policy_name() == Some(LOGGING_POLICY_NAME))
            .then_output(|| PutRolePolicyOutput::builder().build());

        let client: IamRoleClient = IamRoleClient::new(mock_client!(
            aws_sdk_iam,
            RuleMode::MatchAny,
            [&get_rule, &create_rule, &policy_rule]
        ));

        let arn: String = client
            .ensure_role("formation-fn-execution-role")
            .await
            .unwrap();

        assert_eq!(ROLE_ARN, arn);
        assert_eq!(1, create_rule.num_calls());
        assert_eq!(1, policy_rule.num_calls());
    }

    #[tokio::test]
    async fn policy_is_attached_on_retry_after_a_failed_attach() {
        let get_rule: Rule = mock!(aws_sdk_iam::Client::get_role)
            .sequence()
            .error(|| {
                GetRoleError::NoSuchEntityException(
                    NoSuchEntityException::builder()
                        .meta(ErrorMetadata::builder().code("NoSuchEntity").build())
                        .build(),
                )
            })
            .output(|| GetRoleOutput::builder().role(role()).build())
            .build();
        let create_rule: Rule = mock!(aws_sdk_iam::Client::create_role)
            .then_output(|| CreateRoleOutput::builder().role(role()).build());
        let policy_rule: Rule = mock!(aws_sdk_iam::Client::put_role_policy)
            .sequence()
            .error(|| {
                PutRolePolicyError::ServiceFailureException(
                    ServiceFailureException::builder()
                        .meta(ErrorMetadata::builder().code("ServiceFailure").build())
                        .build(),
                )
            })
            .output(|| PutRolePolicyOutput::builder().build())
            .build();

        let client: IamRoleClient = IamRoleClient::new(mock_client!(
            aws_sdk_iam,
            RuleMode::MatchAny,
            [&get_rule, &create_rule, &policy_rule]
        ));

        let err: ServiceError = client
            .ensure_role("formation-fn-execution-role")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Transient(_)));

        // The role now exists, the retry still attaches the policy
        let arn: String = client
            .ensure_role("formation-fn-execution-role")
            .await
            .unwrap();

        assert_eq!(ROLE_ARN, arn);
        assert_eq!(1, create_rule.num_calls());
        assert_eq!(2, policy_rule.num_calls());
    }
}
