//! Messaging: SQS queues, addressed by queue URL

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use stratus_core::composite_id::IdError;
use stratus_core::provider::ProviderResult;
use stratus_core::resource::{Resource, ResourceId, State};
use stratus_core::schema::{
    AttributeReader, AttributeSchema, AttributeType, FromAttributes, ResourceSchema, TypeError,
    decode, types,
};

use crate::control_plane::RemoteObject;
use crate::resources::{ResourceHandler, ensure_in_place, state_from_object, update_in_place};
use crate::session::Session;
use crate::utils::{Tag, build_tags, desired_state, mutable_properties};

pub const QUEUE: &str = "sqs_queue";
const AWS_TYPE: &str = "AWS::SQS::Queue";

const BUDGET: u32 = 1;
const FIFO_SUFFIX: &str = ".fifo";

static QUEUE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+(\.fifo)?$").expect("valid regex"));
static QUEUE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[A-Za-z0-9.:-]+/[0-9]{12}/[A-Za-z0-9_-]{1,80}(\.fifo)?$")
        .expect("valid regex")
});

/// Check a queue URL before it is sent anywhere
pub fn validate_queue_url(url: &str) -> Result<(), IdError> {
    if QUEUE_URL.is_match(url) {
        Ok(())
    } else {
        Err(IdError::InvalidComponent {
            component: url.to_string(),
            reason: "expected a queue URL such as https://sqs.<region>.amazonaws.com/<account>/<name>"
                .to_string(),
        })
    }
}

fn in_range(name: &str, value: Option<i64>, min: i64, max: i64) -> Result<(), TypeError> {
    match value {
        Some(v) if v < min || v > max => Err(TypeError::AttributeError {
            name: name.to_string(),
            inner: Box::new(TypeError::ValidationFailed {
                message: format!("{} is outside {}..={}", v, min, max),
            }),
        }),
        _ => Ok(()),
    }
}

pub fn queue_schema() -> ResourceSchema {
    ResourceSchema::new(QUEUE)
        .with_description("An SQS queue")
        .attribute(
            AttributeSchema::new("queue_name", AttributeType::String)
                .required()
                .force_new()
                .with_description("FIFO queue names end in .fifo")
                .with_provider_name("QueueName"),
        )
        .attribute(
            AttributeSchema::new("fifo_queue", AttributeType::Bool)
                .force_new()
                .with_provider_name("FifoQueue"),
        )
        .attribute(
            AttributeSchema::new("visibility_timeout", AttributeType::Int)
                .with_description("Seconds, 0 to 43200")
                .with_provider_name("VisibilityTimeout"),
        )
        .attribute(
            AttributeSchema::new("message_retention_period", AttributeType::Int)
                .with_description("Seconds, 60 to 1209600")
                .with_provider_name("MessageRetentionPeriod"),
        )
        .attribute(
            AttributeSchema::new("delay_seconds", AttributeType::Int)
                .with_provider_name("DelaySeconds"),
        )
        .attribute(
            AttributeSchema::new("receive_message_wait_time_seconds", AttributeType::Int)
                .with_provider_name("ReceiveMessageWaitTimeSeconds"),
        )
        .attribute(AttributeSchema::new("tags", types::tags()).with_provider_name("Tags"))
        .attribute(
            AttributeSchema::new("queue_url", AttributeType::String)
                .computed()
                .with_provider_name("QueueUrl"),
        )
        .attribute(
            AttributeSchema::new("arn", AttributeType::String)
                .computed()
                .with_provider_name("Arn"),
        )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueueConfig {
    pub queue_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fifo_queue: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility_timeout: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_retention_period: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receive_message_wait_time_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

impl FromAttributes for QueueConfig {
    fn from_attributes(reader: &AttributeReader<'_>) -> Result<Self, TypeError> {
        let config = Self {
            queue_name: reader.string("queue_name")?,
            fifo_queue: reader.optional_bool("fifo_queue")?,
            visibility_timeout: reader.optional_int("visibility_timeout")?,
            message_retention_period: reader.optional_int("message_retention_period")?,
            delay_seconds: reader.optional_int("delay_seconds")?,
            receive_message_wait_time_seconds: reader
                .optional_int("receive_message_wait_time_seconds")?,
            tags: build_tags(&reader.string_map("tags")?),
        };

        if config.queue_name.len() > 80 || !QUEUE_NAME.is_match(&config.queue_name) {
            return Err(TypeError::AttributeError {
                name: "queue_name".to_string(),
                inner: Box::new(TypeError::ValidationFailed {
                    message: format!(
                        "'{}' must be 1-80 alphanumerics, hyphens or underscores",
                        config.queue_name
                    ),
                }),
            });
        }
        let fifo_name = config.queue_name.ends_with(FIFO_SUFFIX);
        if fifo_name != config.fifo_queue.unwrap_or(false) {
            return Err(TypeError::ValidationFailed {
                message: format!(
                    "fifo_queue must be true exactly when queue_name ends in {}",
                    FIFO_SUFFIX
                ),
            });
        }

        in_range("visibility_timeout", config.visibility_timeout, 0, 43_200)?;
        in_range(
            "message_retention_period",
            config.message_retention_period,
            60,
            1_209_600,
        )?;
        in_range("delay_seconds", config.delay_seconds, 0, 900)?;
        in_range(
            "receive_message_wait_time_seconds",
            config.receive_message_wait_time_seconds,
            0,
            20,
        )?;
        Ok(config)
    }
}

pub struct QueueService {
    session: Session,
}

impl QueueService {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub async fn describe_queue(&self, queue_url: &str) -> ProviderResult<Option<RemoteObject>> {
        validate_queue_url(queue_url)?;
        self.session.describe(AWS_TYPE, queue_url).await
    }

    /// Create a queue, returning its URL
    pub async fn create_queue(&self, config: &QueueConfig) -> ProviderResult<String> {
        let queue_url = self
            .session
            .submit_create(AWS_TYPE, &desired_state(config)?, BUDGET)
            .await?;
        validate_queue_url(&queue_url)?;
        Ok(queue_url)
    }

    pub async fn modify_queue(&self, queue_url: &str, config: &QueueConfig) -> ProviderResult<()> {
        validate_queue_url(queue_url)?;
        update_in_place(
            &self.session,
            AWS_TYPE,
            queue_url,
            &desired_state(config)?,
            &mutable_properties(&queue_schema()),
            BUDGET,
        )
        .await
    }

    pub async fn delete_queue(&self, queue_url: &str) -> ProviderResult<()> {
        validate_queue_url(queue_url)?;
        self.session.submit_delete(AWS_TYPE, queue_url, BUDGET).await
    }
}

#[async_trait]
impl ResourceHandler for QueueService {
    fn resource_type(&self) -> &'static str {
        QUEUE
    }

    async fn read(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        let object = self.describe_queue(identifier).await?;
        Ok(state_from_object(id, &queue_schema(), identifier, object.as_ref()))
    }

    async fn create(&self, resource: &Resource) -> ProviderResult<State> {
        let config: QueueConfig = decode(&queue_schema(), &resource.attributes)?;
        let queue_url = self.create_queue(&config).await?;
        self.read(&resource.id, &queue_url).await
    }

    async fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let schema = queue_schema();
        ensure_in_place(&schema, from, to)?;
        let config: QueueConfig = decode(&schema, &to.attributes)?;
        self.modify_queue(identifier, &config).await?;
        self.read(id, identifier).await
    }

    async fn delete(&self, _id: &ResourceId, identifier: &str, _force: bool) -> ProviderResult<()> {
        self.delete_queue(identifier).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use stratus_core::config::Timeouts;
    use stratus_core::provider::ErrorKind;
    use stratus_core::resource::Value;

    use super::*;
    use crate::testing::FakeControlPlane;

    const JOBS_URL: &str = "https://sqs.us-east-1.amazonaws.com/123456789012/jobs";

    fn service(fake: &Arc<FakeControlPlane>) -> QueueService {
        QueueService::new(Session::new(fake.clone(), Timeouts::default()))
    }

    fn jobs() -> Resource {
        Resource::new(QUEUE, "jobs")
            .with_attribute("queue_name", "jobs")
            .with_attribute("visibility_timeout", 60i64)
    }

    #[tokio::test(start_paused = true)]
    async fn queue_is_identified_by_url() {
        let fake = Arc::new(FakeControlPlane::new());
        let svc = service(&fake);

        let state = svc.create(&jobs()).await.unwrap();
        assert_eq!(state.identifier.as_deref(), Some(JOBS_URL));
        assert_eq!(state.attributes["queue_url"], Value::from(JOBS_URL));
        assert_eq!(state.attributes["visibility_timeout"], Value::Int(60));

        let to = jobs().with_attribute("visibility_timeout", 120i64);
        svc.update(&state.id, JOBS_URL, &state, &to).await.unwrap();
        assert_eq!(
            fake.last_patch().unwrap(),
            vec![json!({"op": "replace", "path": "/VisibilityTimeout", "value": 120})]
        );

        svc.delete(&state.id, JOBS_URL, false).await.unwrap();
        let gone = svc.read(&state.id, JOBS_URL).await.unwrap();
        assert!(!gone.exists);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_url_fails_before_any_call() {
        let fake = Arc::new(FakeControlPlane::new());
        let id = ResourceId::new(QUEUE, "jobs");

        let err = service(&fake).read(&id, "jobs").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedIdentifier);

        let err = service(&fake)
            .delete(&id, "https://sqs.us-east-1.amazonaws.com/jobs", false)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedIdentifier);
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn fifo_flag_must_match_name() {
        let schema = queue_schema();

        let mismatched = Resource::new(QUEUE, "orders").with_attribute("queue_name", "orders.fifo");
        assert!(decode::<QueueConfig>(&schema, &mismatched.attributes).is_err());

        let fifo = mismatched.with_attribute("fifo_queue", true);
        let config: QueueConfig = decode(&schema, &fifo.attributes).unwrap();
        assert_eq!(config.fifo_queue, Some(true));

        let flagged = Resource::new(QUEUE, "orders")
            .with_attribute("queue_name", "orders")
            .with_attribute("fifo_queue", true);
        assert!(decode::<QueueConfig>(&schema, &flagged.attributes).is_err());
    }

    #[test]
    fn numeric_attributes_are_range_checked() {
        let schema = queue_schema();
        let resource = jobs().with_attribute("delay_seconds", 901i64);
        let err = decode::<QueueConfig>(&schema, &resource.attributes).unwrap_err();
        assert!(err.to_string().contains("delay_seconds"));

        let resource = jobs().with_attribute("message_retention_period", 30i64);
        assert!(decode::<QueueConfig>(&schema, &resource.attributes).is_err());
    }
}
