//! Compute: EC2 instances

use async_trait::async_trait;
use log::info;
use serde::Serialize;
use stratus_core::provider::ProviderResult;
use stratus_core::reconcile::{Lifecycle, ProductStatus};
use stratus_core::resource::{Resource, ResourceId, State};
use stratus_core::schema::{
    AttributeReader, AttributeSchema, AttributeType, FromAttributes, ResourceSchema, TypeError,
    decode, types,
};
use tokio::time::Instant;

use crate::control_plane::RemoteObject;
use crate::resources::{ResourceHandler, ensure_in_place, missing_object, state_from_object};
use crate::session::Session;
use crate::utils::{Tag, build_tags, desired_state, mutable_properties, patch_document};

pub const INSTANCE: &str = "ec2_instance";
const AWS_TYPE: &str = "AWS::EC2::Instance";

/// Provisioning budget, in multiples of the write ceiling
const CREATE_BUDGET: u32 = 6;
const DELETE_BUDGET: u32 = 2;

pub fn instance_schema() -> ResourceSchema {
    ResourceSchema::new(INSTANCE)
        .with_description("An EC2 instance")
        .attribute(
            AttributeSchema::new("image_id", AttributeType::String)
                .required()
                .force_new()
                .with_provider_name("ImageId"),
        )
        .attribute(
            AttributeSchema::new("instance_type", AttributeType::String)
                .required()
                .with_provider_name("InstanceType"),
        )
        .attribute(
            AttributeSchema::new("subnet_id", AttributeType::String)
                .force_new()
                .with_provider_name("SubnetId"),
        )
        .attribute(
            AttributeSchema::new("key_name", AttributeType::String)
                .force_new()
                .with_provider_name("KeyName"),
        )
        .attribute(
            AttributeSchema::new(
                "security_group_ids",
                AttributeType::List(Box::new(AttributeType::String)),
            )
            .with_provider_name("SecurityGroupIds"),
        )
        .attribute(AttributeSchema::new("tags", types::tags()).with_provider_name("Tags"))
        .attribute(
            AttributeSchema::new("instance_id", AttributeType::String)
                .computed()
                .with_provider_name("InstanceId"),
        )
        .attribute(
            AttributeSchema::new("private_ip_address", AttributeType::String)
                .computed()
                .with_provider_name("PrivateIpAddress"),
        )
        .attribute(
            AttributeSchema::new("state", AttributeType::String)
                .computed()
                .with_description("Instance state name, e.g. running")
                .with_provider_name("State/Name"),
        )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceConfig {
    pub image_id: String,
    pub instance_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub security_group_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

impl FromAttributes for InstanceConfig {
    fn from_attributes(reader: &AttributeReader<'_>) -> Result<Self, TypeError> {
        Ok(Self {
            image_id: reader.string("image_id")?,
            instance_type: reader.string("instance_type")?,
            subnet_id: reader.optional_string("subnet_id")?,
            key_name: reader.optional_string("key_name")?,
            security_group_ids: reader.string_list("security_group_ids")?,
            tags: build_tags(&reader.string_map("tags")?),
        })
    }
}

/// EC2 instance state name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
    Other(String),
}

impl InstanceState {
    pub fn parse(name: &str) -> Self {
        match name {
            "pending" => InstanceState::Pending,
            "running" => InstanceState::Running,
            "stopping" => InstanceState::Stopping,
            "stopped" => InstanceState::Stopped,
            "shutting-down" => InstanceState::ShuttingDown,
            "terminated" => InstanceState::Terminated,
            other => InstanceState::Other(other.to_string()),
        }
    }

    /// State of a described instance; an instance without a reported state is running
    pub fn of(object: &RemoteObject) -> Self {
        object
            .str_property("State/Name")
            .map(Self::parse)
            .unwrap_or(InstanceState::Running)
    }
}

impl ProductStatus for InstanceState {
    fn lifecycle(&self) -> Lifecycle {
        match self {
            InstanceState::Pending | InstanceState::Stopping | InstanceState::ShuttingDown => {
                Lifecycle::Pending
            }
            // Stopped is settled: the instance exists and can be started again
            InstanceState::Running | InstanceState::Stopped => Lifecycle::Running,
            InstanceState::Terminated => Lifecycle::Gone,
            InstanceState::Other(s) => Lifecycle::Unrecognized(s.clone()),
        }
    }

    fn raw(&self) -> String {
        match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
            InstanceState::ShuttingDown => "shutting-down",
            InstanceState::Terminated => "terminated",
            InstanceState::Other(s) => s,
        }
        .to_string()
    }
}

pub struct InstanceService {
    session: Session,
}

impl InstanceService {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Describe an instance; terminated instances read as absent
    pub async fn describe_instance(&self, instance_id: &str) -> ProviderResult<Option<RemoteObject>> {
        let object = self.session.describe(AWS_TYPE, instance_id).await?;
        Ok(object.filter(|o| InstanceState::of(o) != InstanceState::Terminated))
    }

    /// Launch an instance and wait until it is running
    pub async fn create_instance(&self, config: &InstanceConfig) -> ProviderResult<String> {
        let started = Instant::now();
        let desired = desired_state(config)?;
        let instance_id = self
            .session
            .submit_create(AWS_TYPE, &desired, CREATE_BUDGET)
            .await?;

        let spec = self
            .session
            .timeouts()
            .wait_present(CREATE_BUDGET)
            .remaining_since(started);
        let operation = format!("create instance {}", instance_id);
        self.session
            .wait_for_object(&operation, AWS_TYPE, &instance_id, &spec, InstanceState::of)
            .await?;

        info!("instance {} is running", instance_id);
        Ok(instance_id)
    }

    pub async fn modify_instance(&self, instance_id: &str, config: &InstanceConfig) -> ProviderResult<()> {
        let started = Instant::now();
        let current = self
            .describe_instance(instance_id)
            .await?
            .ok_or_else(|| missing_object(AWS_TYPE, instance_id))?;

        let schema = instance_schema();
        let patch = patch_document(
            &current.properties,
            &desired_state(config)?,
            &mutable_properties(&schema),
        );
        self.session
            .submit_update(AWS_TYPE, instance_id, &patch, CREATE_BUDGET)
            .await?;

        let spec = self
            .session
            .timeouts()
            .wait_present(CREATE_BUDGET)
            .remaining_since(started);
        let operation = format!("update instance {}", instance_id);
        self.session
            .wait_for_object(&operation, AWS_TYPE, instance_id, &spec, InstanceState::of)
            .await?;
        Ok(())
    }

    /// Terminate an instance and wait until it is gone
    pub async fn delete_instance(&self, instance_id: &str) -> ProviderResult<()> {
        let started = Instant::now();
        self.session
            .submit_delete(AWS_TYPE, instance_id, DELETE_BUDGET)
            .await?;

        let spec = self
            .session
            .timeouts()
            .wait_absent(DELETE_BUDGET)
            .remaining_since(started);
        let operation = format!("terminate instance {}", instance_id);
        self.session
            .wait_for_object(&operation, AWS_TYPE, instance_id, &spec, InstanceState::of)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceHandler for InstanceService {
    fn resource_type(&self) -> &'static str {
        INSTANCE
    }

    async fn read(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        let object = self.describe_instance(identifier).await?;
        Ok(state_from_object(
            id,
            &instance_schema(),
            identifier,
            object.as_ref(),
        ))
    }

    async fn create(&self, resource: &Resource) -> ProviderResult<State> {
        let config: InstanceConfig = decode(&instance_schema(), &resource.attributes)?;
        let instance_id = self.create_instance(&config).await?;
        self.read(&resource.id, &instance_id).await
    }

    async fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let schema = instance_schema();
        ensure_in_place(&schema, from, to)?;
        let config: InstanceConfig = decode(&schema, &to.attributes)?;
        self.modify_instance(identifier, &config).await?;
        self.read(id, identifier).await
    }

    async fn delete(&self, _id: &ResourceId, identifier: &str, _force: bool) -> ProviderResult<()> {
        self.delete_instance(identifier).await
    }
}
