//! Database: RDS DB instances
//!
//! RDS instances take many minutes to provision, so waits here use a larger
//! multiple of the write ceiling than the other products. Deletion protection
//! blocks deletion; a forced delete clears it first.

use std::sync::LazyLock;

use async_trait::async_trait;
use log::{info, warn};
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::reconcile::{Lifecycle, ProductStatus};
use stratus_core::resource::{Resource, ResourceId, State, Value};
use stratus_core::schema::{
    AttributeReader, AttributeSchema, AttributeType, FromAttributes, ResourceSchema, TypeError,
    decode, types,
};
use tokio::time::Instant;

use crate::control_plane::RemoteObject;
use crate::resources::{
    ResourceHandler, ensure_in_place, missing_object, state_from_object, update_in_place,
};
use crate::session::Session;
use crate::utils::{Tag, build_tags, desired_state, mutable_properties};

pub const DB_INSTANCE: &str = "rds_db_instance";
const AWS_TYPE: &str = "AWS::RDS::DBInstance";

const BUDGET: u32 = 10;

static DB_INSTANCE_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9]*(-[a-zA-Z0-9]+)*$").expect("valid regex")
});

/// RDS instance identifier: 1-63 alphanumerics or hyphens, starting with a
/// letter, no trailing or doubled hyphen
fn db_instance_identifier() -> AttributeType {
    AttributeType::Custom {
        name: "DbInstanceIdentifier".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) if s.len() > 63 => {
                Err(format!("'{}' is longer than 63 characters", s))
            }
            Value::String(s) if DB_INSTANCE_IDENTIFIER.is_match(s) => Ok(()),
            Value::String(s) => Err(format!("'{}' is not a valid DB instance identifier", s)),
            _ => Err("Expected string".to_string()),
        },
    }
}

pub fn db_instance_schema() -> ResourceSchema {
    ResourceSchema::new(DB_INSTANCE)
        .with_description("An RDS database instance")
        .attribute(
            AttributeSchema::new("db_instance_identifier", db_instance_identifier())
                .required()
                .force_new()
                .with_provider_name("DBInstanceIdentifier"),
        )
        .attribute(
            AttributeSchema::new("engine", AttributeType::String)
                .required()
                .force_new()
                .with_provider_name("Engine"),
        )
        .attribute(
            AttributeSchema::new("engine_version", AttributeType::String)
                .with_provider_name("EngineVersion"),
        )
        .attribute(
            AttributeSchema::new("db_instance_class", AttributeType::String)
                .required()
                .with_provider_name("DBInstanceClass"),
        )
        .attribute(
            AttributeSchema::new("allocated_storage", types::positive_int())
                .with_description("Storage in GiB")
                .with_provider_name("AllocatedStorage"),
        )
        .attribute(
            AttributeSchema::new("master_username", AttributeType::String)
                .force_new()
                .with_provider_name("MasterUsername"),
        )
        .attribute(
            AttributeSchema::new("master_user_password", AttributeType::String)
                .with_description("Applied at creation only; never read back"),
        )
        .attribute(
            AttributeSchema::new("publicly_accessible", AttributeType::Bool)
                .with_provider_name("PubliclyAccessible"),
        )
        .attribute(
            AttributeSchema::new("deletion_protection", AttributeType::Bool)
                .with_default(Value::Bool(false))
                .with_provider_name("DeletionProtection"),
        )
        .attribute(AttributeSchema::new("tags", types::tags()).with_provider_name("Tags"))
        .attribute(
            AttributeSchema::new("endpoint_address", AttributeType::String)
                .computed()
                .with_provider_name("Endpoint/Address"),
        )
        .attribute(
            AttributeSchema::new("endpoint_port", AttributeType::String)
                .computed()
                .with_provider_name("Endpoint/Port"),
        )
        .attribute(
            AttributeSchema::new("status", AttributeType::String)
                .computed()
                .with_provider_name("DBInstanceStatus"),
        )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DbInstanceConfig {
    #[serde(rename = "DBInstanceIdentifier")]
    pub db_instance_identifier: String,
    #[serde(rename = "Engine")]
    pub engine: String,
    #[serde(rename = "EngineVersion", skip_serializing_if = "Option::is_none")]
    pub engine_version: Option<String>,
    #[serde(rename = "DBInstanceClass")]
    pub db_instance_class: String,
    /// The control plane models storage as a string
    #[serde(rename = "AllocatedStorage", skip_serializing_if = "Option::is_none")]
    pub allocated_storage: Option<String>,
    #[serde(rename = "MasterUsername", skip_serializing_if = "Option::is_none")]
    pub master_username: Option<String>,
    #[serde(rename = "MasterUserPassword", skip_serializing_if = "Option::is_none")]
    pub master_user_password: Option<String>,
    #[serde(rename = "PubliclyAccessible", skip_serializing_if = "Option::is_none")]
    pub publicly_accessible: Option<bool>,
    #[serde(rename = "DeletionProtection")]
    pub deletion_protection: bool,
    #[serde(rename = "Tags", skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

impl FromAttributes for DbInstanceConfig {
    fn from_attributes(reader: &AttributeReader<'_>) -> Result<Self, TypeError> {
        Ok(Self {
            db_instance_identifier: reader.string("db_instance_identifier")?,
            engine: reader.string("engine")?,
            engine_version: reader.optional_string("engine_version")?,
            db_instance_class: reader.string("db_instance_class")?,
            allocated_storage: reader
                .optional_int("allocated_storage")?
                .map(|gib| gib.to_string()),
            master_username: reader.optional_string("master_username")?,
            master_user_password: reader.optional_string("master_user_password")?,
            publicly_accessible: reader.optional_bool("publicly_accessible")?,
            deletion_protection: reader.bool_or("deletion_protection", false)?,
            tags: build_tags(&reader.string_map("tags")?),
        })
    }
}

/// `DBInstanceStatus` of an RDS instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbInstanceStatus {
    Available,
    Stopped,
    /// creating, modifying, backing-up, rebooting and the other transitional states
    Transitional(String),
    /// failed, storage-full, incompatible-*, inaccessible-encryption-credentials
    Failed(String),
    Other(String),
}

impl DbInstanceStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "available" => DbInstanceStatus::Available,
            "stopped" => DbInstanceStatus::Stopped,
            "creating" | "modifying" | "deleting" | "backing-up" | "rebooting" | "starting"
            | "stopping" | "renaming" | "upgrading" | "maintenance" | "storage-optimization"
            | "resetting-master-credentials" | "configuring-enhanced-monitoring"
            | "configuring-log-exports" | "moving-to-vpc" => {
                DbInstanceStatus::Transitional(status.to_string())
            }
            "failed"
            | "storage-full"
            | "incompatible-parameters"
            | "incompatible-network"
            | "incompatible-restore"
            | "incompatible-option-group"
            | "inaccessible-encryption-credentials" => DbInstanceStatus::Failed(status.to_string()),
            other => DbInstanceStatus::Other(other.to_string()),
        }
    }

    pub fn of(object: &RemoteObject) -> Self {
        object
            .str_property("DBInstanceStatus")
            .map(Self::parse)
            .unwrap_or(DbInstanceStatus::Available)
    }
}

impl ProductStatus for DbInstanceStatus {
    fn lifecycle(&self) -> Lifecycle {
        match self {
            DbInstanceStatus::Available | DbInstanceStatus::Stopped => Lifecycle::Running,
            DbInstanceStatus::Transitional(_) => Lifecycle::Pending,
            DbInstanceStatus::Failed(s) => {
                Lifecycle::Failed(format!("DB instance entered status {}", s))
            }
            DbInstanceStatus::Other(s) => Lifecycle::Unrecognized(s.clone()),
        }
    }

    fn raw(&self) -> String {
        match self {
            DbInstanceStatus::Available => "available".to_string(),
            DbInstanceStatus::Stopped => "stopped".to_string(),
            DbInstanceStatus::Transitional(s)
            | DbInstanceStatus::Failed(s)
            | DbInstanceStatus::Other(s) => s.clone(),
        }
    }
}

pub struct DbInstanceService {
    session: Session,
}

impl DbInstanceService {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub async fn describe_db_instance(&self, identifier: &str) -> ProviderResult<Option<RemoteObject>> {
        self.session.describe(AWS_TYPE, identifier).await
    }

    /// Create an instance and wait until it is available
    pub async fn create_db_instance(&self, config: &DbInstanceConfig) -> ProviderResult<String> {
        let started = Instant::now();
        let identifier = self
            .session
            .submit_create(AWS_TYPE, &desired_state(config)?, BUDGET)
            .await?;
        self.wait_available(
            &format!("create DB instance {}", identifier),
            &identifier,
            started,
        )
        .await?;
        info!("DB instance {} is available", identifier);
        Ok(identifier)
    }

    pub async fn modify_db_instance(
        &self,
        identifier: &str,
        config: &DbInstanceConfig,
    ) -> ProviderResult<()> {
        let started = Instant::now();
        update_in_place(
            &self.session,
            AWS_TYPE,
            identifier,
            &desired_state(config)?,
            &mutable_properties(&db_instance_schema()),
            BUDGET,
        )
        .await?;
        self.wait_available(
            &format!("modify DB instance {}", identifier),
            identifier,
            started,
        )
        .await
    }

    /// Delete an instance and wait until it is gone
    ///
    /// With `force`, deletion protection is disabled first.
    pub async fn delete_db_instance(&self, identifier: &str, force: bool) -> ProviderResult<()> {
        let started = Instant::now();
        let Some(current) = self.describe_db_instance(identifier).await? else {
            info!("DB instance {} already absent", identifier);
            return Ok(());
        };

        let protected = current
            .property("DeletionProtection")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if protected {
            if !force {
                return Err(ProviderError::new(format!(
                    "DB instance {} has deletion protection enabled; delete with force to disable it",
                    identifier
                )));
            }
            self.disable_deletion_protection(identifier, started).await?;
        }

        self.session
            .submit_delete(AWS_TYPE, identifier, BUDGET)
            .await?;
        let spec = self
            .session
            .timeouts()
            .wait_absent(BUDGET)
            .remaining_since(started);
        let operation = format!("delete DB instance {}", identifier);
        self.session
            .wait_for_object(&operation, AWS_TYPE, identifier, &spec, DbInstanceStatus::of)
            .await?;
        Ok(())
    }

    async fn disable_deletion_protection(
        &self,
        identifier: &str,
        started: Instant,
    ) -> ProviderResult<()> {
        warn!("disabling deletion protection on DB instance {}", identifier);
        let patch = [json!({"op": "replace", "path": "/DeletionProtection", "value": false})];
        self.session
            .submit_update(AWS_TYPE, identifier, &patch, BUDGET)
            .await?;
        self.wait_available(
            &format!("disable deletion protection on {}", identifier),
            identifier,
            started,
        )
        .await
    }

    /// Wait for `available` on whatever is left of the budget of the operation begun at `started`
    async fn wait_available(
        &self,
        operation: &str,
        identifier: &str,
        started: Instant,
    ) -> ProviderResult<()> {
        let spec = self
            .session
            .timeouts()
            .wait_present(BUDGET)
            .remaining_since(started);
        self.session
            .wait_for_object(operation, AWS_TYPE, identifier, &spec, DbInstanceStatus::of)
            .await?;
        Ok(())
    }

    fn state(id: &ResourceId, identifier: &str, object: Option<&RemoteObject>) -> State {
        let mut state = state_from_object(id, &db_instance_schema(), identifier, object);
        // Storage comes back as a string; the schema models it as GiB
        let storage = match state.attributes.get("allocated_storage") {
            Some(Value::String(gib)) => gib.parse::<i64>().ok(),
            _ => None,
        };
        if let Some(gib) = storage {
            state
                .attributes
                .insert("allocated_storage".to_string(), Value::Int(gib));
        }
        state
    }
}

#[async_trait]
impl ResourceHandler for DbInstanceService {
    fn resource_type(&self) -> &'static str {
        DB_INSTANCE
    }

    async fn read(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        let object = self.describe_db_instance(identifier).await?;
        Ok(Self::state(id, identifier, object.as_ref()))
    }

    async fn create(&self, resource: &Resource) -> ProviderResult<State> {
        let config: DbInstanceConfig = decode(&db_instance_schema(), &resource.attributes)?;
        let identifier = self.create_db_instance(&config).await?;
        self.read(&resource.id, &identifier).await
    }

    async fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let schema = db_instance_schema();
        ensure_in_place(&schema, from, to)?;
        let config: DbInstanceConfig = decode(&schema, &to.attributes)?;
        self.modify_db_instance(identifier, &config).await?;

        let state = self.read(id, identifier).await?;
        if !state.exists {
            return Err(missing_object(AWS_TYPE, identifier));
        }
        Ok(state)
    }

    async fn delete(&self, _id: &ResourceId, identifier: &str, force: bool) -> ProviderResult<()> {
        self.delete_db_instance(identifier, force).await
    }
}
