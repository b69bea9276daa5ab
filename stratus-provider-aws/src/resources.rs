//! Resource type registry
//!
//! This module defines:
//! - The [`ResourceHandler`] seam every product service implements
//! - Resource type definitions (implementing the core `ResourceType` trait)
//! - Helpers shared by the handlers

use std::collections::HashMap;

use async_trait::async_trait;
use stratus_core::provider::{ErrorKind, ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Resource, ResourceId, State};
use stratus_core::schema::ResourceSchema;

use crate::control_plane::RemoteObject;
use crate::services::{compute, database, load_balancer, messaging, network};
use crate::session::Session;
use crate::utils::{attributes_from_properties, patch_document};

/// Create/read/update/delete handlers of one resource type
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    fn resource_type(&self) -> &'static str;

    /// Read by state key; a missing object reads as `State::not_found`
    async fn read(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State>;

    /// Create and wait until usable; the returned state carries the state key
    async fn create(&self, resource: &Resource) -> ProviderResult<State>;

    async fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State>;

    /// Delete and wait until gone; `force` clears protections that would block deletion
    async fn delete(&self, id: &ResourceId, identifier: &str, force: bool) -> ProviderResult<()>;
}

// =============================================================================
// Resource Type Definitions
// =============================================================================

macro_rules! define_resource_type {
    ($name:ident, $type_name:expr, $schema:path) => {
        pub struct $name;
        impl ResourceType for $name {
            fn name(&self) -> &'static str {
                $type_name
            }
            fn schema(&self) -> ResourceSchema {
                $schema()
            }
        }
    };
}

define_resource_type!(InstanceType, compute::INSTANCE, compute::instance_schema);
define_resource_type!(VpcType, network::VPC, network::vpc_schema);
define_resource_type!(SubnetType, network::SUBNET, network::subnet_schema);
define_resource_type!(
    VpcGatewayAttachmentType,
    network::VPC_GATEWAY_ATTACHMENT,
    network::gateway_attachment_schema
);
define_resource_type!(RouteType, network::ROUTE, network::route_schema);
define_resource_type!(DbInstanceType, database::DB_INSTANCE, database::db_instance_schema);
define_resource_type!(QueueType, messaging::QUEUE, messaging::queue_schema);
define_resource_type!(
    ListenerRuleType,
    load_balancer::LISTENER_RULE,
    load_balancer::listener_rule_schema
);

/// Returns all resource types supported by this provider
pub fn resource_types() -> Vec<Box<dyn ResourceType>> {
    vec![
        Box::new(InstanceType),
        Box::new(VpcType),
        Box::new(SubnetType),
        Box::new(VpcGatewayAttachmentType),
        Box::new(RouteType),
        Box::new(DbInstanceType),
        Box::new(QueueType),
        Box::new(ListenerRuleType),
    ]
}

/// Build one handler per resource type, all sharing `session`
pub fn handlers(session: &Session) -> HashMap<&'static str, Box<dyn ResourceHandler>> {
    let handlers: Vec<Box<dyn ResourceHandler>> = vec![
        Box::new(compute::InstanceService::new(session.clone())),
        Box::new(network::VpcService::new(session.clone())),
        Box::new(network::SubnetService::new(session.clone())),
        Box::new(network::GatewayAttachmentService::new(session.clone())),
        Box::new(network::RouteService::new(session.clone())),
        Box::new(database::DbInstanceService::new(session.clone())),
        Box::new(messaging::QueueService::new(session.clone())),
        Box::new(load_balancer::ListenerRuleService::new(session.clone())),
    ];
    handlers
        .into_iter()
        .map(|h| (h.resource_type(), h))
        .collect()
}

// =============================================================================
// Shared Handler Helpers
// =============================================================================

/// Engine state for a described object, keyed by `identifier`
pub(crate) fn state_from_object(
    id: &ResourceId,
    schema: &ResourceSchema,
    identifier: &str,
    object: Option<&RemoteObject>,
) -> State {
    match object {
        Some(object) => State::existing(id.clone(), attributes_from_properties(schema, object))
            .with_identifier(identifier),
        None => State::not_found(id.clone()),
    }
}

/// Reject updates that change force-new attributes
pub(crate) fn ensure_in_place(
    schema: &ResourceSchema,
    from: &State,
    to: &Resource,
) -> ProviderResult<()> {
    let changed = schema.force_new_changes(&from.attributes, &to.attributes);
    if changed.is_empty() {
        return Ok(());
    }
    Err(ProviderError::new(format!(
        "Cannot update {} in place: {} require(s) replacement; delete and recreate",
        to.id.resource_type,
        changed.join(", ")
    ))
    .with_kind(ErrorKind::InvalidConfig))
}

/// Patch `properties` of a remote object towards `desired` and wait for the request
pub(crate) async fn update_in_place(
    session: &Session,
    type_name: &str,
    identifier: &str,
    desired: &serde_json::Value,
    properties: &[&str],
    budget: u32,
) -> ProviderResult<()> {
    let current = session
        .describe(type_name, identifier)
        .await?
        .ok_or_else(|| missing_object(type_name, identifier))?;
    let patch = patch_document(&current.properties, desired, properties);
    session
        .submit_update(type_name, identifier, &patch, budget)
        .await
}

/// Error for an update or delete addressed to an object that no longer exists
pub(crate) fn missing_object(type_name: &str, identifier: &str) -> ProviderError {
    ProviderError::new(format!("{} {} does not exist", type_name, identifier)).with_kind(
        ErrorKind::Remote {
            code: "NotFound".to_string(),
        },
    )
}
