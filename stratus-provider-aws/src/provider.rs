//! AWS Provider implementation
//!
//! Routes each engine call to the service registered for the resource type.
//! The control plane is injected: production code connects to Cloud Control,
//! tests hand in an in-memory double.

use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use stratus_core::config::{ProviderConfig, Timeouts};
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::{Resource, ResourceId, State};

use crate::cloudcontrol::CloudControlPlane;
use crate::control_plane::ControlPlane;
use crate::resources::{ResourceHandler, handlers};
use crate::session::Session;

/// AWS Provider
pub struct AwsProvider {
    handlers: HashMap<&'static str, Box<dyn ResourceHandler>>,
}

impl AwsProvider {
    /// Connect to Cloud Control with the given configuration
    pub async fn new(config: &ProviderConfig) -> Self {
        info!("connecting to Cloud Control in {}", config.region);
        let control = CloudControlPlane::connect(config).await;
        Self::with_control_plane(Arc::new(control), config.timeouts.clone())
    }

    pub fn with_control_plane(control: Arc<dyn ControlPlane>, timeouts: Timeouts) -> Self {
        let session = Session::new(control, timeouts);
        Self {
            handlers: handlers(&session),
        }
    }

    fn handler(&self, id: &ResourceId) -> ProviderResult<&dyn ResourceHandler> {
        self.handlers
            .get(id.resource_type.as_str())
            .map(|h| h.as_ref())
            .ok_or_else(|| {
                ProviderError::invalid_config(format!(
                    "Unknown resource type: {}",
                    id.resource_type
                ))
                .for_resource(id.clone())
            })
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Read a resource by its state key
    pub async fn read_resource(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> ProviderResult<State> {
        let handler = self.handler(id)?;
        let Some(identifier) = identifier else {
            return Ok(State::not_found(id.clone()));
        };
        handler
            .read(id, identifier)
            .await
            .map_err(|e| e.for_resource(id.clone()))
    }

    pub async fn create_resource(&self, resource: &Resource) -> ProviderResult<State> {
        let id = &resource.id;
        let handler = self.handler(id)?;
        let state = handler
            .create(resource)
            .await
            .map_err(|e| e.for_resource(id.clone()))?;
        info!(
            "created {} as {}",
            id,
            state.identifier.as_deref().unwrap_or("-")
        );
        Ok(state)
    }

    pub async fn update_resource(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let handler = self.handler(id)?;
        handler
            .update(id, identifier, from, to)
            .await
            .map_err(|e| e.for_resource(id.clone()))
    }

    /// Delete a resource; `force` clears protections that would block deletion
    pub async fn delete_resource(
        &self,
        id: &ResourceId,
        identifier: &str,
        force: bool,
    ) -> ProviderResult<()> {
        let handler = self.handler(id)?;
        handler
            .delete(id, identifier, force)
            .await
            .map_err(|e| e.for_resource(id.clone()))?;
        info!("deleted {} ({})", id, identifier);
        Ok(())
    }

    /// Delete even when deletion protection is enabled
    pub async fn force_delete(&self, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
        self.delete_resource(id, identifier, true).await
    }
}
