//! Stratus AWS Provider
//!
//! AWS provider backed by the Cloud Control API.
//!
//! ## Module Structure
//!
//! - `control_plane` - The remote control plane seam and its request/object types
//! - `cloudcontrol` - `ControlPlane` over the AWS Cloud Control SDK client
//! - `session` - Retry and polling discipline shared by every service
//! - `services` - One service per product (compute, network, database, ...)
//! - `resources` - Resource type registry and handler seam
//! - `provider` - AwsProvider implementation
//! - `ids` - Composite state keys
//! - `utils` - Tag and JSON conversion helpers

pub mod cloudcontrol;
pub mod control_plane;
pub mod ids;
pub mod provider;
pub mod resources;
pub mod services;
pub mod session;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-export main types
pub use control_plane::ControlPlane;
pub use provider::AwsProvider;

use stratus_core::provider::{BoxFuture, Provider, ProviderResult, ResourceType};
use stratus_core::resource::{Resource, ResourceId, State};

use resources::resource_types;

// =============================================================================
// Provider Trait Implementation
// =============================================================================

impl Provider for AwsProvider {
    fn name(&self) -> &'static str {
        "aws"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        resource_types()
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.map(|s| s.to_string());
        Box::pin(async move { self.read_resource(&id, identifier.as_deref()).await })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move { self.create_resource(&resource).await })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let from = from.clone();
        let to = to.clone();
        Box::pin(async move { self.update_resource(&id, &identifier, &from, &to).await })
    }

    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        Box::pin(async move { self.delete_resource(&id, &identifier, false).await })
    }
}
