//! Provider - Trait abstracting resource operations
//!
//! A Provider exposes the resource types of one cloud to the
//! infrastructure-as-code engine. The engine calls these entry points per
//! resource instance; each returns either the new state or a [`ProviderError`].

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::composite_id::IdError;
use crate::config::ConfigError;
use crate::error::ApiError;
use crate::reconcile::WaitError;
use crate::resource::{Resource, ResourceId, State};
use crate::retry::RetryError;
use crate::schema::{ResourceSchema, TypeError};

/// Broad category of a provider failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected by the remote API; carries the remote error code
    Remote { code: String },
    /// A retry or wait ran out of its wall-clock budget
    Timeout,
    /// The remote object reported a failure status, or an unknown one
    TerminalStatus,
    /// A composite identifier could not be decoded
    MalformedIdentifier,
    /// The resource configuration is invalid
    InvalidConfig,
    Io,
    Other,
}

/// Error type for Provider operations
#[derive(Debug)]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
    pub resource_id: Option<ResourceId>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref id) = self.resource_id {
            write!(f, "[{}.{}] {}", id.resource_type, id.name, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Other,
            message: message.into(),
            resource_id: None,
            cause: None,
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::InvalidConfig)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::Io)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::Timeout)
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn for_resource(mut self, id: ResourceId) -> Self {
        self.resource_id = Some(id);
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Remote error code, when the failure came from the remote API
    pub fn remote_code(&self) -> Option<&str> {
        match &self.kind {
            ErrorKind::Remote { code } => Some(code),
            _ => None,
        }
    }
}

impl From<ApiError> for ProviderError {
    fn from(e: ApiError) -> Self {
        let kind = ErrorKind::Remote {
            code: e.code.clone(),
        };
        ProviderError::new(e.to_string()).with_kind(kind).with_cause(e)
    }
}

impl From<RetryError<ApiError>> for ProviderError {
    fn from(e: RetryError<ApiError>) -> Self {
        match e {
            RetryError::Timeout {
                elapsed,
                attempts,
                last,
            } => ProviderError::timeout(format!(
                "Timed out after {} after {} attempts: {}",
                format_elapsed(elapsed),
                attempts,
                last
            ))
            .with_cause(last),
            RetryError::Permanent(e) => e.into(),
        }
    }
}

impl From<WaitError<ApiError>> for ProviderError {
    fn from(e: WaitError<ApiError>) -> Self {
        match e {
            WaitError::Describe { error, .. } => error.into(),
            WaitError::Timeout { .. } => ProviderError::timeout(e.to_string()),
            WaitError::TerminalFailure { .. }
            | WaitError::UnexpectedStatus { .. }
            | WaitError::Vanished { .. } => {
                ProviderError::new(e.to_string()).with_kind(ErrorKind::TerminalStatus)
            }
        }
    }
}

impl From<IdError> for ProviderError {
    fn from(e: IdError) -> Self {
        ProviderError::new(e.to_string())
            .with_kind(ErrorKind::MalformedIdentifier)
            .with_cause(e)
    }
}

impl From<TypeError> for ProviderError {
    fn from(e: TypeError) -> Self {
        ProviderError::invalid_config(e.to_string()).with_cause(e)
    }
}

impl From<ConfigError> for ProviderError {
    fn from(e: ConfigError) -> Self {
        ProviderError::invalid_config(e.to_string()).with_cause(e)
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    format!("{}s", elapsed.as_secs())
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Definition of resource types that a Provider can handle
pub trait ResourceType: Send + Sync {
    /// Resource type name (e.g., "ec2_vpc")
    fn name(&self) -> &'static str;

    /// Attribute schema for this resource type
    fn schema(&self) -> ResourceSchema;
}

/// Main Provider trait
///
/// Each infrastructure provider implements this trait.
/// All operations are async and involve side effects.
pub trait Provider: Send + Sync {
    /// Name of this Provider (e.g., "aws")
    fn name(&self) -> &'static str;

    /// List of resource types this Provider can handle
    fn resource_types(&self) -> Vec<Box<dyn ResourceType>>;

    /// Schema of one resource type, if supported
    fn schema(&self, resource_type: &str) -> Option<ResourceSchema> {
        self.resource_types()
            .into_iter()
            .find(|t| t.name() == resource_type)
            .map(|t| t.schema())
    }

    /// Get the current state of a resource
    ///
    /// Returns `State::not_found()` if the resource does not exist or no
    /// identifier is known. Must be safe to call repeatedly.
    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>>;

    /// Create a resource
    ///
    /// Returns State with identifier set to the state key of the new object
    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>>;

    /// Update a resource in place
    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>>;

    /// Delete a resource; deleting an absent resource succeeds
    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>>;

    /// Adopt an existing remote object into state
    ///
    /// Fails if the object does not exist.
    fn import(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        Box::pin(async move {
            let state = self.read(&id, Some(identifier.as_str())).await?;
            if state.exists {
                Ok(state)
            } else {
                Err(ProviderError::new(format!(
                    "Cannot import non-existent remote object '{}'",
                    identifier
                ))
                .with_kind(ErrorKind::Remote {
                    code: "NotFound".to_string(),
                })
                .for_resource(id))
            }
        })
    }
}

/// Provider implementation for Box<dyn Provider>
/// This enables dynamic dispatch for Providers
impl Provider for Box<dyn Provider> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        (**self).resource_types()
    }

    fn schema(&self, resource_type: &str) -> Option<ResourceSchema> {
        (**self).schema(resource_type)
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).read(id, identifier)
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).create(resource)
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).update(id, identifier, from, to)
    }

    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        (**self).delete(id, identifier)
    }

    fn import(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).import(id, identifier)
    }
}
