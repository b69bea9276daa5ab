//! Remote control plane seam
//!
//! The provider talks to the cloud only through [`ControlPlane`]. The
//! production implementation wraps the Cloud Control API client
//! ([`crate::cloudcontrol::CloudControlPlane`]); tests substitute an
//! in-memory fake.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use stratus_core::error::ApiError;
use stratus_core::reconcile::{Lifecycle, ProductStatus};

/// Progress of an asynchronous request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    CancelInProgress,
    CancelComplete,
    Unknown(String),
}

impl RequestStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::InProgress => "IN_PROGRESS",
            RequestStatus::Success => "SUCCESS",
            RequestStatus::Failed => "FAILED",
            RequestStatus::CancelInProgress => "CANCEL_IN_PROGRESS",
            RequestStatus::CancelComplete => "CANCEL_COMPLETE",
            RequestStatus::Unknown(s) => s,
        }
    }
}

/// The control plane's view of one create/update/delete request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestProgress {
    pub request_token: String,
    /// Primary identifier of the target object, once known
    pub identifier: Option<String>,
    pub status: RequestStatus,
    /// Handler error code (e.g. "NotFound", "AlreadyExists") on failure
    pub error_code: Option<String>,
    pub status_message: Option<String>,
}

impl RequestProgress {
    pub fn new(request_token: impl Into<String>, status: RequestStatus) -> Self {
        Self {
            request_token: request_token.into(),
            identifier: None,
            status,
            error_code: None,
            status_message: None,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self.status_message = Some(message.into());
        self
    }

    /// Whether the request failed because its target does not exist
    pub fn failed_not_found(&self) -> bool {
        self.status == RequestStatus::Failed && self.error_code.as_deref() == Some("NotFound")
    }
}

impl ProductStatus for RequestProgress {
    fn lifecycle(&self) -> Lifecycle {
        match &self.status {
            RequestStatus::Pending | RequestStatus::InProgress | RequestStatus::CancelInProgress => {
                Lifecycle::Pending
            }
            RequestStatus::Success => Lifecycle::Running,
            RequestStatus::Failed => Lifecycle::Failed(format!(
                "{}: {}",
                self.error_code.as_deref().unwrap_or("Unknown"),
                self.status_message.as_deref().unwrap_or("no message")
            )),
            RequestStatus::CancelComplete => Lifecycle::Failed("request was cancelled".to_string()),
            RequestStatus::Unknown(s) => Lifecycle::Unrecognized(s.clone()),
        }
    }

    fn raw(&self) -> String {
        self.status.as_str().to_string()
    }
}

/// An object as returned by a describe call
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    pub identifier: String,
    pub properties: serde_json::Value,
}

impl RemoteObject {
    pub fn new(identifier: impl Into<String>, properties: serde_json::Value) -> Self {
        Self {
            identifier: identifier.into(),
            properties,
        }
    }

    /// Property at a `/`-separated path (e.g. "State/Name")
    pub fn property(&self, path: &str) -> Option<&serde_json::Value> {
        self.properties.pointer(&format!("/{}", path))
    }

    pub fn str_property(&self, path: &str) -> Option<&str> {
        self.property(path).and_then(|v| v.as_str())
    }

    /// Deserialize the properties into a typed shape
    pub fn properties_as<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_value(self.properties.clone()).map_err(|e| {
            ApiError::new(
                "InvalidResponse",
                format!("unexpected properties for {}: {}", self.identifier, e),
            )
        })
    }
}

/// Asynchronous resource API of a cloud
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Submit a create request; `client_token` makes resubmission idempotent
    async fn create(
        &self,
        type_name: &str,
        desired_state: &serde_json::Value,
        client_token: &str,
    ) -> Result<RequestProgress, ApiError>;

    /// Submit an update as a JSON Patch document
    async fn update(
        &self,
        type_name: &str,
        identifier: &str,
        patch: &[serde_json::Value],
        client_token: &str,
    ) -> Result<RequestProgress, ApiError>;

    async fn delete(
        &self,
        type_name: &str,
        identifier: &str,
        client_token: &str,
    ) -> Result<RequestProgress, ApiError>;

    /// Current progress of a previously submitted request
    async fn request_status(&self, request_token: &str) -> Result<RequestProgress, ApiError>;

    /// Describe one object; `Ok(None)` when it does not exist
    async fn get(&self, type_name: &str, identifier: &str) -> Result<Option<RemoteObject>, ApiError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_lifecycle() {
        let progress = RequestProgress::new("t-1", RequestStatus::InProgress);
        assert_eq!(progress.lifecycle(), Lifecycle::Pending);
        assert_eq!(progress.raw(), "IN_PROGRESS");

        let done = RequestProgress::new("t-1", RequestStatus::Success).with_identifier("vpc-1");
        assert_eq!(done.lifecycle(), Lifecycle::Running);

        let failed = RequestProgress::new("t-1", RequestStatus::Failed)
            .with_error("AlreadyExists", "queue jobs already exists");
        assert_eq!(
            failed.lifecycle(),
            Lifecycle::Failed("AlreadyExists: queue jobs already exists".to_string())
        );
        assert!(!failed.failed_not_found());

        let unknown = RequestProgress::new("t-1", RequestStatus::Unknown("PAUSED".to_string()));
        assert_eq!(unknown.lifecycle(), Lifecycle::Unrecognized("PAUSED".to_string()));
    }

    #[test]
    fn delete_of_missing_object_is_recognized() {
        let progress =
            RequestProgress::new("t-2", RequestStatus::Failed).with_error("NotFound", "gone");
        assert!(progress.failed_not_found());
    }

    #[test]
    fn nested_property_lookup() {
        let object = RemoteObject::new("i-1", json!({"State": {"Name": "running", "Code": 16}}));
        assert_eq!(object.str_property("State/Name"), Some("running"));
        assert!(object.property("State/Missing").is_none());
    }
}
