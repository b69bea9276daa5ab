//! Cloud Control API binding
//!
//! Implements [`ControlPlane`] over `aws_sdk_cloudcontrol`. Every SDK failure
//! is reduced to an [`ApiError`] so the retry and polling layers can classify it.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_cloudcontrol::Client as CloudControlClient;
use aws_sdk_cloudcontrol::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudcontrol::types::{OperationStatus, ProgressEvent};
use log::debug;
use stratus_core::config::ProviderConfig;
use stratus_core::error::{ApiError, ErrorClass};

use crate::control_plane::{ControlPlane, RemoteObject, RequestProgress, RequestStatus};

/// [`ControlPlane`] backed by the AWS Cloud Control API
#[derive(Clone)]
pub struct CloudControlPlane {
    client: CloudControlClient,
}

impl CloudControlPlane {
    /// Build a client for the configured region, profile and endpoint
    pub async fn connect(config: &ProviderConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(profile) = &config.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(url) = &config.endpoint_url {
            loader = loader.endpoint_url(url);
        }
        let sdk_config = loader.load().await;

        debug!("cloud control client for region {}", config.region);
        Self {
            client: CloudControlClient::new(&sdk_config),
        }
    }
}

#[async_trait]
impl ControlPlane for CloudControlPlane {
    async fn create(
        &self,
        type_name: &str,
        desired_state: &serde_json::Value,
        client_token: &str,
    ) -> Result<RequestProgress, ApiError> {
        let output = self
            .client
            .create_resource()
            .type_name(type_name)
            .desired_state(desired_state.to_string())
            .client_token(client_token)
            .send()
            .await
            .map_err(api_error)?;

        progress_from(output.progress_event())
    }

    async fn update(
        &self,
        type_name: &str,
        identifier: &str,
        patch: &[serde_json::Value],
        client_token: &str,
    ) -> Result<RequestProgress, ApiError> {
        let patch_document = serde_json::to_string(patch)
            .map_err(|e| ApiError::new("InvalidRequest", format!("Failed to build patch: {}", e)))?;

        let output = self
            .client
            .update_resource()
            .type_name(type_name)
            .identifier(identifier)
            .patch_document(patch_document)
            .client_token(client_token)
            .send()
            .await
            .map_err(api_error)?;

        progress_from(output.progress_event())
    }

    async fn delete(
        &self,
        type_name: &str,
        identifier: &str,
        client_token: &str,
    ) -> Result<RequestProgress, ApiError> {
        let output = self
            .client
            .delete_resource()
            .type_name(type_name)
            .identifier(identifier)
            .client_token(client_token)
            .send()
            .await
            .map_err(api_error)?;

        progress_from(output.progress_event())
    }

    async fn request_status(&self, request_token: &str) -> Result<RequestProgress, ApiError> {
        let output = self
            .client
            .get_resource_request_status()
            .request_token(request_token)
            .send()
            .await
            .map_err(api_error)?;

        progress_from(output.progress_event())
    }

    async fn get(&self, type_name: &str, identifier: &str) -> Result<Option<RemoteObject>, ApiError> {
        let result = self
            .client
            .get_resource()
            .type_name(type_name)
            .identifier(identifier)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                let err = api_error(e);
                return if err.is_not_found() { Ok(None) } else { Err(err) };
            }
        };

        let Some(desc) = output.resource_description() else {
            return Ok(None);
        };
        let properties = match desc.properties() {
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                ApiError::new(
                    "InvalidResponse",
                    format!("Failed to parse properties of {}: {}", identifier, e),
                )
            })?,
            None => serde_json::Value::Object(Default::default()),
        };

        Ok(Some(RemoteObject::new(
            desc.identifier().unwrap_or(identifier),
            properties,
        )))
    }
}

fn progress_from(event: Option<&ProgressEvent>) -> Result<RequestProgress, ApiError> {
    let event = event.ok_or_else(|| ApiError::new("InvalidResponse", "No progress event returned"))?;
    let request_token = event
        .request_token()
        .ok_or_else(|| ApiError::new("InvalidResponse", "No request token returned"))?;

    let status = match event.operation_status() {
        Some(OperationStatus::Pending) => RequestStatus::Pending,
        Some(OperationStatus::InProgress) => RequestStatus::InProgress,
        Some(OperationStatus::Success) => RequestStatus::Success,
        Some(OperationStatus::Failed) => RequestStatus::Failed,
        Some(OperationStatus::CancelInProgress) => RequestStatus::CancelInProgress,
        Some(OperationStatus::CancelComplete) => RequestStatus::CancelComplete,
        Some(other) => RequestStatus::Unknown(other.as_str().to_string()),
        None => RequestStatus::Unknown("MISSING".to_string()),
    };

    Ok(RequestProgress {
        request_token: request_token.to_string(),
        identifier: event.identifier().map(str::to_string),
        status,
        error_code: event.error_code().map(|c| c.as_str().to_string()),
        status_message: event.status_message().map(str::to_string),
    })
}

/// Reduce an SDK error to a classified [`ApiError`]
///
/// Service errors keep their remote code; transport failures (timeouts,
/// dispatch and response errors) are treated as retryable.
fn api_error<E, R>(err: SdkError<E, R>) -> ApiError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::ServiceError(service) => {
            let inner = service.err();
            ApiError::new(
                inner.code().unwrap_or("Unknown"),
                inner.message().unwrap_or_default(),
            )
        }
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ApiError::with_class(
                "NetworkFailure",
                DisplayErrorContext(&err).to_string(),
                ErrorClass::Retryable,
            )
        }
        _ => ApiError::with_class(
            "ClientError",
            DisplayErrorContext(&err).to_string(),
            ErrorClass::Permanent,
        ),
    }
}
