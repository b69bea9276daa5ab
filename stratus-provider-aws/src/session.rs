//! Shared session
//!
//! One [`Session`] is built by the entry point and cloned into every service.
//! It owns the control-plane client, the timing configuration and the lock
//! registry, and implements the retry and polling discipline every product
//! relies on.

use std::sync::Arc;

use log::{debug, info};
use stratus_core::config::Timeouts;
use stratus_core::lock::LockRegistry;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::reconcile::{Converged, ProductStatus, WaitSpec, wait_for};
use stratus_core::retry::{RetryError, retry_api};
use uuid::Uuid;

use crate::control_plane::{ControlPlane, RemoteObject, RequestProgress, RequestStatus};

#[derive(Clone)]
pub struct Session {
    control: Arc<dyn ControlPlane>,
    timeouts: Timeouts,
    locks: LockRegistry,
}

impl Session {
    pub fn new(control: Arc<dyn ControlPlane>, timeouts: Timeouts) -> Self {
        Self {
            control,
            timeouts,
            locks: LockRegistry::new(),
        }
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    /// Describe an object, retrying transient failures under the read ceiling
    pub async fn describe(
        &self,
        type_name: &str,
        identifier: &str,
    ) -> ProviderResult<Option<RemoteObject>> {
        debug!("describe {} {}", type_name, identifier);
        let policy = self.timeouts.read_policy();
        let object = retry_api(&policy, || self.control.get(type_name, identifier)).await?;
        Ok(object)
    }

    /// Submit a create request and wait for it to finish
    ///
    /// Returns the primary identifier assigned by the control plane. The
    /// request wait uses the write ceiling scaled by `budget`.
    pub async fn submit_create(
        &self,
        type_name: &str,
        desired: &serde_json::Value,
        budget: u32,
    ) -> ProviderResult<String> {
        let operation = format!("create {}", type_name);
        let client_token = Uuid::new_v4().to_string();
        let policy = self.timeouts.write_policy();

        info!("{}", operation);
        let progress =
            retry_api(&policy, || self.control.create(type_name, desired, &client_token)).await?;
        let done = self.wait_for_request(&operation, progress, budget, false).await?;

        done.identifier.ok_or_else(|| {
            ProviderError::new(format!("{}: no identifier returned", operation))
        })
    }

    /// Apply a JSON Patch document and wait for the update to finish
    pub async fn submit_update(
        &self,
        type_name: &str,
        identifier: &str,
        patch: &[serde_json::Value],
        budget: u32,
    ) -> ProviderResult<()> {
        if patch.is_empty() {
            debug!("update {} {}: nothing to change", type_name, identifier);
            return Ok(());
        }

        let operation = format!("update {} {}", type_name, identifier);
        let client_token = Uuid::new_v4().to_string();
        let policy = self.timeouts.write_policy();

        info!("{} ({} operation(s))", operation, patch.len());
        let progress = retry_api(&policy, || {
            self.control.update(type_name, identifier, patch, &client_token)
        })
        .await?;
        self.wait_for_request(&operation, progress, budget, false)
            .await
            .map(|_| ())
    }

    /// Delete an object; an object that is already gone counts as deleted
    pub async fn submit_delete(
        &self,
        type_name: &str,
        identifier: &str,
        budget: u32,
    ) -> ProviderResult<()> {
        let operation = format!("delete {} {}", type_name, identifier);
        let client_token = Uuid::new_v4().to_string();
        let policy = self.timeouts.write_policy();

        info!("{}", operation);
        let progress = match retry_api(&policy, || {
            self.control.delete(type_name, identifier, &client_token)
        })
        .await
        {
            Ok(progress) => progress,
            Err(RetryError::Permanent(e)) if e.is_not_found() => {
                info!("{}: already absent", operation);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        self.wait_for_request(&operation, progress, budget, true)
            .await
            .map(|_| ())
    }

    /// Poll a submitted request until it succeeds or fails
    ///
    /// With `absent_ok`, a request that failed because the object is already
    /// gone counts as a success.
    pub async fn wait_for_request(
        &self,
        operation: &str,
        progress: RequestProgress,
        budget: u32,
        absent_ok: bool,
    ) -> ProviderResult<RequestProgress> {
        let settle = move |p: RequestProgress| {
            if absent_ok && p.failed_not_found() {
                RequestProgress {
                    status: RequestStatus::Success,
                    ..p
                }
            } else {
                p
            }
        };

        let control = &self.control;
        let request_token = progress.request_token.clone();
        let token = request_token.as_str();
        // The submit response is the first observation; no remote call needed
        let mut first = Some(settle(progress));

        let spec = self.timeouts.wait_present(budget);
        let converged = wait_for(operation, &spec, || {
            let first = first.take();
            async move {
                match first {
                    Some(p) => Ok(Some(p)),
                    None => control.request_status(token).await.map(|p| Some(settle(p))),
                }
            }
        })
        .await?;

        converged.status.ok_or_else(|| {
            ProviderError::new(format!("{}: request {} vanished", operation, request_token))
        })
    }

    /// Poll an object until its product status converges on `spec.target`
    ///
    /// `status_of` maps a described object to its product status. Not-found
    /// handling follows the wait spec.
    pub async fn wait_for_object<S, F>(
        &self,
        operation: &str,
        type_name: &str,
        identifier: &str,
        spec: &WaitSpec,
        status_of: F,
    ) -> ProviderResult<Converged<S>>
    where
        S: ProductStatus,
        F: Fn(&RemoteObject) -> S,
    {
        let control = &self.control;
        let status_of = &status_of;
        let converged = wait_for(operation, spec, || async move {
            control
                .get(type_name, identifier)
                .await
                .map(|object| object.map(|o| status_of(&o)))
        })
        .await?;
        Ok(converged)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use stratus_core::error::ApiError;
    use stratus_core::provider::ErrorKind;
    use stratus_core::reconcile::Lifecycle;

    use super::*;
    use crate::testing::FakeControlPlane;

    fn session(fake: &Arc<FakeControlPlane>) -> Session {
        Session::new(fake.clone(), Timeouts::default())
    }

    #[derive(Debug, PartialEq)]
    struct Phase(String);

    impl ProductStatus for Phase {
        fn lifecycle(&self) -> Lifecycle {
            match self.0.as_str() {
                "building" => Lifecycle::Pending,
                "ready" => Lifecycle::Running,
                other => Lifecycle::Unrecognized(other.to_string()),
            }
        }

        fn raw(&self) -> String {
            self.0.clone()
        }
    }

    fn phase(object: &RemoteObject) -> Phase {
        Phase(object.str_property("Phase").unwrap_or("ready").to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn create_waits_for_request_and_returns_identifier() {
        let fake = Arc::new(FakeControlPlane::new());
        fake.succeed_after_polls(2);

        let identifier = session(&fake)
            .submit_create("AWS::EC2::VPC", &json!({"CidrBlock": "10.0.0.0/16"}), 1)
            .await
            .unwrap();

        assert_eq!(identifier, "vpc-0001");
        assert_eq!(fake.count("status"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn request_wait_polls_status_until_done() {
        let fake = Arc::new(FakeControlPlane::new());
        fake.succeed_after_polls(3);
        let progress = fake
            .create("AWS::EC2::VPC", &json!({"CidrBlock": "10.0.0.0/16"}), "token-1")
            .await
            .unwrap();
        assert_eq!(progress.status, RequestStatus::InProgress);

        let done = session(&fake)
            .wait_for_request("create vpc", progress, 1, false)
            .await
            .unwrap();

        assert_eq!(done.status, RequestStatus::Success);
        assert_eq!(done.identifier.as_deref(), Some("vpc-0001"));
        assert_eq!(fake.count("status"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn create_retries_throttling_with_one_client_token() {
        let fake = Arc::new(FakeControlPlane::new());
        fake.fail_next("create", ApiError::new("ThrottlingException", "Rate exceeded"));
        fake.fail_next("create", ApiError::new("ThrottlingException", "Rate exceeded"));

        session(&fake)
            .submit_create("AWS::EC2::VPC", &json!({"CidrBlock": "10.0.0.0/16"}), 1)
            .await
            .unwrap();

        assert_eq!(fake.count("create"), 3);
        let tokens = fake.client_tokens();
        assert_eq!(tokens.len(), 3);
        assert!(tokens.iter().all(|t| t == &tokens[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_request_reports_handler_error() {
        let fake = Arc::new(FakeControlPlane::new());
        fake.fail_next_request("AlreadyExists", "queue jobs already exists");

        let err = session(&fake)
            .submit_create("AWS::SQS::Queue", &json!({"QueueName": "jobs"}), 1)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::TerminalStatus);
        assert!(err.message.contains("AlreadyExists"));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_of_absent_object_succeeds() {
        let fake = Arc::new(FakeControlPlane::new());
        session(&fake)
            .submit_delete("AWS::EC2::VPC", "vpc-404", 1)
            .await
            .unwrap();

        fake.fail_next_request("NotFound", "vpc-405 does not exist");
        fake.insert("AWS::EC2::VPC", "vpc-405", json!({"VpcId": "vpc-405"}));
        session(&fake)
            .submit_delete("AWS::EC2::VPC", "vpc-405", 1)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn empty_patch_is_not_submitted() {
        let fake = Arc::new(FakeControlPlane::new());
        session(&fake)
            .submit_update("AWS::EC2::VPC", "vpc-1", &[], 1)
            .await
            .unwrap();
        assert_eq!(fake.count("update"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn describe_retries_transient_errors() {
        let fake = Arc::new(FakeControlPlane::new());
        fake.insert("AWS::EC2::VPC", "vpc-1", json!({"VpcId": "vpc-1"}));
        fake.fail_next("get", ApiError::new("ServiceUnavailable", "try later"));

        let object = session(&fake)
            .describe("AWS::EC2::VPC", "vpc-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(object.str_property("VpcId"), Some("vpc-1"));
        assert_eq!(fake.count("get"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn describe_gives_up_after_read_ceiling() {
        let fake = Arc::new(FakeControlPlane::new());
        for _ in 0..400 {
            fake.fail_next("get", ApiError::new("ThrottlingException", "Rate exceeded"));
        }

        let mut timeouts = Timeouts::default();
        timeouts.read = Duration::from_secs(10);
        let err = Session::new(fake.clone(), timeouts)
            .describe("AWS::EC2::VPC", "vpc-1")
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(fake.count("get"), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn object_wait_follows_product_status() {
        let fake = Arc::new(FakeControlPlane::new());
        fake.insert("AWS::Test::Thing", "t-1", json!({"Phase": "building"}));
        fake.script(
            "t-1",
            vec![json!({"Phase": "building"}), json!({"Phase": "ready"})],
        );

        let s = session(&fake);
        let spec = s.timeouts().wait_present(1);
        let converged = s
            .wait_for_object("create thing", "AWS::Test::Thing", "t-1", &spec, phase)
            .await
            .unwrap();

        assert_eq!(converged.polls, 2);
        assert_eq!(converged.status, Some(Phase("ready".to_string())));
    }
}
