//! In-memory control plane for tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value as Json, json};
use stratus_core::error::ApiError;

use crate::control_plane::{ControlPlane, RemoteObject, RequestProgress, RequestStatus};

enum RequestPlan {
    SucceedAfter(u32),
    Fail { code: String, message: String },
}

struct TrackedRequest {
    progress: RequestProgress,
    polls_left: u32,
}

#[derive(Default)]
struct FakeState {
    objects: HashMap<String, Json>,
    deleted: HashMap<String, Json>,
    scripts: HashMap<String, VecDeque<Json>>,
    failures: HashMap<&'static str, VecDeque<ApiError>>,
    requests: HashMap<String, TrackedRequest>,
    next_plan: Option<RequestPlan>,
    calls: Vec<(&'static str, String)>,
    client_tokens: Vec<String>,
    patches: Vec<Vec<Json>>,
    desired: Vec<Json>,
    counter: u32,
}

/// Control plane double that keeps objects in memory
///
/// Requests succeed immediately unless planned otherwise. Describe results can
/// be scripted per identifier: each `get` consumes one entry, merged into the
/// stored properties, and a `null` entry reads as "not found".
#[derive(Default)]
pub struct FakeControlPlane {
    state: Mutex<FakeState>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, _type_name: &str, identifier: &str, properties: Json) {
        let mut state = self.state.lock().unwrap();
        state.objects.insert(identifier.to_string(), properties);
    }

    pub fn script(&self, identifier: &str, observations: Vec<Json>) {
        let mut state = self.state.lock().unwrap();
        state
            .scripts
            .insert(identifier.to_string(), observations.into());
    }

    /// Fail the next call of `op` ("create", "update", "delete", "status", "get")
    pub fn fail_next(&self, op: &'static str, error: ApiError) {
        let mut state = self.state.lock().unwrap();
        state.failures.entry(op).or_default().push_back(error);
    }

    /// Make the next submitted request end in FAILED with a handler error code
    pub fn fail_next_request(&self, code: &str, message: &str) {
        self.state.lock().unwrap().next_plan = Some(RequestPlan::Fail {
            code: code.to_string(),
            message: message.to_string(),
        });
    }

    /// Make the next submitted request report SUCCESS on its `n`-th status poll
    pub fn succeed_after_polls(&self, n: u32) {
        self.state.lock().unwrap().next_plan = Some(RequestPlan::SucceedAfter(n));
    }

    pub fn count(&self, op: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.calls.iter().filter(|(o, _)| *o == op).count()
    }

    pub fn calls(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .calls
            .iter()
            .map(|(op, detail)| format!("{} {}", op, detail))
            .collect()
    }

    pub fn client_tokens(&self) -> Vec<String> {
        self.state.lock().unwrap().client_tokens.clone()
    }

    pub fn last_patch(&self) -> Option<Vec<Json>> {
        self.state.lock().unwrap().patches.last().cloned()
    }

    pub fn last_desired(&self) -> Option<Json> {
        self.state.lock().unwrap().desired.last().cloned()
    }

    pub fn object(&self, identifier: &str) -> Option<Json> {
        self.state.lock().unwrap().objects.get(identifier).cloned()
    }
}

impl FakeState {
    fn take_failure(&mut self, op: &'static str) -> Result<(), ApiError> {
        match self.failures.get_mut(op).and_then(|q| q.pop_front()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn start_request(&mut self, identifier: Option<String>) -> RequestProgress {
        self.counter += 1;
        let token = format!("req-{:04}", self.counter);
        let (mut progress, polls_left) = match self.next_plan.take() {
            None => (RequestProgress::new(&token, RequestStatus::Success), 0),
            Some(RequestPlan::SucceedAfter(n)) => {
                (RequestProgress::new(&token, RequestStatus::InProgress), n)
            }
            Some(RequestPlan::Fail { code, message }) => (
                RequestProgress::new(&token, RequestStatus::Failed).with_error(code, message),
                0,
            ),
        };
        if progress.status == RequestStatus::Success {
            progress.identifier = identifier.clone();
        }

        let mut tracked = progress.clone();
        tracked.identifier = identifier;
        self.requests.insert(
            token,
            TrackedRequest {
                progress: tracked,
                polls_left,
            },
        );
        progress
    }

    fn next_id(&mut self) -> u32 {
        self.counter += 1;
        self.counter
    }
}

/// Primary identifier and read-only properties the remote side would assign
fn assign_identifier(type_name: &str, desired: &Json, n: u32) -> (String, Json) {
    let prop = |name: &str| desired.get(name).and_then(|v| v.as_str()).unwrap_or_default().to_string();
    match type_name {
        "AWS::EC2::Instance" => {
            let id = format!("i-{:04}", n);
            (id.clone(), json!({"InstanceId": id, "PrivateIpAddress": "10.0.1.15"}))
        }
        "AWS::EC2::VPC" => {
            let id = format!("vpc-{:04}", n);
            (id.clone(), json!({"VpcId": id}))
        }
        "AWS::EC2::Subnet" => {
            let id = format!("subnet-{:04}", n);
            (id.clone(), json!({"SubnetId": id}))
        }
        "AWS::EC2::VPCGatewayAttachment" => {
            let kind = if desired.get("InternetGatewayId").is_some() {
                "IGW"
            } else {
                "VPNGW"
            };
            (
                format!("{}|{}", kind, prop("VpcId")),
                json!({"AttachmentType": kind}),
            )
        }
        "AWS::EC2::Route" => (
            format!("{}|{}", prop("RouteTableId"), prop("DestinationCidrBlock")),
            json!({"CidrBlock": prop("DestinationCidrBlock")}),
        ),
        "AWS::RDS::DBInstance" => {
            let id = prop("DBInstanceIdentifier").to_lowercase();
            (
                id.clone(),
                json!({"Endpoint": {"Address": format!("{}.abc.us-east-1.rds.amazonaws.com", id), "Port": "5432"}}),
            )
        }
        "AWS::SQS::Queue" => {
            let name = prop("QueueName");
            let url = format!("https://sqs.us-east-1.amazonaws.com/123456789012/{}", name);
            (
                url.clone(),
                json!({"QueueUrl": url, "Arn": format!("arn:aws:sqs:us-east-1:123456789012:{}", name)}),
            )
        }
        "AWS::ElasticLoadBalancingV2::ListenerRule" => {
            let arn = format!(
                "arn:aws:elasticloadbalancing:us-east-1:123456789012:listener-rule/app/web/50dc6c495c0c9188/f2f7dc8efc522ab2/{:04}",
                n
            );
            (arn.clone(), json!({"RuleArn": arn}))
        }
        _ => (format!("obj-{:04}", n), json!({})),
    }
}

fn merge(target: &mut Json, patch: &Json) {
    if let (Some(target), Some(patch)) = (target.as_object_mut(), patch.as_object()) {
        for (k, v) in patch {
            target.insert(k.clone(), v.clone());
        }
    }
}

fn apply_patch(target: &mut Json, ops: &[Json]) {
    let Some(object) = target.as_object_mut() else {
        return;
    };
    for op in ops {
        let path = op["path"].as_str().unwrap_or_default().trim_start_matches('/');
        match op["op"].as_str() {
            Some("add") | Some("replace") => {
                object.insert(path.to_string(), op["value"].clone());
            }
            Some("remove") => {
                object.remove(path);
            }
            _ => {}
        }
    }
}

fn not_found(identifier: &str) -> ApiError {
    ApiError::new(
        "ResourceNotFoundException",
        format!("Resource {} not found", identifier),
    )
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn create(
        &self,
        type_name: &str,
        desired_state: &Json,
        client_token: &str,
    ) -> Result<RequestProgress, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(("create", type_name.to_string()));
        state.client_tokens.push(client_token.to_string());
        state.take_failure("create")?;

        state.desired.push(desired_state.clone());
        let n = state.next_id();
        let (identifier, computed) = assign_identifier(type_name, desired_state, n);
        let mut properties = desired_state.clone();
        merge(&mut properties, &computed);

        let failing = matches!(state.next_plan, Some(RequestPlan::Fail { .. }));
        if !failing {
            state.objects.insert(identifier.clone(), properties);
        }
        Ok(state.start_request(Some(identifier)))
    }

    async fn update(
        &self,
        type_name: &str,
        identifier: &str,
        patch: &[Json],
        client_token: &str,
    ) -> Result<RequestProgress, ApiError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(("update", format!("{} {}", type_name, identifier)));
        state.client_tokens.push(client_token.to_string());
        state.take_failure("update")?;

        let Some(object) = state.objects.get_mut(identifier) else {
            return Err(not_found(identifier));
        };
        apply_patch(object, patch);
        state.patches.push(patch.to_vec());
        Ok(state.start_request(Some(identifier.to_string())))
    }

    async fn delete(
        &self,
        type_name: &str,
        identifier: &str,
        client_token: &str,
    ) -> Result<RequestProgress, ApiError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(("delete", format!("{} {}", type_name, identifier)));
        state.client_tokens.push(client_token.to_string());
        state.take_failure("delete")?;

        match state.objects.remove(identifier) {
            Some(object) => {
                state.deleted.insert(identifier.to_string(), object);
                Ok(state.start_request(Some(identifier.to_string())))
            }
            None => Err(not_found(identifier)),
        }
    }

    async fn request_status(&self, request_token: &str) -> Result<RequestProgress, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(("status", request_token.to_string()));
        state.take_failure("status")?;

        let Some(tracked) = state.requests.get_mut(request_token) else {
            return Err(ApiError::new(
                "RequestTokenNotFoundException",
                format!("Request {} not found", request_token),
            ));
        };
        if tracked.polls_left > 0 {
            tracked.polls_left -= 1;
            if tracked.polls_left == 0 {
                tracked.progress.status = RequestStatus::Success;
            }
        }

        let mut progress = tracked.progress.clone();
        if progress.status != RequestStatus::Success {
            progress.identifier = None;
        }
        Ok(progress)
    }

    async fn get(&self, type_name: &str, identifier: &str) -> Result<Option<RemoteObject>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(("get", format!("{} {}", type_name, identifier)));
        state.take_failure("get")?;

        let scripted = state
            .scripts
            .get_mut(identifier)
            .and_then(|q| q.pop_front());

        match scripted {
            Some(Json::Null) => Ok(None),
            Some(patch) => {
                let state = &mut *state;
                let object = state
                    .objects
                    .get_mut(identifier)
                    .or_else(|| state.deleted.get_mut(identifier));
                let properties = match object {
                    Some(object) => {
                        merge(object, &patch);
                        object.clone()
                    }
                    None => patch,
                };
                Ok(Some(RemoteObject::new(identifier, properties)))
            }
            None => Ok(state
                .objects
                .get(identifier)
                .map(|p| RemoteObject::new(identifier, p.clone()))),
        }
    }
}
