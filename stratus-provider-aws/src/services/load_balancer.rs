//! Load balancing: ELBv2 listener rules
//!
//! A rule is keyed `listener_arn#rule_arn` in state and addressed by its rule
//! ARN remotely. Rule priorities are unique per listener and the API rejects
//! concurrent changes to one listener, so every mutation holds the listener's
//! lock from the session's lock registry.

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use stratus_core::composite_id::CompositeKey;
use stratus_core::provider::ProviderResult;
use stratus_core::resource::{Resource, ResourceId, State, Value};
use stratus_core::schema::{
    AttributeReader, AttributeSchema, AttributeType, FromAttributes, ResourceSchema, TypeError,
    decode,
};

use crate::control_plane::RemoteObject;
use crate::ids::ListenerRuleKey;
use crate::resources::{ResourceHandler, ensure_in_place, state_from_object, update_in_place};
use crate::session::Session;
use crate::utils::{desired_state, mutable_properties};

pub const LISTENER_RULE: &str = "elbv2_listener_rule";
const AWS_TYPE: &str = "AWS::ElasticLoadBalancingV2::ListenerRule";

const BUDGET: u32 = 1;
const PATH_PATTERN: &str = "path-pattern";
const HOST_HEADER: &str = "host-header";
const FORWARD: &str = "forward";

pub fn listener_rule_schema() -> ResourceSchema {
    let strings = || AttributeType::List(Box::new(AttributeType::String));
    ResourceSchema::new(LISTENER_RULE)
        .with_description("A rule on an application load balancer listener")
        .attribute(
            AttributeSchema::new("listener_arn", AttributeType::String)
                .required()
                .force_new()
                .with_provider_name("ListenerArn"),
        )
        .attribute(
            AttributeSchema::new("priority", AttributeType::Int)
                .required()
                .with_description("1 to 50000, unique per listener")
                .with_provider_name("Priority"),
        )
        .attribute(
            AttributeSchema::new("path_patterns", strings())
                .with_description("Matches when the request path matches any pattern"),
        )
        .attribute(
            AttributeSchema::new("host_headers", strings())
                .with_description("Matches when the Host header matches any value"),
        )
        .attribute(
            AttributeSchema::new("target_group_arn", AttributeType::String)
                .required()
                .with_description("Target group requests are forwarded to"),
        )
        .attribute(
            AttributeSchema::new("rule_arn", AttributeType::String)
                .computed()
                .with_provider_name("RuleArn"),
        )
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ValuesConfig {
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuleCondition {
    pub field: String,
    /// Legacy form; newer rules carry the values in the typed config
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_pattern_config: Option<ValuesConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_header_config: Option<ValuesConfig>,
}

impl RuleCondition {
    fn path_pattern(values: Vec<String>) -> Self {
        Self {
            field: PATH_PATTERN.to_string(),
            values: Vec::new(),
            path_pattern_config: Some(ValuesConfig { values }),
            host_header_config: None,
        }
    }

    fn host_header(values: Vec<String>) -> Self {
        Self {
            field: HOST_HEADER.to_string(),
            values: Vec::new(),
            path_pattern_config: None,
            host_header_config: Some(ValuesConfig { values }),
        }
    }

    /// Values of the condition, whichever form it uses
    pub fn condition_values(&self) -> Vec<String> {
        let config = match self.field.as_str() {
            PATH_PATTERN => self.path_pattern_config.as_ref(),
            HOST_HEADER => self.host_header_config.as_ref(),
            _ => None,
        };
        match config {
            Some(c) if !c.values.is_empty() => c.values.clone(),
            _ => self.values.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuleAction {
    #[serde(rename = "Type")]
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_group_arn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListenerRuleConfig {
    pub listener_arn: String,
    pub priority: i64,
    pub conditions: Vec<RuleCondition>,
    pub actions: Vec<RuleAction>,
}

impl FromAttributes for ListenerRuleConfig {
    fn from_attributes(reader: &AttributeReader<'_>) -> Result<Self, TypeError> {
        let priority = reader.int("priority")?;
        if !(1..=50_000).contains(&priority) {
            return Err(TypeError::AttributeError {
                name: "priority".to_string(),
                inner: Box::new(TypeError::ValidationFailed {
                    message: format!("{} is outside 1..=50000", priority),
                }),
            });
        }

        let mut conditions = Vec::new();
        let path_patterns = reader.string_list("path_patterns")?;
        if !path_patterns.is_empty() {
            conditions.push(RuleCondition::path_pattern(path_patterns));
        }
        let host_headers = reader.string_list("host_headers")?;
        if !host_headers.is_empty() {
            conditions.push(RuleCondition::host_header(host_headers));
        }
        if conditions.is_empty() {
            return Err(TypeError::ValidationFailed {
                message: "a listener rule needs path_patterns or host_headers".to_string(),
            });
        }

        Ok(Self {
            listener_arn: reader.string("listener_arn")?,
            priority,
            conditions,
            actions: vec![RuleAction {
                action_type: FORWARD.to_string(),
                target_group_arn: Some(reader.string("target_group_arn")?),
            }],
        })
    }
}

/// The parts of a described rule that need more than a property rename
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RuleProperties {
    #[serde(default)]
    conditions: Vec<RuleCondition>,
    #[serde(default)]
    actions: Vec<RuleAction>,
}

pub struct ListenerRuleService {
    session: Session,
}

impl ListenerRuleService {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub async fn describe_rule(&self, rule_arn: &str) -> ProviderResult<Option<RemoteObject>> {
        self.session.describe(AWS_TYPE, rule_arn).await
    }

    /// Create a rule, returning its state key
    pub async fn create_rule(&self, config: &ListenerRuleConfig) -> ProviderResult<ListenerRuleKey> {
        let _guard = self.session.locks().lock(&config.listener_arn).await;
        let rule_arn = self
            .session
            .submit_create(AWS_TYPE, &desired_state(config)?, BUDGET)
            .await?;
        Ok(ListenerRuleKey::new(&config.listener_arn, rule_arn)?)
    }

    pub async fn modify_rule(
        &self,
        key: &ListenerRuleKey,
        config: &ListenerRuleConfig,
    ) -> ProviderResult<()> {
        let _guard = self.session.locks().lock(&key.listener_arn).await;
        let schema = listener_rule_schema();
        let mut properties = mutable_properties(&schema);
        properties.extend(["Actions", "Conditions"]);
        properties.sort();
        update_in_place(
            &self.session,
            AWS_TYPE,
            &key.rule_arn,
            &desired_state(config)?,
            &properties,
            BUDGET,
        )
        .await
    }

    pub async fn delete_rule(&self, key: &ListenerRuleKey) -> ProviderResult<()> {
        let _guard = self.session.locks().lock(&key.listener_arn).await;
        self.session
            .submit_delete(AWS_TYPE, &key.rule_arn, BUDGET)
            .await
    }

    fn state(id: &ResourceId, key: &ListenerRuleKey, object: Option<&RemoteObject>) -> ProviderResult<State> {
        let mut state = state_from_object(id, &listener_rule_schema(), &key.encode(), object);
        let Some(object) = object else {
            return Ok(state);
        };

        let rule: RuleProperties = object.properties_as()?;
        let strings = |values: Vec<String>| Value::List(values.into_iter().map(Value::String).collect());
        for condition in &rule.conditions {
            let name = match condition.field.as_str() {
                PATH_PATTERN => "path_patterns",
                HOST_HEADER => "host_headers",
                other => {
                    debug!("ignoring listener rule condition '{}'", other);
                    continue;
                }
            };
            state
                .attributes
                .insert(name.to_string(), strings(condition.condition_values()));
        }
        if let Some(target) = rule
            .actions
            .iter()
            .find(|a| a.action_type == FORWARD)
            .and_then(|a| a.target_group_arn.clone())
        {
            state
                .attributes
                .insert("target_group_arn".to_string(), Value::String(target));
        }
        Ok(state)
    }
}

#[async_trait]
impl ResourceHandler for ListenerRuleService {
    fn resource_type(&self) -> &'static str {
        LISTENER_RULE
    }

    async fn read(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        let key = ListenerRuleKey::decode(identifier)?;
        let object = self.describe_rule(&key.rule_arn).await?;
        Self::state(id, &key, object.as_ref())
    }

    async fn create(&self, resource: &Resource) -> ProviderResult<State> {
        let config: ListenerRuleConfig = decode(&listener_rule_schema(), &resource.attributes)?;
        let key = self.create_rule(&config).await?;
        self.read(&resource.id, &key.encode()).await
    }

    async fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let schema = listener_rule_schema();
        ensure_in_place(&schema, from, to)?;
        let key = ListenerRuleKey::decode(identifier)?;
        let config: ListenerRuleConfig = decode(&schema, &to.attributes)?;
        self.modify_rule(&key, &config).await?;
        self.read(id, identifier).await
    }

    async fn delete(&self, _id: &ResourceId, identifier: &str, _force: bool) -> ProviderResult<()> {
        let key = ListenerRuleKey::decode(identifier)?;
        self.delete_rule(&key).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use stratus_core::config::Timeouts;
    use stratus_core::provider::ErrorKind;

    use super::*;
    use crate::testing::FakeControlPlane;

    const LISTENER: &str =
        "arn:aws:elasticloadbalancing:us-east-1:123456789012:listener/app/web/50dc6c495c0c9188/f2f7dc8efc522ab2";

    fn session(fake: &Arc<FakeControlPlane>) -> Session {
        Session::new(fake.clone(), Timeouts::default())
    }

    fn api_rule(listener: &str, priority: i64) -> Resource {
        Resource::new(LISTENER_RULE, "api")
            .with_attribute("listener_arn", listener)
            .with_attribute("priority", priority)
            .with_attribute(
                "path_patterns",
                Value::List(vec![Value::from("/api/*")]),
            )
            .with_attribute("target_group_arn", "arn:aws:elasticloadbalancing:tg/api")
    }

    #[tokio::test(start_paused = true)]
    async fn create_builds_conditions_and_reads_them_back() {
        let fake = Arc::new(FakeControlPlane::new());
        let svc = ListenerRuleService::new(session(&fake));

        let state = svc.create(&api_rule(LISTENER, 10)).await.unwrap();

        let key = ListenerRuleKey::decode(state.identifier.as_deref().unwrap()).unwrap();
        assert_eq!(key.listener_arn, LISTENER);
        assert!(key.rule_arn.ends_with("/0001"));
        assert_eq!(
            state.attributes["path_patterns"],
            Value::List(vec![Value::from("/api/*")])
        );
        assert_eq!(
            state.attributes["target_group_arn"],
            Value::from("arn:aws:elasticloadbalancing:tg/api")
        );

        let desired = fake.last_desired().unwrap();
        assert_eq!(
            desired["Conditions"],
            json!([{"Field": "path-pattern", "PathPatternConfig": {"Values": ["/api/*"]}}])
        );
        assert_eq!(
            desired["Actions"],
            json!([{"Type": "forward", "TargetGroupArn": "arn:aws:elasticloadbalancing:tg/api"}])
        );
        assert!(svc.session.locks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn legacy_condition_values_are_read() {
        let fake = Arc::new(FakeControlPlane::new());
        fake.insert(
            AWS_TYPE,
            "rule-1",
            json!({
                "RuleArn": "rule-1",
                "ListenerArn": "listener-1",
                "Priority": 5,
                "Conditions": [{"Field": "host-header", "Values": ["api.example.com"]}],
                "Actions": [{"Type": "fixed-response"}]
            }),
        );

        let id = ResourceId::new(LISTENER_RULE, "api");
        let state = ListenerRuleService::new(session(&fake))
            .read(&id, "listener-1#rule-1")
            .await
            .unwrap();

        assert_eq!(
            state.attributes["host_headers"],
            Value::List(vec![Value::from("api.example.com")])
        );
        assert_eq!(state.attributes["priority"], Value::Int(5));
        assert!(!state.attributes.contains_key("target_group_arn"));
    }

    #[tokio::test(start_paused = true)]
    async fn update_patches_priority_and_conditions() {
        let fake = Arc::new(FakeControlPlane::new());
        let svc = ListenerRuleService::new(session(&fake));
        let created = svc.create(&api_rule(LISTENER, 10)).await.unwrap();
        let identifier = created.identifier.clone().unwrap();

        let to = api_rule(LISTENER, 20);
        svc.update(&created.id, &identifier, &created, &to).await.unwrap();
        assert_eq!(
            fake.last_patch().unwrap(),
            vec![json!({"op": "replace", "path": "/Priority", "value": 20})]
        );

        let moved = api_rule("arn:aws:elasticloadbalancing:listener/other", 20);
        let err = svc
            .update(&created.id, &identifier, &created, &moved)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidConfig);
    }

    #[tokio::test(start_paused = true)]
    async fn rule_without_conditions_is_rejected() {
        let fake = Arc::new(FakeControlPlane::new());
        let resource = Resource::new(LISTENER_RULE, "api")
            .with_attribute("listener_arn", LISTENER)
            .with_attribute("priority", 10i64)
            .with_attribute("target_group_arn", "tg");

        let err = ListenerRuleService::new(session(&fake))
            .create(&resource)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidConfig);
        assert_eq!(fake.count("create"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn mutations_on_one_listener_are_serialized() {
        let fake = Arc::new(FakeControlPlane::new());
        let session = session(&fake);
        let guard = session.locks().lock(LISTENER).await;

        let svc = ListenerRuleService::new(session.clone());
        let blocked = tokio::spawn(async move { svc.create(&api_rule(LISTENER, 10)).await });

        // A rule on another listener goes through while the first is held
        ListenerRuleService::new(session.clone())
            .create(&api_rule("arn:aws:elasticloadbalancing:listener/other", 10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fake.count("create"), 1);
        assert!(!blocked.is_finished());

        drop(guard);
        let state = blocked.await.unwrap().unwrap();
        assert!(state.exists);
        assert_eq!(fake.count("create"), 2);
        assert!(session.locks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn bare_rule_arn_is_a_malformed_identifier() {
        let fake = Arc::new(FakeControlPlane::new());
        let id = ResourceId::new(LISTENER_RULE, "api");
        let err = ListenerRuleService::new(session(&fake))
            .delete(&id, "arn:aws:elasticloadbalancing:listener-rule/app/web/1/2/3", false)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedIdentifier);
        assert!(fake.calls().is_empty());
    }
}
