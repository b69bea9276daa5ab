//! Network: VPCs, subnets, gateway attachments and routes

use async_trait::async_trait;
use serde::Serialize;
use stratus_core::composite_id::CompositeKey;
use stratus_core::provider::ProviderResult;
use stratus_core::reconcile::{Lifecycle, ProductStatus};
use stratus_core::resource::{Resource, ResourceId, State, Value};
use stratus_core::schema::{
    AttributeReader, AttributeSchema, AttributeType, FromAttributes, ResourceSchema, TypeError,
    decode, types,
};
use tokio::time::Instant;

use crate::control_plane::RemoteObject;
use crate::ids::{GatewayAttachmentKey, GatewayKind, RouteKey};
use crate::resources::{
    ResourceHandler, ensure_in_place, state_from_object, update_in_place,
};
use crate::session::Session;
use crate::utils::{Tag, build_tags, desired_state, mutable_properties};

pub const VPC: &str = "ec2_vpc";
pub const SUBNET: &str = "ec2_subnet";
pub const VPC_GATEWAY_ATTACHMENT: &str = "ec2_vpc_gateway_attachment";
pub const ROUTE: &str = "ec2_route";

const VPC_TYPE: &str = "AWS::EC2::VPC";
const SUBNET_TYPE: &str = "AWS::EC2::Subnet";
const ATTACHMENT_TYPE: &str = "AWS::EC2::VPCGatewayAttachment";
const ROUTE_TYPE: &str = "AWS::EC2::Route";

const BUDGET: u32 = 1;

// =============================================================================
// Schemas
// =============================================================================

pub fn vpc_schema() -> ResourceSchema {
    ResourceSchema::new(VPC)
        .with_description("A virtual private cloud")
        .attribute(
            AttributeSchema::new("cidr_block", types::cidr())
                .required()
                .force_new()
                .with_provider_name("CidrBlock"),
        )
        .attribute(
            AttributeSchema::new("enable_dns_support", AttributeType::Bool)
                .with_provider_name("EnableDnsSupport"),
        )
        .attribute(
            AttributeSchema::new("enable_dns_hostnames", AttributeType::Bool)
                .with_provider_name("EnableDnsHostnames"),
        )
        .attribute(
            AttributeSchema::new(
                "instance_tenancy",
                AttributeType::Enum(vec!["default".to_string(), "dedicated".to_string()]),
            )
            .force_new()
            .with_default(Value::from("default"))
            .with_provider_name("InstanceTenancy"),
        )
        .attribute(AttributeSchema::new("tags", types::tags()).with_provider_name("Tags"))
        .attribute(
            AttributeSchema::new("vpc_id", AttributeType::String)
                .computed()
                .with_provider_name("VpcId"),
        )
}

pub fn subnet_schema() -> ResourceSchema {
    ResourceSchema::new(SUBNET)
        .attribute(
            AttributeSchema::new("vpc_id", AttributeType::String)
                .required()
                .force_new()
                .with_provider_name("VpcId"),
        )
        .attribute(
            AttributeSchema::new("cidr_block", types::cidr())
                .required()
                .force_new()
                .with_provider_name("CidrBlock"),
        )
        .attribute(
            AttributeSchema::new("availability_zone", AttributeType::String)
                .force_new()
                .with_provider_name("AvailabilityZone"),
        )
        .attribute(
            AttributeSchema::new("map_public_ip_on_launch", AttributeType::Bool)
                .with_provider_name("MapPublicIpOnLaunch"),
        )
        .attribute(AttributeSchema::new("tags", types::tags()).with_provider_name("Tags"))
        .attribute(
            AttributeSchema::new("subnet_id", AttributeType::String)
                .computed()
                .with_provider_name("SubnetId"),
        )
}

pub fn gateway_attachment_schema() -> ResourceSchema {
    ResourceSchema::new(VPC_GATEWAY_ATTACHMENT)
        .with_description("Attaches an internet or VPN gateway to a VPC")
        .attribute(
            AttributeSchema::new("vpc_id", AttributeType::String)
                .required()
                .force_new()
                .with_provider_name("VpcId"),
        )
        .attribute(
            AttributeSchema::new("internet_gateway_id", AttributeType::String)
                .force_new()
                .with_provider_name("InternetGatewayId"),
        )
        .attribute(
            AttributeSchema::new("vpn_gateway_id", AttributeType::String)
                .force_new()
                .with_provider_name("VpnGatewayId"),
        )
}

pub fn route_schema() -> ResourceSchema {
    ResourceSchema::new(ROUTE)
        .attribute(
            AttributeSchema::new("route_table_id", AttributeType::String)
                .required()
                .force_new()
                .with_provider_name("RouteTableId"),
        )
        .attribute(
            AttributeSchema::new("destination_cidr_block", types::cidr())
                .required()
                .force_new()
                .with_provider_name("DestinationCidrBlock"),
        )
        .attribute(
            AttributeSchema::new("gateway_id", AttributeType::String)
                .with_provider_name("GatewayId"),
        )
        .attribute(
            AttributeSchema::new("nat_gateway_id", AttributeType::String)
                .with_provider_name("NatGatewayId"),
        )
}

// =============================================================================
// Typed configurations
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VpcConfig {
    pub cidr_block: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_dns_support: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_dns_hostnames: Option<bool>,
    pub instance_tenancy: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

impl FromAttributes for VpcConfig {
    fn from_attributes(reader: &AttributeReader<'_>) -> Result<Self, TypeError> {
        Ok(Self {
            cidr_block: reader.string("cidr_block")?,
            enable_dns_support: reader.optional_bool("enable_dns_support")?,
            enable_dns_hostnames: reader.optional_bool("enable_dns_hostnames")?,
            instance_tenancy: reader.string("instance_tenancy")?,
            tags: build_tags(&reader.string_map("tags")?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubnetConfig {
    pub vpc_id: String,
    pub cidr_block: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_public_ip_on_launch: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

impl FromAttributes for SubnetConfig {
    fn from_attributes(reader: &AttributeReader<'_>) -> Result<Self, TypeError> {
        Ok(Self {
            vpc_id: reader.string("vpc_id")?,
            cidr_block: reader.string("cidr_block")?,
            availability_zone: reader.optional_string("availability_zone")?,
            map_public_ip_on_launch: reader.optional_bool("map_public_ip_on_launch")?,
            tags: build_tags(&reader.string_map("tags")?),
        })
    }
}

/// Exactly one of the two gateway ids is set
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GatewayAttachmentConfig {
    pub vpc_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internet_gateway_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpn_gateway_id: Option<String>,
}

impl FromAttributes for GatewayAttachmentConfig {
    fn from_attributes(reader: &AttributeReader<'_>) -> Result<Self, TypeError> {
        let config = Self {
            vpc_id: reader.string("vpc_id")?,
            internet_gateway_id: reader.optional_string("internet_gateway_id")?,
            vpn_gateway_id: reader.optional_string("vpn_gateway_id")?,
        };
        if config.internet_gateway_id.is_some() == config.vpn_gateway_id.is_some() {
            return Err(TypeError::ValidationFailed {
                message: "exactly one of internet_gateway_id or vpn_gateway_id must be set"
                    .to_string(),
            });
        }
        Ok(config)
    }
}

impl GatewayAttachmentConfig {
    /// State key of the attachment, checking the gateway id matches its field
    pub fn key(&self) -> Result<GatewayAttachmentKey, TypeError> {
        let (gateway_id, expected) = match (&self.internet_gateway_id, &self.vpn_gateway_id) {
            (Some(igw), _) => (igw, GatewayKind::Internet),
            (None, Some(vgw)) => (vgw, GatewayKind::Vpn),
            (None, None) => {
                return Err(TypeError::MissingRequired {
                    name: "internet_gateway_id".to_string(),
                });
            }
        };
        let invalid = |message: String| TypeError::ValidationFailed { message };

        let key = GatewayAttachmentKey::new(&self.vpc_id, gateway_id)
            .map_err(|e| invalid(e.to_string()))?;
        let kind = key.gateway_kind().map_err(|e| invalid(e.to_string()))?;
        if kind != expected {
            return Err(invalid(format!(
                "gateway '{}' is not a {} gateway",
                gateway_id,
                match expected {
                    GatewayKind::Internet => "internet",
                    GatewayKind::Vpn => "VPN",
                }
            )));
        }
        Ok(key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RouteConfig {
    pub route_table_id: String,
    pub destination_cidr_block: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nat_gateway_id: Option<String>,
}

impl FromAttributes for RouteConfig {
    fn from_attributes(reader: &AttributeReader<'_>) -> Result<Self, TypeError> {
        Ok(Self {
            route_table_id: reader.string("route_table_id")?,
            destination_cidr_block: reader.string("destination_cidr_block")?,
            gateway_id: reader.optional_string("gateway_id")?,
            nat_gateway_id: reader.optional_string("nat_gateway_id")?,
        })
    }
}

/// `State` of VPCs and subnets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvailabilityState {
    Pending,
    Available,
    Other(String),
}

impl AvailabilityState {
    /// Objects that do not report a state are available
    pub fn of(object: &RemoteObject) -> Self {
        match object.str_property("State") {
            None | Some("available") => AvailabilityState::Available,
            Some("pending") => AvailabilityState::Pending,
            Some(other) => AvailabilityState::Other(other.to_string()),
        }
    }
}

impl ProductStatus for AvailabilityState {
    fn lifecycle(&self) -> Lifecycle {
        match self {
            AvailabilityState::Pending => Lifecycle::Pending,
            AvailabilityState::Available => Lifecycle::Running,
            AvailabilityState::Other(s) => Lifecycle::Unrecognized(s.clone()),
        }
    }

    fn raw(&self) -> String {
        match self {
            AvailabilityState::Pending => "pending".to_string(),
            AvailabilityState::Available => "available".to_string(),
            AvailabilityState::Other(s) => s.clone(),
        }
    }
}

// =============================================================================
// VPC
// =============================================================================

pub struct VpcService {
    session: Session,
}

impl VpcService {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub async fn create_vpc(&self, config: &VpcConfig) -> ProviderResult<String> {
        let started = Instant::now();
        let vpc_id = self
            .session
            .submit_create(VPC_TYPE, &desired_state(config)?, BUDGET)
            .await?;
        let spec = self
            .session
            .timeouts()
            .wait_present(BUDGET)
            .remaining_since(started);
        let operation = format!("create vpc {}", vpc_id);
        self.session
            .wait_for_object(&operation, VPC_TYPE, &vpc_id, &spec, AvailabilityState::of)
            .await?;
        Ok(vpc_id)
    }
}

#[async_trait]
impl ResourceHandler for VpcService {
    fn resource_type(&self) -> &'static str {
        VPC
    }

    async fn read(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        let object = self.session.describe(VPC_TYPE, identifier).await?;
        Ok(state_from_object(id, &vpc_schema(), identifier, object.as_ref()))
    }

    async fn create(&self, resource: &Resource) -> ProviderResult<State> {
        let config: VpcConfig = decode(&vpc_schema(), &resource.attributes)?;
        let vpc_id = self.create_vpc(&config).await?;
        self.read(&resource.id, &vpc_id).await
    }

    async fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let schema = vpc_schema();
        ensure_in_place(&schema, from, to)?;
        let config: VpcConfig = decode(&schema, &to.attributes)?;
        update_in_place(
            &self.session,
            VPC_TYPE,
            identifier,
            &desired_state(&config)?,
            &mutable_properties(&schema),
            BUDGET,
        )
        .await?;
        self.read(id, identifier).await
    }

    async fn delete(&self, _id: &ResourceId, identifier: &str, _force: bool) -> ProviderResult<()> {
        self.session.submit_delete(VPC_TYPE, identifier, BUDGET).await
    }
}

// =============================================================================
// Subnet
// =============================================================================

pub struct SubnetService {
    session: Session,
}

impl SubnetService {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

#[async_trait]
impl ResourceHandler for SubnetService {
    fn resource_type(&self) -> &'static str {
        SUBNET
    }

    async fn read(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        let object = self.session.describe(SUBNET_TYPE, identifier).await?;
        Ok(state_from_object(id, &subnet_schema(), identifier, object.as_ref()))
    }

    async fn create(&self, resource: &Resource) -> ProviderResult<State> {
        let started = Instant::now();
        let config: SubnetConfig = decode(&subnet_schema(), &resource.attributes)?;
        let subnet_id = self
            .session
            .submit_create(SUBNET_TYPE, &desired_state(&config)?, BUDGET)
            .await?;
        let spec = self
            .session
            .timeouts()
            .wait_present(BUDGET)
            .remaining_since(started);
        let operation = format!("create subnet {}", subnet_id);
        self.session
            .wait_for_object(&operation, SUBNET_TYPE, &subnet_id, &spec, AvailabilityState::of)
            .await?;
        self.read(&resource.id, &subnet_id).await
    }

    async fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let schema = subnet_schema();
        ensure_in_place(&schema, from, to)?;
        let config: SubnetConfig = decode(&schema, &to.attributes)?;
        update_in_place(
            &self.session,
            SUBNET_TYPE,
            identifier,
            &desired_state(&config)?,
            &mutable_properties(&schema),
            BUDGET,
        )
        .await?;
        self.read(id, identifier).await
    }

    async fn delete(&self, _id: &ResourceId, identifier: &str, _force: bool) -> ProviderResult<()> {
        self.session
            .submit_delete(SUBNET_TYPE, identifier, BUDGET)
            .await
    }
}

// =============================================================================
// VPC gateway attachment
// =============================================================================

/// Attachments are keyed `vpc_id#gateway_id` in state; the control plane
/// addresses them as `IGW|vpc_id` or `VPNGW|vpc_id`.
pub struct GatewayAttachmentService {
    session: Session,
}

impl GatewayAttachmentService {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

#[async_trait]
impl ResourceHandler for GatewayAttachmentService {
    fn resource_type(&self) -> &'static str {
        VPC_GATEWAY_ATTACHMENT
    }

    async fn read(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        let key = GatewayAttachmentKey::decode(identifier)?;
        let object = self
            .session
            .describe(ATTACHMENT_TYPE, &key.remote_identifier()?)
            .await?;
        Ok(state_from_object(
            id,
            &gateway_attachment_schema(),
            &key.encode(),
            object.as_ref(),
        ))
    }

    async fn create(&self, resource: &Resource) -> ProviderResult<State> {
        let config: GatewayAttachmentConfig =
            decode(&gateway_attachment_schema(), &resource.attributes)?;
        let key = config.key()?;
        self.session
            .submit_create(ATTACHMENT_TYPE, &desired_state(&config)?, BUDGET)
            .await?;
        self.read(&resource.id, &key.encode()).await
    }

    async fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        // Every attribute forces replacement
        ensure_in_place(&gateway_attachment_schema(), from, to)?;
        self.read(id, identifier).await
    }

    async fn delete(&self, _id: &ResourceId, identifier: &str, _force: bool) -> ProviderResult<()> {
        let key = GatewayAttachmentKey::decode(identifier)?;
        self.session
            .submit_delete(ATTACHMENT_TYPE, &key.remote_identifier()?, BUDGET)
            .await
    }
}

// =============================================================================
// Route
// =============================================================================

pub struct RouteService {
    session: Session,
}

impl RouteService {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

#[async_trait]
impl ResourceHandler for RouteService {
    fn resource_type(&self) -> &'static str {
        ROUTE
    }

    async fn read(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        let key = RouteKey::decode(identifier)?;
        let object = self.session.describe(ROUTE_TYPE, &key.to_remote()).await?;
        Ok(state_from_object(
            id,
            &route_schema(),
            &key.encode(),
            object.as_ref(),
        ))
    }

    async fn create(&self, resource: &Resource) -> ProviderResult<State> {
        let config: RouteConfig = decode(&route_schema(), &resource.attributes)?;
        let identifier = self
            .session
            .submit_create(ROUTE_TYPE, &desired_state(&config)?, BUDGET)
            .await?;
        let key = RouteKey::from_remote(&identifier)?;
        self.read(&resource.id, &key.encode()).await
    }

    async fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let schema = route_schema();
        ensure_in_place(&schema, from, to)?;
        let key = RouteKey::decode(identifier)?;
        let config: RouteConfig = decode(&schema, &to.attributes)?;
        update_in_place(
            &self.session,
            ROUTE_TYPE,
            &key.to_remote(),
            &desired_state(&config)?,
            &mutable_properties(&schema),
            BUDGET,
        )
        .await?;
        self.read(id, identifier).await
    }

    async fn delete(&self, _id: &ResourceId, identifier: &str, _force: bool) -> ProviderResult<()> {
        let key = RouteKey::decode(identifier)?;
        self.session
            .submit_delete(ROUTE_TYPE, &key.to_remote(), BUDGET)
            .await
    }
}
