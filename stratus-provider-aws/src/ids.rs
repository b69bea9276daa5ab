//! Composite state keys of the products that have no single natural id

use std::sync::LazyLock;

use regex::Regex;
use stratus_core::composite_id::{CompositeId, CompositeKey, IdError, REMOTE_DELIMITER};
use stratus_core::composite_key;

static INTERNET_GATEWAY_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^igw-[0-9a-z]+$").expect("valid regex"));
static VPN_GATEWAY_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^vgw-[0-9a-z]+$").expect("valid regex"));

composite_key! {
    /// Gateway attached to a VPC, persisted as `vpc_id#gateway_id`
    pub struct GatewayAttachmentKey { vpc_id, gateway_id }
}

composite_key! {
    /// Route in a route table, persisted as `route_table_id#destination_cidr_block`
    pub struct RouteKey { route_table_id, destination_cidr_block }
}

composite_key! {
    /// Rule on a load balancer listener, persisted as `listener_arn#rule_arn`
    pub struct ListenerRuleKey { listener_arn, rule_arn }
}

/// Kind of gateway in a VPC attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayKind {
    Internet,
    Vpn,
}

impl GatewayKind {
    /// Attachment type as the control plane spells it
    pub fn attachment_type(&self) -> &'static str {
        match self {
            GatewayKind::Internet => "IGW",
            GatewayKind::Vpn => "VPNGW",
        }
    }
}

impl GatewayAttachmentKey {
    pub fn gateway_kind(&self) -> Result<GatewayKind, IdError> {
        if INTERNET_GATEWAY_ID.is_match(&self.gateway_id) {
            Ok(GatewayKind::Internet)
        } else if VPN_GATEWAY_ID.is_match(&self.gateway_id) {
            Ok(GatewayKind::Vpn)
        } else {
            Err(IdError::InvalidComponent {
                component: self.gateway_id.clone(),
                reason: "expected an internet gateway (igw-) or VPN gateway (vgw-) id".to_string(),
            })
        }
    }

    /// Remote identifier: `IGW|vpc_id` or `VPNGW|vpc_id`
    pub fn remote_identifier(&self) -> Result<String, IdError> {
        let kind = self.gateway_kind()?;
        Ok(CompositeId::new([kind.attachment_type(), self.vpc_id.as_str()])?
            .encode(REMOTE_DELIMITER))
    }
}

impl RouteKey {
    /// Parse the control plane's `route_table_id|cidr` identifier
    pub fn from_remote(identifier: &str) -> Result<Self, IdError> {
        CompositeId::decode(identifier, Self::ARITY, REMOTE_DELIMITER)
            .and_then(|id| Self::from_components(id.into_parts()))
            .map_err(|e| e.for_key(Self::KIND))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_remote_identifier_depends_on_gateway_kind() {
        let igw = GatewayAttachmentKey::decode("vpc-0a1b#igw-9f8e").unwrap();
        assert_eq!(igw.remote_identifier().unwrap(), "IGW|vpc-0a1b");

        let vgw = GatewayAttachmentKey::new("vpc-0a1b", "vgw-77").unwrap();
        assert_eq!(vgw.gateway_kind().unwrap(), GatewayKind::Vpn);
        assert_eq!(vgw.remote_identifier().unwrap(), "VPNGW|vpc-0a1b");

        let bogus = GatewayAttachmentKey::new("vpc-0a1b", "nat-1").unwrap();
        assert!(matches!(
            bogus.remote_identifier(),
            Err(IdError::InvalidComponent { .. })
        ));
    }

    #[test]
    fn route_key_converts_between_state_and_remote_forms() {
        let key = RouteKey::from_remote("rtb-1|0.0.0.0/0").unwrap();
        assert_eq!(key.encode(), "rtb-1#0.0.0.0/0");
        assert_eq!(key.to_remote(), "rtb-1|0.0.0.0/0");
        let err = RouteKey::from_remote("rtb-1").unwrap_err();
        assert!(err.to_string().starts_with("invalid RouteKey: corrupt identifier 'rtb-1'"));
    }

    #[test]
    fn listener_rule_key_rejects_bare_arn() {
        let arn = "arn:aws:elasticloadbalancing:us-east-1:123456789012:listener-rule/app/web/1/2/3";
        assert!(ListenerRuleKey::decode(arn).is_err());

        let key = ListenerRuleKey::decode(&format!("listener-arn#{}", arn)).unwrap();
        assert_eq!(key.rule_arn, arn);
    }
}
