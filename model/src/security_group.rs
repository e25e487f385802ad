use crate::tags::Tags;
use serde::{Deserialize, Serialize};
use serde_plain::{derive_display_from_serialize, derive_fromstr_from_deserialize};

/// The fixed roles for which the cluster keeps a security group. The serialized names are
/// persisted in AWS names and tags and must not change.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityGroupRole {
    Bastion,
    #[serde(rename = "controlplane")]
    ControlPlane,
    Node,
}

derive_display_from_serialize!(SecurityGroupRole);
derive_fromstr_from_deserialize!(SecurityGroupRole);

impl SecurityGroupRole {
    /// Every role, in the order in which groups are reconciled.
    pub const ALL: [SecurityGroupRole; 3] = [
        SecurityGroupRole::Bastion,
        SecurityGroupRole::ControlPlane,
        SecurityGroupRole::Node,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityGroupRole::Bastion => "bastion",
            SecurityGroupRole::ControlPlane => "controlplane",
            SecurityGroupRole::Node => "node",
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "IngressRules::is_empty")]
    pub ingress_rules: IngressRules,
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
}

/// The IP protocol of an ingress rule. AWS encodes "all protocols" as `-1` and ICMPv6 by its
/// protocol number.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum SecurityGroupProtocol {
    #[serde(rename = "-1")]
    All,
    #[serde(rename = "tcp")]
    Tcp,
    #[serde(rename = "udp")]
    Udp,
    #[serde(rename = "icmp")]
    Icmp,
    #[serde(rename = "58")]
    IcmpV6,
}

derive_display_from_serialize!(SecurityGroupProtocol);
derive_fromstr_from_deserialize!(SecurityGroupProtocol);

impl SecurityGroupProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityGroupProtocol::All => "-1",
            SecurityGroupProtocol::Tcp => "tcp",
            SecurityGroupProtocol::Udp => "udp",
            SecurityGroupProtocol::Icmp => "icmp",
            SecurityGroupProtocol::IcmpV6 => "58",
        }
    }

    /// Only these protocols carry a port range on the wire.
    pub fn has_ports(&self) -> bool {
        !matches!(self, SecurityGroupProtocol::All)
    }
}

#[derive(Clone, Debug, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressRule {
    #[serde(default)]
    pub description: String,
    pub protocol: SecurityGroupProtocol,
    pub from_port: i32,
    pub to_port: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cidr_blocks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_security_group_ids: Vec<String>,
}

/// Rules are compared by protocol, port range, CIDR blocks and source groups. Lists compare
/// positionally. Descriptions are informational only.
impl PartialEq for IngressRule {
    fn eq(&self, other: &Self) -> bool {
        self.protocol == other.protocol
            && self.from_port == other.from_port
            && self.to_port == other.to_port
            && self.cidr_blocks == other.cidr_blocks
            && self.source_security_group_ids == other.source_security_group_ids
    }
}

impl IngressRule {
    pub fn tcp<S: Into<String>>(description: S, from_port: i32, to_port: i32) -> Self {
        Self {
            description: description.into(),
            protocol: SecurityGroupProtocol::Tcp,
            from_port,
            to_port,
            cidr_blocks: Vec::new(),
            source_security_group_ids: Vec::new(),
        }
    }

    pub fn from_cidrs<I, S>(mut self, cidrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cidr_blocks = cidrs.into_iter().map(Into::into).collect();
        self
    }

    pub fn from_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_security_group_ids = groups.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IngressRules(Vec<IngressRule>);

impl IngressRules {
    pub fn new(rules: Vec<IngressRule>) -> Self {
        Self(rules)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IngressRule> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[IngressRule] {
        &self.0
    }

    pub fn contains(&self, rule: &IngressRule) -> bool {
        self.0.iter().any(|r| r == rule)
    }

    /// The rules in `self` that have no equal in `other`.
    pub fn difference(&self, other: &IngressRules) -> IngressRules {
        self.0
            .iter()
            .filter(|rule| !other.contains(rule))
            .cloned()
            .collect()
    }
}

impl FromIterator<IngressRule> for IngressRules {
    fn from_iter<T: IntoIterator<Item = IngressRule>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for IngressRules {
    type Item = IngressRule;
    type IntoIter = std::vec::IntoIter<IngressRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
