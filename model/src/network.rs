use crate::constants::DEFAULT_VPC_CIDR;
use crate::elb::ClassicElb;
use crate::security_group::{SecurityGroup, SecurityGroupRole};
use crate::tags::Tags;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The network of a cluster as it is known after discovery: the VPC, its subnets, the internet
/// gateway, the core security groups and the API server load balancer.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    #[serde(default)]
    pub vpc: Vpc,

    #[serde(default)]
    pub subnets: Subnets,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internet_gateway_id: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub security_groups: BTreeMap<SecurityGroupRole, SecurityGroup>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_elb: Option<ClassicElb>,
}

/// The desired network, as declared in the cluster spec.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    #[serde(default)]
    pub vpc: Vpc,

    #[serde(default)]
    pub subnets: Subnets,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vpc {
    /// Empty until the VPC has been created or adopted.
    #[serde(default)]
    pub id: String,

    #[serde(default = "default_vpc_cidr")]
    pub cidr_block: String,

    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
}

fn default_vpc_cidr() -> String {
    DEFAULT_VPC_CIDR.to_string()
}

impl Default for Vpc {
    fn default() -> Self {
        Self {
            id: String::new(),
            cidr_block: default_vpc_cidr(),
            tags: Tags::default(),
        }
    }
}

impl Vpc {
    /// A VPC that was declared by ID and is not tagged as owned by the cluster is managed by
    /// someone else. Gateways and route tables are left alone in that case.
    pub fn is_unmanaged(&self, cluster_name: &str) -> bool {
        !self.id.is_empty() && !self.tags.has_owned(cluster_name)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub vpc_id: String,

    #[serde(default)]
    pub availability_zone: String,

    #[serde(default)]
    pub cidr_block: String,

    #[serde(default)]
    pub is_public: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_table_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat_gateway_id: Option<String>,

    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
}

impl Subnet {
    /// Two subnet records denote the same subnet when their IDs match, or when neither has an ID
    /// yet and they are in the same VPC with the same CIDR block.
    pub fn same_as(&self, other: &Subnet) -> bool {
        if !self.id.is_empty() || !other.id.is_empty() {
            return self.id == other.id;
        }
        self.vpc_id == other.vpc_id && self.cidr_block == other.cidr_block
    }

    /// Whether `discovered`, a subnet found in AWS, is the remote counterpart of this declared
    /// subnet. A declared subnet without an ID matches on VPC and CIDR block.
    pub fn matches_discovered(&self, discovered: &Subnet) -> bool {
        if !self.id.is_empty() {
            return self.id == discovered.id;
        }
        self.vpc_id == discovered.vpc_id && self.cidr_block == discovered.cidr_block
    }

    pub fn role_name(&self) -> &'static str {
        if self.is_public {
            "public"
        } else {
            "private"
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subnets(Vec<Subnet>);

impl Subnets {
    pub fn new(subnets: Vec<Subnet>) -> Self {
        Self(subnets)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Subnet> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Subnet> {
        self.0.iter_mut()
    }

    pub fn get(&self, index: usize) -> Option<&Subnet> {
        self.0.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Subnet> {
        self.0.get_mut(index)
    }

    pub fn push(&mut self, subnet: Subnet) {
        self.0.push(subnet)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Subnet> {
        self.0.iter().find(|sn| sn.id == id)
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Subnet> {
        self.0.iter_mut().find(|sn| sn.id == id)
    }

    pub fn filter_private(&self) -> Subnets {
        self.0.iter().filter(|sn| !sn.is_public).cloned().collect()
    }

    pub fn filter_public(&self) -> Subnets {
        self.0.iter().filter(|sn| sn.is_public).cloned().collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.0.iter().map(|sn| sn.id.clone()).collect()
    }

    pub fn into_vec(self) -> Vec<Subnet> {
        self.0
    }
}

impl FromIterator<Subnet> for Subnets {
    fn from_iter<T: IntoIterator<Item = Subnet>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Subnets {
    type Item = Subnet;
    type IntoIter = std::vec::IntoIter<Subnet>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Subnets {
    type Item = &'a Subnet;
    type IntoIter = std::slice::Iter<'a, Subnet>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
