//! Filters for the AWS `Describe*` calls. Each reconciler discovers its resources through these, so
//! the names and values here decide which remote resources belong to a cluster.

use capa_model::constants::{cluster_tag_key, TAG_NAME, TAG_PROVIDER_ROLE};
use capa_model::{InstanceState, ResourceLifecycle};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Filter {
    pub name: String,
    pub values: Vec<String>,
}

impl Filter {
    pub fn new<N, I, V>(name: N, values: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// Resources tagged for the cluster, whatever the lifecycle.
pub fn cluster(cluster_name: &str) -> Filter {
    Filter::new("tag-key", [cluster_tag_key(cluster_name)])
}

/// Resources owned by the cluster.
pub fn cluster_owned(cluster_name: &str) -> Filter {
    Filter::new(
        format!("tag:{}", cluster_tag_key(cluster_name)),
        [ResourceLifecycle::Owned.as_str()],
    )
}

/// Resources shared with the cluster.
pub fn cluster_shared(cluster_name: &str) -> Filter {
    Filter::new(
        format!("tag:{}", cluster_tag_key(cluster_name)),
        [ResourceLifecycle::Shared.as_str()],
    )
}

pub fn name(name: &str) -> Filter {
    Filter::new(format!("tag:{}", TAG_NAME), [name])
}

pub fn provider_role(role: &str) -> Filter {
    Filter::new(format!("tag:{}", TAG_PROVIDER_ROLE), [role])
}

pub fn vpc(vpc_id: &str) -> Filter {
    Filter::new("vpc-id", [vpc_id])
}

pub fn vpc_attachment(vpc_id: &str) -> Filter {
    Filter::new("attachment.vpc-id", [vpc_id])
}

pub fn subnet(subnet_id: &str) -> Filter {
    Filter::new("subnet-id", [subnet_id])
}

pub fn nat_gateway_id(nat_gateway_id: &str) -> Filter {
    Filter::new("nat-gateway-id", [nat_gateway_id])
}

pub fn group_name(name: &str) -> Filter {
    Filter::new("group-name", [name])
}

/// VPCs and subnets that exist or are about to exist.
pub fn vpc_states() -> Filter {
    Filter::new("state", ["pending", "available"])
}

pub fn subnet_states() -> Filter {
    Filter::new("state", ["pending", "available"])
}

pub fn nat_gateway_states<'a, I: IntoIterator<Item = &'a str>>(states: I) -> Filter {
    Filter::new("state", states)
}

pub fn instance_states<I: IntoIterator<Item = InstanceState>>(states: I) -> Filter {
    Filter::new(
        "instance-state-name",
        states.into_iter().map(|s| s.as_str()),
    )
}

pub fn zone_available() -> Filter {
    Filter::new("state", ["available"])
}

pub fn image_name(pattern: &str) -> Filter {
    Filter::new("name", [pattern])
}
