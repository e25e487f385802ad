//! In-memory stand-ins for EC2 and the classic load balancer API, so that the reconcilers can be
//! exercised without an AWS account.

#![allow(dead_code)]

mod ec2;
mod elb;

pub(crate) use ec2::MockEc2;
pub(crate) use elb::MockElb;

use capa_cloud::filter::Filter;
use capa_cloud::WaitConfig;
use capa_model::constants::cluster_tag_key;
use capa_model::{Cluster, ClusterSpec, Machine, MachineRole, Tags};
use std::time::Duration;

pub(crate) const REGION: &str = "us-east-1";

/// Polls often and gives up quickly.
pub(crate) fn fast_wait() -> WaitConfig {
    WaitConfig {
        interval: Duration::from_millis(1),
        timeout: Duration::from_millis(500),
        instance_running_timeout: Duration::from_millis(500),
        delete_timeout: Duration::from_millis(500),
    }
}

pub(crate) fn cluster(name: &str) -> Cluster {
    Cluster {
        name: name.to_string(),
        namespace: "default".to_string(),
        spec: ClusterSpec {
            region: REGION.to_string(),
            ssh_key_name: Some("capa".to_string()),
            ..ClusterSpec::default()
        },
        ..Cluster::default()
    }
}

pub(crate) fn machine(name: &str, role: MachineRole) -> Machine {
    Machine {
        name: name.to_string(),
        namespace: "default".to_string(),
        role,
        spec: Default::default(),
        status: Default::default(),
    }
}

pub(crate) fn owned_tags(cluster_name: &str) -> Tags {
    let mut tags = Tags::new();
    tags.insert(cluster_tag_key(cluster_name), "owned");
    tags
}

/// Whether a resource with `tags` and the filterable `fields` passes all `filters`. Filters on a
/// field the resource does not have are ignored.
fn matches(filters: &[Filter], tags: &Tags, fields: &[(&str, &str)]) -> bool {
    filters.iter().all(|filter| {
        if filter.name == "tag-key" {
            return filter.values.iter().any(|key| tags.contains_key(key));
        }
        if let Some(key) = filter.name.strip_prefix("tag:") {
            return tags
                .get(key)
                .map(|value| filter.values.iter().any(|v| value_matches(v, value)))
                .unwrap_or(false);
        }
        let mut values = fields
            .iter()
            .filter(|(name, _)| *name == filter.name)
            .map(|(_, value)| *value)
            .peekable();
        if values.peek().is_none() {
            return true;
        }
        values.any(|value| filter.values.iter().any(|v| value_matches(v, value)))
    })
}

fn value_matches(pattern: &str, value: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => pattern == value,
    }
}
