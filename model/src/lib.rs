/*!

This library provides the data types of the AWS cluster provider: the declared cluster and machine
documents, the network topology discovered in AWS, and the tag schema that ties AWS resources to a
cluster.

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

pub use cluster::{
    Cluster, ClusterAction, ClusterSpec, ClusterStatus, KeyPair, Machine, MachineRole,
    MachineSpec, MachineStatus,
};
pub use elb::{
    ClassicElb, ClassicElbAttributes, ClassicElbHealthCheck, ClassicElbListener,
    ClassicElbProtocol, ClassicElbScheme,
};
pub use error::{Error, Result};
pub use instance::{Instance, InstanceState};
pub use network::{Network, NetworkSpec, Subnet, Subnets, Vpc};
pub use security_group::{
    IngressRule, IngressRules, SecurityGroup, SecurityGroupProtocol, SecurityGroupRole,
};
pub use tags::{BuildParams, ResourceLifecycle, Tags};

mod cluster;
pub mod constants;
mod elb;
mod error;
mod instance;
mod network;
mod security_group;
mod tags;
