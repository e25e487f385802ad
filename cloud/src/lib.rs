/*!

This library reconciles the AWS infrastructure of a Kubernetes cluster: the VPC and its subnets,
internet and NAT gateways, route tables, security groups, the API server load balancer, the bastion
host, and the EC2 instances of the cluster's machines.

Every reconciler works through a [`ClusterScope`], which carries the declared cluster and the
network discovered so far, and through the narrow [`Ec2Api`] and [`ElbApi`] traits. [`SdkEc2`] and
[`SdkElb`] implement the traits with the AWS SDK.

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

pub use actuator::{Clients, ClusterActuator, MachineActuator};
pub use ami::{ImageLookup, ImageLookups};
pub use awserrors::ApiError;
pub use ec2::{Ec2Api, SdkEc2};
pub use elb::{ElbApi, LoadBalancerInfo, SdkElb};
pub use error::{Error, Result};
pub use instances::core_security_group_roles;
pub use loadbalancer::LoadBalancerService;
pub use network::{desired_ingress_rules, security_group_name};
pub use scope::{ClusterScope, MachineScope};
pub use service::Service;
pub use userdata::{MachineUserDataInput, StaticUserData, UserDataProvider};
pub use wait::{Backoff, WaitConfig};

mod actuator;
pub mod ami;
pub mod awserrors;
mod bastion;
pub mod ec2;
pub mod elb;
mod error;
pub mod filter;
mod instances;
pub mod loadbalancer;
mod network;
mod scope;
mod service;
pub mod tags;
pub mod userdata;
pub mod wait;
