/*!

The classic load balancer surface used by the load balancer manager. [`ElbApi`] exchanges the
`capa-model` ELB types; [`SdkElb`] implements it on top of `aws-sdk-elasticloadbalancing`.

!*/

mod sdk;

pub use sdk::SdkElb;

use crate::ec2::ApiResult;
use capa_model::{ClassicElb, ClassicElbAttributes, ClassicElbHealthCheck, Tags};

/// A described load balancer. The `tags` and `attributes` of `elb` are not filled in, they come
/// from separate calls.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LoadBalancerInfo {
    pub elb: ClassicElb,
    pub vpc_id: String,
}

#[async_trait::async_trait]
pub trait ElbApi: Send + Sync {
    async fn describe_load_balancers(&self, names: &[String]) -> ApiResult<Vec<LoadBalancerInfo>>;

    /// Creates the load balancer with its listeners, subnets, security groups and tags. Returns
    /// the DNS name.
    async fn create_load_balancer(&self, elb: &ClassicElb) -> ApiResult<String>;

    async fn configure_health_check(
        &self,
        name: &str,
        health_check: &ClassicElbHealthCheck,
    ) -> ApiResult<()>;

    async fn describe_load_balancer_attributes(&self, name: &str)
        -> ApiResult<ClassicElbAttributes>;

    async fn modify_load_balancer_attributes(
        &self,
        name: &str,
        attributes: &ClassicElbAttributes,
    ) -> ApiResult<()>;

    async fn describe_tags(&self, name: &str) -> ApiResult<Tags>;

    async fn register_instances(&self, name: &str, instance_ids: &[String]) -> ApiResult<()>;

    async fn delete_load_balancer(&self, name: &str) -> ApiResult<()>;
}
