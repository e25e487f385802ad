use super::MockEc2;
use capa_cloud::awserrors::LOAD_BALANCER_NOT_FOUND;
use capa_cloud::ec2::ApiResult;
use capa_cloud::{ApiError, ElbApi, LoadBalancerInfo};
use capa_model::{ClassicElb, ClassicElbAttributes, ClassicElbHealthCheck, Tags};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Clone, Debug)]
pub(crate) struct StoredElb {
    pub(crate) elb: ClassicElb,
    pub(crate) vpc_id: String,
    pub(crate) instance_ids: Vec<String>,
}

#[derive(Debug, Default)]
pub(crate) struct State {
    pub(crate) load_balancers: Vec<StoredElb>,
    calls: Vec<String>,
}

/// Classic load balancers. The VPC of a load balancer is the VPC of its first subnet, as recorded
/// by the EC2 mock.
#[derive(Debug)]
pub(crate) struct MockElb {
    ec2: Arc<MockEc2>,
    state: Mutex<State>,
}

impl MockElb {
    pub(crate) fn new(ec2: Arc<MockEc2>) -> Self {
        Self {
            ec2,
            state: Mutex::new(State::default()),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn count(&self, operation: &str) -> usize {
        self.state().calls.iter().filter(|c| *c == operation).count()
    }

    pub(crate) fn registered_instances(&self, name: &str) -> Vec<String> {
        self.state()
            .load_balancers
            .iter()
            .find(|lb| lb.elb.name == name)
            .map(|lb| lb.instance_ids.clone())
            .unwrap_or_default()
    }

    fn begin(&self, operation: &str) -> MutexGuard<'_, State> {
        let mut state = self.state();
        state.calls.push(operation.to_string());
        state
    }
}

fn not_found(name: &str) -> ApiError {
    ApiError::with_code(
        LOAD_BALANCER_NOT_FOUND,
        format!("There is no ACTIVE Load Balancer named '{}'", name),
    )
}

fn find<'a>(state: &'a mut State, name: &str) -> ApiResult<&'a mut StoredElb> {
    state
        .load_balancers
        .iter_mut()
        .find(|lb| lb.elb.name == name)
        .ok_or_else(|| not_found(name))
}

#[async_trait::async_trait]
impl ElbApi for MockElb {
    async fn describe_load_balancers(&self, names: &[String]) -> ApiResult<Vec<LoadBalancerInfo>> {
        let state = self.begin("DescribeLoadBalancers");
        let mut found = Vec::new();
        for name in names {
            let lb = state
                .load_balancers
                .iter()
                .find(|lb| &lb.elb.name == name)
                .ok_or_else(|| not_found(name))?;
            found.push(LoadBalancerInfo {
                elb: ClassicElb {
                    tags: Tags::default(),
                    attributes: ClassicElbAttributes::default(),
                    ..lb.elb.clone()
                },
                vpc_id: lb.vpc_id.clone(),
            });
        }
        Ok(found)
    }

    async fn create_load_balancer(&self, elb: &ClassicElb) -> ApiResult<String> {
        let vpc_id = elb
            .subnet_ids
            .first()
            .map(|id| {
                self.ec2
                    .state()
                    .subnets
                    .iter()
                    .find(|sn| &sn.id == id)
                    .map(|sn| sn.vpc_id.clone())
                    .unwrap_or_default()
            })
            .unwrap_or_default();
        let mut state = self.begin("CreateLoadBalancer");
        if state.load_balancers.iter().any(|lb| lb.elb.name == elb.name) {
            return Err(ApiError::with_code(
                "DuplicateLoadBalancerName",
                format!("load balancer '{}' already exists", elb.name),
            ));
        }
        let dns_name = format!("{}-1234567890.us-east-1.elb.amazonaws.com", elb.name);
        state.load_balancers.push(StoredElb {
            elb: ClassicElb {
                dns_name: dns_name.clone(),
                health_check: None,
                attributes: ClassicElbAttributes {
                    idle_timeout: Duration::from_secs(60),
                },
                ..elb.clone()
            },
            vpc_id,
            instance_ids: Vec::new(),
        });
        Ok(dns_name)
    }

    async fn configure_health_check(
        &self,
        name: &str,
        health_check: &ClassicElbHealthCheck,
    ) -> ApiResult<()> {
        let mut state = self.begin("ConfigureHealthCheck");
        find(&mut state, name)?.elb.health_check = Some(health_check.clone());
        Ok(())
    }

    async fn describe_load_balancer_attributes(
        &self,
        name: &str,
    ) -> ApiResult<ClassicElbAttributes> {
        let mut state = self.begin("DescribeLoadBalancerAttributes");
        Ok(find(&mut state, name)?.elb.attributes.clone())
    }

    async fn modify_load_balancer_attributes(
        &self,
        name: &str,
        attributes: &ClassicElbAttributes,
    ) -> ApiResult<()> {
        let mut state = self.begin("ModifyLoadBalancerAttributes");
        find(&mut state, name)?.elb.attributes = attributes.clone();
        Ok(())
    }

    async fn describe_tags(&self, name: &str) -> ApiResult<Tags> {
        let mut state = self.begin("DescribeTags");
        Ok(find(&mut state, name)?.elb.tags.clone())
    }

    async fn register_instances(&self, name: &str, instance_ids: &[String]) -> ApiResult<()> {
        let mut state = self.begin("RegisterInstancesWithLoadBalancer");
        let lb = find(&mut state, name)?;
        for id in instance_ids {
            if !lb.instance_ids.contains(id) {
                lb.instance_ids.push(id.clone());
            }
        }
        Ok(())
    }

    async fn delete_load_balancer(&self, name: &str) -> ApiResult<()> {
        let mut state = self.begin("DeleteLoadBalancer");
        // Deleting a load balancer that does not exist succeeds.
        state.load_balancers.retain(|lb| lb.elb.name != name);
        Ok(())
    }
}
