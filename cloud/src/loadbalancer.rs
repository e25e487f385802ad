/*!

The load balancer manager: keeps the classic ELB in front of the cluster's API servers.

!*/

use crate::elb::{ElbApi, LoadBalancerInfo};
use crate::error::{self, Result};
use crate::scope::ClusterScope;
use crate::wait::{wait_for, WaitConfig};
use capa_model::constants::{API_SERVER_PORT, ROLE_API_SERVER};
use capa_model::{
    BuildParams, ClassicElb, ClassicElbAttributes, ClassicElbHealthCheck, ClassicElbListener,
    ClassicElbProtocol, ClassicElbScheme, SecurityGroupRole,
};
use log::{debug, info, trace};
use snafu::{OptionExt, ResultExt};
use std::time::Duration;

/// The name of the API server load balancer of a cluster.
pub fn api_server_elb_name(cluster_name: &str) -> String {
    format!("{}-apiserver", cluster_name)
}

/// The API server load balancer as it should be: internet facing, forwarding TCP 6443 from all
/// public subnets to the control plane security group.
pub fn api_server_elb_spec(scope: &ClusterScope) -> Result<ClassicElb> {
    let control_plane_group = scope
        .security_group(SecurityGroupRole::ControlPlane)
        .map(|sg| sg.id.clone())
        .filter(|id| !id.is_empty())
        .context(error::FailedDependencySnafu {
            message: "control plane security group is required by the API server load balancer",
        })?;
    let name = api_server_elb_name(scope.name());
    let tags = BuildParams::owned(scope.name())
        .with_name(&name)
        .with_role(ROLE_API_SERVER)
        .with_additional(scope.additional_tags().clone())
        .build();

    Ok(ClassicElb {
        name,
        dns_name: String::new(),
        scheme: ClassicElbScheme::InternetFacing,
        subnet_ids: scope.subnets().filter_public().ids(),
        security_group_ids: vec![control_plane_group],
        listeners: vec![ClassicElbListener {
            protocol: ClassicElbProtocol::Tcp,
            port: API_SERVER_PORT,
            instance_protocol: ClassicElbProtocol::Tcp,
            instance_port: API_SERVER_PORT,
        }],
        health_check: Some(ClassicElbHealthCheck {
            target: format!("{}:{}", ClassicElbProtocol::Tcp, API_SERVER_PORT),
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            healthy_threshold: 5,
            unhealthy_threshold: 3,
        }),
        attributes: ClassicElbAttributes {
            idle_timeout: Duration::from_secs(600),
        },
        tags,
    })
}

/// The load balancer manager of a cluster.
pub struct LoadBalancerService<'a, E: ?Sized> {
    scope: &'a mut ClusterScope,
    elb: &'a E,
    wait: WaitConfig,
}

impl<'a, E> LoadBalancerService<'a, E>
where
    E: ElbApi + ?Sized,
{
    pub fn new(scope: &'a mut ClusterScope, elb: &'a E) -> Self {
        Self {
            scope,
            elb,
            wait: WaitConfig::default(),
        }
    }

    pub fn with_wait_config(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    pub async fn reconcile_loadbalancers(&mut self) -> Result<()> {
        debug!("Reconciling load balancers");

        let spec = api_server_elb_spec(self.scope)?;
        let mut elb = match self.describe_classic_elb(&spec.name).await {
            Ok(elb) => elb,
            Err(e) if e.is_not_found() => self.create_classic_elb(&spec).await?,
            Err(e) => return Err(e),
        };

        if elb.attributes != spec.attributes {
            self.elb
                .modify_load_balancer_attributes(&elb.name, &spec.attributes)
                .await
                .context(error::AwsSnafu {
                    operation: format!("modify attributes of load balancer '{}'", elb.name),
                })?;
            debug!("Updated attributes of load balancer '{}'", elb.name);
            elb.attributes = spec.attributes;
        }

        trace!("Control plane load balancer: {:?}", elb);
        self.scope.network_mut().api_server_elb = Some(elb);
        Ok(())
    }

    async fn create_classic_elb(&self, spec: &ClassicElb) -> Result<ClassicElb> {
        if spec.subnet_ids.is_empty() {
            return error::FailedDependencySnafu {
                message: format!("no public subnets to place load balancer '{}' in", spec.name),
            }
            .fail();
        }

        let dns_name = self
            .elb
            .create_load_balancer(spec)
            .await
            .context(error::AwsSnafu {
                operation: format!("create load balancer '{}'", spec.name),
            })?;

        if let Some(health_check) = &spec.health_check {
            self.elb
                .configure_health_check(&spec.name, health_check)
                .await
                .context(error::AwsSnafu {
                    operation: format!("configure health check of load balancer '{}'", spec.name),
                })?;
        }

        info!("Created load balancer '{}' with DNS name '{}'", spec.name, dns_name);
        Ok(ClassicElb {
            dns_name,
            // Attributes are applied by the caller.
            attributes: ClassicElbAttributes::default(),
            ..spec.clone()
        })
    }

    pub async fn delete_loadbalancers(&mut self) -> Result<()> {
        debug!("Deleting load balancers");

        let name = api_server_elb_name(self.scope.name());
        match self.describe_classic_elb(&name).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                trace!("Load balancer '{}' is already gone", name);
                self.scope.network_mut().api_server_elb = None;
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        match self.elb.delete_load_balancer(&name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Err(e).context(error::AwsSnafu {
                    operation: format!("delete load balancer '{}'", name),
                })
            }
        }

        let elb = self.elb;
        let wait_name = name.clone();
        wait_for(
            self.wait.delete_backoff(),
            &format!("load balancer '{}' to be deleted", name),
            move || {
                let name = wait_name.clone();
                async move {
                    match elb.describe_load_balancers(&[name.clone()]).await {
                        Ok(found) => Ok(found.is_empty()),
                        Err(e) if e.is_not_found() => Ok(true),
                        Err(e) => Err(e).context(error::AwsSnafu {
                            operation: format!("describe load balancer '{}'", name),
                        }),
                    }
                }
            },
        )
        .await?;

        info!("Deleted load balancer '{}'", name);
        self.scope.network_mut().api_server_elb = None;
        Ok(())
    }

    /// Adds an instance to the API server load balancer.
    pub async fn register_instance_with_api_server_elb(&self, instance_id: &str) -> Result<()> {
        let name = api_server_elb_name(self.scope.name());
        let elb = self.describe_classic_elb(&name).await?;
        self.elb
            .register_instances(&elb.name, &[instance_id.to_string()])
            .await
            .context(error::AwsSnafu {
                operation: format!(
                    "register instance '{}' with load balancer '{}'",
                    instance_id, elb.name
                ),
            })?;
        info!(
            "Registered instance '{}' with load balancer '{}'",
            instance_id, elb.name
        );
        Ok(())
    }

    pub async fn get_api_server_dns_name(&self) -> Result<String> {
        let name = api_server_elb_name(self.scope.name());
        Ok(self.describe_classic_elb(&name).await?.dns_name)
    }

    /// Describes a load balancer by name, with its attributes and tags. A load balancer by that
    /// name in another VPC is a conflict, as names are unique within a region.
    async fn describe_classic_elb(&self, name: &str) -> Result<ClassicElb> {
        let found = match self.elb.describe_load_balancers(&[name.to_string()]).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => {
                return Err(e).context(error::AwsSnafu {
                    operation: format!("describe load balancer '{}'", name),
                })
            }
        };
        let LoadBalancerInfo { mut elb, vpc_id } =
            found
                .into_iter()
                .next()
                .context(error::NotFoundSnafu {
                    what: format!("load balancer '{}'", name),
                })?;

        let cluster_vpc = &self.scope.vpc().id;
        if !cluster_vpc.is_empty() && vpc_id != *cluster_vpc {
            return error::ConflictSnafu {
                message: format!(
                    "load balancer names must be unique within a region: '{}' already exists in \
                     vpc '{}' instead of '{}'",
                    name, vpc_id, cluster_vpc
                ),
            }
            .fail();
        }

        elb.attributes = self
            .elb
            .describe_load_balancer_attributes(name)
            .await
            .context(error::AwsSnafu {
                operation: format!("describe attributes of load balancer '{}'", name),
            })?;
        elb.tags = self
            .elb
            .describe_tags(name)
            .await
            .context(error::AwsSnafu {
                operation: format!("describe tags of load balancer '{}'", name),
            })?;
        Ok(elb)
    }
}
