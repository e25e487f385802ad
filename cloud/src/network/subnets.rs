use super::Service;
use crate::awserrors::SUBNET_NOT_FOUND;
use crate::ec2::{Ec2Api, SubnetInfo};
use crate::error::{self, Result};
use crate::filter;
use crate::tags;
use crate::wait::wait_for_with_retryable;
use capa_model::constants::{
    DEFAULT_PRIVATE_SUBNET_CIDR, DEFAULT_PUBLIC_SUBNET_CIDR, ROLE_BASTION, ROLE_COMMON,
};
use capa_model::{BuildParams, Subnet};
use log::{debug, info, trace};
use snafu::{OptionExt, ResultExt};
use std::collections::HashMap;

impl<'a, C> Service<'a, C>
where
    C: Ec2Api + ?Sized,
{
    pub async fn reconcile_subnets(&mut self) -> Result<()> {
        debug!("Reconciling subnets");

        let vpc_id = self.scope.vpc().id.clone();
        for sn in self.scope.subnets_mut().iter_mut() {
            if sn.vpc_id.is_empty() {
                sn.vpc_id = vpc_id.clone();
            }
        }

        // Without a declared pair, use one private and one public subnet in the first zone.
        if self.scope.subnets().len() < 2 {
            let zones = self.availability_zones().await?;
            let zone = zones.first().context(error::FailedDependencySnafu {
                message: format!(
                    "no availability zones available in region '{}'",
                    self.scope.region()
                ),
            })?;
            if self.scope.subnets().filter_private().is_empty() {
                self.scope.subnets_mut().push(Subnet {
                    vpc_id: vpc_id.clone(),
                    cidr_block: DEFAULT_PRIVATE_SUBNET_CIDR.to_string(),
                    availability_zone: zone.clone(),
                    is_public: false,
                    ..Subnet::default()
                });
            }
            if self.scope.subnets().filter_public().is_empty() {
                self.scope.subnets_mut().push(Subnet {
                    vpc_id: vpc_id.clone(),
                    cidr_block: DEFAULT_PUBLIC_SUBNET_CIDR.to_string(),
                    availability_zone: zone.clone(),
                    is_public: true,
                    ..Subnet::default()
                });
            }
        }

        for discovered in self.describe_vpc_subnets().await? {
            match self
                .scope
                .subnets_mut()
                .iter_mut()
                .find(|sn| sn.matches_discovered(&discovered))
            {
                Some(declared) => {
                    trace!("Found existing subnet '{}'", discovered.id);
                    merge_discovered(declared, discovered);
                }
                None => {
                    trace!("Adopting extra subnet '{}'", discovered.id);
                    self.scope.subnets_mut().push(discovered);
                }
            }
        }

        let missing: Vec<usize> = self
            .scope
            .subnets()
            .iter()
            .enumerate()
            .filter(|(_, sn)| sn.id.is_empty())
            .map(|(i, _)| i)
            .collect();
        for index in missing {
            let declared = match self.scope.subnets().get(index) {
                Some(sn) => sn.clone(),
                None => continue,
            };
            let created = self.create_subnet(&declared).await?;
            if let Some(sn) = self.scope.subnets_mut().get_mut(index) {
                *sn = created;
            }
        }

        debug!("Subnets available: {:?}", self.scope.subnets().ids());
        Ok(())
    }

    /// The available zones of the region, sorted.
    async fn availability_zones(&self) -> Result<Vec<String>> {
        let mut zones = self
            .ec2
            .describe_availability_zones()
            .await
            .context(error::AwsSnafu {
                operation: "describe availability zones",
            })?;
        zones.sort();
        Ok(zones)
    }

    /// The subnets of the VPC, with their route tables and NAT gateways. A subnet is public when
    /// it is tagged with the bastion role or routes through an internet gateway.
    pub(crate) async fn describe_vpc_subnets(&self) -> Result<Vec<Subnet>> {
        let vpc_id = &self.scope.vpc().id;
        let mut filters = vec![filter::subnet_states()];
        if vpc_id.is_empty() {
            filters.push(filter::cluster(self.scope.name()));
        } else {
            filters.push(filter::vpc(vpc_id));
        }

        let subnets = self
            .ec2
            .describe_subnets(&filters)
            .await
            .context(error::AwsSnafu {
                operation: "describe subnets",
            })?;

        let route_tables = self.describe_vpc_route_tables_by_subnet().await?;
        let nat_gateways = self.describe_nat_gateways_by_subnet().await?;

        Ok(subnets
            .into_iter()
            .map(|info| {
                let mut subnet = subnet_from_info(info);
                if subnet.tags.role() == Some(ROLE_BASTION) {
                    subnet.is_public = true;
                }
                if let Some(rt) = route_tables.get(&subnet.id) {
                    subnet.route_table_id = Some(rt.id.clone());
                    if rt.routes.iter().any(|r| {
                        r.gateway_id
                            .as_deref()
                            .map(|g| g.starts_with("igw"))
                            .unwrap_or(false)
                    }) {
                        subnet.is_public = true;
                    }
                }
                if let Some(ngw) = nat_gateways.get(&subnet.id) {
                    subnet.nat_gateway_id = Some(ngw.id.clone());
                }
                subnet
            })
            .collect())
    }

    async fn create_subnet(&self, declared: &Subnet) -> Result<Subnet> {
        let created = self
            .ec2
            .create_subnet(
                &declared.vpc_id,
                &declared.cidr_block,
                &declared.availability_zone,
            )
            .await
            .context(error::AwsSnafu {
                operation: format!(
                    "create subnet '{}' in '{}'",
                    declared.cidr_block, declared.availability_zone
                ),
            })?;
        let subnet_id = created.id.clone();

        let ec2 = self.ec2;
        let id = subnet_id.clone();
        wait_for_with_retryable(
            self.wait.backoff(),
            &format!("subnet '{}' to become available", subnet_id),
            &[SUBNET_NOT_FOUND],
            move || {
                let id = id.clone();
                async move {
                    let subnets = ec2
                        .describe_subnets(&[filter::subnet(&id)])
                        .await
                        .context(error::AwsSnafu {
                            operation: format!("describe subnet '{}'", id),
                        })?;
                    Ok(subnets.iter().any(|s| s.state == "available"))
                }
            },
        )
        .await?;

        let role = if declared.is_public {
            ROLE_BASTION
        } else {
            ROLE_COMMON
        };
        let params = BuildParams::owned(self.scope.name())
            .with_resource_id(&subnet_id)
            .with_name(format!(
                "{}-subnet-{}",
                self.scope.name(),
                declared.role_name()
            ))
            .with_role(role)
            .with_additional(self.scope.additional_tags().clone());
        let tags = tags::apply(self.ec2, &subnet_id, &params).await?;

        if declared.is_public {
            self.ec2
                .modify_subnet_map_public_ip(&subnet_id, true)
                .await
                .context(error::AwsSnafu {
                    operation: format!("set MapPublicIpOnLaunch on subnet '{}'", subnet_id),
                })?;
        }

        info!(
            "Created new subnet '{}' in VPC '{}' with cidr '{}' and availability zone '{}'",
            subnet_id, created.vpc_id, created.cidr_block, created.availability_zone
        );

        Ok(Subnet {
            id: subnet_id,
            vpc_id: created.vpc_id,
            availability_zone: created.availability_zone,
            cidr_block: created.cidr_block,
            is_public: declared.is_public,
            route_table_id: None,
            nat_gateway_id: None,
            tags,
        })
    }

    pub async fn delete_subnets(&mut self) -> Result<()> {
        if self.scope.vpc().is_unmanaged(self.scope.name()) {
            trace!("Skipping subnets deletion in unmanaged mode");
            return Ok(());
        }

        // Every subnet found in the VPC is deleted.
        for subnet in self.describe_vpc_subnets().await? {
            match self.ec2.delete_subnet(&subnet.id).await {
                Ok(()) => info!("Deleted subnet '{}' in VPC '{}'", subnet.id, subnet.vpc_id),
                Err(e) if e.is_not_found() => trace!("Subnet '{}' is already gone", subnet.id),
                Err(e) => {
                    return Err(e).context(error::AwsSnafu {
                        operation: format!("delete subnet '{}'", subnet.id),
                    })
                }
            }
        }
        *self.scope.subnets_mut() = Default::default();
        Ok(())
    }
}

fn subnet_from_info(info: SubnetInfo) -> Subnet {
    Subnet {
        id: info.id,
        vpc_id: info.vpc_id,
        availability_zone: info.availability_zone,
        cidr_block: info.cidr_block,
        is_public: false,
        route_table_id: None,
        nat_gateway_id: None,
        tags: info.tags,
    }
}

/// Copies what AWS reports onto a declared subnet. A subnet declared public stays public.
fn merge_discovered(declared: &mut Subnet, discovered: Subnet) {
    let is_public = declared.is_public || discovered.is_public;
    let route_table_id = discovered
        .route_table_id
        .or_else(|| declared.route_table_id.take());
    let nat_gateway_id = discovered
        .nat_gateway_id
        .or_else(|| declared.nat_gateway_id.take());
    *declared = Subnet {
        is_public,
        route_table_id,
        nat_gateway_id,
        ..discovered
    };
}

/// Indexes `items` by the subnet each one belongs to.
pub(crate) fn by_subnet<T, F>(items: Vec<T>, mut subnet_ids: F) -> HashMap<String, T>
where
    T: Clone,
    F: FnMut(&T) -> Vec<String>,
{
    let mut map = HashMap::new();
    for item in items {
        for id in subnet_ids(&item) {
            map.insert(id, item.clone());
        }
    }
    map
}
