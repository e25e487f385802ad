use super::natgateways::nat_gateway_for_subnet;
use super::subnets::by_subnet;
use super::Service;
use crate::awserrors::NOT_FOUND_CODES;
use crate::ec2::{Ec2Api, Route, RouteTableInfo};
use crate::error::{self, Result};
use crate::filter;
use crate::tags;
use crate::wait::retry;
use capa_model::constants::{ANY_IPV4_CIDR, ROLE_BASTION, ROLE_COMMON};
use capa_model::{BuildParams, Subnet};
use log::{debug, info, trace};
use snafu::{OptionExt, ResultExt};
use std::collections::HashMap;

impl<'a, C> Service<'a, C>
where
    C: Ec2Api + ?Sized,
{
    pub async fn reconcile_route_tables(&mut self) -> Result<()> {
        if self.scope.vpc().is_unmanaged(self.scope.name()) {
            trace!("Skipping routing tables reconcile in unmanaged mode");
            return Ok(());
        }

        debug!("Reconciling routing tables");

        let existing = self.describe_vpc_route_tables_by_subnet().await?;
        let subnets = self.scope.subnets().clone();
        for sn in subnets.iter() {
            if sn.id.is_empty() {
                continue;
            }

            let route_table_id = match existing.get(&sn.id) {
                // Routes of an existing table are left as they are.
                Some(rt) => {
                    trace!("Subnet '{}' is already associated with route table '{}'", sn.id, rt.id);
                    rt.id.clone()
                }
                None => {
                    let routes = self.default_routes(sn)?;
                    let rt = self.create_route_table(sn, &routes).await?;
                    self.associate_route_table(&rt.id, &sn.id).await?;
                    info!(
                        "Created route table '{}' for {} subnet '{}'",
                        rt.id,
                        sn.role_name(),
                        sn.id
                    );
                    rt.id
                }
            };

            if let Some(subnet) = self.scope.subnets_mut().find_by_id_mut(&sn.id) {
                subnet.route_table_id = Some(route_table_id);
            }
        }

        debug!("Reconcile route tables completed successfully");
        Ok(())
    }

    /// Public subnets route everything through the internet gateway, private subnets through the
    /// NAT gateway in their zone.
    fn default_routes(&self, sn: &Subnet) -> Result<Vec<Route>> {
        if sn.is_public {
            let igw_id = self
                .scope
                .network()
                .internet_gateway_id
                .clone()
                .context(error::FailedDependencySnafu {
                    message: format!(
                        "no internet gateway to route public subnet '{}' through",
                        sn.id
                    ),
                })?;
            Ok(vec![Route {
                destination_cidr_block: ANY_IPV4_CIDR.to_string(),
                gateway_id: Some(igw_id),
                nat_gateway_id: None,
            }])
        } else {
            let nat_gateway_id = nat_gateway_for_subnet(self.scope.subnets(), sn)?;
            Ok(vec![Route {
                destination_cidr_block: ANY_IPV4_CIDR.to_string(),
                gateway_id: None,
                nat_gateway_id: Some(nat_gateway_id),
            }])
        }
    }

    async fn create_route_table(&self, sn: &Subnet, routes: &[Route]) -> Result<RouteTableInfo> {
        let vpc_id = &self.scope.vpc().id;
        let rt = self
            .ec2
            .create_route_table(vpc_id)
            .await
            .context(error::AwsSnafu {
                operation: format!("create route table in vpc '{}'", vpc_id),
            })?;

        let role = if sn.is_public { ROLE_BASTION } else { ROLE_COMMON };
        let params = BuildParams::owned(self.scope.name())
            .with_resource_id(&rt.id)
            .with_name(format!("{}-rt-{}", self.scope.name(), sn.role_name()))
            .with_role(role)
            .with_additional(self.scope.additional_tags().clone());
        let tags = tags::apply(self.ec2, &rt.id, &params).await?;

        for route in routes {
            // The gateway a route points at may not be visible yet.
            let ec2 = self.ec2;
            let rt_id = rt.id.clone();
            let route_to_create = route.clone();
            retry(
                self.wait.backoff(),
                &format!("route creation in table '{}'", rt.id),
                NOT_FOUND_CODES,
                move || {
                    let (rt_id, route) = (rt_id.clone(), route_to_create.clone());
                    async move {
                        ec2.create_route(&rt_id, &route)
                            .await
                            .context(error::AwsSnafu {
                                operation: format!(
                                    "create route to '{}' in table '{}'",
                                    route.destination_cidr_block, rt_id
                                ),
                            })
                    }
                },
            )
            .await?;
            debug!(
                "Created route '{}' in table '{}'",
                route.destination_cidr_block, rt.id
            );
        }

        Ok(RouteTableInfo {
            routes: routes.to_vec(),
            tags,
            ..rt
        })
    }

    async fn associate_route_table(&self, route_table_id: &str, subnet_id: &str) -> Result<()> {
        let association_id = self
            .ec2
            .associate_route_table(route_table_id, subnet_id)
            .await
            .context(error::AwsSnafu {
                operation: format!(
                    "associate route table '{}' with subnet '{}'",
                    route_table_id, subnet_id
                ),
            })?;
        trace!(
            "Associated route table '{}' with subnet '{}' ({})",
            route_table_id,
            subnet_id,
            association_id
        );
        Ok(())
    }

    pub async fn delete_route_tables(&mut self) -> Result<()> {
        if self.scope.vpc().is_unmanaged(self.scope.name()) {
            trace!("Skipping routing tables deletion in unmanaged mode");
            return Ok(());
        }
        if self.scope.vpc().id.is_empty() {
            return Ok(());
        }

        for rt in self.describe_vpc_route_tables().await? {
            for association in rt.associations.iter().filter(|a| !a.main) {
                match self.ec2.disassociate_route_table(&association.id).await {
                    Ok(()) => debug!(
                        "Disassociated route table '{}' from subnet '{:?}'",
                        rt.id, association.subnet_id
                    ),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        return Err(e).context(error::AwsSnafu {
                            operation: format!("disassociate route table '{}'", rt.id),
                        })
                    }
                }
            }
            match self.ec2.delete_route_table(&rt.id).await {
                Ok(()) => info!("Deleted route table '{}'", rt.id),
                Err(e) if e.is_not_found() => trace!("Route table '{}' is already gone", rt.id),
                Err(e) => {
                    return Err(e).context(error::AwsSnafu {
                        operation: format!("delete route table '{}'", rt.id),
                    })
                }
            }
        }

        for sn in self.scope.subnets_mut().iter_mut() {
            sn.route_table_id = None;
        }
        Ok(())
    }

    /// The route tables of the VPC. When the VPC is managed, only the tables tagged for the
    /// cluster; that leaves out the main route table.
    async fn describe_vpc_route_tables(&self) -> Result<Vec<RouteTableInfo>> {
        let vpc_id = &self.scope.vpc().id;
        let mut filters = vec![filter::vpc(vpc_id)];
        if !self.scope.vpc().is_unmanaged(self.scope.name()) {
            filters.push(filter::cluster(self.scope.name()));
        }
        self.ec2
            .describe_route_tables(&filters)
            .await
            .context(error::AwsSnafu {
                operation: format!("describe route tables of vpc '{}'", vpc_id),
            })
    }

    /// Route tables of the VPC, keyed by each subnet they are associated with.
    pub(crate) async fn describe_vpc_route_tables_by_subnet(
        &self,
    ) -> Result<HashMap<String, RouteTableInfo>> {
        if self.scope.vpc().id.is_empty() {
            return Ok(HashMap::new());
        }
        let tables = self.describe_vpc_route_tables().await?;
        Ok(by_subnet(tables, |rt| {
            rt.associations
                .iter()
                .filter_map(|a| a.subnet_id.clone())
                .collect()
        }))
    }
}
