use super::subnets::by_subnet;
use super::Service;
use crate::awserrors::{NAT_GATEWAY_MALFORMED, NAT_GATEWAY_NOT_FOUND};
use crate::ec2::{Ec2Api, NatGatewayInfo};
use crate::error::{self, Error, Result};
use crate::filter;
use crate::tags;
use crate::wait::{wait_for, wait_for_with_retryable};
use capa_model::constants::{ROLE_API_SERVER, ROLE_COMMON};
use capa_model::{BuildParams, Subnet, Subnets};
use log::{debug, info, trace};
use snafu::ResultExt;
use std::collections::HashMap;

impl<'a, C> Service<'a, C>
where
    C: Ec2Api + ?Sized,
{
    pub async fn reconcile_nat_gateways(&mut self) -> Result<()> {
        if self.scope.vpc().is_unmanaged(self.scope.name()) {
            trace!("Skipping NAT gateway reconcile in unmanaged mode");
            return Ok(());
        }

        debug!("Reconciling NAT gateways");

        if self.scope.subnets().filter_private().is_empty() {
            debug!("No private subnets available, skipping NAT gateways");
            return Ok(());
        }
        if self.scope.subnets().filter_public().is_empty() {
            debug!(
                "No public subnets available. Cannot create NAT gateways for private subnets, \
                 this might be a configuration error."
            );
            return Ok(());
        }

        let existing = self.describe_nat_gateways_by_subnet().await?;
        let mut needs_gateway = Vec::new();
        for sn in self.scope.subnets().filter_public() {
            if sn.id.is_empty() {
                continue;
            }
            match existing.get(&sn.id) {
                Some(ngw) => {
                    trace!("Found NAT gateway '{}' for subnet '{}'", ngw.id, sn.id);
                    tags::ensure(self.ec2, &ngw.id, &ngw.tags, &self.nat_tag_params(&ngw.id))
                        .await?;
                    if let Some(subnet) = self.scope.subnets_mut().find_by_id_mut(&sn.id) {
                        subnet.nat_gateway_id = Some(ngw.id.clone());
                    }
                }
                None => needs_gateway.push(sn.id),
            }
        }

        for subnet_id in needs_gateway {
            let ngw = self.create_nat_gateway(&subnet_id).await?;
            if let Some(subnet) = self.scope.subnets_mut().find_by_id_mut(&subnet_id) {
                subnet.nat_gateway_id = Some(ngw.id);
            }
        }

        Ok(())
    }

    fn nat_tag_params(&self, nat_gateway_id: &str) -> BuildParams {
        BuildParams::owned(self.scope.name())
            .with_resource_id(nat_gateway_id)
            .with_name(format!("{}-nat", self.scope.name()))
            .with_role(ROLE_COMMON)
            .with_additional(self.scope.additional_tags().clone())
    }

    /// NAT gateways of the VPC that are pending or available, keyed by their subnet.
    pub(crate) async fn describe_nat_gateways_by_subnet(
        &self,
    ) -> Result<HashMap<String, NatGatewayInfo>> {
        let vpc_id = &self.scope.vpc().id;
        if vpc_id.is_empty() {
            return Ok(HashMap::new());
        }
        let gateways = self
            .ec2
            .describe_nat_gateways(&[
                filter::vpc(vpc_id),
                filter::nat_gateway_states(["pending", "available"]),
            ])
            .await
            .context(error::AwsSnafu {
                operation: format!("describe NAT gateways in vpc '{}'", vpc_id),
            })?;
        Ok(by_subnet(gateways, |ngw| vec![ngw.subnet_id.clone()]))
    }

    async fn create_nat_gateway(&self, subnet_id: &str) -> Result<NatGatewayInfo> {
        let allocation_id = self.get_or_allocate_address(ROLE_API_SERVER).await?;

        let ngw = self
            .ec2
            .create_nat_gateway(subnet_id, &allocation_id)
            .await
            .context(error::AwsSnafu {
                operation: format!("create NAT gateway for subnet '{}'", subnet_id),
            })?;
        info!("Created NAT gateway '{}' for subnet '{}'", ngw.id, subnet_id);

        let ec2 = self.ec2;
        let id = ngw.id.clone();
        wait_for_with_retryable(
            self.wait.backoff(),
            &format!("NAT gateway '{}' to become available", ngw.id),
            &[NAT_GATEWAY_NOT_FOUND, NAT_GATEWAY_MALFORMED],
            move || {
                let id = id.clone();
                async move {
                    let gateways = ec2
                        .describe_nat_gateways(&[filter::nat_gateway_id(&id)])
                        .await
                        .context(error::AwsSnafu {
                            operation: format!("describe NAT gateway '{}'", id),
                        })?;
                    Ok(gateways.iter().any(|g| g.state == "available"))
                }
            },
        )
        .await?;
        info!("NAT gateway '{}' is now available", ngw.id);

        let tags = tags::apply(self.ec2, &ngw.id, &self.nat_tag_params(&ngw.id)).await?;
        Ok(NatGatewayInfo { tags, ..ngw })
    }

    pub async fn delete_nat_gateways(&mut self) -> Result<()> {
        if self.scope.vpc().is_unmanaged(self.scope.name()) {
            trace!("Skipping NAT gateway deletion in unmanaged mode");
            return Ok(());
        }

        if self.scope.subnets().filter_private().is_empty() {
            debug!("No private subnets available, skipping NAT gateways");
            return Ok(());
        }
        if self.scope.subnets().filter_public().is_empty() {
            debug!(
                "No public subnets available. Cannot delete NAT gateways for private subnets, \
                 this might be a configuration error."
            );
            return Ok(());
        }

        let existing = self.describe_nat_gateways_by_subnet().await?;
        for sn in self.scope.subnets().filter_public() {
            if sn.id.is_empty() {
                continue;
            }
            if let Some(ngw) = existing.get(&sn.id) {
                self.delete_nat_gateway(&ngw.id).await?;
            }
        }
        for sn in self.scope.subnets_mut().iter_mut() {
            sn.nat_gateway_id = None;
        }
        Ok(())
    }

    async fn delete_nat_gateway(&self, nat_gateway_id: &str) -> Result<()> {
        match self.ec2.delete_nat_gateway(nat_gateway_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                trace!("NAT gateway '{}' is already gone", nat_gateway_id);
                return Ok(());
            }
            Err(e) => {
                return Err(e).context(error::AwsSnafu {
                    operation: format!("delete NAT gateway '{}'", nat_gateway_id),
                })
            }
        }

        let ec2 = self.ec2;
        let id = nat_gateway_id.to_string();
        wait_for(
            self.wait.backoff(),
            &format!("NAT gateway '{}' to be deleted", nat_gateway_id),
            move || {
                let id = id.clone();
                async move {
                    let gateways = match ec2
                        .describe_nat_gateways(&[filter::nat_gateway_id(&id)])
                        .await
                    {
                        Ok(gateways) => gateways,
                        Err(e) if e.is_not_found() => return Ok(true),
                        Err(e) => {
                            return Err(e).context(error::AwsSnafu {
                                operation: format!("describe NAT gateway '{}'", id),
                            })
                        }
                    };
                    match gateways.into_iter().next() {
                        None => Ok(true),
                        Some(ngw) => deletion_done(ngw),
                    }
                }
            },
        )
        .await?;

        info!("Deleted NAT gateway '{}'", nat_gateway_id);
        Ok(())
    }
}

/// Interprets the state of a NAT gateway that is being deleted.
fn deletion_done(ngw: NatGatewayInfo) -> Result<bool> {
    match ngw.state.as_str() {
        "deleted" => Ok(true),
        "pending" | "available" | "deleting" => Ok(false),
        "failed" => error::NatGatewayFailedSnafu {
            id: ngw.id,
            code: ngw.failure_code,
            message: ngw.failure_message,
        }
        .fail(),
        _ => Ok(false),
    }
}

/// Finds the NAT gateway a private subnet routes through: the one owned by a public subnet in the
/// same availability zone.
pub(crate) fn nat_gateway_for_subnet(subnets: &Subnets, subnet: &Subnet) -> Result<String> {
    if subnet.is_public {
        return Err(Error::PublicSubnetNat {
            subnet_id: subnet.id.clone(),
        });
    }
    subnets
        .iter()
        .filter(|sn| sn.is_public && sn.availability_zone == subnet.availability_zone)
        .find_map(|sn| sn.nat_gateway_id.clone())
        .ok_or_else(|| Error::NoNatGateway {
            zone: subnet.availability_zone.clone(),
            subnet_id: subnet.id.clone(),
        })
}
