use super::Service;
use crate::awserrors::NOT_FOUND_CODES;
use crate::ec2::{Ec2Api, InternetGatewayInfo};
use crate::error::{self, Result};
use crate::filter;
use crate::tags;
use crate::wait::retry;
use capa_model::constants::ROLE_COMMON;
use capa_model::BuildParams;
use log::{debug, info, trace};
use snafu::ResultExt;

impl<'a, C> Service<'a, C>
where
    C: Ec2Api + ?Sized,
{
    pub async fn reconcile_internet_gateways(&mut self) -> Result<()> {
        if self.scope.vpc().is_unmanaged(self.scope.name()) {
            trace!("Skipping internet gateways reconcile in unmanaged mode");
            return Ok(());
        }

        debug!("Reconciling internet gateways");

        let gateways = self.describe_vpc_internet_gateways().await?;
        let igw = match gateways.into_iter().next() {
            Some(igw) => {
                trace!("Found internet gateway '{}'", igw.id);
                tags::ensure(self.ec2, &igw.id, &igw.tags, &self.igw_tag_params(&igw.id)).await?;
                igw
            }
            None => self.create_internet_gateway().await?,
        };

        self.scope.network_mut().internet_gateway_id = Some(igw.id);
        Ok(())
    }

    fn igw_tag_params(&self, igw_id: &str) -> BuildParams {
        BuildParams::owned(self.scope.name())
            .with_resource_id(igw_id)
            .with_name(format!("{}-igw", self.scope.name()))
            .with_role(ROLE_COMMON)
            .with_additional(self.scope.additional_tags().clone())
    }

    async fn create_internet_gateway(&self) -> Result<InternetGatewayInfo> {
        let vpc_id = self.scope.vpc().id.clone();
        let igw = self
            .ec2
            .create_internet_gateway()
            .await
            .context(error::AwsSnafu {
                operation: "create internet gateway",
            })?;
        let tags = tags::apply(self.ec2, &igw.id, &self.igw_tag_params(&igw.id)).await?;

        let ec2 = self.ec2;
        let (igw_id, attach_vpc_id) = (igw.id.clone(), vpc_id.clone());
        retry(
            self.wait.backoff(),
            &format!("attach of internet gateway '{}'", igw.id),
            NOT_FOUND_CODES,
            move || {
                let (igw_id, vpc_id) = (igw_id.clone(), attach_vpc_id.clone());
                async move {
                    ec2.attach_internet_gateway(&igw_id, &vpc_id)
                        .await
                        .context(error::AwsSnafu {
                            operation: format!(
                                "attach internet gateway '{}' to vpc '{}'",
                                igw_id, vpc_id
                            ),
                        })
                }
            },
        )
        .await?;

        info!(
            "Created internet gateway '{}' for VPC '{}'",
            igw.id, vpc_id
        );
        Ok(InternetGatewayInfo {
            attached_vpc_ids: vec![vpc_id],
            tags,
            ..igw
        })
    }

    pub async fn delete_internet_gateways(&mut self) -> Result<()> {
        if self.scope.vpc().is_unmanaged(self.scope.name()) {
            trace!("Skipping internet gateway deletion in unmanaged mode");
            return Ok(());
        }
        let vpc_id = self.scope.vpc().id.clone();
        if vpc_id.is_empty() {
            return Ok(());
        }

        for igw in self.describe_vpc_internet_gateways().await? {
            match self.ec2.detach_internet_gateway(&igw.id, &vpc_id).await {
                Ok(()) => debug!("Detached internet gateway '{}' from VPC '{}'", igw.id, vpc_id),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    return Err(e).context(error::AwsSnafu {
                        operation: format!("detach internet gateway '{}'", igw.id),
                    })
                }
            }
            match self.ec2.delete_internet_gateway(&igw.id).await {
                Ok(()) => info!("Deleted internet gateway '{}'", igw.id),
                Err(e) if e.is_not_found() => {
                    trace!("Internet gateway '{}' is already gone", igw.id)
                }
                Err(e) => {
                    return Err(e).context(error::AwsSnafu {
                        operation: format!("delete internet gateway '{}'", igw.id),
                    })
                }
            }
        }
        self.scope.network_mut().internet_gateway_id = None;
        Ok(())
    }

    /// Internet gateways attached to the cluster VPC and tagged for the cluster.
    async fn describe_vpc_internet_gateways(&self) -> Result<Vec<InternetGatewayInfo>> {
        let vpc_id = &self.scope.vpc().id;
        self.ec2
            .describe_internet_gateways(&[
                filter::vpc_attachment(vpc_id),
                filter::cluster(self.scope.name()),
            ])
            .await
            .context(error::AwsSnafu {
                operation: format!("describe internet gateways of vpc '{}'", vpc_id),
            })
    }
}
