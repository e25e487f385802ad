use super::Service;
use crate::awserrors::VPC_NOT_FOUND;
use crate::ec2::{Ec2Api, VpcInfo};
use crate::error::{self, Result};
use crate::filter;
use crate::tags;
use crate::wait::wait_for;
use capa_model::constants::{DEFAULT_VPC_CIDR, ROLE_COMMON};
use capa_model::{BuildParams, Vpc};
use log::{debug, info, trace};
use snafu::ResultExt;

impl<'a, C> Service<'a, C>
where
    C: Ec2Api + ?Sized,
{
    pub async fn reconcile_vpc(&mut self) -> Result<()> {
        debug!("Reconciling VPC");

        match self.describe_vpc().await {
            Ok(vpc) => {
                trace!("Adopting VPC '{}'", vpc.id);
                *self.scope.vpc_mut() = vpc;
                return Ok(());
            }
            Err(e) if e.is_not_found() && self.scope.vpc().id.is_empty() => {}
            Err(e) => return Err(e),
        }

        let vpc = self.create_vpc().await?;
        info!("Created new VPC '{}' with cidr '{}'", vpc.id, vpc.cidr_block);
        *self.scope.vpc_mut() = vpc;
        Ok(())
    }

    fn vpc_tag_params(&self, vpc_id: &str) -> BuildParams {
        BuildParams::owned(self.scope.name())
            .with_resource_id(vpc_id)
            .with_name(format!("{}-vpc", self.scope.name()))
            .with_role(ROLE_COMMON)
            .with_additional(self.scope.additional_tags().clone())
    }

    async fn create_vpc(&mut self) -> Result<Vpc> {
        let cidr_block = if self.scope.vpc().cidr_block.is_empty() {
            DEFAULT_VPC_CIDR.to_string()
        } else {
            self.scope.vpc().cidr_block.clone()
        };

        let created = self
            .ec2
            .create_vpc(&cidr_block)
            .await
            .context(error::AwsSnafu {
                operation: "create vpc",
            })?;

        let ec2 = self.ec2;
        let vpc_id = created.id.clone();
        wait_for(
            self.wait.backoff(),
            &format!("vpc '{}' to become available", vpc_id),
            move || {
                let vpc_id = vpc_id.clone();
                async move {
                    let vpcs = ec2
                        .describe_vpcs(&[vpc_id.clone()], &[])
                        .await
                        .context(error::AwsSnafu {
                            operation: format!("describe vpc '{}'", vpc_id),
                        });
                    match vpcs {
                        Ok(vpcs) => Ok(vpcs.iter().any(|v| v.state == "available")),
                        Err(e) if e.has_code(&[VPC_NOT_FOUND]) => Ok(false),
                        Err(e) => Err(e),
                    }
                }
            },
        )
        .await?;

        let tags = tags::apply(self.ec2, &created.id, &self.vpc_tag_params(&created.id)).await?;

        Ok(Vpc {
            id: created.id,
            cidr_block: created.cidr_block,
            tags,
        })
    }

    pub async fn delete_vpc(&mut self) -> Result<()> {
        if self.scope.vpc().is_unmanaged(self.scope.name()) {
            trace!("Skipping VPC deletion in unmanaged mode");
            return Ok(());
        }
        let vpc_id = self.scope.vpc().id.clone();
        if vpc_id.is_empty() {
            trace!("No VPC to delete");
            return Ok(());
        }

        match self.ec2.delete_vpc(&vpc_id).await {
            Ok(()) => info!("Deleted VPC '{}'", vpc_id),
            Err(e) if e.is_not_found() => trace!("VPC '{}' is already gone", vpc_id),
            Err(e) => {
                return Err(e).context(error::AwsSnafu {
                    operation: format!("delete vpc '{}'", vpc_id),
                })
            }
        }
        self.scope.vpc_mut().id.clear();
        Ok(())
    }

    /// Finds the cluster VPC by ID when one is known, otherwise by the cluster tag.
    async fn describe_vpc(&self) -> Result<Vpc> {
        let vpc_id = self.scope.vpc().id.clone();
        let (ids, filters) = if vpc_id.is_empty() {
            (
                Vec::new(),
                vec![filter::vpc_states(), filter::cluster(self.scope.name())],
            )
        } else {
            (vec![vpc_id.clone()], vec![filter::vpc_states()])
        };

        let vpcs = match self.ec2.describe_vpcs(&ids, &filters).await {
            Ok(vpcs) => vpcs,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => {
                return Err(e).context(error::AwsSnafu {
                    operation: "describe vpcs",
                })
            }
        };

        let mut vpcs = vpcs.into_iter();
        match (vpcs.next(), vpcs.next()) {
            (None, _) => {
                let what = if vpc_id.is_empty() {
                    format!("VPC for cluster '{}'", self.scope.name())
                } else {
                    format!("VPC '{}'", vpc_id)
                };
                error::NotFoundSnafu { what }.fail()
            }
            (Some(_), Some(_)) => error::ConflictSnafu {
                message: "found more than one vpc with supplied filters",
            }
            .fail(),
            (Some(VpcInfo {
                id,
                cidr_block,
                tags,
                ..
            }), None) => Ok(Vpc {
                id,
                cidr_block,
                tags,
            }),
        }
    }
}
