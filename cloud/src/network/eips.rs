use super::Service;
use crate::awserrors::RELEASE_ADDRESS_RETRYABLE_CODES;
use crate::ec2::Ec2Api;
use crate::error::{self, Result};
use crate::filter;
use crate::tags;
use crate::wait::retry;
use capa_model::BuildParams;
use log::{debug, info, trace};
use snafu::ResultExt;

impl<'a, C> Service<'a, C>
where
    C: Ec2Api + ?Sized,
{
    /// Returns the allocation ID of an elastic IP for `role`. An owned address that is not
    /// associated with anything is reused before a new one is allocated.
    pub(crate) async fn get_or_allocate_address(&self, role: &str) -> Result<String> {
        let addresses = self
            .ec2
            .describe_addresses(&[
                filter::cluster_owned(self.scope.name()),
                filter::provider_role(role),
            ])
            .await
            .context(error::AwsSnafu {
                operation: format!("describe elastic IPs with role '{}'", role),
            })?;

        if let Some(free) = addresses.into_iter().find(|a| a.association_id.is_none()) {
            debug!("Reusing elastic IP '{}'", free.allocation_id);
            return Ok(free.allocation_id);
        }

        let address = self
            .ec2
            .allocate_address()
            .await
            .context(error::AwsSnafu {
                operation: "allocate elastic IP",
            })?;
        let params = BuildParams::owned(self.scope.name())
            .with_resource_id(&address.allocation_id)
            .with_name(format!("{}-eip-{}", self.scope.name(), role))
            .with_role(role)
            .with_additional(self.scope.additional_tags().clone());
        tags::apply(self.ec2, &address.allocation_id, &params).await?;
        info!(
            "Allocated elastic IP '{}' ({})",
            address.allocation_id, address.public_ip
        );
        Ok(address.allocation_id)
    }

    pub async fn release_addresses(&mut self) -> Result<()> {
        if self.scope.vpc().is_unmanaged(self.scope.name()) {
            trace!("Skipping elastic IP release in unmanaged mode");
            return Ok(());
        }

        let addresses = self
            .ec2
            .describe_addresses(&[filter::cluster_owned(self.scope.name())])
            .await
            .context(error::AwsSnafu {
                operation: "describe elastic IPs",
            })?;

        for address in addresses {
            if let Some(association_id) = &address.association_id {
                match self.ec2.disassociate_address(association_id).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        return Err(e).context(error::AwsSnafu {
                            operation: format!(
                                "disassociate elastic IP '{}'",
                                address.allocation_id
                            ),
                        })
                    }
                }
            }

            // A freshly disassociated address can take a while to become releasable.
            let ec2 = self.ec2;
            let allocation_id = address.allocation_id.clone();
            let released = retry(
                self.wait.backoff(),
                &format!("release of elastic IP '{}'", address.allocation_id),
                RELEASE_ADDRESS_RETRYABLE_CODES,
                move || {
                    let allocation_id = allocation_id.clone();
                    async move {
                        match ec2.release_address(&allocation_id).await {
                            Ok(()) => Ok(true),
                            Err(e) if e.is_not_found() => Ok(false),
                            Err(e) => Err(e).context(error::AwsSnafu {
                                operation: format!("release elastic IP '{}'", allocation_id),
                            }),
                        }
                    }
                },
            )
            .await?;
            if released {
                info!("Released elastic IP '{}'", address.allocation_id);
            } else {
                trace!("Elastic IP '{}' is already gone", address.allocation_id);
            }
        }
        Ok(())
    }
}
