use crate::ec2::{Ec2Api, RunInstancesRequest};
use crate::error::{self, Result};
use crate::filter;
use crate::service::Service;
use crate::userdata::{self, UserDataProvider};
use capa_model::constants::{DEFAULT_BASTION_INSTANCE_TYPE, DEFAULT_SSH_KEY_NAME, ROLE_BASTION};
use capa_model::{BuildParams, Instance, InstanceState, SecurityGroupRole};
use log::{debug, info, trace};
use snafu::{OptionExt, ResultExt};

impl<'a, C> Service<'a, C>
where
    C: Ec2Api + ?Sized,
{
    /// Makes sure the cluster has an SSH bastion host in a public subnet.
    pub async fn reconcile_bastion(&mut self, user_data: &dyn UserDataProvider) -> Result<()> {
        debug!("Reconciling bastion host");

        if self.scope.subnets().filter_private().is_empty() {
            debug!("No private subnets available, skipping bastion host");
            return Ok(());
        }
        if self.scope.subnets().filter_public().is_empty() {
            return error::FailedDependencySnafu {
                message: "failed to reconcile bastion host, no public subnets are available",
            }
            .fail();
        }

        let instance = match self.describe_bastion_instance().await? {
            Some(instance) => {
                trace!("Found bastion host '{}'", instance.id);
                instance
            }
            None => {
                let request = self.default_bastion(user_data).await?;
                let instance = self.run_instance(ROLE_BASTION, &request).await?;
                info!("Created new bastion host '{}'", instance.id);
                instance
            }
        };

        self.scope.set_bastion(Some(instance));
        Ok(())
    }

    pub async fn delete_bastion(&mut self) -> Result<()> {
        match self.describe_bastion_instance().await? {
            Some(instance) => {
                self.terminate_instance_and_wait(&instance.id).await?;
                info!("Deleted bastion host '{}'", instance.id);
            }
            None => trace!("No bastion host to delete"),
        }
        self.scope.set_bastion(None);
        Ok(())
    }

    async fn describe_bastion_instance(&self) -> Result<Option<Instance>> {
        let filters = [
            filter::provider_role(ROLE_BASTION),
            filter::cluster(self.scope.name()),
            filter::instance_states([
                InstanceState::Pending,
                InstanceState::Running,
                InstanceState::Stopping,
                InstanceState::Stopped,
            ]),
        ];
        match self.ec2.describe_instances(&[], &filters).await {
            Ok(instances) => Ok(instances.into_iter().next()),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e).context(error::AwsSnafu {
                operation: "describe bastion host",
            }),
        }
    }

    async fn default_bastion(
        &self,
        user_data: &dyn UserDataProvider,
    ) -> Result<RunInstancesRequest> {
        let name = format!("{}-bastion", self.scope.name());
        let subnet_id = self
            .scope
            .subnets()
            .filter_public()
            .iter()
            .map(|sn| sn.id.clone())
            .find(|id| !id.is_empty())
            .context(error::FailedDependencySnafu {
                message: "failed to run bastion host, public subnet has no id",
            })?;
        let group_id = self
            .scope
            .security_group(SecurityGroupRole::Bastion)
            .map(|sg| sg.id.clone())
            .filter(|id| !id.is_empty())
            .context(error::FailedDependencySnafu {
                message: "failed to run bastion host, bastion security group not available",
            })?;
        let image_id = self
            .images
            .bastion
            .resolve(self.ec2, None, self.scope.region())
            .await?;
        let user_data = user_data
            .bastion(self.scope.name())?
            .as_deref()
            .map(userdata::encode)
            .transpose()?;

        Ok(RunInstancesRequest {
            image_id,
            instance_type: DEFAULT_BASTION_INSTANCE_TYPE.to_string(),
            subnet_id,
            key_name: Some(
                self.scope
                    .ssh_key_name()
                    .filter(|k| !k.is_empty())
                    .unwrap_or(DEFAULT_SSH_KEY_NAME)
                    .to_string(),
            ),
            security_group_ids: vec![group_id],
            user_data,
            iam_instance_profile: None,
            tags: BuildParams::owned(self.scope.name())
                .with_name(name)
                .with_role(ROLE_BASTION)
                .with_additional(self.scope.additional_tags().clone())
                .build(),
        })
    }
}
