/*!

The instance lifecycle manager. Machines are found by their cached instance ID or by their tags,
created when neither finds a live instance, and terminated on delete.

!*/

use crate::ec2::{Ec2Api, RunInstancesRequest};
use crate::error::{self, Result};
use crate::filter;
use crate::scope::MachineScope;
use crate::service::Service;
use crate::tags;
use crate::userdata::{self, MachineUserDataInput, UserDataProvider};
use crate::wait::wait_for;
use capa_model::constants::{DEFAULT_INSTANCE_TYPE, DEFAULT_SSH_KEY_NAME};
use capa_model::{
    BuildParams, Instance, InstanceState, MachineRole, SecurityGroupRole, Tags,
};
use log::{debug, info, trace};
use snafu::{OptionExt, ResultExt};

/// The core security groups a machine of `role` is placed in.
pub fn core_security_group_roles(role: MachineRole) -> &'static [SecurityGroupRole] {
    match role {
        MachineRole::Node => &[SecurityGroupRole::Node],
        MachineRole::ControlPlane => &[SecurityGroupRole::Node, SecurityGroupRole::ControlPlane],
    }
}

impl<'a, C> Service<'a, C>
where
    C: Ec2Api + ?Sized,
{
    /// Returns the pending or running instance with `id` in the cluster's VPC, or `None` when
    /// there is no ID or no such live instance.
    pub async fn instance_if_exists(&self, id: Option<&str>) -> Result<Option<Instance>> {
        let id = match id.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => {
                trace!("Instance does not have an instance id");
                return Ok(None);
            }
        };
        trace!("Looking for instance by id '{}'", id);

        let mut filters = vec![filter::instance_states(InstanceState::live())];
        if !self.scope.vpc().id.is_empty() {
            filters.push(filter::vpc(&self.scope.vpc().id));
        }

        match self.ec2.describe_instances(&[id.to_string()], &filters).await {
            Ok(instances) => Ok(instances.into_iter().next()),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e).context(error::AwsSnafu {
                operation: format!("describe instance '{}'", id),
            }),
        }
    }

    /// Returns a pending or running instance tagged for `machine`, if any.
    pub async fn instance_by_tags(&self, machine: &MachineScope) -> Result<Option<Instance>> {
        trace!("Looking for existing instance of machine '{}' by tags", machine.name());

        let mut filters = vec![
            filter::cluster_owned(self.scope.name()),
            filter::name(machine.name()),
            filter::instance_states(InstanceState::live()),
        ];
        if !self.scope.vpc().id.is_empty() {
            filters.push(filter::vpc(&self.scope.vpc().id));
        }

        match self.ec2.describe_instances(&[], &filters).await {
            // The first match wins when several instances carry the machine's tags.
            Ok(instances) => Ok(instances.into_iter().next()),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e).context(error::AwsSnafu {
                operation: format!("describe instances of machine '{}'", machine.name()),
            }),
        }
    }

    /// Returns the instance of `machine`, looked up by its cached ID and then by its tags, and
    /// creates one if neither finds it.
    pub async fn create_or_get_machine(
        &self,
        machine: &MachineScope,
        user_data: &dyn UserDataProvider,
    ) -> Result<Instance> {
        if let Some(instance) = self.instance_if_exists(machine.instance_id()).await? {
            debug!("Found instance '{}' by id", instance.id);
            return Ok(instance);
        }
        if let Some(instance) = self.instance_by_tags(machine).await? {
            debug!("Found instance '{}' by tags", instance.id);
            return Ok(instance);
        }
        self.create_instance(machine, user_data).await
    }

    pub async fn create_instance(
        &self,
        machine: &MachineScope,
        user_data: &dyn UserDataProvider,
    ) -> Result<Instance> {
        debug!("Creating an instance for machine '{}'", machine.name());
        let spec = &machine.machine().spec;

        let image_id = self
            .images
            .machine
            .resolve(self.ec2, spec.ami.as_deref(), self.scope.region())
            .await?;

        let subnet_id = match spec.subnet_id.as_ref().filter(|id| !id.is_empty()) {
            Some(id) => id.clone(),
            None => self
                .scope
                .subnets()
                .filter_private()
                .iter()
                .map(|sn| sn.id.clone())
                .find(|id| !id.is_empty())
                .context(error::FailedDependencySnafu {
                    message: format!(
                        "failed to run machine '{}', no subnets available",
                        machine.name()
                    ),
                })?,
        };

        let api_server_address = self
            .scope
            .network()
            .api_server_elb
            .as_ref()
            .map(|elb| elb.dns_name.as_str())
            .unwrap_or_default();
        let ca_key_pair = match machine.role() {
            MachineRole::ControlPlane => {
                let ca = self
                    .scope
                    .ca_key_pair()
                    .filter(|ca| ca.has_cert_and_key())
                    .context(error::FailedDependencySnafu {
                        message: "failed to run controlplane, missing CA certificate and key",
                    })?;
                if api_server_address.is_empty() {
                    return error::FailedDependencySnafu {
                        message:
                            "failed to run controlplane, API server load balancer not available",
                    }
                    .fail();
                }
                Some(ca)
            }
            MachineRole::Node => None,
        };

        let mut security_group_ids = self.get_core_security_groups(machine)?;
        security_group_ids.extend(spec.additional_security_groups.iter().cloned());

        let raw_user_data = user_data.machine(&MachineUserDataInput {
            cluster_name: self.scope.name(),
            machine_name: machine.name(),
            role: machine.role(),
            api_server_address,
            ca_key_pair,
        })?;

        let key_name = spec
            .key_name
            .as_deref()
            .or_else(|| self.scope.ssh_key_name())
            .filter(|k| !k.is_empty())
            .unwrap_or(DEFAULT_SSH_KEY_NAME);

        let mut additional = self.scope.additional_tags().clone();
        additional.merge(&spec.additional_tags);
        let tags = BuildParams::owned(self.scope.name())
            .with_name(machine.name())
            .with_role(machine.role().as_str())
            .with_additional(additional)
            .build();

        let request = RunInstancesRequest {
            image_id,
            instance_type: spec
                .instance_type
                .clone()
                .unwrap_or_else(|| DEFAULT_INSTANCE_TYPE.to_string()),
            subnet_id,
            key_name: Some(key_name.to_string()),
            security_group_ids,
            user_data: raw_user_data.as_deref().map(userdata::encode).transpose()?,
            iam_instance_profile: spec.iam_instance_profile.clone(),
            tags,
        };
        let instance = self.run_instance(machine.role().as_str(), &request).await?;
        info!(
            "Created new {} instance '{}' for machine '{}'",
            machine.role(),
            instance.id,
            machine.name()
        );
        Ok(instance)
    }

    /// Runs a single instance and gives it a bounded amount of time to reach `running`. The
    /// instance is returned whether or not it got there.
    pub(crate) async fn run_instance(
        &self,
        role: &str,
        request: &RunInstancesRequest,
    ) -> Result<Instance> {
        debug!("Running {} instance in subnet '{}'", role, request.subnet_id);
        let instance = self
            .ec2
            .run_instances(request)
            .await
            .context(error::AwsSnafu {
                operation: format!("run {} instance", role),
            })?;

        let ec2 = self.ec2;
        let id = instance.id.clone();
        let running = wait_for(
            self.wait.instance_running_backoff(),
            &format!("instance '{}' to be running", instance.id),
            move || {
                let id = id.clone();
                async move {
                    match ec2.describe_instances(&[id.clone()], &[]).await {
                        Ok(found) => Ok(found.iter().any(|i| i.state == InstanceState::Running)),
                        // A new instance may not be visible yet.
                        Err(e) if e.is_not_found() => Ok(false),
                        Err(e) => Err(e).context(error::AwsSnafu {
                            operation: format!("describe instance '{}'", id),
                        }),
                    }
                }
            },
        )
        .await;

        match running {
            Ok(()) => Ok(Instance {
                state: InstanceState::Running,
                ..instance
            }),
            Err(e) if e.is_timeout() => {
                info!(
                    "Could not determine if instance '{}' is running, its state might be \
                     unavailable until the next reconcile",
                    instance.id
                );
                Ok(instance)
            }
            Err(e) => Err(e),
        }
    }

    /// The IDs of the core security groups for the machine's role.
    pub fn get_core_security_groups(&self, machine: &MachineScope) -> Result<Vec<String>> {
        core_security_group_roles(machine.role())
            .iter()
            .map(|role| {
                self.scope
                    .security_group(*role)
                    .map(|sg| sg.id.clone())
                    .filter(|id| !id.is_empty())
                    .context(error::FailedDependencySnafu {
                        message: format!("{} security group not available", role),
                    })
            })
            .collect()
    }

    pub async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        debug!("Attempting to terminate instance '{}'", instance_id);
        match self
            .ec2
            .terminate_instances(&[instance_id.to_string()])
            .await
        {
            Ok(()) => info!("Terminated instance '{}'", instance_id),
            Err(e) if e.is_not_found() => trace!("Instance '{}' is already gone", instance_id),
            Err(e) => {
                return Err(e).context(error::AwsSnafu {
                    operation: format!("terminate instance '{}'", instance_id),
                })
            }
        }
        Ok(())
    }

    /// Terminates an instance and waits until AWS reports it terminated.
    pub async fn terminate_instance_and_wait(&self, instance_id: &str) -> Result<()> {
        self.terminate_instance(instance_id).await?;

        debug!("Waiting for instance '{}' to terminate", instance_id);
        let ec2 = self.ec2;
        let id = instance_id.to_string();
        wait_for(
            self.wait.delete_backoff(),
            &format!("instance '{}' to terminate", instance_id),
            move || {
                let id = id.clone();
                async move {
                    match ec2.describe_instances(&[id.clone()], &[]).await {
                        Ok(found) => Ok(found
                            .iter()
                            .all(|i| i.state == InstanceState::Terminated)),
                        Err(e) if e.is_not_found() => Ok(true),
                        Err(e) => Err(e).context(error::AwsSnafu {
                            operation: format!("describe instance '{}'", id),
                        }),
                    }
                }
            },
        )
        .await
    }

    /// Adds `create` to the tags of a resource and removes the keys of `remove`.
    pub async fn update_resource_tags(
        &self,
        resource_id: &str,
        create: &Tags,
        remove: &Tags,
    ) -> Result<()> {
        debug!("Updating tags on resource '{}'", resource_id);
        tags::update(self.ec2, resource_id, create, remove).await
    }

    /// Replaces the security groups of an instance.
    pub async fn update_instance_security_groups(
        &self,
        instance_id: &str,
        group_ids: &[String],
    ) -> Result<()> {
        debug!(
            "Updating security groups of instance '{}' to {:?}",
            instance_id, group_ids
        );
        self.ec2
            .modify_instance_security_groups(instance_id, group_ids)
            .await
            .context(error::AwsSnafu {
                operation: format!("modify security groups of instance '{}'", instance_id),
            })
    }
}
