/*!

The entry points of a reconcile pass. [`ClusterActuator`] converges or tears down everything a
cluster owns; [`MachineActuator`] does the same for one machine of a cluster.

Both take the scopes by mutable reference: whatever was discovered is recorded in them even when a
stage fails, so the caller can persist the partial status before reporting the error.

!*/

use crate::ami::ImageLookups;
use crate::ec2::Ec2Api;
use crate::elb::ElbApi;
use crate::error::{self, Result};
use crate::loadbalancer::LoadBalancerService;
use crate::scope::{ClusterScope, MachineScope};
use crate::service::Service;
use crate::userdata::UserDataProvider;
use crate::wait::WaitConfig;
use capa_model::{Instance, MachineRole, Tags};
use log::{debug, info};
use snafu::OptionExt;

/// The AWS clients and settings shared by the actuators.
pub struct Clients<'a, C: ?Sized, E: ?Sized> {
    pub ec2: &'a C,
    pub elb: &'a E,
    pub user_data: &'a dyn UserDataProvider,
    pub wait: WaitConfig,
    pub images: ImageLookups,
}

impl<'a, C, E> Clients<'a, C, E>
where
    C: Ec2Api + ?Sized,
    E: ElbApi + ?Sized,
{
    pub fn new(ec2: &'a C, elb: &'a E, user_data: &'a dyn UserDataProvider) -> Self {
        Self {
            ec2,
            elb,
            user_data,
            wait: WaitConfig::default(),
            images: ImageLookups::default(),
        }
    }

    pub fn with_wait_config(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_image_lookups(mut self, images: ImageLookups) -> Self {
        self.images = images;
        self
    }

    fn ec2_service<'s>(&'s self, scope: &'s mut ClusterScope) -> Service<'s, C> {
        Service::new(scope, self.ec2)
            .with_wait_config(self.wait)
            .with_image_lookups(self.images.clone())
    }

    fn elb_service<'s>(&'s self, scope: &'s mut ClusterScope) -> LoadBalancerService<'s, E> {
        LoadBalancerService::new(scope, self.elb).with_wait_config(self.wait)
    }
}

pub struct ClusterActuator<'a, C: ?Sized, E: ?Sized> {
    clients: Clients<'a, C, E>,
}

impl<'a, C, E> ClusterActuator<'a, C, E>
where
    C: Ec2Api + ?Sized,
    E: ElbApi + ?Sized,
{
    pub fn new(clients: Clients<'a, C, E>) -> Self {
        Self { clients }
    }

    /// Network, then load balancers, then the bastion host.
    pub async fn reconcile(&self, scope: &mut ClusterScope) -> Result<()> {
        info!("Reconciling cluster '{}'", scope.name());
        scope.set_ready(false);

        self.clients.ec2_service(scope).reconcile_network().await?;
        self.clients
            .elb_service(scope)
            .reconcile_loadbalancers()
            .await?;
        self.clients
            .ec2_service(scope)
            .reconcile_bastion(self.clients.user_data)
            .await?;

        scope.set_ready(true);
        info!("Cluster '{}' is ready", scope.name());
        Ok(())
    }

    /// The bastion host, then load balancers, then the network.
    pub async fn delete(&self, scope: &mut ClusterScope) -> Result<()> {
        info!("Deleting cluster '{}'", scope.name());
        scope.set_ready(false);

        self.clients.ec2_service(scope).delete_bastion().await?;
        self.clients
            .elb_service(scope)
            .delete_loadbalancers()
            .await?;
        self.clients.ec2_service(scope).delete_network().await?;

        info!("Deleted cluster '{}'", scope.name());
        Ok(())
    }
}

pub struct MachineActuator<'a, C: ?Sized, E: ?Sized> {
    clients: Clients<'a, C, E>,
}

impl<'a, C, E> MachineActuator<'a, C, E>
where
    C: Ec2Api + ?Sized,
    E: ElbApi + ?Sized,
{
    pub fn new(clients: Clients<'a, C, E>) -> Self {
        Self { clients }
    }

    /// Creates the machine's instance unless it exists, and puts control plane instances behind
    /// the API server load balancer.
    pub async fn create(
        &self,
        cluster: &mut ClusterScope,
        machine: &mut MachineScope,
    ) -> Result<()> {
        info!("Creating machine '{}'", machine.name());

        let instance = self
            .clients
            .ec2_service(cluster)
            .create_or_get_machine(machine, self.clients.user_data)
            .await?;
        machine.set_instance(&instance);

        if machine.role() == MachineRole::ControlPlane {
            self.clients
                .elb_service(cluster)
                .register_instance_with_api_server_elb(&instance.id)
                .await?;
        }
        Ok(())
    }

    /// Terminates the machine's instance. A machine without an instance is already deleted.
    pub async fn delete(
        &self,
        cluster: &mut ClusterScope,
        machine: &mut MachineScope,
    ) -> Result<()> {
        info!("Deleting machine '{}'", machine.name());

        let service = self.clients.ec2_service(cluster);
        match find_instance(&service, machine).await? {
            Some(instance) => service.terminate_instance_and_wait(&instance.id).await?,
            None => info!("Machine '{}' has no instance, nothing to delete", machine.name()),
        }
        machine.clear_instance();
        Ok(())
    }

    /// Whether the machine has a pending or running instance.
    pub async fn exists(
        &self,
        cluster: &mut ClusterScope,
        machine: &mut MachineScope,
    ) -> Result<bool> {
        let service = self.clients.ec2_service(cluster);
        match find_instance(&service, machine).await? {
            Some(instance) => {
                machine.set_instance(&instance);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Converges the additional tags and the security groups of the machine's instance.
    pub async fn update(
        &self,
        cluster: &mut ClusterScope,
        machine: &mut MachineScope,
    ) -> Result<()> {
        let service = self.clients.ec2_service(cluster);
        let instance = find_instance(&service, machine)
            .await?
            .context(error::NotFoundSnafu {
                what: format!("instance of machine '{}'", machine.name()),
            })?;

        let desired = machine.machine().spec.additional_tags.clone();
        let create = desired.difference(&instance.tags);
        let remove: Tags = machine
            .last_applied_tags()
            .iter()
            .filter(|(k, _)| !desired.contains_key(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        service
            .update_resource_tags(&instance.id, &create, &remove)
            .await?;

        let mut want = service.get_core_security_groups(machine)?;
        want.extend(machine.machine().spec.additional_security_groups.iter().cloned());
        if !same_groups(&instance.security_group_ids, &want) {
            service
                .update_instance_security_groups(&instance.id, &want)
                .await?;
        }

        machine.set_instance(&instance);
        machine.set_last_applied_tags(desired);
        debug!("Updated machine '{}'", machine.name());
        Ok(())
    }
}

async fn find_instance<C>(
    service: &Service<'_, C>,
    machine: &MachineScope,
) -> Result<Option<Instance>>
where
    C: Ec2Api + ?Sized,
{
    match service.instance_if_exists(machine.instance_id()).await? {
        Some(instance) => Ok(Some(instance)),
        None => service.instance_by_tags(machine).await,
    }
}

fn same_groups(current: &[String], want: &[String]) -> bool {
    let mut current = current.to_vec();
    let mut want = want.to_vec();
    current.sort();
    current.dedup();
    want.sort();
    want.dedup();
    current == want
}
