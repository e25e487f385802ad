/*!

The EC2 network reconcilers and the orchestrator that runs them in dependency order.

Every reconciler is a method of [`Service`], which holds the EC2 client and the cluster scope. The
stages discover their resources by the cluster tag, create only what is missing, and record the IDs
in the scope's [`capa_model::Network`] for the stages that follow.

!*/

mod eips;
mod gateways;
mod natgateways;
mod routetables;
mod securitygroups;
mod subnets;
mod vpc;

pub use securitygroups::{desired_ingress_rules, security_group_name};

use crate::ec2::Ec2Api;
use crate::error::Result;
use crate::service::Service;
use log::info;

impl<'a, C> Service<'a, C>
where
    C: Ec2Api + ?Sized,
{
    /// Converges the cluster network: VPC, subnets, internet gateway, NAT gateways, route tables
    /// and security groups, in that order.
    pub async fn reconcile_network(&mut self) -> Result<()> {
        info!("Reconciling network for cluster '{}'", self.scope.name());

        self.reconcile_vpc().await?;
        self.reconcile_subnets().await?;
        self.reconcile_internet_gateways().await?;
        self.reconcile_nat_gateways().await?;
        self.reconcile_route_tables().await?;
        self.reconcile_security_groups().await?;

        info!("Reconcile network completed successfully");
        Ok(())
    }

    /// Tears the cluster network down in the reverse order.
    pub async fn delete_network(&mut self) -> Result<()> {
        info!("Deleting network for cluster '{}'", self.scope.name());

        self.delete_security_groups().await?;
        self.delete_route_tables().await?;
        self.delete_nat_gateways().await?;
        self.release_addresses().await?;
        self.delete_internet_gateways().await?;
        self.delete_subnets().await?;
        self.delete_vpc().await?;

        info!("Delete network completed successfully");
        Ok(())
    }
}
