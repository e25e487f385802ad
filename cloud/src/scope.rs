/*!

The cluster context handed to the reconcilers. A scope is built from a cluster document: the
declared network is combined with whatever a previous run recorded in the status, the reconcilers
mutate the working [`Network`], and [`ClusterScope::into_cluster`] writes the result back into the
status for the caller to persist.

!*/

use capa_model::{
    Cluster, Instance, KeyPair, Machine, MachineRole, Network, SecurityGroup, SecurityGroupRole,
    Subnets, Tags, Vpc,
};

#[derive(Clone, Debug)]
pub struct ClusterScope {
    cluster: Cluster,
    network: Network,
}

impl ClusterScope {
    pub fn new(cluster: Cluster) -> Self {
        let mut network = cluster.status.network.clone();
        let declared = &cluster.spec.network;
        // The status is a cache of what was discovered. Declared values fill in anything it does
        // not know about yet.
        if network.vpc.id.is_empty() {
            network.vpc = declared.vpc.clone();
        }
        if network.subnets.is_empty() {
            network.subnets = declared.subnets.clone();
        }
        Self { cluster, network }
    }

    pub fn name(&self) -> &str {
        &self.cluster.name
    }

    pub fn namespace(&self) -> &str {
        &self.cluster.namespace
    }

    pub fn region(&self) -> &str {
        &self.cluster.spec.region
    }

    pub fn ssh_key_name(&self) -> Option<&str> {
        self.cluster.spec.ssh_key_name.as_deref()
    }

    pub fn ca_key_pair(&self) -> Option<&KeyPair> {
        self.cluster.spec.ca_key_pair.as_ref()
    }

    pub fn additional_tags(&self) -> &Tags {
        &self.cluster.spec.additional_tags
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    pub fn vpc(&self) -> &Vpc {
        &self.network.vpc
    }

    pub fn vpc_mut(&mut self) -> &mut Vpc {
        &mut self.network.vpc
    }

    pub fn subnets(&self) -> &Subnets {
        &self.network.subnets
    }

    pub fn subnets_mut(&mut self) -> &mut Subnets {
        &mut self.network.subnets
    }

    pub fn security_groups(&self) -> &std::collections::BTreeMap<SecurityGroupRole, SecurityGroup> {
        &self.network.security_groups
    }

    pub fn security_group(&self, role: SecurityGroupRole) -> Option<&SecurityGroup> {
        self.network.security_groups.get(&role)
    }

    pub fn bastion(&self) -> Option<&Instance> {
        self.cluster.status.bastion.as_ref()
    }

    pub fn set_bastion(&mut self, bastion: Option<Instance>) {
        self.cluster.status.bastion = bastion;
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.cluster.status.ready = ready;
    }

    /// The cluster document with the discovered network written into its status.
    pub fn into_cluster(self) -> Cluster {
        let mut cluster = self.cluster;
        cluster.status.network = self.network;
        cluster
    }
}

/// The context for a single machine of a cluster.
#[derive(Clone, Debug)]
pub struct MachineScope {
    machine: Machine,
}

impl MachineScope {
    pub fn new(machine: Machine) -> Self {
        Self { machine }
    }

    pub fn name(&self) -> &str {
        &self.machine.name
    }

    pub fn role(&self) -> MachineRole {
        self.machine.role
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.machine.status.instance_id.as_deref()
    }

    pub fn set_instance(&mut self, instance: &Instance) {
        self.machine.status.instance_id = Some(instance.id.clone());
        self.machine.status.instance_state = Some(instance.state);
    }

    pub fn clear_instance(&mut self) {
        self.machine.status.instance_id = None;
        self.machine.status.instance_state = None;
    }

    pub fn last_applied_tags(&self) -> &Tags {
        &self.machine.status.last_applied_tags
    }

    pub fn set_last_applied_tags(&mut self, tags: Tags) {
        self.machine.status.last_applied_tags = tags;
    }

    pub fn into_machine(self) -> Machine {
        self.machine
    }
}
