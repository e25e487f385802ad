use super::Service;
use crate::awserrors::SECURITY_GROUP_GONE_CODES;
use crate::ec2::{Ec2Api, SecurityGroupInfo};
use crate::error::{self, Result};
use crate::filter;
use crate::tags;
use capa_model::constants::{
    ANY_IPV4_CIDR, API_SERVER_PORT, BGP_PORT, ETCD_PEER_PORT, ETCD_PORT, KUBELET_PORT,
    NODE_PORT_RANGE_END, NODE_PORT_RANGE_START, SSH_PORT,
};
use capa_model::{BuildParams, IngressRule, IngressRules, SecurityGroup, SecurityGroupRole};
use log::{debug, info, trace};
use snafu::{OptionExt, ResultExt};
use std::collections::{BTreeMap, HashMap};

/// The name of the core security group for `role`, `<cluster>-<role>`.
pub fn security_group_name(cluster_name: &str, role: SecurityGroupRole) -> String {
    format!("{}-{}", cluster_name, role.as_str())
}

/// The ingress rules the core security group for `role` should carry. The rules of the control
/// plane and node groups reference the other core groups, so all of them must have IDs already.
pub fn desired_ingress_rules(
    role: SecurityGroupRole,
    groups: &BTreeMap<SecurityGroupRole, SecurityGroup>,
) -> Result<IngressRules> {
    let group_id = |role: SecurityGroupRole| -> Result<String> {
        groups
            .get(&role)
            .map(|sg| sg.id.clone())
            .filter(|id| !id.is_empty())
            .context(error::FailedDependencySnafu {
                message: format!("security group for role '{}' has no ID yet", role),
            })
    };

    let rules = match role {
        SecurityGroupRole::Bastion => vec![
            IngressRule::tcp("SSH", SSH_PORT, SSH_PORT).from_cidrs([ANY_IPV4_CIDR]),
        ],
        SecurityGroupRole::ControlPlane => {
            let bastion = group_id(SecurityGroupRole::Bastion)?;
            let control_plane = group_id(SecurityGroupRole::ControlPlane)?;
            let node = group_id(SecurityGroupRole::Node)?;
            vec![
                IngressRule::tcp("SSH", SSH_PORT, SSH_PORT).from_groups([bastion]),
                IngressRule::tcp("Kubernetes API", API_SERVER_PORT, API_SERVER_PORT)
                    .from_cidrs([ANY_IPV4_CIDR]),
                IngressRule::tcp("etcd", ETCD_PORT, ETCD_PORT).from_groups([control_plane.clone()]),
                IngressRule::tcp("etcd peer", ETCD_PEER_PORT, ETCD_PEER_PORT)
                    .from_groups([control_plane.clone()]),
                IngressRule::tcp("bgp (calico)", BGP_PORT, BGP_PORT)
                    .from_groups([control_plane, node]),
            ]
        }
        SecurityGroupRole::Node => {
            let bastion = group_id(SecurityGroupRole::Bastion)?;
            let control_plane = group_id(SecurityGroupRole::ControlPlane)?;
            let node = group_id(SecurityGroupRole::Node)?;
            vec![
                IngressRule::tcp("SSH", SSH_PORT, SSH_PORT).from_groups([bastion]),
                IngressRule::tcp(
                    "Node Port Services",
                    NODE_PORT_RANGE_START,
                    NODE_PORT_RANGE_END,
                )
                .from_cidrs([ANY_IPV4_CIDR]),
                IngressRule::tcp("Kubelet API", KUBELET_PORT, KUBELET_PORT)
                    .from_groups([control_plane.clone()]),
                IngressRule::tcp("bgp (calico)", BGP_PORT, BGP_PORT)
                    .from_groups([control_plane, node]),
            ]
        }
    };
    Ok(IngressRules::new(rules))
}

impl<'a, C> Service<'a, C>
where
    C: Ec2Api + ?Sized,
{
    pub async fn reconcile_security_groups(&mut self) -> Result<()> {
        debug!("Reconciling security groups");

        let existing = self.describe_security_groups_by_name().await?;

        // Every group must exist before any rule can reference it.
        let mut groups = BTreeMap::new();
        for role in SecurityGroupRole::ALL {
            let name = security_group_name(self.scope.name(), role);
            let group = match existing.get(&name) {
                Some(info) => {
                    trace!("Found security group '{}' ({})", name, info.id);
                    let tags = tags::ensure(
                        self.ec2,
                        &info.id,
                        &info.tags,
                        &self.security_group_tag_params(&info.id, &name, role),
                    )
                    .await?;
                    SecurityGroup {
                        id: info.id.clone(),
                        name,
                        ingress_rules: info.ingress_rules.iter().cloned().collect(),
                        tags,
                    }
                }
                None => self.create_security_group(role, name).await?,
            };
            groups.insert(role, group);
        }

        for role in SecurityGroupRole::ALL {
            let want = desired_ingress_rules(role, &groups)?;
            let group = match groups.get_mut(&role) {
                Some(group) => group,
                None => continue,
            };

            let revoke = group.ingress_rules.difference(&want);
            if !revoke.is_empty() {
                debug!(
                    "Revoking {} ingress rules from security group '{}'",
                    revoke.len(),
                    group.id
                );
                self.ec2
                    .revoke_security_group_ingress(&group.id, revoke.as_slice())
                    .await
                    .context(error::AwsSnafu {
                        operation: format!("revoke ingress rules of security group '{}'", group.id),
                    })?;
            }

            let authorize = want.difference(&group.ingress_rules);
            if !authorize.is_empty() {
                debug!(
                    "Authorizing {} ingress rules for security group '{}'",
                    authorize.len(),
                    group.id
                );
                self.ec2
                    .authorize_security_group_ingress(&group.id, authorize.as_slice())
                    .await
                    .context(error::AwsSnafu {
                        operation: format!(
                            "authorize ingress rules for security group '{}'",
                            group.id
                        ),
                    })?;
            }

            group.ingress_rules = want;
        }

        self.scope.network_mut().security_groups = groups;
        debug!("Reconcile security groups completed successfully");
        Ok(())
    }

    fn security_group_tag_params(
        &self,
        group_id: &str,
        name: &str,
        role: SecurityGroupRole,
    ) -> BuildParams {
        BuildParams::owned(self.scope.name())
            .with_resource_id(group_id)
            .with_name(name)
            .with_role(role.as_str())
            .with_additional(self.scope.additional_tags().clone())
    }

    async fn create_security_group(
        &self,
        role: SecurityGroupRole,
        name: String,
    ) -> Result<SecurityGroup> {
        let vpc_id = &self.scope.vpc().id;
        let description = format!("Kubernetes cluster {}: {}", self.scope.name(), role);
        let id = self
            .ec2
            .create_security_group(vpc_id, &name, &description)
            .await
            .context(error::AwsSnafu {
                operation: format!("create security group '{}' in vpc '{}'", name, vpc_id),
            })?;
        let tags = tags::apply(
            self.ec2,
            &id,
            &self.security_group_tag_params(&id, &name, role),
        )
        .await?;
        info!("Created security group '{}' ({}) for role '{}'", name, id, role);
        Ok(SecurityGroup {
            id,
            name,
            ingress_rules: IngressRules::default(),
            tags,
        })
    }

    pub async fn delete_security_groups(&mut self) -> Result<()> {
        let groups = self.describe_cluster_security_groups().await?;

        // Rules reference other groups, so all of them are revoked before any group is deleted.
        for sg in &groups {
            if sg.ingress_rules.is_empty() {
                continue;
            }
            match self
                .ec2
                .revoke_security_group_ingress(&sg.id, &sg.ingress_rules)
                .await
            {
                Ok(()) => debug!("Revoked ingress rules of security group '{}'", sg.id),
                Err(e) if e.has_code(SECURITY_GROUP_GONE_CODES) => {}
                Err(e) => {
                    return Err(e).context(error::AwsSnafu {
                        operation: format!("revoke ingress rules of security group '{}'", sg.id),
                    })
                }
            }
        }

        for sg in &groups {
            match self.ec2.delete_security_group(&sg.id).await {
                Ok(()) => info!("Deleted security group '{}' ({})", sg.name, sg.id),
                Err(e) if e.has_code(SECURITY_GROUP_GONE_CODES) => {
                    trace!("Security group '{}' is already gone", sg.id)
                }
                Err(e) => {
                    return Err(e).context(error::AwsSnafu {
                        operation: format!("delete security group '{}'", sg.id),
                    })
                }
            }
        }

        self.scope.network_mut().security_groups.clear();
        Ok(())
    }

    /// Security groups tagged for the cluster, in the cluster VPC when it is known.
    async fn describe_cluster_security_groups(&self) -> Result<Vec<SecurityGroupInfo>> {
        let vpc_id = &self.scope.vpc().id;
        let mut filters = vec![filter::cluster(self.scope.name())];
        if !vpc_id.is_empty() {
            filters.push(filter::vpc(vpc_id));
        }
        self.ec2
            .describe_security_groups(&filters)
            .await
            .context(error::AwsSnafu {
                operation: "describe security groups",
            })
    }

    async fn describe_security_groups_by_name(&self) -> Result<HashMap<String, SecurityGroupInfo>> {
        Ok(self
            .describe_cluster_security_groups()
            .await?
            .into_iter()
            .map(|sg| (sg.name.clone(), sg))
            .collect())
    }
}
