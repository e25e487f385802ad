use crate::instance::{Instance, InstanceState};
use crate::network::{Network, NetworkSpec};
use crate::tags::Tags;
use serde::{Deserialize, Serialize};
use serde_plain::derive_display_from_serialize;

/// A cluster document: what the user declared and what has been discovered in AWS so far.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub spec: ClusterSpec,
    #[serde(default)]
    pub status: ClusterStatus,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub region: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_name: Option<String>,

    #[serde(default)]
    pub network: NetworkSpec,

    /// The certificate authority handed to control plane machines through their user data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_key_pair: Option<KeyPair>,

    /// Tags added to every resource created for the cluster.
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub additional_tags: Tags,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default)]
    pub network: Network,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bastion: Option<Instance>,

    #[serde(default)]
    pub ready: bool,
}

/// PEM encoded certificate and private key.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    #[serde(default)]
    pub cert: String,
    #[serde(default)]
    pub key: String,
}

impl KeyPair {
    pub fn has_cert_and_key(&self) -> bool {
        !self.cert.is_empty() && !self.key.is_empty()
    }
}

/// The role a machine plays in the cluster.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MachineRole {
    #[serde(rename = "controlplane")]
    ControlPlane,
    #[serde(rename = "node")]
    Node,
}

serde_plain::derive_fromstr_from_deserialize!(MachineRole, |e| -> crate::Error {
    crate::error::OpaqueError::SerdePlain { source: e }.into()
});
derive_display_from_serialize!(MachineRole);

impl MachineRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineRole::ControlPlane => "controlplane",
            MachineRole::Node => "node",
        }
    }
}

/// A machine document.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub role: MachineRole,
    #[serde(default)]
    pub spec: MachineSpec,
    #[serde(default)]
    pub status: MachineStatus,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// An explicit AMI. When absent the region default is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ami: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,

    /// An explicit subnet. When absent the first private subnet is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_instance_profile: Option<String>,

    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub additional_tags: Tags,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_security_groups: Vec<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_state: Option<InstanceState>,

    /// The additional tags applied by the last update, so that removed ones can be taken off.
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub last_applied_tags: Tags,
}

/// What the agent should do with the cluster.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterAction {
    Reconcile,
    Delete,
}

serde_plain::derive_fromstr_from_deserialize!(ClusterAction, |e| -> crate::Error {
    crate::error::OpaqueError::SerdePlain { source: e }.into()
});
derive_display_from_serialize!(ClusterAction);
