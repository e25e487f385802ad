/*!

User data for new instances. Rendering the cloud-init documents is up to the caller through
[`UserDataProvider`]; this module only decides what a provider is given and how the result is put
on the wire: gzip compressed, then base64 encoded.

!*/

use crate::error::{self, Result};
use capa_model::{KeyPair, MachineRole};
use flate2::write::GzEncoder;
use flate2::Compression;
use snafu::ResultExt;
use std::io::Write;

/// What a provider knows about the machine it renders user data for.
#[derive(Clone, Debug)]
pub struct MachineUserDataInput<'a> {
    pub cluster_name: &'a str,
    pub machine_name: &'a str,
    pub role: MachineRole,
    /// The DNS name of the API server load balancer.
    pub api_server_address: &'a str,
    /// Only present for control plane machines.
    pub ca_key_pair: Option<&'a KeyPair>,
}

/// Produces the raw (unencoded) user data of instances. `None` launches the instance without.
pub trait UserDataProvider: Send + Sync {
    fn machine(&self, input: &MachineUserDataInput<'_>) -> Result<Option<String>>;
    fn bastion(&self, cluster_name: &str) -> Result<Option<String>>;
}

/// Pre-rendered user data, one document per role.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StaticUserData {
    pub control_plane: Option<String>,
    pub node: Option<String>,
    pub bastion: Option<String>,
}

impl UserDataProvider for StaticUserData {
    fn machine(&self, input: &MachineUserDataInput<'_>) -> Result<Option<String>> {
        Ok(match input.role {
            MachineRole::ControlPlane => self.control_plane.clone(),
            MachineRole::Node => self.node.clone(),
        })
    }

    fn bastion(&self, _cluster_name: &str) -> Result<Option<String>> {
        Ok(self.bastion.clone())
    }
}

/// Compresses and encodes `raw` for `RunInstances`.
pub fn encode(raw: &str) -> Result<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(raw.as_bytes())
        .context(error::CompressUserDataSnafu)?;
    let compressed = encoder.finish().context(error::CompressUserDataSnafu)?;
    Ok(base64::encode(compressed))
}
