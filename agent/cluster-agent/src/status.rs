/*!

The agent reads the desired cluster and machine documents and writes what it discovered back
through a [`StatusClient`]. The discovered status is only a cache between runs; AWS stays the
authority and is described again on every reconcile.

!*/

use crate::bootstrap::BootstrapData;
use crate::error::{self, Result};
use async_trait::async_trait;
use capa_cloud::StaticUserData;
use capa_model::{Cluster, ClusterStatus, Machine, MachineStatus};
use log::{debug, trace};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// The user data file names inside the user data directory.
const USERDATA_CONTROL_PLANE: &str = "controlplane";
const USERDATA_NODE: &str = "node";
const USERDATA_BASTION: &str = "bastion";

/// Everything the agent has discovered about a cluster and its machines.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AgentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) cluster: Option<ClusterStatus>,
    /// Keyed by machine name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) machines: BTreeMap<String, MachineStatus>,
}

/// Read desired spec, write discovered status.
#[async_trait]
pub(crate) trait StatusClient: Send + Sync {
    async fn get_cluster(&self) -> Result<Cluster>;

    async fn get_machine(&self) -> Result<Option<Machine>>;

    async fn get_user_data(&self) -> Result<StaticUserData>;

    /// The status written by the previous run, or an empty one on the first run.
    async fn get_status(&self) -> Result<AgentStatus>;

    async fn send_status(&self, status: &AgentStatus) -> Result<()>;
}

/// A [`StatusClient`] backed by local files. Documents may be YAML or JSON; the status is written
/// as JSON when the status file name ends in `.json` and as YAML otherwise.
#[derive(Clone, Debug)]
pub(crate) struct FileStatusClient {
    cluster_file: PathBuf,
    status_file: PathBuf,
    machine_file: Option<PathBuf>,
    userdata_dir: Option<PathBuf>,
}

impl FileStatusClient {
    pub(crate) fn new(bootstrap: &BootstrapData) -> Self {
        Self {
            cluster_file: bootstrap.cluster_file.clone(),
            status_file: bootstrap.status_file.clone(),
            machine_file: bootstrap.machine_file.clone(),
            userdata_dir: bootstrap.userdata_dir.clone(),
        }
    }
}

#[async_trait]
impl StatusClient for FileStatusClient {
    async fn get_cluster(&self) -> Result<Cluster> {
        read_document(&self.cluster_file).await
    }

    async fn get_machine(&self) -> Result<Option<Machine>> {
        match &self.machine_file {
            Some(path) => Ok(Some(read_document(path).await?)),
            None => Ok(None),
        }
    }

    async fn get_user_data(&self) -> Result<StaticUserData> {
        let dir = match &self.userdata_dir {
            Some(dir) => dir,
            None => return Ok(StaticUserData::default()),
        };
        Ok(StaticUserData {
            control_plane: read_optional(&dir.join(USERDATA_CONTROL_PLANE)).await?,
            node: read_optional(&dir.join(USERDATA_NODE)).await?,
            bastion: read_optional(&dir.join(USERDATA_BASTION)).await?,
        })
    }

    async fn get_status(&self) -> Result<AgentStatus> {
        match read_optional(&self.status_file).await? {
            Some(content) => serde_yaml::from_str(&content).context(error::ParseSnafu {
                path: &self.status_file,
            }),
            None => {
                debug!("No status at '{}'", self.status_file.display());
                Ok(AgentStatus::default())
            }
        }
    }

    async fn send_status(&self, status: &AgentStatus) -> Result<()> {
        let content = if self.status_file.extension().map_or(false, |ext| ext == "json") {
            serde_json::to_string_pretty(status).context(error::SerializeJsonSnafu)?
        } else {
            serde_yaml::to_string(status).context(error::SerializeYamlSnafu)?
        };
        tokio::fs::write(&self.status_file, content)
            .await
            .context(error::WriteSnafu {
                path: &self.status_file,
            })?;
        trace!("Wrote status to '{}'", self.status_file.display());
        Ok(())
    }
}

/// YAML is a superset of JSON, so one parser reads both.
async fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .context(error::ReadSnafu { path })?;
    serde_yaml::from_str(&content).context(error::ParseSnafu { path })
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context(error::ReadSnafu { path }),
    }
}
