/*!

The `bootstrap` module reads what the agent needs to know about its job from the container
environment.

!*/

use crate::error::{self, Result};
use capa_model::constants::{
    ENV_ACTION, ENV_CLUSTER_FILE, ENV_MACHINE_FILE, ENV_ROLE_ARN, ENV_STATUS_FILE,
    ENV_USERDATA_DIR,
};
use capa_model::ClusterAction;
use snafu::{OptionExt, ResultExt};
use std::path::PathBuf;
use std::str::FromStr;

/// Data that is read from the agent's container environment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct BootstrapData {
    pub(crate) action: ClusterAction,
    /// The desired cluster document.
    pub(crate) cluster_file: PathBuf,
    /// Where the discovered status is written, and read back from on the next run.
    pub(crate) status_file: PathBuf,
    /// A machine of the cluster to act on after the cluster itself.
    pub(crate) machine_file: Option<PathBuf>,
    /// Pre-rendered user data, one file per role.
    pub(crate) userdata_dir: Option<PathBuf>,
    pub(crate) role_arn: Option<String>,
}

impl BootstrapData {
    pub(crate) fn from_env() -> Result<BootstrapData> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<BootstrapData>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty());
        let required = |key: &'static str| var(key).context(error::EnvReadSnafu { key });

        let action = required(ENV_ACTION)?;
        Ok(BootstrapData {
            action: ClusterAction::from_str(&action).context(error::ActionSnafu { action })?,
            cluster_file: required(ENV_CLUSTER_FILE)?.into(),
            status_file: required(ENV_STATUS_FILE)?.into(),
            machine_file: var(ENV_MACHINE_FILE).map(PathBuf::from),
            userdata_dir: var(ENV_USERDATA_DIR).map(PathBuf::from),
            role_arn: var(ENV_ROLE_ARN),
        })
    }
}
