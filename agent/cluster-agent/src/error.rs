use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum Error {
    #[snafu(display("Invalid action '{}': {}", action, source))]
    Action {
        action: String,
        source: capa_model::Error,
    },

    #[snafu(display("Unable to configure AWS: {}", source))]
    AwsConfig { source: agent_utils::Error },

    #[snafu(display("Unable to delete cluster '{}': {}", name, source))]
    ClusterDelete {
        name: String,
        source: capa_cloud::Error,
    },

    #[snafu(display("Unable to reconcile cluster '{}': {}", name, source))]
    ClusterReconcile {
        name: String,
        source: capa_cloud::Error,
    },

    #[snafu(display("Unable to read environment variable '{}'", key))]
    EnvRead { key: String },

    #[snafu(display("Unable to {} machine '{}': {}", op, name, source))]
    Machine {
        op: String,
        name: String,
        source: capa_cloud::Error,
    },

    #[snafu(display(
        "Machine '{}' is in namespace '{}' but its cluster is in '{}'",
        name,
        namespace,
        cluster_namespace
    ))]
    MachineNamespace {
        name: String,
        namespace: String,
        cluster_namespace: String,
    },

    #[snafu(display("Unable to parse '{}': {}", path.display(), source))]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[snafu(display("Unable to read '{}': {}", path.display(), source))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Unable to serialize status: {}", source))]
    SerializeJson { source: serde_json::Error },

    #[snafu(display("Unable to serialize status: {}", source))]
    SerializeYaml { source: serde_yaml::Error },

    #[snafu(display("Unable to write '{}': {}", path.display(), source))]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub(crate) type Result<T> = std::result::Result<T, Error>;
