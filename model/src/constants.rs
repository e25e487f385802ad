/// Helper macro to avoid retyping the base domain-like name of the provider when creating further
/// string constants from it. When given no parameters, this returns the base domain-like name of
/// the provider. When given a string literal parameter it adds `/parameter` to the end.
macro_rules! capa {
    () => {
        "sigs.k8s.io/cluster-api-provider-aws"
    };
    ($s:literal) => {
        concat!(capa!(), "/", $s)
    };
}

// Tag keys
pub const TAG_PROVIDER_PREFIX: &str = capa!();
pub const TAG_PROVIDER_MANAGED: &str = capa!("managed");
pub const TAG_PROVIDER_ROLE: &str = capa!("role");
pub const TAG_NAME: &str = "Name";
/// The ownership key is this prefix followed by the cluster name.
pub const TAG_CLUSTER_PREFIX: &str = "kubernetes.io/cluster/";

// Tag values
pub const TAG_VALUE_TRUE: &str = "true";
pub const ROLE_API_SERVER: &str = "apiserver";
pub const ROLE_BASTION: &str = "bastion";
pub const ROLE_COMMON: &str = "common";

// Network defaults
pub const DEFAULT_VPC_CIDR: &str = "10.0.0.0/16";
pub const DEFAULT_PRIVATE_SUBNET_CIDR: &str = "10.0.0.0/24";
pub const DEFAULT_PUBLIC_SUBNET_CIDR: &str = "10.0.1.0/24";
pub const ANY_IPV4_CIDR: &str = "0.0.0.0/0";

// Kubernetes ports
pub const API_SERVER_PORT: i32 = 6443;
pub const SSH_PORT: i32 = 22;
pub const ETCD_PORT: i32 = 2379;
pub const ETCD_PEER_PORT: i32 = 2380;
pub const BGP_PORT: i32 = 179;
pub const KUBELET_PORT: i32 = 10250;
pub const NODE_PORT_RANGE_START: i32 = 30000;
pub const NODE_PORT_RANGE_END: i32 = 32767;

// Instance defaults
pub const DEFAULT_SSH_KEY_NAME: &str = "default";
pub const DEFAULT_INSTANCE_TYPE: &str = "t2.medium";
pub const DEFAULT_BASTION_INSTANCE_TYPE: &str = "t2.micro";

// Environment variables
pub const ENV_ACTION: &str = "CAPA_ACTION";
pub const ENV_CLUSTER_FILE: &str = "CAPA_CLUSTER_FILE";
pub const ENV_STATUS_FILE: &str = "CAPA_STATUS_FILE";
pub const ENV_MACHINE_FILE: &str = "CAPA_MACHINE_FILE";
pub const ENV_USERDATA_DIR: &str = "CAPA_USERDATA_DIR";
pub const ENV_ROLE_ARN: &str = "CAPA_ROLE_ARN";

/// Returns the ownership tag key for the cluster, `kubernetes.io/cluster/<name>`.
pub fn cluster_tag_key(cluster_name: &str) -> String {
    format!("{}{}", TAG_CLUSTER_PREFIX, cluster_name)
}
