use crate::tags::Tags;
use serde::{Deserialize, Serialize};
use serde_plain::{derive_display_from_serialize, derive_fromstr_from_deserialize};
use std::time::Duration;

/// A classic load balancer. The cluster keeps one in front of the API server.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassicElb {
    pub name: String,
    #[serde(default)]
    pub dns_name: String,
    pub scheme: ClassicElbScheme,
    #[serde(default)]
    pub subnet_ids: Vec<String>,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    #[serde(default)]
    pub listeners: Vec<ClassicElbListener>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<ClassicElbHealthCheck>,
    #[serde(default)]
    pub attributes: ClassicElbAttributes,
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
}

/// The serialized values are the strings AWS expects on the wire.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum ClassicElbScheme {
    #[default]
    #[serde(rename = "Internet-facing")]
    InternetFacing,
    #[serde(rename = "internal")]
    Internal,
}

derive_display_from_serialize!(ClassicElbScheme);
derive_fromstr_from_deserialize!(ClassicElbScheme);

impl ClassicElbScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassicElbScheme::InternetFacing => "Internet-facing",
            ClassicElbScheme::Internal => "internal",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClassicElbProtocol {
    Tcp,
    Ssl,
    Http,
    Https,
}

derive_display_from_serialize!(ClassicElbProtocol);
derive_fromstr_from_deserialize!(ClassicElbProtocol);

impl ClassicElbProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassicElbProtocol::Tcp => "TCP",
            ClassicElbProtocol::Ssl => "SSL",
            ClassicElbProtocol::Http => "HTTP",
            ClassicElbProtocol::Https => "HTTPS",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassicElbListener {
    pub protocol: ClassicElbProtocol,
    pub port: i32,
    pub instance_protocol: ClassicElbProtocol,
    pub instance_port: i32,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassicElbHealthCheck {
    /// For example `TCP:6443`.
    pub target: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub healthy_threshold: i32,
    pub unhealthy_threshold: i32,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassicElbAttributes {
    #[serde(default)]
    pub idle_timeout: Duration,
}
