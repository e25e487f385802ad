use crate::awserrors::ApiError;
use snafu::Snafu;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Failed to {}: {}", operation, source))]
    Aws {
        operation: String,
        source: ApiError,
    },

    #[snafu(display("Unable to compress user data: {}", source))]
    CompressUserData { source: std::io::Error },

    #[snafu(display("Conflict: {}", message))]
    Conflict { message: String },

    #[snafu(display("Failed dependency: {}", message))]
    FailedDependency { message: String },

    #[snafu(display(
        "NAT gateway '{}' is in failed state: {} - {}",
        id,
        code.as_deref().unwrap_or(""),
        message.as_deref().unwrap_or("")
    ))]
    NatGatewayFailed {
        id: String,
        code: Option<String>,
        message: Option<String>,
    },

    #[snafu(display(
        "No nat gateways available in '{}' for private subnet '{}'",
        zone,
        subnet_id
    ))]
    NoNatGateway { zone: String, subnet_id: String },

    #[snafu(display("{} not found", what))]
    NotFound { what: String },

    #[snafu(display("Subnet '{}' is public and cannot route through a NAT gateway", subnet_id))]
    PublicSubnetNat { subnet_id: String },

    #[snafu(display("Timed out after {:?} waiting for {}", timeout, what))]
    Timeout { what: String, timeout: Duration },
}

impl Error {
    /// The AWS error code, if the error came from AWS.
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Aws { source, .. } => source.code(),
            _ => None,
        }
    }

    /// A describe call found nothing, or AWS answered with a not-found code.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Aws { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    pub fn is_failed_dependency(&self) -> bool {
        matches!(self, Error::FailedDependency { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Whether the error carries one of `codes`.
    pub fn has_code(&self, codes: &[&str]) -> bool {
        self.code().map(|c| codes.contains(&c)).unwrap_or(false)
    }
}
