//! AWS error codes that the reconcilers act on, and the error type returned by the AWS capability
//! traits.

use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_smithy_types::error::operation::BuildError;
use std::fmt::{Debug, Display, Formatter};

pub const AUTH_FAILURE: &str = "AuthFailure";
pub const DEPENDENCY_VIOLATION: &str = "DependencyViolation";
pub const GATEWAY_NOT_FOUND: &str = "InvalidGatewayID.NotFound";
pub const GROUP_NOT_FOUND: &str = "InvalidGroup.NotFound";
pub const IGW_NOT_FOUND: &str = "InvalidInternetGatewayID.NotFound";
pub const INSTANCE_NOT_FOUND: &str = "InvalidInstanceID.NotFound";
pub const IP_ADDRESS_IN_USE: &str = "InvalidIPAddress.InUse";
pub const LOAD_BALANCER_NOT_FOUND: &str = "LoadBalancerNotFound";
pub const NAT_GATEWAY_NOT_FOUND: &str = "NatGatewayNotFound";
pub const NAT_GATEWAY_MALFORMED: &str = "InvalidNatGatewayID.NotFound";
pub const PERMISSION_NOT_FOUND: &str = "InvalidPermission.NotFound";
pub const ROUTE_TABLE_NOT_FOUND: &str = "InvalidRouteTableID.NotFound";
pub const SUBNET_NOT_FOUND: &str = "InvalidSubnetID.NotFound";
pub const VPC_NOT_FOUND: &str = "InvalidVpcID.NotFound";
pub const ALLOCATION_NOT_FOUND: &str = "InvalidAllocationID.NotFound";
pub const ASSOCIATION_NOT_FOUND: &str = "InvalidAssociationID.NotFound";

/// Codes that mean the resource does not exist, or does not exist yet.
pub const NOT_FOUND_CODES: &[&str] = &[
    ALLOCATION_NOT_FOUND,
    ASSOCIATION_NOT_FOUND,
    GATEWAY_NOT_FOUND,
    GROUP_NOT_FOUND,
    IGW_NOT_FOUND,
    INSTANCE_NOT_FOUND,
    LOAD_BALANCER_NOT_FOUND,
    NAT_GATEWAY_MALFORMED,
    NAT_GATEWAY_NOT_FOUND,
    ROUTE_TABLE_NOT_FOUND,
    SUBNET_NOT_FOUND,
    VPC_NOT_FOUND,
];

/// Codes returned while tearing down a security group whose rules or group are already gone.
pub const SECURITY_GROUP_GONE_CODES: &[&str] = &[GROUP_NOT_FOUND, PERMISSION_NOT_FOUND];

/// Codes seen while releasing an address that AWS has not finished detaching.
pub const RELEASE_ADDRESS_RETRYABLE_CODES: &[&str] = &[AUTH_FAILURE, IP_ADDRESS_IN_USE];

pub fn is_not_found_code(code: &str) -> bool {
    NOT_FOUND_CODES.contains(&code)
}

/// An error returned by an AWS API call, reduced to the code and message that callers act on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApiError {
    code: Option<String>,
    message: String,
}

impl ApiError {
    pub fn new<S1, S2>(code: Option<S1>, message: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            code: code.map(Into::into),
            message: message.into(),
        }
    }

    /// An error carrying an AWS error code.
    pub fn with_code<S1, S2>(code: S1, message: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self::new(Some(code), message)
    }

    /// An error that did not come back from AWS, e.g. a request that could not be built.
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::new(None::<String>, message)
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_not_found(&self) -> bool {
        self.code().map(is_not_found_code).unwrap_or(false)
    }

    pub fn has_code(&self, codes: &[&str]) -> bool {
        self.code().map(|c| codes.contains(&c)).unwrap_or(false)
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{}: {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ApiError {}

impl<E, R> From<SdkError<E, R>> for ApiError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    fn from(e: SdkError<E, R>) -> Self {
        let message = match e.message() {
            Some(message) => message.to_string(),
            None => DisplayErrorContext(&e).to_string(),
        };
        Self::new(e.code(), message)
    }
}

impl From<BuildError> for ApiError {
    fn from(e: BuildError) -> Self {
        Self::other(format!("Unable to build request: {}", e))
    }
}
