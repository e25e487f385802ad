/*!

The EC2 surface that the reconcilers depend on. [`Ec2Api`] speaks in the types of this crate and of
`capa-model`, so that the reconcilers can be driven by an in-memory implementation in tests.
[`SdkEc2`] implements it on top of `aws-sdk-ec2`.

!*/

mod sdk;

pub use sdk::SdkEc2;

use crate::awserrors::ApiError;
use crate::filter::Filter;
use capa_model::{IngressRule, Instance, Tags};

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VpcInfo {
    pub id: String,
    pub cidr_block: String,
    pub state: String,
    pub tags: Tags,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SubnetInfo {
    pub id: String,
    pub vpc_id: String,
    pub cidr_block: String,
    pub availability_zone: String,
    pub map_public_ip_on_launch: bool,
    pub state: String,
    pub tags: Tags,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InternetGatewayInfo {
    pub id: String,
    /// The IDs of the VPCs the gateway is attached to.
    pub attached_vpc_ids: Vec<String>,
    pub tags: Tags,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AddressInfo {
    pub allocation_id: String,
    pub public_ip: String,
    pub association_id: Option<String>,
    pub tags: Tags,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NatGatewayInfo {
    pub id: String,
    pub subnet_id: String,
    pub vpc_id: String,
    pub state: String,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub tags: Tags,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RouteTableAssociation {
    pub id: String,
    pub subnet_id: Option<String>,
    pub main: bool,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Route {
    pub destination_cidr_block: String,
    pub gateway_id: Option<String>,
    pub nat_gateway_id: Option<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RouteTableInfo {
    pub id: String,
    pub vpc_id: String,
    pub associations: Vec<RouteTableAssociation>,
    pub routes: Vec<Route>,
    pub tags: Tags,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SecurityGroupInfo {
    pub id: String,
    pub name: String,
    pub vpc_id: String,
    pub ingress_rules: Vec<IngressRule>,
    pub tags: Tags,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ImageInfo {
    pub id: String,
    pub name: String,
    pub creation_date: String,
}

/// Everything needed for a single `RunInstances` call.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunInstancesRequest {
    pub image_id: String,
    pub instance_type: String,
    pub subnet_id: String,
    pub key_name: Option<String>,
    pub security_group_ids: Vec<String>,
    /// Already encoded for the wire.
    pub user_data: Option<String>,
    pub iam_instance_profile: Option<String>,
    pub tags: Tags,
}

/// The EC2 calls made by the reconcilers.
#[async_trait::async_trait]
pub trait Ec2Api: Send + Sync {
    /// The names of the zones in the region that are available.
    async fn describe_availability_zones(&self) -> ApiResult<Vec<String>>;

    async fn describe_vpcs(&self, ids: &[String], filters: &[Filter]) -> ApiResult<Vec<VpcInfo>>;
    async fn create_vpc(&self, cidr_block: &str) -> ApiResult<VpcInfo>;
    async fn delete_vpc(&self, vpc_id: &str) -> ApiResult<()>;

    async fn describe_subnets(&self, filters: &[Filter]) -> ApiResult<Vec<SubnetInfo>>;
    async fn create_subnet(
        &self,
        vpc_id: &str,
        cidr_block: &str,
        availability_zone: &str,
    ) -> ApiResult<SubnetInfo>;
    async fn modify_subnet_map_public_ip(&self, subnet_id: &str, value: bool) -> ApiResult<()>;
    async fn delete_subnet(&self, subnet_id: &str) -> ApiResult<()>;

    async fn describe_internet_gateways(
        &self,
        filters: &[Filter],
    ) -> ApiResult<Vec<InternetGatewayInfo>>;
    async fn create_internet_gateway(&self) -> ApiResult<InternetGatewayInfo>;
    async fn attach_internet_gateway(&self, igw_id: &str, vpc_id: &str) -> ApiResult<()>;
    async fn detach_internet_gateway(&self, igw_id: &str, vpc_id: &str) -> ApiResult<()>;
    async fn delete_internet_gateway(&self, igw_id: &str) -> ApiResult<()>;

    async fn describe_addresses(&self, filters: &[Filter]) -> ApiResult<Vec<AddressInfo>>;
    async fn allocate_address(&self) -> ApiResult<AddressInfo>;
    async fn disassociate_address(&self, association_id: &str) -> ApiResult<()>;
    async fn release_address(&self, allocation_id: &str) -> ApiResult<()>;

    /// Returns every page.
    async fn describe_nat_gateways(&self, filters: &[Filter]) -> ApiResult<Vec<NatGatewayInfo>>;
    async fn create_nat_gateway(
        &self,
        subnet_id: &str,
        allocation_id: &str,
    ) -> ApiResult<NatGatewayInfo>;
    async fn delete_nat_gateway(&self, nat_gateway_id: &str) -> ApiResult<()>;

    async fn describe_route_tables(&self, filters: &[Filter]) -> ApiResult<Vec<RouteTableInfo>>;
    async fn create_route_table(&self, vpc_id: &str) -> ApiResult<RouteTableInfo>;
    async fn create_route(&self, route_table_id: &str, route: &Route) -> ApiResult<()>;
    /// Returns the association ID.
    async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> ApiResult<String>;
    async fn disassociate_route_table(&self, association_id: &str) -> ApiResult<()>;
    async fn delete_route_table(&self, route_table_id: &str) -> ApiResult<()>;

    async fn describe_security_groups(
        &self,
        filters: &[Filter],
    ) -> ApiResult<Vec<SecurityGroupInfo>>;
    /// Returns the group ID.
    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
    ) -> ApiResult<String>;
    async fn authorize_security_group_ingress(
        &self,
        group_id: &str,
        rules: &[IngressRule],
    ) -> ApiResult<()>;
    async fn revoke_security_group_ingress(
        &self,
        group_id: &str,
        rules: &[IngressRule],
    ) -> ApiResult<()>;
    async fn delete_security_group(&self, group_id: &str) -> ApiResult<()>;

    async fn describe_instances(
        &self,
        ids: &[String],
        filters: &[Filter],
    ) -> ApiResult<Vec<Instance>>;
    async fn run_instances(&self, request: &RunInstancesRequest) -> ApiResult<Instance>;
    async fn terminate_instances(&self, instance_ids: &[String]) -> ApiResult<()>;
    async fn modify_instance_security_groups(
        &self,
        instance_id: &str,
        group_ids: &[String],
    ) -> ApiResult<()>;

    async fn describe_images(
        &self,
        owners: &[String],
        filters: &[Filter],
    ) -> ApiResult<Vec<ImageInfo>>;

    async fn create_tags(&self, resource_ids: &[String], tags: &Tags) -> ApiResult<()>;
    /// Deletes the keys of `tags`. Values are ignored.
    async fn delete_tags(&self, resource_ids: &[String], tags: &Tags) -> ApiResult<()>;
}
