use super::{
    AddressInfo, ApiResult, Ec2Api, ImageInfo, InternetGatewayInfo, NatGatewayInfo, Route,
    RouteTableAssociation, RouteTableInfo, RunInstancesRequest, SecurityGroupInfo, SubnetInfo,
    VpcInfo,
};
use crate::awserrors::ApiError;
use crate::filter::{self, Filter};
use aws_config::SdkConfig;
use aws_sdk_ec2::types::{
    AttributeBooleanValue, DomainType, IamInstanceProfileSpecification, InstanceType,
    IpPermission, IpRange, ResourceType, Tag, TagSpecification, UserIdGroupPair,
};
use capa_model::{IngressRule, Instance, InstanceState, SecurityGroupProtocol, Tags};
use log::{trace, warn};
use std::str::FromStr;

/// [`Ec2Api`] backed by `aws-sdk-ec2`.
#[derive(Clone, Debug)]
pub struct SdkEc2 {
    client: aws_sdk_ec2::Client,
}

impl SdkEc2 {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_ec2::Client::new(config),
        }
    }

    pub fn from_client(client: aws_sdk_ec2::Client) -> Self {
        Self { client }
    }
}

fn sdk_filters(filters: &[Filter]) -> Option<Vec<aws_sdk_ec2::types::Filter>> {
    Some(
        filters
            .iter()
            .map(|f| {
                aws_sdk_ec2::types::Filter::builder()
                    .name(&f.name)
                    .set_values(Some(f.values.clone()))
                    .build()
            })
            .collect(),
    )
}

fn sdk_tags(tags: &Tags) -> Option<Vec<Tag>> {
    Some(
        tags.iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build())
            .collect(),
    )
}

fn model_tags(tags: Option<Vec<Tag>>) -> Tags {
    tags.unwrap_or_default()
        .into_iter()
        .filter_map(|t| Some((t.key?, t.value.unwrap_or_default())))
        .collect()
}

fn optional_ids(ids: &[String]) -> Option<Vec<String>> {
    if ids.is_empty() {
        None
    } else {
        Some(ids.to_vec())
    }
}

fn missing(what: &str) -> ApiError {
    ApiError::other(format!("The response did not include {}", what))
}

fn vpc_info(vpc: aws_sdk_ec2::types::Vpc) -> VpcInfo {
    VpcInfo {
        id: vpc.vpc_id.unwrap_or_default(),
        cidr_block: vpc.cidr_block.unwrap_or_default(),
        state: vpc.state.map(|s| s.as_str().to_string()).unwrap_or_default(),
        tags: model_tags(vpc.tags),
    }
}

fn subnet_info(subnet: aws_sdk_ec2::types::Subnet) -> SubnetInfo {
    SubnetInfo {
        id: subnet.subnet_id.unwrap_or_default(),
        vpc_id: subnet.vpc_id.unwrap_or_default(),
        cidr_block: subnet.cidr_block.unwrap_or_default(),
        availability_zone: subnet.availability_zone.unwrap_or_default(),
        map_public_ip_on_launch: subnet.map_public_ip_on_launch.unwrap_or_default(),
        state: subnet
            .state
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
        tags: model_tags(subnet.tags),
    }
}

fn internet_gateway_info(igw: aws_sdk_ec2::types::InternetGateway) -> InternetGatewayInfo {
    InternetGatewayInfo {
        id: igw.internet_gateway_id.unwrap_or_default(),
        attached_vpc_ids: igw
            .attachments
            .unwrap_or_default()
            .into_iter()
            .filter_map(|a| a.vpc_id)
            .collect(),
        tags: model_tags(igw.tags),
    }
}

fn nat_gateway_info(ngw: aws_sdk_ec2::types::NatGateway) -> NatGatewayInfo {
    NatGatewayInfo {
        id: ngw.nat_gateway_id.unwrap_or_default(),
        subnet_id: ngw.subnet_id.unwrap_or_default(),
        vpc_id: ngw.vpc_id.unwrap_or_default(),
        state: ngw.state.map(|s| s.as_str().to_string()).unwrap_or_default(),
        failure_code: ngw.failure_code,
        failure_message: ngw.failure_message,
        tags: model_tags(ngw.tags),
    }
}

fn route_table_info(rt: aws_sdk_ec2::types::RouteTable) -> RouteTableInfo {
    RouteTableInfo {
        id: rt.route_table_id.unwrap_or_default(),
        vpc_id: rt.vpc_id.unwrap_or_default(),
        associations: rt
            .associations
            .unwrap_or_default()
            .into_iter()
            .map(|a| RouteTableAssociation {
                id: a.route_table_association_id.unwrap_or_default(),
                subnet_id: a.subnet_id,
                main: a.main.unwrap_or_default(),
            })
            .collect(),
        routes: rt
            .routes
            .unwrap_or_default()
            .into_iter()
            .map(|r| Route {
                destination_cidr_block: r.destination_cidr_block.unwrap_or_default(),
                gateway_id: r.gateway_id,
                nat_gateway_id: r.nat_gateway_id,
            })
            .collect(),
        tags: model_tags(rt.tags),
    }
}

/// Converts a rule into the permission AWS expects. Ports are only sent for protocols that have
/// them, and the rule description is repeated on every range and group pair.
pub(crate) fn ip_permission(rule: &IngressRule) -> IpPermission {
    let description = if rule.description.is_empty() {
        None
    } else {
        Some(rule.description.clone())
    };
    let mut builder = IpPermission::builder().ip_protocol(rule.protocol.as_str());
    if rule.protocol.has_ports() {
        builder = builder.from_port(rule.from_port).to_port(rule.to_port);
    }
    for cidr in &rule.cidr_blocks {
        builder = builder.ip_ranges(
            IpRange::builder()
                .cidr_ip(cidr)
                .set_description(description.clone())
                .build(),
        );
    }
    for group_id in &rule.source_security_group_ids {
        builder = builder.user_id_group_pairs(
            UserIdGroupPair::builder()
                .group_id(group_id)
                .set_description(description.clone())
                .build(),
        );
    }
    builder.build()
}

/// The inverse of [`ip_permission`]. Permissions with a protocol we do not model are skipped.
pub(crate) fn ingress_rule(permission: IpPermission) -> Option<IngressRule> {
    let protocol_str = permission.ip_protocol.as_deref().unwrap_or("-1");
    let protocol = match SecurityGroupProtocol::from_str(protocol_str) {
        Ok(protocol) => protocol,
        Err(_) => {
            warn!("Skipping ingress permission with protocol '{}'", protocol_str);
            return None;
        }
    };
    let mut rule = IngressRule {
        description: String::new(),
        protocol,
        from_port: 0,
        to_port: 0,
        cidr_blocks: Vec::new(),
        source_security_group_ids: Vec::new(),
    };
    if protocol.has_ports() {
        rule.from_port = permission.from_port.unwrap_or_default();
        rule.to_port = permission.to_port.unwrap_or_default();
    }
    for range in permission.ip_ranges.unwrap_or_default() {
        if let Some(description) = range.description {
            rule.description = description;
        }
        if let Some(cidr) = range.cidr_ip {
            rule.cidr_blocks.push(cidr);
        }
    }
    for pair in permission.user_id_group_pairs.unwrap_or_default() {
        if let Some(description) = pair.description {
            rule.description = description;
        }
        if let Some(group_id) = pair.group_id {
            rule.source_security_group_ids.push(group_id);
        }
    }
    Some(rule)
}

/// Converts an SDK instance. The IAM profile name is taken from the profile ARN.
fn instance(instance: aws_sdk_ec2::types::Instance) -> ApiResult<Instance> {
    let id = instance
        .instance_id
        .ok_or_else(|| missing("an instance id"))?;
    let state_name = instance
        .state
        .and_then(|s| s.name)
        .map(|n| n.as_str().to_string())
        .unwrap_or_default();
    let state = InstanceState::from_str(&state_name).map_err(|_| {
        ApiError::other(format!(
            "Instance '{}' is in unknown state '{}'",
            id, state_name
        ))
    })?;
    Ok(Instance {
        id,
        state,
        instance_type: instance
            .instance_type
            .map(|t| t.as_str().to_string())
            .unwrap_or_default(),
        subnet_id: instance.subnet_id.unwrap_or_default(),
        image_id: instance.image_id.unwrap_or_default(),
        key_name: instance.key_name,
        security_group_ids: instance
            .security_groups
            .unwrap_or_default()
            .into_iter()
            .filter_map(|g| g.group_id)
            .collect(),
        user_data: None,
        iam_profile: instance
            .iam_instance_profile
            .and_then(|p| p.arn)
            .and_then(|arn| {
                arn.split_once("instance-profile/")
                    .map(|(_, name)| name.to_string())
            }),
        private_ip: instance.private_ip_address,
        public_ip: instance.public_ip_address,
        tags: model_tags(instance.tags),
    })
}

#[async_trait::async_trait]
impl Ec2Api for SdkEc2 {
    async fn describe_availability_zones(&self) -> ApiResult<Vec<String>> {
        let output = self
            .client
            .describe_availability_zones()
            .set_filters(sdk_filters(&[filter::zone_available()]))
            .send()
            .await?;
        Ok(output
            .availability_zones
            .unwrap_or_default()
            .into_iter()
            .filter_map(|z| z.zone_name)
            .collect())
    }

    async fn describe_vpcs(&self, ids: &[String], filters: &[Filter]) -> ApiResult<Vec<VpcInfo>> {
        let output = self
            .client
            .describe_vpcs()
            .set_vpc_ids(optional_ids(ids))
            .set_filters(sdk_filters(filters))
            .send()
            .await?;
        Ok(output
            .vpcs
            .unwrap_or_default()
            .into_iter()
            .map(vpc_info)
            .collect())
    }

    async fn create_vpc(&self, cidr_block: &str) -> ApiResult<VpcInfo> {
        let output = self.client.create_vpc().cidr_block(cidr_block).send().await?;
        output.vpc.map(vpc_info).ok_or_else(|| missing("a vpc"))
    }

    async fn delete_vpc(&self, vpc_id: &str) -> ApiResult<()> {
        self.client.delete_vpc().vpc_id(vpc_id).send().await?;
        Ok(())
    }

    async fn describe_subnets(&self, filters: &[Filter]) -> ApiResult<Vec<SubnetInfo>> {
        let output = self
            .client
            .describe_subnets()
            .set_filters(sdk_filters(filters))
            .send()
            .await?;
        Ok(output
            .subnets
            .unwrap_or_default()
            .into_iter()
            .map(subnet_info)
            .collect())
    }

    async fn create_subnet(
        &self,
        vpc_id: &str,
        cidr_block: &str,
        availability_zone: &str,
    ) -> ApiResult<SubnetInfo> {
        let output = self
            .client
            .create_subnet()
            .vpc_id(vpc_id)
            .cidr_block(cidr_block)
            .availability_zone(availability_zone)
            .send()
            .await?;
        output.subnet.map(subnet_info).ok_or_else(|| missing("a subnet"))
    }

    async fn modify_subnet_map_public_ip(&self, subnet_id: &str, value: bool) -> ApiResult<()> {
        self.client
            .modify_subnet_attribute()
            .subnet_id(subnet_id)
            .map_public_ip_on_launch(AttributeBooleanValue::builder().value(value).build())
            .send()
            .await?;
        Ok(())
    }

    async fn delete_subnet(&self, subnet_id: &str) -> ApiResult<()> {
        self.client
            .delete_subnet()
            .subnet_id(subnet_id)
            .send()
            .await?;
        Ok(())
    }

    async fn describe_internet_gateways(
        &self,
        filters: &[Filter],
    ) -> ApiResult<Vec<InternetGatewayInfo>> {
        let output = self
            .client
            .describe_internet_gateways()
            .set_filters(sdk_filters(filters))
            .send()
            .await?;
        Ok(output
            .internet_gateways
            .unwrap_or_default()
            .into_iter()
            .map(internet_gateway_info)
            .collect())
    }

    async fn create_internet_gateway(&self) -> ApiResult<InternetGatewayInfo> {
        let output = self.client.create_internet_gateway().send().await?;
        output
            .internet_gateway
            .map(internet_gateway_info)
            .ok_or_else(|| missing("an internet gateway"))
    }

    async fn attach_internet_gateway(&self, igw_id: &str, vpc_id: &str) -> ApiResult<()> {
        self.client
            .attach_internet_gateway()
            .internet_gateway_id(igw_id)
            .vpc_id(vpc_id)
            .send()
            .await?;
        Ok(())
    }

    async fn detach_internet_gateway(&self, igw_id: &str, vpc_id: &str) -> ApiResult<()> {
        self.client
            .detach_internet_gateway()
            .internet_gateway_id(igw_id)
            .vpc_id(vpc_id)
            .send()
            .await?;
        Ok(())
    }

    async fn delete_internet_gateway(&self, igw_id: &str) -> ApiResult<()> {
        self.client
            .delete_internet_gateway()
            .internet_gateway_id(igw_id)
            .send()
            .await?;
        Ok(())
    }

    async fn describe_addresses(&self, filters: &[Filter]) -> ApiResult<Vec<AddressInfo>> {
        let output = self
            .client
            .describe_addresses()
            .set_filters(sdk_filters(filters))
            .send()
            .await?;
        Ok(output
            .addresses
            .unwrap_or_default()
            .into_iter()
            .map(|a| AddressInfo {
                allocation_id: a.allocation_id.unwrap_or_default(),
                public_ip: a.public_ip.unwrap_or_default(),
                association_id: a.association_id,
                tags: model_tags(a.tags),
            })
            .collect())
    }

    async fn allocate_address(&self) -> ApiResult<AddressInfo> {
        let output = self
            .client
            .allocate_address()
            .domain(DomainType::Vpc)
            .send()
            .await?;
        Ok(AddressInfo {
            allocation_id: output
                .allocation_id
                .ok_or_else(|| missing("an allocation id"))?,
            public_ip: output.public_ip.unwrap_or_default(),
            association_id: None,
            tags: Tags::default(),
        })
    }

    async fn disassociate_address(&self, association_id: &str) -> ApiResult<()> {
        self.client
            .disassociate_address()
            .association_id(association_id)
            .send()
            .await?;
        Ok(())
    }

    async fn release_address(&self, allocation_id: &str) -> ApiResult<()> {
        self.client
            .release_address()
            .allocation_id(allocation_id)
            .send()
            .await?;
        Ok(())
    }

    async fn describe_nat_gateways(&self, filters: &[Filter]) -> ApiResult<Vec<NatGatewayInfo>> {
        let mut pages = self
            .client
            .describe_nat_gateways()
            .set_filter(sdk_filters(filters))
            .into_paginator()
            .send();
        let mut gateways = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page?;
            trace!(
                "Received a page of {} NAT gateways",
                page.nat_gateways.as_ref().map(Vec::len).unwrap_or_default()
            );
            gateways.extend(
                page.nat_gateways
                    .unwrap_or_default()
                    .into_iter()
                    .map(nat_gateway_info),
            );
        }
        Ok(gateways)
    }

    async fn create_nat_gateway(
        &self,
        subnet_id: &str,
        allocation_id: &str,
    ) -> ApiResult<NatGatewayInfo> {
        let output = self
            .client
            .create_nat_gateway()
            .subnet_id(subnet_id)
            .allocation_id(allocation_id)
            .send()
            .await?;
        output
            .nat_gateway
            .map(nat_gateway_info)
            .ok_or_else(|| missing("a nat gateway"))
    }

    async fn delete_nat_gateway(&self, nat_gateway_id: &str) -> ApiResult<()> {
        self.client
            .delete_nat_gateway()
            .nat_gateway_id(nat_gateway_id)
            .send()
            .await?;
        Ok(())
    }

    async fn describe_route_tables(&self, filters: &[Filter]) -> ApiResult<Vec<RouteTableInfo>> {
        let output = self
            .client
            .describe_route_tables()
            .set_filters(sdk_filters(filters))
            .send()
            .await?;
        Ok(output
            .route_tables
            .unwrap_or_default()
            .into_iter()
            .map(route_table_info)
            .collect())
    }

    async fn create_route_table(&self, vpc_id: &str) -> ApiResult<RouteTableInfo> {
        let output = self
            .client
            .create_route_table()
            .vpc_id(vpc_id)
            .send()
            .await?;
        output
            .route_table
            .map(route_table_info)
            .ok_or_else(|| missing("a route table"))
    }

    async fn create_route(&self, route_table_id: &str, route: &Route) -> ApiResult<()> {
        self.client
            .create_route()
            .route_table_id(route_table_id)
            .destination_cidr_block(&route.destination_cidr_block)
            .set_gateway_id(route.gateway_id.clone())
            .set_nat_gateway_id(route.nat_gateway_id.clone())
            .send()
            .await?;
        Ok(())
    }

    async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> ApiResult<String> {
        let output = self
            .client
            .associate_route_table()
            .route_table_id(route_table_id)
            .subnet_id(subnet_id)
            .send()
            .await?;
        output
            .association_id
            .ok_or_else(|| missing("an association id"))
    }

    async fn disassociate_route_table(&self, association_id: &str) -> ApiResult<()> {
        self.client
            .disassociate_route_table()
            .association_id(association_id)
            .send()
            .await?;
        Ok(())
    }

    async fn delete_route_table(&self, route_table_id: &str) -> ApiResult<()> {
        self.client
            .delete_route_table()
            .route_table_id(route_table_id)
            .send()
            .await?;
        Ok(())
    }

    async fn describe_security_groups(
        &self,
        filters: &[Filter],
    ) -> ApiResult<Vec<SecurityGroupInfo>> {
        let output = self
            .client
            .describe_security_groups()
            .set_filters(sdk_filters(filters))
            .send()
            .await?;
        Ok(output
            .security_groups
            .unwrap_or_default()
            .into_iter()
            .map(|sg| SecurityGroupInfo {
                id: sg.group_id.unwrap_or_default(),
                name: sg.group_name.unwrap_or_default(),
                vpc_id: sg.vpc_id.unwrap_or_default(),
                ingress_rules: sg
                    .ip_permissions
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(ingress_rule)
                    .collect(),
                tags: model_tags(sg.tags),
            })
            .collect())
    }

    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
    ) -> ApiResult<String> {
        let output = self
            .client
            .create_security_group()
            .vpc_id(vpc_id)
            .group_name(name)
            .description(description)
            .send()
            .await?;
        output.group_id.ok_or_else(|| missing("a group id"))
    }

    async fn authorize_security_group_ingress(
        &self,
        group_id: &str,
        rules: &[IngressRule],
    ) -> ApiResult<()> {
        self.client
            .authorize_security_group_ingress()
            .group_id(group_id)
            .set_ip_permissions(Some(rules.iter().map(ip_permission).collect()))
            .send()
            .await?;
        Ok(())
    }

    async fn revoke_security_group_ingress(
        &self,
        group_id: &str,
        rules: &[IngressRule],
    ) -> ApiResult<()> {
        self.client
            .revoke_security_group_ingress()
            .group_id(group_id)
            .set_ip_permissions(Some(rules.iter().map(ip_permission).collect()))
            .send()
            .await?;
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> ApiResult<()> {
        self.client
            .delete_security_group()
            .group_id(group_id)
            .send()
            .await?;
        Ok(())
    }

    async fn describe_instances(
        &self,
        ids: &[String],
        filters: &[Filter],
    ) -> ApiResult<Vec<Instance>> {
        let output = self
            .client
            .describe_instances()
            .set_instance_ids(optional_ids(ids))
            .set_filters(sdk_filters(filters))
            .send()
            .await?;
        output
            .reservations
            .unwrap_or_default()
            .into_iter()
            // Combine the instances of every reservation.
            .flat_map(|r| r.instances.unwrap_or_default())
            .map(instance)
            .collect()
    }

    async fn run_instances(&self, request: &RunInstancesRequest) -> ApiResult<Instance> {
        let output = self
            .client
            .run_instances()
            .image_id(&request.image_id)
            .instance_type(InstanceType::from(request.instance_type.as_str()))
            .subnet_id(&request.subnet_id)
            .set_key_name(request.key_name.clone())
            .set_security_group_ids(Some(request.security_group_ids.clone()))
            .set_user_data(request.user_data.clone())
            .set_iam_instance_profile(request.iam_instance_profile.as_ref().map(|name| {
                IamInstanceProfileSpecification::builder()
                    .name(name)
                    .build()
            }))
            .tag_specifications(
                TagSpecification::builder()
                    .resource_type(ResourceType::Instance)
                    .set_tags(sdk_tags(&request.tags))
                    .build(),
            )
            .min_count(1)
            .max_count(1)
            .send()
            .await?;
        let created = output
            .instances
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| missing("an instance"))?;
        let mut created = instance(created)?;
        created.user_data = request.user_data.clone();
        Ok(created)
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> ApiResult<()> {
        self.client
            .terminate_instances()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .send()
            .await?;
        Ok(())
    }

    async fn modify_instance_security_groups(
        &self,
        instance_id: &str,
        group_ids: &[String],
    ) -> ApiResult<()> {
        self.client
            .modify_instance_attribute()
            .instance_id(instance_id)
            .set_groups(Some(group_ids.to_vec()))
            .send()
            .await?;
        Ok(())
    }

    async fn describe_images(
        &self,
        owners: &[String],
        filters: &[Filter],
    ) -> ApiResult<Vec<ImageInfo>> {
        let output = self
            .client
            .describe_images()
            .set_owners(optional_ids(owners))
            .set_filters(sdk_filters(filters))
            .send()
            .await?;
        Ok(output
            .images
            .unwrap_or_default()
            .into_iter()
            .map(|i| ImageInfo {
                id: i.image_id.unwrap_or_default(),
                name: i.name.unwrap_or_default(),
                creation_date: i.creation_date.unwrap_or_default(),
            })
            .collect())
    }

    async fn create_tags(&self, resource_ids: &[String], tags: &Tags) -> ApiResult<()> {
        self.client
            .create_tags()
            .set_resources(Some(resource_ids.to_vec()))
            .set_tags(sdk_tags(tags))
            .send()
            .await?;
        Ok(())
    }

    async fn delete_tags(&self, resource_ids: &[String], tags: &Tags) -> ApiResult<()> {
        self.client
            .delete_tags()
            .set_resources(Some(resource_ids.to_vec()))
            .set_tags(Some(
                tags.iter().map(|(k, _)| Tag::builder().key(k).build()).collect(),
            ))
            .send()
            .await?;
        Ok(())
    }
}
