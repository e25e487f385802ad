use super::matches;
use capa_cloud::awserrors::{
    ALLOCATION_NOT_FOUND, ASSOCIATION_NOT_FOUND, DEPENDENCY_VIOLATION, GROUP_NOT_FOUND,
    IGW_NOT_FOUND, INSTANCE_NOT_FOUND, NAT_GATEWAY_NOT_FOUND, PERMISSION_NOT_FOUND,
    ROUTE_TABLE_NOT_FOUND, SUBNET_NOT_FOUND, VPC_NOT_FOUND,
};
use capa_cloud::ec2::{
    AddressInfo, ApiResult, Ec2Api, ImageInfo, InternetGatewayInfo, NatGatewayInfo, Route,
    RouteTableAssociation, RouteTableInfo, RunInstancesRequest, SecurityGroupInfo, SubnetInfo,
    VpcInfo,
};
use capa_cloud::filter::Filter;
use capa_cloud::ApiError;
use capa_model::{IngressRule, Instance, InstanceState, Tags};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub(crate) struct State {
    next_id: u32,
    pub(crate) zones: Vec<String>,
    pub(crate) vpcs: Vec<VpcInfo>,
    pub(crate) subnets: Vec<SubnetInfo>,
    pub(crate) internet_gateways: Vec<InternetGatewayInfo>,
    pub(crate) addresses: Vec<AddressInfo>,
    pub(crate) nat_gateways: Vec<NatGatewayInfo>,
    pub(crate) route_tables: Vec<RouteTableInfo>,
    pub(crate) security_groups: Vec<SecurityGroupInfo>,
    pub(crate) instances: Vec<Instance>,
    /// Images with the ID of the account that owns them.
    pub(crate) images: Vec<(String, ImageInfo)>,
    calls: Vec<String>,
    failures: HashMap<String, VecDeque<ApiError>>,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:08x}", prefix, self.next_id)
    }

    fn vpc_of_subnet(&self, subnet_id: &str) -> String {
        self.subnets
            .iter()
            .find(|sn| sn.id == subnet_id)
            .map(|sn| sn.vpc_id.clone())
            .unwrap_or_default()
    }

    fn tags_of(&mut self, id: &str) -> Option<&mut Tags> {
        if let Some(v) = self.vpcs.iter_mut().find(|v| v.id == id) {
            return Some(&mut v.tags);
        }
        if let Some(v) = self.subnets.iter_mut().find(|v| v.id == id) {
            return Some(&mut v.tags);
        }
        if let Some(v) = self.internet_gateways.iter_mut().find(|v| v.id == id) {
            return Some(&mut v.tags);
        }
        if let Some(v) = self.addresses.iter_mut().find(|v| v.allocation_id == id) {
            return Some(&mut v.tags);
        }
        if let Some(v) = self.nat_gateways.iter_mut().find(|v| v.id == id) {
            return Some(&mut v.tags);
        }
        if let Some(v) = self.route_tables.iter_mut().find(|v| v.id == id) {
            return Some(&mut v.tags);
        }
        if let Some(v) = self.security_groups.iter_mut().find(|v| v.id == id) {
            return Some(&mut v.tags);
        }
        if let Some(v) = self.instances.iter_mut().find(|v| v.id == id) {
            return Some(&mut v.tags);
        }
        None
    }
}

/// An EC2 account with a single region. Every call is recorded under its AWS operation name.
///
/// New NAT gateways and instances report `pending` once before they become available or running;
/// deleted NAT gateways and terminated instances report `deleting` and `shutting-down` once.
#[derive(Debug)]
pub(crate) struct MockEc2 {
    state: Mutex<State>,
}

impl Default for MockEc2 {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEc2 {
    pub(crate) fn new() -> Self {
        let state = State {
            zones: vec!["us-east-1b".to_string(), "us-east-1a".to_string()],
            ..State::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// The operations called so far, in order.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub(crate) fn count(&self, operation: &str) -> usize {
        self.state().calls.iter().filter(|c| *c == operation).count()
    }

    /// Calls of operations that start with `prefix`, e.g. `Create`.
    pub(crate) fn count_prefixed(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub(crate) fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Makes the next call of `operation` fail with `error`.
    pub(crate) fn fail_next(&self, operation: &str, error: ApiError) {
        self.state()
            .failures
            .entry(operation.to_string())
            .or_default()
            .push_back(error);
    }

    /// Adds an available VPC and returns its ID.
    pub(crate) fn add_vpc(&self, cidr_block: &str, tags: Tags) -> String {
        let mut state = self.state();
        let id = state.next_id("vpc");
        state.vpcs.push(VpcInfo {
            id: id.clone(),
            cidr_block: cidr_block.to_string(),
            state: "available".to_string(),
            tags,
        });
        id
    }

    /// Adds an available subnet and returns its ID.
    pub(crate) fn add_subnet(
        &self,
        vpc_id: &str,
        cidr_block: &str,
        zone: &str,
        tags: Tags,
    ) -> String {
        let mut state = self.state();
        let id = state.next_id("subnet");
        state.subnets.push(SubnetInfo {
            id: id.clone(),
            vpc_id: vpc_id.to_string(),
            cidr_block: cidr_block.to_string(),
            availability_zone: zone.to_string(),
            map_public_ip_on_launch: false,
            state: "available".to_string(),
            tags,
        });
        id
    }

    pub(crate) fn add_image(&self, owner: &str, id: &str, name: &str, creation_date: &str) {
        self.state().images.push((
            owner.to_string(),
            ImageInfo {
                id: id.to_string(),
                name: name.to_string(),
                creation_date: creation_date.to_string(),
            },
        ));
    }

    pub(crate) fn instance(&self, id: &str) -> Option<Instance> {
        self.state().instances.iter().find(|i| i.id == id).cloned()
    }

    /// Records the call and returns the locked state, or the failure queued for the operation.
    fn begin(&self, operation: &str) -> ApiResult<MutexGuard<'_, State>> {
        let mut state = self.state();
        state.calls.push(operation.to_string());
        if let Some(error) = state
            .failures
            .get_mut(operation)
            .and_then(|queue| queue.pop_front())
        {
            return Err(error);
        }
        Ok(state)
    }
}

fn not_found(code: &str, id: &str) -> ApiError {
    ApiError::with_code(code, format!("The ID '{}' does not exist", id))
}

fn unknown_resource(id: &str) -> ApiError {
    ApiError::with_code("InvalidID", format!("unknown resource '{}'", id))
}

#[async_trait::async_trait]
impl Ec2Api for MockEc2 {
    async fn describe_availability_zones(&self) -> ApiResult<Vec<String>> {
        let state = self.begin("DescribeAvailabilityZones")?;
        Ok(state.zones.clone())
    }

    async fn describe_vpcs(&self, ids: &[String], filters: &[Filter]) -> ApiResult<Vec<VpcInfo>> {
        let state = self.begin("DescribeVpcs")?;
        if let Some(missing) = ids.iter().find(|id| !state.vpcs.iter().any(|v| &v.id == *id)) {
            return Err(not_found(VPC_NOT_FOUND, missing));
        }
        Ok(state
            .vpcs
            .iter()
            .filter(|v| ids.is_empty() || ids.contains(&v.id))
            .filter(|v| {
                matches(
                    filters,
                    &v.tags,
                    &[("state", v.state.as_str()), ("vpc-id", v.id.as_str())],
                )
            })
            .cloned()
            .collect())
    }

    async fn create_vpc(&self, cidr_block: &str) -> ApiResult<VpcInfo> {
        let mut state = self.begin("CreateVpc")?;
        let vpc = VpcInfo {
            id: state.next_id("vpc"),
            cidr_block: cidr_block.to_string(),
            state: "available".to_string(),
            tags: Tags::default(),
        };
        state.vpcs.push(vpc.clone());
        Ok(vpc)
    }

    async fn delete_vpc(&self, vpc_id: &str) -> ApiResult<()> {
        let mut state = self.begin("DeleteVpc")?;
        if !state.vpcs.iter().any(|v| v.id == vpc_id) {
            return Err(not_found(VPC_NOT_FOUND, vpc_id));
        }
        let in_use = state.subnets.iter().any(|sn| sn.vpc_id == vpc_id)
            || state
                .internet_gateways
                .iter()
                .any(|igw| igw.attached_vpc_ids.iter().any(|v| v == vpc_id));
        if in_use {
            return Err(ApiError::with_code(
                DEPENDENCY_VIOLATION,
                format!("The vpc '{}' has dependencies and cannot be deleted", vpc_id),
            ));
        }
        state.vpcs.retain(|v| v.id != vpc_id);
        Ok(())
    }

    async fn describe_subnets(&self, filters: &[Filter]) -> ApiResult<Vec<SubnetInfo>> {
        let state = self.begin("DescribeSubnets")?;
        Ok(state
            .subnets
            .iter()
            .filter(|sn| {
                matches(
                    filters,
                    &sn.tags,
                    &[
                        ("state", sn.state.as_str()),
                        ("vpc-id", sn.vpc_id.as_str()),
                        ("subnet-id", sn.id.as_str()),
                        ("availability-zone", sn.availability_zone.as_str()),
                    ],
                )
            })
            .cloned()
            .collect())
    }

    async fn create_subnet(
        &self,
        vpc_id: &str,
        cidr_block: &str,
        availability_zone: &str,
    ) -> ApiResult<SubnetInfo> {
        let mut state = self.begin("CreateSubnet")?;
        if !state.vpcs.iter().any(|v| v.id == vpc_id) {
            return Err(not_found(VPC_NOT_FOUND, vpc_id));
        }
        let subnet = SubnetInfo {
            id: state.next_id("subnet"),
            vpc_id: vpc_id.to_string(),
            cidr_block: cidr_block.to_string(),
            availability_zone: availability_zone.to_string(),
            map_public_ip_on_launch: false,
            state: "available".to_string(),
            tags: Tags::default(),
        };
        state.subnets.push(subnet.clone());
        Ok(subnet)
    }

    async fn modify_subnet_map_public_ip(&self, subnet_id: &str, value: bool) -> ApiResult<()> {
        let mut state = self.begin("ModifySubnetAttribute")?;
        let subnet = state
            .subnets
            .iter_mut()
            .find(|sn| sn.id == subnet_id)
            .ok_or_else(|| not_found(SUBNET_NOT_FOUND, subnet_id))?;
        subnet.map_public_ip_on_launch = value;
        Ok(())
    }

    async fn delete_subnet(&self, subnet_id: &str) -> ApiResult<()> {
        let mut state = self.begin("DeleteSubnet")?;
        if !state.subnets.iter().any(|sn| sn.id == subnet_id) {
            return Err(not_found(SUBNET_NOT_FOUND, subnet_id));
        }
        state.subnets.retain(|sn| sn.id != subnet_id);
        Ok(())
    }

    async fn describe_internet_gateways(
        &self,
        filters: &[Filter],
    ) -> ApiResult<Vec<InternetGatewayInfo>> {
        let state = self.begin("DescribeInternetGateways")?;
        Ok(state
            .internet_gateways
            .iter()
            .filter(|igw| {
                let mut fields = vec![("internet-gateway-id", igw.id.as_str())];
                fields.extend(
                    igw.attached_vpc_ids
                        .iter()
                        .map(|v| ("attachment.vpc-id", v.as_str())),
                );
                // An unattached gateway never matches an attachment filter.
                let attachment_filtered = filters.iter().any(|f| f.name == "attachment.vpc-id");
                if attachment_filtered && igw.attached_vpc_ids.is_empty() {
                    return false;
                }
                matches(filters, &igw.tags, &fields)
            })
            .cloned()
            .collect())
    }

    async fn create_internet_gateway(&self) -> ApiResult<InternetGatewayInfo> {
        let mut state = self.begin("CreateInternetGateway")?;
        let igw = InternetGatewayInfo {
            id: state.next_id("igw"),
            attached_vpc_ids: Vec::new(),
            tags: Tags::default(),
        };
        state.internet_gateways.push(igw.clone());
        Ok(igw)
    }

    async fn attach_internet_gateway(&self, igw_id: &str, vpc_id: &str) -> ApiResult<()> {
        let mut state = self.begin("AttachInternetGateway")?;
        let igw = state
            .internet_gateways
            .iter_mut()
            .find(|igw| igw.id == igw_id)
            .ok_or_else(|| not_found(IGW_NOT_FOUND, igw_id))?;
        igw.attached_vpc_ids.push(vpc_id.to_string());
        Ok(())
    }

    async fn detach_internet_gateway(&self, igw_id: &str, vpc_id: &str) -> ApiResult<()> {
        let mut state = self.begin("DetachInternetGateway")?;
        let igw = state
            .internet_gateways
            .iter_mut()
            .find(|igw| igw.id == igw_id)
            .ok_or_else(|| not_found(IGW_NOT_FOUND, igw_id))?;
        igw.attached_vpc_ids.retain(|v| v != vpc_id);
        Ok(())
    }

    async fn delete_internet_gateway(&self, igw_id: &str) -> ApiResult<()> {
        let mut state = self.begin("DeleteInternetGateway")?;
        if !state.internet_gateways.iter().any(|igw| igw.id == igw_id) {
            return Err(not_found(IGW_NOT_FOUND, igw_id));
        }
        state.internet_gateways.retain(|igw| igw.id != igw_id);
        Ok(())
    }

    async fn describe_addresses(&self, filters: &[Filter]) -> ApiResult<Vec<AddressInfo>> {
        let state = self.begin("DescribeAddresses")?;
        Ok(state
            .addresses
            .iter()
            .filter(|a| {
                matches(
                    filters,
                    &a.tags,
                    &[("allocation-id", a.allocation_id.as_str())],
                )
            })
            .cloned()
            .collect())
    }

    async fn allocate_address(&self) -> ApiResult<AddressInfo> {
        let mut state = self.begin("AllocateAddress")?;
        let n = state.addresses.len() + 1;
        let address = AddressInfo {
            allocation_id: state.next_id("eipalloc"),
            public_ip: format!("203.0.113.{}", n),
            association_id: None,
            tags: Tags::default(),
        };
        state.addresses.push(address.clone());
        Ok(address)
    }

    async fn disassociate_address(&self, association_id: &str) -> ApiResult<()> {
        let mut state = self.begin("DisassociateAddress")?;
        let address = state
            .addresses
            .iter_mut()
            .find(|a| a.association_id.as_deref() == Some(association_id))
            .ok_or_else(|| not_found(ASSOCIATION_NOT_FOUND, association_id))?;
        address.association_id = None;
        Ok(())
    }

    async fn release_address(&self, allocation_id: &str) -> ApiResult<()> {
        let mut state = self.begin("ReleaseAddress")?;
        if !state.addresses.iter().any(|a| a.allocation_id == allocation_id) {
            return Err(not_found(ALLOCATION_NOT_FOUND, allocation_id));
        }
        state.addresses.retain(|a| a.allocation_id != allocation_id);
        Ok(())
    }

    async fn describe_nat_gateways(&self, filters: &[Filter]) -> ApiResult<Vec<NatGatewayInfo>> {
        let mut state = self.begin("DescribeNatGateways")?;
        let found: Vec<NatGatewayInfo> = state
            .nat_gateways
            .iter()
            .filter(|ngw| {
                matches(
                    filters,
                    &ngw.tags,
                    &[
                        ("state", ngw.state.as_str()),
                        ("vpc-id", ngw.vpc_id.as_str()),
                        ("subnet-id", ngw.subnet_id.as_str()),
                        ("nat-gateway-id", ngw.id.as_str()),
                    ],
                )
            })
            .cloned()
            .collect();

        // Gateways move on to their next state once they have been seen.
        let seen: Vec<String> = found.iter().map(|ngw| ngw.id.clone()).collect();
        let mut released = Vec::new();
        for ngw in state.nat_gateways.iter_mut().filter(|n| seen.contains(&n.id)) {
            match ngw.state.as_str() {
                "pending" => ngw.state = "available".to_string(),
                "deleting" => {
                    ngw.state = "deleted".to_string();
                    released.push(format!("eipassoc-{}", ngw.id));
                }
                _ => {}
            }
        }
        for address in state.addresses.iter_mut() {
            if address
                .association_id
                .as_ref()
                .map(|a| released.contains(a))
                .unwrap_or(false)
            {
                address.association_id = None;
            }
        }
        Ok(found)
    }

    async fn create_nat_gateway(
        &self,
        subnet_id: &str,
        allocation_id: &str,
    ) -> ApiResult<NatGatewayInfo> {
        let mut state = self.begin("CreateNatGateway")?;
        let vpc_id = state.vpc_of_subnet(subnet_id);
        if vpc_id.is_empty() {
            return Err(not_found(SUBNET_NOT_FOUND, subnet_id));
        }
        let id = state.next_id("nat");
        let address = state
            .addresses
            .iter_mut()
            .find(|a| a.allocation_id == allocation_id)
            .ok_or_else(|| not_found(ALLOCATION_NOT_FOUND, allocation_id))?;
        address.association_id = Some(format!("eipassoc-{}", id));
        let ngw = NatGatewayInfo {
            id,
            subnet_id: subnet_id.to_string(),
            vpc_id,
            state: "pending".to_string(),
            failure_code: None,
            failure_message: None,
            tags: Tags::default(),
        };
        state.nat_gateways.push(ngw.clone());
        Ok(ngw)
    }

    async fn delete_nat_gateway(&self, nat_gateway_id: &str) -> ApiResult<()> {
        let mut state = self.begin("DeleteNatGateway")?;
        let ngw = state
            .nat_gateways
            .iter_mut()
            .find(|ngw| ngw.id == nat_gateway_id && ngw.state != "deleted")
            .ok_or_else(|| not_found(NAT_GATEWAY_NOT_FOUND, nat_gateway_id))?;
        ngw.state = "deleting".to_string();
        Ok(())
    }

    async fn describe_route_tables(&self, filters: &[Filter]) -> ApiResult<Vec<RouteTableInfo>> {
        let state = self.begin("DescribeRouteTables")?;
        Ok(state
            .route_tables
            .iter()
            .filter(|rt| {
                let mut fields = vec![
                    ("vpc-id", rt.vpc_id.as_str()),
                    ("route-table-id", rt.id.as_str()),
                ];
                fields.extend(
                    rt.associations
                        .iter()
                        .filter_map(|a| a.subnet_id.as_deref())
                        .map(|sn| ("association.subnet-id", sn)),
                );
                matches(filters, &rt.tags, &fields)
            })
            .cloned()
            .collect())
    }

    async fn create_route_table(&self, vpc_id: &str) -> ApiResult<RouteTableInfo> {
        let mut state = self.begin("CreateRouteTable")?;
        let rt = RouteTableInfo {
            id: state.next_id("rtb"),
            vpc_id: vpc_id.to_string(),
            associations: Vec::new(),
            routes: Vec::new(),
            tags: Tags::default(),
        };
        state.route_tables.push(rt.clone());
        Ok(rt)
    }

    async fn create_route(&self, route_table_id: &str, route: &Route) -> ApiResult<()> {
        let mut state = self.begin("CreateRoute")?;
        let rt = state
            .route_tables
            .iter_mut()
            .find(|rt| rt.id == route_table_id)
            .ok_or_else(|| not_found(ROUTE_TABLE_NOT_FOUND, route_table_id))?;
        rt.routes.push(route.clone());
        Ok(())
    }

    async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> ApiResult<String> {
        let mut state = self.begin("AssociateRouteTable")?;
        let association_id = state.next_id("rtbassoc");
        let rt = state
            .route_tables
            .iter_mut()
            .find(|rt| rt.id == route_table_id)
            .ok_or_else(|| not_found(ROUTE_TABLE_NOT_FOUND, route_table_id))?;
        rt.associations.push(RouteTableAssociation {
            id: association_id.clone(),
            subnet_id: Some(subnet_id.to_string()),
            main: false,
        });
        Ok(association_id)
    }

    async fn disassociate_route_table(&self, association_id: &str) -> ApiResult<()> {
        let mut state = self.begin("DisassociateRouteTable")?;
        let rt = state
            .route_tables
            .iter_mut()
            .find(|rt| rt.associations.iter().any(|a| a.id == association_id))
            .ok_or_else(|| not_found(ASSOCIATION_NOT_FOUND, association_id))?;
        rt.associations.retain(|a| a.id != association_id);
        Ok(())
    }

    async fn delete_route_table(&self, route_table_id: &str) -> ApiResult<()> {
        let mut state = self.begin("DeleteRouteTable")?;
        if !state.route_tables.iter().any(|rt| rt.id == route_table_id) {
            return Err(not_found(ROUTE_TABLE_NOT_FOUND, route_table_id));
        }
        state.route_tables.retain(|rt| rt.id != route_table_id);
        Ok(())
    }

    async fn describe_security_groups(
        &self,
        filters: &[Filter],
    ) -> ApiResult<Vec<SecurityGroupInfo>> {
        let state = self.begin("DescribeSecurityGroups")?;
        Ok(state
            .security_groups
            .iter()
            .filter(|sg| {
                matches(
                    filters,
                    &sg.tags,
                    &[
                        ("vpc-id", sg.vpc_id.as_str()),
                        ("group-name", sg.name.as_str()),
                        ("group-id", sg.id.as_str()),
                    ],
                )
            })
            .cloned()
            .collect())
    }

    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        _description: &str,
    ) -> ApiResult<String> {
        let mut state = self.begin("CreateSecurityGroup")?;
        let id = state.next_id("sg");
        state.security_groups.push(SecurityGroupInfo {
            id: id.clone(),
            name: name.to_string(),
            vpc_id: vpc_id.to_string(),
            ingress_rules: Vec::new(),
            tags: Tags::default(),
        });
        Ok(id)
    }

    async fn authorize_security_group_ingress(
        &self,
        group_id: &str,
        rules: &[IngressRule],
    ) -> ApiResult<()> {
        let mut state = self.begin("AuthorizeSecurityGroupIngress")?;
        let sg = state
            .security_groups
            .iter_mut()
            .find(|sg| sg.id == group_id)
            .ok_or_else(|| not_found(GROUP_NOT_FOUND, group_id))?;
        if rules.iter().any(|r| sg.ingress_rules.contains(r)) {
            return Err(ApiError::with_code(
                "InvalidPermission.Duplicate",
                "the specified rule already exists",
            ));
        }
        sg.ingress_rules.extend(rules.iter().cloned());
        Ok(())
    }

    async fn revoke_security_group_ingress(
        &self,
        group_id: &str,
        rules: &[IngressRule],
    ) -> ApiResult<()> {
        let mut state = self.begin("RevokeSecurityGroupIngress")?;
        let sg = state
            .security_groups
            .iter_mut()
            .find(|sg| sg.id == group_id)
            .ok_or_else(|| not_found(GROUP_NOT_FOUND, group_id))?;
        if rules.iter().any(|r| !sg.ingress_rules.contains(r)) {
            return Err(ApiError::with_code(
                PERMISSION_NOT_FOUND,
                "the specified rule does not exist",
            ));
        }
        sg.ingress_rules.retain(|r| !rules.contains(r));
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> ApiResult<()> {
        let mut state = self.begin("DeleteSecurityGroup")?;
        if !state.security_groups.iter().any(|sg| sg.id == group_id) {
            return Err(not_found(GROUP_NOT_FOUND, group_id));
        }
        state.security_groups.retain(|sg| sg.id != group_id);
        Ok(())
    }

    async fn describe_instances(
        &self,
        ids: &[String],
        filters: &[Filter],
    ) -> ApiResult<Vec<Instance>> {
        let mut state = self.begin("DescribeInstances")?;
        if let Some(missing) = ids
            .iter()
            .find(|id| !state.instances.iter().any(|i| &i.id == *id))
        {
            return Err(not_found(INSTANCE_NOT_FOUND, missing));
        }
        let vpcs: Vec<String> = state
            .instances
            .iter()
            .map(|i| state.vpc_of_subnet(&i.subnet_id))
            .collect();
        let found: Vec<Instance> = state
            .instances
            .iter()
            .zip(vpcs.iter())
            .filter(|(i, _)| ids.is_empty() || ids.contains(&i.id))
            .filter(|(i, vpc_id)| {
                matches(
                    filters,
                    &i.tags,
                    &[
                        ("instance-state-name", i.state.as_str()),
                        ("vpc-id", vpc_id.as_str()),
                        ("subnet-id", i.subnet_id.as_str()),
                        ("instance-id", i.id.as_str()),
                    ],
                )
            })
            .map(|(i, _)| i.clone())
            .collect();

        let seen: Vec<String> = found.iter().map(|i| i.id.clone()).collect();
        for instance in state.instances.iter_mut().filter(|i| seen.contains(&i.id)) {
            instance.state = match instance.state {
                InstanceState::Pending => InstanceState::Running,
                InstanceState::ShuttingDown => InstanceState::Terminated,
                other => other,
            };
        }
        Ok(found)
    }

    async fn run_instances(&self, request: &RunInstancesRequest) -> ApiResult<Instance> {
        let mut state = self.begin("RunInstances")?;
        if state.vpc_of_subnet(&request.subnet_id).is_empty() {
            return Err(not_found(SUBNET_NOT_FOUND, &request.subnet_id));
        }
        let instance = Instance {
            id: state.next_id("i"),
            state: InstanceState::Pending,
            instance_type: request.instance_type.clone(),
            subnet_id: request.subnet_id.clone(),
            image_id: request.image_id.clone(),
            key_name: request.key_name.clone(),
            security_group_ids: request.security_group_ids.clone(),
            user_data: request.user_data.clone(),
            iam_profile: request.iam_instance_profile.clone(),
            private_ip: Some("10.0.0.10".to_string()),
            public_ip: None,
            tags: request.tags.clone(),
        };
        state.instances.push(instance.clone());
        Ok(instance)
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> ApiResult<()> {
        let mut state = self.begin("TerminateInstances")?;
        for id in instance_ids {
            let instance = state
                .instances
                .iter_mut()
                .find(|i| &i.id == id)
                .ok_or_else(|| not_found(INSTANCE_NOT_FOUND, id))?;
            if instance.state != InstanceState::Terminated {
                instance.state = InstanceState::ShuttingDown;
            }
        }
        Ok(())
    }

    async fn modify_instance_security_groups(
        &self,
        instance_id: &str,
        group_ids: &[String],
    ) -> ApiResult<()> {
        let mut state = self.begin("ModifyInstanceAttribute")?;
        let instance = state
            .instances
            .iter_mut()
            .find(|i| i.id == instance_id)
            .ok_or_else(|| not_found(INSTANCE_NOT_FOUND, instance_id))?;
        instance.security_group_ids = group_ids.to_vec();
        Ok(())
    }

    async fn describe_images(
        &self,
        owners: &[String],
        filters: &[Filter],
    ) -> ApiResult<Vec<ImageInfo>> {
        let state = self.begin("DescribeImages")?;
        Ok(state
            .images
            .iter()
            .filter(|(owner, _)| owners.is_empty() || owners.contains(owner))
            .filter(|(_, image)| {
                matches(filters, &Tags::default(), &[("name", image.name.as_str())])
            })
            .map(|(_, image)| image.clone())
            .collect())
    }

    async fn create_tags(&self, resource_ids: &[String], tags: &Tags) -> ApiResult<()> {
        let mut state = self.begin("CreateTags")?;
        for id in resource_ids {
            let current = state.tags_of(id).ok_or_else(|| unknown_resource(id))?;
            current.merge(tags);
        }
        Ok(())
    }

    async fn delete_tags(&self, resource_ids: &[String], tags: &Tags) -> ApiResult<()> {
        let mut state = self.begin("DeleteTags")?;
        for id in resource_ids {
            let current = state.tags_of(id).ok_or_else(|| unknown_resource(id))?;
            for (key, _) in tags.iter() {
                current.remove(key);
            }
        }
        Ok(())
    }
}
