mod mock;

use capa_cloud::awserrors::{
    ALLOCATION_NOT_FOUND, DEPENDENCY_VIOLATION, GROUP_NOT_FOUND, ROUTE_TABLE_NOT_FOUND,
    VPC_NOT_FOUND,
};
use capa_cloud::ec2::{NatGatewayInfo, SecurityGroupInfo};
use capa_cloud::{ApiError, ClusterScope, Service};
use capa_model::{IngressRule, Network, SecurityGroupRole, Subnet, Subnets, Vpc};
use mock::{cluster, fast_wait, owned_tags, MockEc2};

/// A cluster scope whose status already knows the VPC and the given subnets.
fn scope_with_network(vpc_id: &str, subnets: Vec<Subnet>) -> ClusterScope {
    let mut cluster = cluster("c1");
    cluster.status.network = Network {
        vpc: Vpc {
            id: vpc_id.to_string(),
            cidr_block: "10.0.0.0/16".to_string(),
            tags: owned_tags("c1"),
        },
        subnets: Subnets::new(subnets),
        ..Network::default()
    };
    ClusterScope::new(cluster)
}

fn subnet(id: &str, vpc_id: &str, cidr: &str, zone: &str, public: bool) -> Subnet {
    Subnet {
        id: id.to_string(),
        vpc_id: vpc_id.to_string(),
        availability_zone: zone.to_string(),
        cidr_block: cidr.to_string(),
        is_public: public,
        ..Subnet::default()
    }
}

#[tokio::test]
async fn reconcile_network_from_scratch() {
    let ec2 = MockEc2::new();
    let mut scope = ClusterScope::new(cluster("c1"));
    Service::new(&mut scope, &ec2)
        .with_wait_config(fast_wait())
        .reconcile_network()
        .await
        .unwrap();

    assert_eq!(ec2.count("CreateVpc"), 1);
    assert_eq!(ec2.count("CreateSubnet"), 2);
    assert_eq!(ec2.count("CreateInternetGateway"), 1);
    assert_eq!(ec2.count("AttachInternetGateway"), 1);
    assert_eq!(ec2.count("AllocateAddress"), 1);
    assert_eq!(ec2.count("CreateNatGateway"), 1);
    assert_eq!(ec2.count("CreateRouteTable"), 2);
    assert_eq!(ec2.count("AssociateRouteTable"), 2);
    assert_eq!(ec2.count("CreateSecurityGroup"), 3);

    let network = scope.network();
    assert!(!network.vpc.id.is_empty());
    assert!(network.vpc.tags.has_owned("c1"));
    assert!(network.internet_gateway_id.is_some());
    assert_eq!(network.security_groups.len(), 3);

    let public = network.subnets.filter_public();
    let private = network.subnets.filter_private();
    assert_eq!(public.len(), 1);
    assert_eq!(private.len(), 1);
    let public = public.get(0).unwrap();
    let private = private.get(0).unwrap();
    assert_eq!(public.cidr_block, "10.0.1.0/24");
    assert_eq!(private.cidr_block, "10.0.0.0/24");
    assert_eq!(public.availability_zone, "us-east-1a");
    assert!(public.nat_gateway_id.is_some());
    assert!(public.route_table_id.is_some());
    assert!(private.route_table_id.is_some());

    // The private subnet routes through the NAT gateway, the public one through the internet
    // gateway.
    let state = ec2.state();
    let private_rt = state
        .route_tables
        .iter()
        .find(|rt| Some(&rt.id) == private.route_table_id.as_ref())
        .unwrap();
    assert_eq!(private_rt.routes[0].nat_gateway_id, public.nat_gateway_id);
    let public_rt = state
        .route_tables
        .iter()
        .find(|rt| Some(&rt.id) == public.route_table_id.as_ref())
        .unwrap();
    assert_eq!(public_rt.routes[0].gateway_id, network.internet_gateway_id);
    assert!(state
        .subnets
        .iter()
        .find(|sn| sn.id == public.id)
        .unwrap()
        .map_public_ip_on_launch);
}

#[tokio::test]
async fn second_reconcile_changes_nothing() {
    let ec2 = MockEc2::new();
    let mut scope = ClusterScope::new(cluster("c1"));
    Service::new(&mut scope, &ec2)
        .with_wait_config(fast_wait())
        .reconcile_network()
        .await
        .unwrap();
    let first = scope.network().clone();

    ec2.clear_calls();
    Service::new(&mut scope, &ec2)
        .with_wait_config(fast_wait())
        .reconcile_network()
        .await
        .unwrap();

    for prefix in [
        "Create",
        "Allocate",
        "Associate",
        "Attach",
        "Authorize",
        "Revoke",
        "Modify",
        "Delete",
    ] {
        assert_eq!(
            ec2.count_prefixed(prefix),
            0,
            "unexpected {} calls: {:?}",
            prefix,
            ec2.calls()
        );
    }
    assert_eq!(scope.network(), &first);
}

#[tokio::test]
async fn several_cluster_vpcs_are_a_conflict() {
    let ec2 = MockEc2::new();
    ec2.add_vpc("10.0.0.0/16", owned_tags("c1"));
    ec2.add_vpc("10.1.0.0/16", owned_tags("c1"));
    let mut scope = ClusterScope::new(cluster("c1"));

    let err = Service::new(&mut scope, &ec2)
        .with_wait_config(fast_wait())
        .reconcile_vpc()
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "{}", err);
    assert_eq!(ec2.count("CreateVpc"), 0);
    assert!(scope.network().vpc.id.is_empty());
}

#[tokio::test]
async fn missing_public_subnet_is_created_in_first_zone() {
    let ec2 = MockEc2::new();
    let vpc_id = ec2.add_vpc("10.0.0.0/16", owned_tags("c1"));
    let subnet_id = ec2.add_subnet(&vpc_id, "10.0.10.0/24", "us-east-1a", owned_tags("c1"));
    let mut scope = scope_with_network(
        &vpc_id,
        vec![subnet(&subnet_id, &vpc_id, "10.0.10.0/24", "us-east-1a", false)],
    );

    let mut service = Service::new(&mut scope, &ec2).with_wait_config(fast_wait());
    service.reconcile_subnets().await.unwrap();

    let calls = ec2.calls();
    let zones = calls
        .iter()
        .position(|c| c == "DescribeAvailabilityZones")
        .unwrap();
    let create = calls.iter().position(|c| c == "CreateSubnet").unwrap();
    assert!(zones < create);
    assert_eq!(ec2.count("CreateSubnet"), 1);

    let created = ec2
        .state()
        .subnets
        .iter()
        .find(|sn| sn.id != subnet_id)
        .cloned()
        .unwrap();
    assert_eq!(created.cidr_block, "10.0.1.0/24");
    assert_eq!(created.availability_zone, "us-east-1a");
    assert_eq!(created.tags.role(), Some("bastion"));

    let subnets = service.scope().subnets();
    assert_eq!(subnets.len(), 2);
    assert_eq!(subnets.filter_public().ids(), vec![created.id]);
    assert_eq!(subnets.filter_private().ids(), vec![subnet_id]);
}

#[tokio::test]
async fn nat_gateway_for_public_subnet() {
    let ec2 = MockEc2::new();
    let vpc_id = ec2.add_vpc("10.0.0.0/16", owned_tags("c1"));
    let public_id = ec2.add_subnet(&vpc_id, "10.0.1.0/24", "us-east-1a", owned_tags("c1"));
    let private_id = ec2.add_subnet(&vpc_id, "10.0.0.0/24", "us-east-1a", owned_tags("c1"));
    let mut scope = scope_with_network(
        &vpc_id,
        vec![
            subnet(&public_id, &vpc_id, "10.0.1.0/24", "us-east-1a", true),
            subnet(&private_id, &vpc_id, "10.0.0.0/24", "us-east-1a", false),
        ],
    );

    let mut service = Service::new(&mut scope, &ec2).with_wait_config(fast_wait());
    service.reconcile_nat_gateways().await.unwrap();

    assert_eq!(ec2.count("AllocateAddress"), 1);
    assert_eq!(ec2.count("CreateNatGateway"), 1);

    // The gateway was polled until it became available.
    let calls = ec2.calls();
    let create = calls.iter().position(|c| c == "CreateNatGateway").unwrap();
    let polls = calls[create..]
        .iter()
        .filter(|c| *c == "DescribeNatGateways")
        .count();
    assert_eq!(polls, 2);

    let state = ec2.state();
    assert_eq!(state.nat_gateways.len(), 1);
    let ngw = &state.nat_gateways[0];
    assert_eq!(ngw.subnet_id, public_id);
    assert_eq!(ngw.state, "available");
    assert_eq!(ngw.tags.name(), Some("c1-nat"));
    let address = &state.addresses[0];
    assert_eq!(address.tags.role(), Some("apiserver"));
    assert!(address.association_id.is_some());

    let public = service.scope().subnets().find_by_id(&public_id).unwrap();
    assert_eq!(public.nat_gateway_id.as_deref(), Some(ngw.id.as_str()));
}

#[tokio::test]
async fn nat_gateways_are_skipped_without_public_subnets() {
    let ec2 = MockEc2::new();
    let vpc_id = ec2.add_vpc("10.0.0.0/16", owned_tags("c1"));
    let private_id = ec2.add_subnet(&vpc_id, "10.0.0.0/24", "us-east-1a", owned_tags("c1"));
    let mut scope = scope_with_network(
        &vpc_id,
        vec![subnet(&private_id, &vpc_id, "10.0.0.0/24", "us-east-1a", false)],
    );

    Service::new(&mut scope, &ec2)
        .with_wait_config(fast_wait())
        .reconcile_nat_gateways()
        .await
        .unwrap();
    assert_eq!(ec2.count("CreateNatGateway"), 0);
    assert_eq!(ec2.count("AllocateAddress"), 0);
}

#[tokio::test]
async fn nat_gateway_delete_only_touches_cluster_public_subnets() {
    let ec2 = MockEc2::new();
    let vpc_id = ec2.add_vpc("10.0.0.0/16", owned_tags("c1"));
    let public_id = ec2.add_subnet(&vpc_id, "10.0.1.0/24", "us-east-1a", owned_tags("c1"));
    let private_id = ec2.add_subnet(&vpc_id, "10.0.0.0/24", "us-east-1a", owned_tags("c1"));
    let other_id = ec2.add_subnet(&vpc_id, "10.0.9.0/24", "us-east-1a", Default::default());
    let mut scope = scope_with_network(
        &vpc_id,
        vec![
            subnet(&public_id, &vpc_id, "10.0.1.0/24", "us-east-1a", true),
            subnet(&private_id, &vpc_id, "10.0.0.0/24", "us-east-1a", false),
        ],
    );
    Service::new(&mut scope, &ec2)
        .with_wait_config(fast_wait())
        .reconcile_nat_gateways()
        .await
        .unwrap();
    ec2.state().nat_gateways.push(NatGatewayInfo {
        id: "nat-other".to_string(),
        subnet_id: other_id,
        vpc_id: vpc_id.clone(),
        state: "available".to_string(),
        ..NatGatewayInfo::default()
    });

    Service::new(&mut scope, &ec2)
        .with_wait_config(fast_wait())
        .delete_nat_gateways()
        .await
        .unwrap();

    assert_eq!(ec2.count("DeleteNatGateway"), 1);
    let state = ec2.state();
    for ngw in &state.nat_gateways {
        let expected = if ngw.id == "nat-other" { "available" } else { "deleted" };
        assert_eq!(ngw.state, expected, "{}", ngw.id);
    }
    assert!(scope
        .network()
        .subnets
        .iter()
        .all(|sn| sn.nat_gateway_id.is_none()));
}

#[tokio::test]
async fn nat_gateway_delete_is_skipped_without_private_subnets() {
    let ec2 = MockEc2::new();
    let vpc_id = ec2.add_vpc("10.0.0.0/16", owned_tags("c1"));
    let public_id = ec2.add_subnet(&vpc_id, "10.0.1.0/24", "us-east-1a", owned_tags("c1"));
    ec2.state().nat_gateways.push(NatGatewayInfo {
        id: "nat-1".to_string(),
        subnet_id: public_id.clone(),
        vpc_id: vpc_id.clone(),
        state: "available".to_string(),
        ..NatGatewayInfo::default()
    });
    let mut scope = scope_with_network(
        &vpc_id,
        vec![subnet(&public_id, &vpc_id, "10.0.1.0/24", "us-east-1a", true)],
    );

    Service::new(&mut scope, &ec2)
        .with_wait_config(fast_wait())
        .delete_nat_gateways()
        .await
        .unwrap();
    assert_eq!(ec2.count("DescribeNatGateways"), 0);
    assert_eq!(ec2.count("DeleteNatGateway"), 0);
}

#[tokio::test]
async fn private_subnet_without_nat_gateway_in_zone() {
    let ec2 = MockEc2::new();
    let vpc_id = ec2.add_vpc("10.0.0.0/16", owned_tags("c1"));
    let mut public = subnet("subnet-public", &vpc_id, "10.0.1.0/24", "us-east-1a", true);
    public.nat_gateway_id = Some("nat-1".to_string());
    let private = subnet("subnet-private", &vpc_id, "10.0.0.0/24", "us-east-1b", false);
    let mut scope = scope_with_network(&vpc_id, vec![public, private]);
    scope.network_mut().internet_gateway_id = Some("igw-1".to_string());

    let err = Service::new(&mut scope, &ec2)
        .with_wait_config(fast_wait())
        .reconcile_route_tables()
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("us-east-1b"), "{}", message);
    assert!(message.contains("subnet-private"), "{}", message);
}

#[tokio::test]
async fn security_groups_from_scratch() {
    let ec2 = MockEc2::new();
    let vpc_id = ec2.add_vpc("10.0.0.0/16", owned_tags("c1"));
    let mut scope = scope_with_network(&vpc_id, Vec::new());

    let mut service = Service::new(&mut scope, &ec2).with_wait_config(fast_wait());
    service.reconcile_security_groups().await.unwrap();

    assert_eq!(ec2.count("CreateSecurityGroup"), 3);
    assert_eq!(ec2.count("AuthorizeSecurityGroupIngress"), 3);
    assert_eq!(ec2.count("RevokeSecurityGroupIngress"), 0);

    let groups = service.scope().security_groups();
    let names: Vec<&str> = groups.values().map(|sg| sg.name.as_str()).collect();
    assert_eq!(names, vec!["c1-bastion", "c1-controlplane", "c1-node"]);

    // Control plane rules refer to the other groups by ID.
    let bastion = &groups[&SecurityGroupRole::Bastion].id;
    let control_plane = &groups[&SecurityGroupRole::ControlPlane];
    assert!(control_plane
        .ingress_rules
        .iter()
        .any(|r| r.from_port == 22 && r.source_security_group_ids == vec![bastion.clone()]));

    let state = ec2.state();
    for sg in &state.security_groups {
        assert!(sg.tags.has_owned("c1"));
        assert!(!sg.ingress_rules.is_empty());
    }
}

#[tokio::test]
async fn stale_ingress_rules_are_revoked() {
    let ec2 = MockEc2::new();
    let vpc_id = ec2.add_vpc("10.0.0.0/16", owned_tags("c1"));
    let mut tags = owned_tags("c1");
    tags.insert("sigs.k8s.io/cluster-api-provider-aws/role", "bastion");
    ec2.state().security_groups.push(SecurityGroupInfo {
        id: "sg-existing".to_string(),
        name: "c1-bastion".to_string(),
        vpc_id: vpc_id.clone(),
        ingress_rules: vec![
            IngressRule::tcp("SSH", 22, 22).from_cidrs(["0.0.0.0/0"]),
            IngressRule::tcp("HTTP", 80, 80).from_cidrs(["0.0.0.0/0"]),
        ],
        tags,
    });
    let mut scope = scope_with_network(&vpc_id, Vec::new());

    let mut service = Service::new(&mut scope, &ec2).with_wait_config(fast_wait());
    service.reconcile_security_groups().await.unwrap();

    // The bastion group is adopted; only its HTTP rule goes.
    assert_eq!(ec2.count("CreateSecurityGroup"), 2);
    assert_eq!(ec2.count("RevokeSecurityGroupIngress"), 1);
    assert_eq!(ec2.count("AuthorizeSecurityGroupIngress"), 2);
    let bastion = &service.scope().security_groups()[&SecurityGroupRole::Bastion];
    assert_eq!(bastion.id, "sg-existing");
    assert_eq!(bastion.ingress_rules.len(), 1);

    let state = ec2.state();
    let stored = state
        .security_groups
        .iter()
        .find(|sg| sg.id == "sg-existing")
        .unwrap();
    assert_eq!(stored.ingress_rules.len(), 1);
    assert_eq!(stored.ingress_rules[0].from_port, 22);
}

#[tokio::test]
async fn delete_network_removes_everything() {
    let ec2 = MockEc2::new();
    let mut scope = ClusterScope::new(cluster("c1"));
    Service::new(&mut scope, &ec2)
        .with_wait_config(fast_wait())
        .reconcile_network()
        .await
        .unwrap();

    Service::new(&mut scope, &ec2)
        .with_wait_config(fast_wait())
        .delete_network()
        .await
        .unwrap();

    let state = ec2.state();
    assert!(state.vpcs.is_empty());
    assert!(state.subnets.is_empty());
    assert!(state.internet_gateways.is_empty());
    assert!(state.addresses.is_empty());
    assert!(state.route_tables.is_empty());
    assert!(state.security_groups.is_empty());
    assert!(state.nat_gateways.iter().all(|ngw| ngw.state == "deleted"));

    let network = scope.network();
    assert!(network.vpc.id.is_empty());
    assert!(network.subnets.is_empty());
    assert!(network.internet_gateway_id.is_none());
    assert!(network.security_groups.is_empty());
}

#[tokio::test]
async fn delete_tolerates_resources_that_are_already_gone() {
    let ec2 = MockEc2::new();
    let mut scope = ClusterScope::new(cluster("c1"));
    Service::new(&mut scope, &ec2)
        .with_wait_config(fast_wait())
        .reconcile_network()
        .await
        .unwrap();

    ec2.fail_next(
        "DeleteSecurityGroup",
        ApiError::with_code(GROUP_NOT_FOUND, "gone"),
    );
    ec2.fail_next(
        "DeleteRouteTable",
        ApiError::with_code(ROUTE_TABLE_NOT_FOUND, "gone"),
    );
    ec2.fail_next(
        "ReleaseAddress",
        ApiError::with_code(ALLOCATION_NOT_FOUND, "gone"),
    );
    ec2.fail_next("DeleteVpc", ApiError::with_code(VPC_NOT_FOUND, "gone"));

    Service::new(&mut scope, &ec2)
        .with_wait_config(fast_wait())
        .delete_network()
        .await
        .unwrap();
    assert!(scope.network().vpc.id.is_empty());
}

#[tokio::test]
async fn delete_of_unknown_cluster_is_a_no_op() {
    let ec2 = MockEc2::new();
    let mut scope = ClusterScope::new(cluster("c1"));
    Service::new(&mut scope, &ec2)
        .with_wait_config(fast_wait())
        .delete_network()
        .await
        .unwrap();
    assert_eq!(ec2.count_prefixed("Delete"), 0);
    assert_eq!(ec2.count_prefixed("Release"), 0);
}

#[tokio::test]
async fn delete_failure_is_reported() {
    let ec2 = MockEc2::new();
    let mut scope = ClusterScope::new(cluster("c1"));
    Service::new(&mut scope, &ec2)
        .with_wait_config(fast_wait())
        .reconcile_network()
        .await
        .unwrap();

    ec2.fail_next(
        "DeleteSecurityGroup",
        ApiError::with_code(DEPENDENCY_VIOLATION, "in use"),
    );
    let err = Service::new(&mut scope, &ec2)
        .with_wait_config(fast_wait())
        .delete_network()
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(DEPENDENCY_VIOLATION));
    // Nothing after the failing stage ran.
    assert_eq!(ec2.count("DeleteVpc"), 0);
}

#[tokio::test]
async fn unmanaged_vpc_is_left_alone() {
    let ec2 = MockEc2::new();
    let vpc_id = ec2.add_vpc("10.0.0.0/16", Default::default());
    let public_id = ec2.add_subnet(&vpc_id, "10.0.1.0/24", "us-east-1a", Default::default());
    let private_id = ec2.add_subnet(&vpc_id, "10.0.0.0/24", "us-east-1a", Default::default());
    let mut cluster = cluster("c1");
    cluster.spec.network.vpc.id = vpc_id.clone();
    cluster.spec.network.subnets = Subnets::new(vec![
        subnet(&public_id, &vpc_id, "10.0.1.0/24", "us-east-1a", true),
        subnet(&private_id, &vpc_id, "10.0.0.0/24", "us-east-1a", false),
    ]);
    let mut scope = ClusterScope::new(cluster);

    Service::new(&mut scope, &ec2)
        .with_wait_config(fast_wait())
        .reconcile_network()
        .await
        .unwrap();

    assert_eq!(ec2.count("CreateVpc"), 0);
    assert_eq!(ec2.count("CreateSubnet"), 0);
    assert_eq!(ec2.count("CreateInternetGateway"), 0);
    assert_eq!(ec2.count("CreateNatGateway"), 0);
    assert_eq!(ec2.count("CreateRouteTable"), 0);
    // Security groups are always the cluster's own.
    assert_eq!(ec2.count("CreateSecurityGroup"), 3);
    assert!(scope.vpc().is_unmanaged("c1"));
}
