use super::{ElbApi, LoadBalancerInfo};
use crate::awserrors::ApiError;
use crate::ec2::ApiResult;
use aws_config::SdkConfig;
use aws_sdk_elasticloadbalancing::types::{
    ConnectionSettings, HealthCheck, Instance, Listener, LoadBalancerAttributes,
    LoadBalancerDescription, Tag,
};
use capa_model::{
    ClassicElb, ClassicElbAttributes, ClassicElbHealthCheck, ClassicElbListener,
    ClassicElbProtocol, ClassicElbScheme, Tags,
};
use log::warn;
use std::str::FromStr;
use std::time::Duration;

/// [`ElbApi`] backed by `aws-sdk-elasticloadbalancing`.
#[derive(Clone, Debug)]
pub struct SdkElb {
    client: aws_sdk_elasticloadbalancing::Client,
}

impl SdkElb {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_elasticloadbalancing::Client::new(config),
        }
    }

    pub fn from_client(client: aws_sdk_elasticloadbalancing::Client) -> Self {
        Self { client }
    }
}

fn seconds(duration: Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}

fn from_seconds(seconds: i32) -> Duration {
    Duration::from_secs(u64::try_from(seconds).unwrap_or_default())
}

// AWS reports the scheme in lower case.
fn scheme(value: Option<&str>) -> ClassicElbScheme {
    match value {
        Some(s) if s.eq_ignore_ascii_case(ClassicElbScheme::Internal.as_str()) => {
            ClassicElbScheme::Internal
        }
        _ => ClassicElbScheme::InternetFacing,
    }
}

fn protocol(value: &str) -> Option<ClassicElbProtocol> {
    ClassicElbProtocol::from_str(&value.to_ascii_uppercase()).ok()
}

fn sdk_listener(listener: &ClassicElbListener) -> ApiResult<Listener> {
    Ok(Listener::builder()
        .protocol(listener.protocol.as_str())
        .load_balancer_port(listener.port)
        .instance_protocol(listener.instance_protocol.as_str())
        .instance_port(listener.instance_port)
        .build()?)
}

fn model_listener(listener: Listener) -> Option<ClassicElbListener> {
    let lb_protocol = protocol(&listener.protocol);
    let instance_protocol = listener
        .instance_protocol
        .as_deref()
        .map(protocol)
        .unwrap_or(lb_protocol);
    match (lb_protocol, instance_protocol) {
        (Some(protocol), Some(instance_protocol)) => Some(ClassicElbListener {
            protocol,
            port: listener.load_balancer_port,
            instance_protocol,
            instance_port: listener.instance_port,
        }),
        _ => {
            warn!("Ignoring listener with unknown protocol '{}'", listener.protocol);
            None
        }
    }
}

fn sdk_health_check(health_check: &ClassicElbHealthCheck) -> ApiResult<HealthCheck> {
    Ok(HealthCheck::builder()
        .target(&health_check.target)
        .interval(seconds(health_check.interval))
        .timeout(seconds(health_check.timeout))
        .healthy_threshold(health_check.healthy_threshold)
        .unhealthy_threshold(health_check.unhealthy_threshold)
        .build()?)
}

fn model_health_check(health_check: HealthCheck) -> ClassicElbHealthCheck {
    ClassicElbHealthCheck {
        target: health_check.target,
        interval: from_seconds(health_check.interval),
        timeout: from_seconds(health_check.timeout),
        healthy_threshold: health_check.healthy_threshold,
        unhealthy_threshold: health_check.unhealthy_threshold,
    }
}

fn sdk_tags(tags: &Tags) -> ApiResult<Vec<Tag>> {
    tags.iter()
        .map(|(k, v)| Ok(Tag::builder().key(k).value(v).build()?))
        .collect()
}

fn load_balancer_info(description: LoadBalancerDescription) -> LoadBalancerInfo {
    LoadBalancerInfo {
        elb: ClassicElb {
            name: description.load_balancer_name.unwrap_or_default(),
            dns_name: description.dns_name.unwrap_or_default(),
            scheme: scheme(description.scheme.as_deref()),
            subnet_ids: description.subnets.unwrap_or_default(),
            security_group_ids: description.security_groups.unwrap_or_default(),
            listeners: description
                .listener_descriptions
                .unwrap_or_default()
                .into_iter()
                .filter_map(|d| d.listener)
                .filter_map(model_listener)
                .collect(),
            health_check: description.health_check.map(model_health_check),
            attributes: ClassicElbAttributes::default(),
            tags: Tags::default(),
        },
        vpc_id: description.vpc_id.unwrap_or_default(),
    }
}

#[async_trait::async_trait]
impl ElbApi for SdkElb {
    async fn describe_load_balancers(&self, names: &[String]) -> ApiResult<Vec<LoadBalancerInfo>> {
        let output = self
            .client
            .describe_load_balancers()
            .set_load_balancer_names(Some(names.to_vec()))
            .send()
            .await?;
        Ok(output
            .load_balancer_descriptions
            .unwrap_or_default()
            .into_iter()
            .map(load_balancer_info)
            .collect())
    }

    async fn create_load_balancer(&self, elb: &ClassicElb) -> ApiResult<String> {
        let listeners = elb
            .listeners
            .iter()
            .map(sdk_listener)
            .collect::<ApiResult<Vec<_>>>()?;
        let output = self
            .client
            .create_load_balancer()
            .load_balancer_name(&elb.name)
            .scheme(elb.scheme.as_str())
            .set_listeners(Some(listeners))
            .set_subnets(Some(elb.subnet_ids.clone()))
            .set_security_groups(Some(elb.security_group_ids.clone()))
            .set_tags(Some(sdk_tags(&elb.tags)?))
            .send()
            .await?;
        output
            .dns_name
            .ok_or_else(|| ApiError::other("The response did not include a DNS name"))
    }

    async fn configure_health_check(
        &self,
        name: &str,
        health_check: &ClassicElbHealthCheck,
    ) -> ApiResult<()> {
        self.client
            .configure_health_check()
            .load_balancer_name(name)
            .health_check(sdk_health_check(health_check)?)
            .send()
            .await?;
        Ok(())
    }

    async fn describe_load_balancer_attributes(
        &self,
        name: &str,
    ) -> ApiResult<ClassicElbAttributes> {
        let output = self
            .client
            .describe_load_balancer_attributes()
            .load_balancer_name(name)
            .send()
            .await?;
        let idle_timeout = output
            .load_balancer_attributes
            .and_then(|a| a.connection_settings)
            .map(|c| from_seconds(c.idle_timeout))
            .unwrap_or_default();
        Ok(ClassicElbAttributes { idle_timeout })
    }

    async fn modify_load_balancer_attributes(
        &self,
        name: &str,
        attributes: &ClassicElbAttributes,
    ) -> ApiResult<()> {
        let connection_settings = ConnectionSettings::builder()
            .idle_timeout(seconds(attributes.idle_timeout))
            .build()?;
        self.client
            .modify_load_balancer_attributes()
            .load_balancer_name(name)
            .load_balancer_attributes(
                LoadBalancerAttributes::builder()
                    .connection_settings(connection_settings)
                    .build(),
            )
            .send()
            .await?;
        Ok(())
    }

    async fn describe_tags(&self, name: &str) -> ApiResult<Tags> {
        let output = self
            .client
            .describe_tags()
            .load_balancer_names(name)
            .send()
            .await?;
        Ok(output
            .tag_descriptions
            .unwrap_or_default()
            .into_iter()
            .flat_map(|d| d.tags.unwrap_or_default())
            .map(|t| (t.key, t.value.unwrap_or_default()))
            .collect())
    }

    async fn register_instances(&self, name: &str, instance_ids: &[String]) -> ApiResult<()> {
        self.client
            .register_instances_with_load_balancer()
            .load_balancer_name(name)
            .set_instances(Some(
                instance_ids
                    .iter()
                    .map(|id| Instance::builder().instance_id(id).build())
                    .collect(),
            ))
            .send()
            .await?;
        Ok(())
    }

    async fn delete_load_balancer(&self, name: &str) -> ApiResult<()> {
        self.client
            .delete_load_balancer()
            .load_balancer_name(name)
            .send()
            .await?;
        Ok(())
    }
}
