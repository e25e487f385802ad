/*!

The cluster agent runs a single pass of the AWS cluster provider. It reads the desired cluster (and
optionally one of its machines) from the files named in its environment, reconciles or deletes
them in AWS, and writes the discovered status back for the next run.

| Variable            | Required | Meaning                                                 |
|---------------------|----------|---------------------------------------------------------|
| `CAPA_ACTION`       | yes      | `reconcile` or `delete`                                 |
| `CAPA_CLUSTER_FILE` | yes      | the cluster document, YAML or JSON                      |
| `CAPA_STATUS_FILE`  | yes      | where the discovered status is kept between runs        |
| `CAPA_MACHINE_FILE` | no       | a machine document to act on after the cluster          |
| `CAPA_USERDATA_DIR` | no       | user data files named `controlplane`, `node`, `bastion` |
| `CAPA_ROLE_ARN`     | no       | a role to assume for all AWS calls                      |

A delete removes the machine before the cluster; a reconcile converges the cluster before the
machine.

!*/

mod bootstrap;
mod error;
mod status;

use agent_utils::aws::aws_config;
use agent_utils::{init_agent_logger, json_display};
use bootstrap::BootstrapData;
use capa_cloud::{
    Clients, ClusterActuator, ClusterScope, MachineActuator, MachineScope, SdkEc2, SdkElb,
    StaticUserData,
};
use capa_model::{ClusterAction, Machine, MachineStatus};
use error::Result;
use log::{debug, info};
use snafu::{ensure, ResultExt};
use status::{FileStatusClient, StatusClient};
use std::collections::BTreeMap;

#[tokio::main]
async fn main() {
    init_agent_logger(env!("CARGO_CRATE_NAME"), None);
    if let Err(e) = run().await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let bootstrap = BootstrapData::from_env()?;
    let client = FileStatusClient::new(&bootstrap);
    run_with(&bootstrap, &client).await
}

async fn run_with<S: StatusClient>(bootstrap: &BootstrapData, client: &S) -> Result<()> {
    let mut status = client.get_status().await?;

    let mut cluster = client.get_cluster().await?;
    if let Some(previous) = &status.cluster {
        cluster.status = previous.clone();
    }
    let machine = match client.get_machine().await? {
        Some(mut machine) => {
            ensure!(
                machine.namespace == cluster.namespace,
                error::MachineNamespaceSnafu {
                    name: &machine.name,
                    namespace: &machine.namespace,
                    cluster_namespace: &cluster.namespace,
                }
            );
            if let Some(previous) = status.machines.get(&machine.name) {
                machine.status = previous.clone();
            }
            Some(machine)
        }
        None => None,
    };

    let config = aws_config(&cluster.spec.region, bootstrap.role_arn.as_deref(), None)
        .await
        .context(error::AwsConfigSnafu)?;
    let ec2 = SdkEc2::new(&config);
    let elb = SdkElb::new(&config);
    let user_data = client.get_user_data().await?;
    let agent = Agent {
        ec2: &ec2,
        elb: &elb,
        user_data: &user_data,
    };

    let mut cluster = ClusterScope::new(cluster);
    let mut machine = machine.map(MachineScope::new);
    info!(
        "Running '{}' for cluster '{}/{}'",
        bootstrap.action,
        cluster.namespace(),
        cluster.name()
    );
    let outcome = match bootstrap.action {
        ClusterAction::Reconcile => agent.reconcile(&mut cluster, machine.as_mut()).await,
        ClusterAction::Delete => agent.delete(&mut cluster, machine.as_mut()).await,
    };

    // Whatever was discovered is kept, also when the pass failed part way.
    status.cluster = Some(cluster.into_cluster().status);
    if let Some(machine) = machine.map(MachineScope::into_machine) {
        record_machine(&mut status.machines, machine, bootstrap.action, outcome.is_ok());
    }
    client.send_status(&status).await?;
    debug!("Status: {}", json_display(&status));

    outcome
}

fn record_machine(
    machines: &mut BTreeMap<String, MachineStatus>,
    machine: Machine,
    action: ClusterAction,
    succeeded: bool,
) {
    if action == ClusterAction::Delete && succeeded {
        machines.remove(&machine.name);
    } else {
        machines.insert(machine.name, machine.status);
    }
}

struct Agent<'a> {
    ec2: &'a SdkEc2,
    elb: &'a SdkElb,
    user_data: &'a StaticUserData,
}

impl<'a> Agent<'a> {
    fn clients(&self) -> Clients<'a, SdkEc2, SdkElb> {
        Clients::new(self.ec2, self.elb, self.user_data)
    }

    async fn reconcile(
        &self,
        cluster: &mut ClusterScope,
        machine: Option<&mut MachineScope>,
    ) -> Result<()> {
        let name = cluster.name().to_string();
        ClusterActuator::new(self.clients())
            .reconcile(cluster)
            .await
            .context(error::ClusterReconcileSnafu { name })?;

        if let Some(machine) = machine {
            let actuator = MachineActuator::new(self.clients());
            let exists = actuator
                .exists(cluster, machine)
                .await
                .context(error::MachineSnafu {
                    op: "look up",
                    name: machine.name(),
                })?;
            let (op, result) = if exists {
                ("update", actuator.update(cluster, machine).await)
            } else {
                ("create", actuator.create(cluster, machine).await)
            };
            result.context(error::MachineSnafu {
                op,
                name: machine.name(),
            })?;
        }
        Ok(())
    }

    async fn delete(
        &self,
        cluster: &mut ClusterScope,
        machine: Option<&mut MachineScope>,
    ) -> Result<()> {
        if let Some(machine) = machine {
            MachineActuator::new(self.clients())
                .delete(cluster, machine)
                .await
                .context(error::MachineSnafu {
                    op: "delete",
                    name: machine.name(),
                })?;
        }

        let name = cluster.name().to_string();
        ClusterActuator::new(self.clients())
            .delete(cluster)
            .await
            .context(error::ClusterDeleteSnafu { name })
    }
}
