//! Workload status command

use anyhow::Result;
use colored::Colorize;
use remedy_lib::{
    executor::{check_services, ServiceCheck},
    models::{Condition, PodRecord, Target},
    store::{timed, RolloutStatus},
};
use serde::Serialize;
use tabled::Tabled;

use crate::client::ClusterSession;
use crate::output::{
    color_condition, color_status, print_heading, print_json, print_table, OutputFormat,
};

#[derive(Tabled)]
struct PodRow {
    #[tabled(rename = "Pod")]
    name: String,
    #[tabled(rename = "Phase")]
    phase: String,
    #[tabled(rename = "Container")]
    container: String,
    #[tabled(rename = "Restarts")]
    restarts: u32,
    #[tabled(rename = "Ready")]
    ready: String,
}

#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "Tier")]
    target: String,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Status")]
    status: String,
}

#[derive(Tabled)]
struct DeploymentRow {
    #[tabled(rename = "Deployment")]
    deployment: String,
    #[tabled(rename = "Revision")]
    revision: String,
    #[tabled(rename = "Rollout")]
    rollout: String,
}

/// Rollout state of one target deployment
#[derive(Debug, Serialize)]
struct DeploymentState {
    target: Target,
    deployment: String,
    revision: Option<i64>,
    rollout: String,
}

#[derive(Debug, Serialize)]
struct StatusView<'a> {
    namespace: &'a str,
    condition: Condition,
    pods: &'a [PodRecord],
    services: Vec<ServiceCheck>,
    deployments: Vec<DeploymentState>,
}

/// Show the classified workload condition with pods, services and rollouts
pub async fn show_status(session: &ClusterSession, format: OutputFormat) -> Result<()> {
    let snapshot = session.snapshot().await?;
    let condition = session
        .settings
        .policy
        .classifier()
        .classify(&snapshot, &[]);
    let services = check_services(snapshot.services(), &session.settings.workload);
    let deployments = deployment_states(session).await;

    let view = StatusView {
        namespace: snapshot.namespace(),
        condition,
        pods: snapshot.pods(),
        services,
        deployments,
    };

    match format {
        OutputFormat::Json => print_json(&view)?,
        OutputFormat::Table => {
            print_heading("Workload Status");
            println!("Namespace: {}", view.namespace.cyan());
            println!("Condition: {}", color_condition(view.condition));
            println!();

            println!("{}", "Pods".bold());
            print_table(pod_rows(view.pods));
            println!();

            println!("{}", "Services".bold());
            print_table(
                view.services
                    .iter()
                    .map(|check| ServiceRow {
                        target: check.target.to_string(),
                        service: check.service.clone(),
                        status: color_status(&check.status.to_string()),
                    })
                    .collect(),
            );
            println!();

            println!("{}", "Deployments".bold());
            print_table(
                view.deployments
                    .iter()
                    .map(|d| DeploymentRow {
                        deployment: d.deployment.clone(),
                        revision: d.revision.map_or_else(|| "-".to_string(), |r| r.to_string()),
                        rollout: d.rollout.clone(),
                    })
                    .collect(),
            );
        }
    }

    Ok(())
}

fn pod_rows(pods: &[PodRecord]) -> Vec<PodRow> {
    pods.iter()
        .map(|pod| PodRow {
            name: pod.name.clone(),
            phase: color_status(&pod.phase.to_string()),
            container: pod.container_state.to_string(),
            restarts: pod.restart_count,
            ready: if pod.ready { "yes".green().to_string() } else { "no".red().to_string() },
        })
        .collect()
}

// Rollout lookups are informational; a failed lookup is shown, not raised
async fn deployment_states(session: &ClusterSession) -> Vec<DeploymentState> {
    let namespace = &session.settings.workload.namespace;
    let mut states = Vec::new();

    for target in Target::ALL {
        let deployment = session.settings.workload.target(target).deployment.clone();

        let revision = timed(
            session.call_timeout(),
            "read revision",
            session.store().current_revision(namespace, &deployment),
        )
        .await
        .ok()
        .flatten();

        let rollout = match timed(
            session.call_timeout(),
            "rollout status",
            session.store().rollout_status(namespace, &deployment),
        )
        .await
        {
            Ok(status) => describe_rollout(&status),
            Err(e) => format!("error: {e}"),
        };

        states.push(DeploymentState {
            target,
            deployment,
            revision,
            rollout,
        });
    }

    states
}

fn describe_rollout(status: &RolloutStatus) -> String {
    match status {
        RolloutStatus::Complete => "complete".to_string(),
        RolloutStatus::Progressing {
            desired,
            updated,
            available,
        } => format!("progressing ({updated}/{desired} updated, {available} available)"),
        RolloutStatus::Failed { reason } => format!("failed: {reason}"),
    }
}
