//! Manual remediation commands: rebuild, recreate and rollback

use anyhow::{bail, Result};
use remedy_lib::models::{Action, Outcome, Target};
use serde::Serialize;
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;

use crate::client::ClusterSession;
use crate::output::{
    color_outcome, print_error, print_info, print_json, print_success, OutputFormat,
};

#[derive(Debug, Serialize)]
struct ActionResult<'a> {
    action: String,
    outcome: &'a Outcome,
}

/// Rebuild and redeploy `targets` (every tier when empty)
pub async fn rebuild(
    session: &ClusterSession,
    targets: BTreeSet<Target>,
    format: OutputFormat,
) -> Result<()> {
    let targets = if targets.is_empty() { Target::all() } else { targets };
    execute(session, Action::RebuildAndRedeploy { targets }, format).await
}

/// Delete the workload's pods so their controllers recreate them
pub async fn recreate(session: &ClusterSession, format: OutputFormat) -> Result<()> {
    execute(session, Action::DeletePodsForRecreate, format).await
}

/// Roll `deployment` back to `revision` and wait for the rollout
pub async fn rollback(
    session: &ClusterSession,
    deployment: &str,
    revision: i64,
    format: OutputFormat,
) -> Result<()> {
    if matches!(format, OutputFormat::Table) {
        print_info(&format!("Rolling back {deployment} to revision {revision}"));
    }

    let cancel = cancel_on_interrupt();
    let Ok(outcome) = session
        .executor()
        .rollback_to_revision(deployment, revision, &cancel)
        .await
    else {
        bail!("Interrupted while waiting for the rollout of {deployment}");
    };

    report(format!("Rollback {deployment} to revision {revision}"), &outcome, format)
}

async fn execute(session: &ClusterSession, action: Action, format: OutputFormat) -> Result<()> {
    if matches!(format, OutputFormat::Table) {
        print_info(&format!("Executing {action}"));
    }

    let cancel = cancel_on_interrupt();
    let mut executor = session.executor();
    let Ok(executed) = executor.execute(&action, 1, None, &cancel).await else {
        bail!("Interrupted; changes already applied were left in place");
    };

    report(action.to_string(), &executed.outcome, format)
}

fn report(action: String, outcome: &Outcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&ActionResult {
            action: action.clone(),
            outcome,
        })?,
        OutputFormat::Table => {
            if outcome.is_success() {
                print_success(&format!("{action}: {}", color_outcome(outcome)));
            } else {
                print_error(&format!("{action}: {}", color_outcome(outcome)));
            }
        }
    }

    if !outcome.is_success() {
        bail!("{action} did not succeed: {outcome}");
    }
    Ok(())
}

fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    cancel
}
