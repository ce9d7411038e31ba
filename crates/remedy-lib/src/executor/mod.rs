//! Remediation executor
//!
//! Carries out one [`Action`] at a time against the Workload Store and the
//! Image Builder. Every collaborator failure is converted into an
//! [`Outcome`]; the only error the executor returns is cancellation.

mod diagnostics;

#[cfg(test)]
mod tests;

pub use diagnostics::{
    check_services, collect_diagnostics, parse_selector, DiagnosticReport, PodDiagnostics,
    ServiceCheck, ServiceStatus,
};

use crate::builder::ImageBuilder;
use crate::models::{Action, FailureKind, Outcome, Target, WorkloadSnapshot};
use crate::settings::{RemedySettings, TagStrategy, TargetSpec, WorkloadSettings};
use crate::store::{timed, DeploymentImage, ManifestSet, RolloutStatus, StoreError, WorkloadStore};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The run was cancelled while the action was in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cancelled")]
pub struct Cancelled;

/// Result of executing one action
#[derive(Debug, Clone)]
pub struct Executed {
    pub outcome: Outcome,
    /// Present for `CollectDiagnostics`
    pub diagnostics: Option<DiagnosticReport>,
}

impl Executed {
    fn outcome(outcome: Outcome) -> Self {
        Self {
            outcome,
            diagnostics: None,
        }
    }
}

/// Executor configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub workload: WorkloadSettings,
    /// Run identifier used in image tags and change-cause annotations
    pub run_id: String,
    pub rollout_timeout: Duration,
    pub rollout_poll: Duration,
    pub call_timeout: Duration,
    pub build_timeout: Duration,
    pub log_tail: i64,
    pub tag_strategy: TagStrategy,
    pub fixed_tag: String,
}

impl ExecutorConfig {
    pub fn from_settings(settings: &RemedySettings, run_id: impl Into<String>) -> Self {
        let execution = &settings.execution;
        Self {
            workload: settings.workload.clone(),
            run_id: run_id.into(),
            rollout_timeout: Duration::from_secs(execution.rollout_timeout_secs),
            rollout_poll: Duration::from_secs(execution.rollout_poll_secs),
            call_timeout: Duration::from_secs(execution.store_call_timeout_secs),
            build_timeout: Duration::from_secs(execution.build_timeout_secs),
            log_tail: execution.log_tail_lines,
            tag_strategy: execution.tag_strategy,
            fixed_tag: execution.fixed_tag.clone(),
        }
    }

    fn namespace(&self) -> &str {
        &self.workload.namespace
    }
}

/// Executes remediation actions for one run
pub struct Executor {
    store: Arc<dyn WorkloadStore>,
    builder: Arc<dyn ImageBuilder>,
    config: ExecutorConfig,
    /// Revision of each deployment before this run first rebuilt it
    known_good: BTreeMap<String, i64>,
}

impl Executor {
    pub fn new(
        store: Arc<dyn WorkloadStore>,
        builder: Arc<dyn ImageBuilder>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            builder,
            config,
            known_good: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn known_good(&self) -> &BTreeMap<String, i64> {
        &self.known_good
    }

    /// Execute `action` as attempt number `sequence`.
    ///
    /// `snapshot` is the snapshot the action was planned from; diagnostics use
    /// its pod list. Cancellation is observed while waiting and while polling
    /// rollouts. Mutations already committed are left in place.
    pub async fn execute(
        &mut self,
        action: &Action,
        sequence: u32,
        snapshot: Option<&WorkloadSnapshot>,
        cancel: &CancellationToken,
    ) -> Result<Executed, Cancelled> {
        debug!(action = %action, sequence, "Executing action");

        match action {
            Action::Wait(duration) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(Cancelled),
                    _ = sleep(*duration) => Ok(Executed::outcome(Outcome::Success)),
                }
            }
            Action::CollectDiagnostics => {
                let report = collect_diagnostics(
                    self.store.as_ref(),
                    &self.config.workload,
                    snapshot.map(|s| s.pods()),
                    self.config.call_timeout,
                    self.config.log_tail,
                )
                .await;
                if !report.is_complete() {
                    warn!(errors = ?report.errors, "Diagnostics collected with errors");
                }
                Ok(Executed {
                    outcome: Outcome::Success,
                    diagnostics: Some(report),
                })
            }
            Action::RebuildAndRedeploy { targets } => {
                let outcome = self.rebuild_and_redeploy(targets, sequence, cancel).await?;
                Ok(Executed::outcome(outcome))
            }
            Action::DeletePodsForRecreate => {
                let selector = self.config.workload.selector.clone();
                Ok(Executed::outcome(self.delete_pods(&selector).await))
            }
            Action::Rollback => Ok(Executed::outcome(self.rollback(cancel).await?)),
            Action::GiveUp { reason } => {
                info!(reason = %reason, "Giving up, no changes made");
                Ok(Executed::outcome(Outcome::Success))
            }
        }
    }

    /// Roll `deployment` back to an explicit revision and wait for the rollout
    pub async fn rollback_to_revision(
        &self,
        deployment: &str,
        revision: i64,
        cancel: &CancellationToken,
    ) -> Result<Outcome, Cancelled> {
        let namespace = self.config.namespace();
        let rolled_back = timed(
            self.config.call_timeout,
            "rollback",
            self.store.rollback_to(namespace, deployment, revision),
        )
        .await;

        if let Err(e) = rolled_back {
            return Ok(store_failure(e));
        }

        info!(deployment = %deployment, revision, "Rollback submitted");
        self.await_rollout(deployment, cancel).await
    }

    async fn rebuild_and_redeploy(
        &mut self,
        targets: &BTreeSet<Target>,
        sequence: u32,
        cancel: &CancellationToken,
    ) -> Result<Outcome, Cancelled> {
        for target in targets {
            let spec = self.config.workload.target(*target).clone();
            // Without a readable revision there is nothing to roll back to
            if let Err(e) = self.remember_known_good(&spec.deployment).await {
                warn!(
                    deployment = %spec.deployment,
                    error = %e,
                    "Failed to read deployment revision"
                );
                return Ok(store_failure(e));
            }

            let outcome = self.redeploy_target(*target, &spec, sequence, cancel).await?;
            if !outcome.is_success() {
                return Ok(outcome);
            }
        }

        Ok(Outcome::Success)
    }

    async fn redeploy_target(
        &self,
        target: Target,
        spec: &TargetSpec,
        sequence: u32,
        cancel: &CancellationToken,
    ) -> Result<Outcome, Cancelled> {
        let tag = self.image_tag(spec, sequence);
        info!(target = %target, tag = %tag, "Rebuilding image");

        let build = self.builder.build(&spec.dockerfile, &tag);
        let image = match timeout(self.config.build_timeout, build).await {
            Err(_) => return Ok(Outcome::timeout(format!("build of {tag}"))),
            Ok(Err(e)) => return Ok(Outcome::failure(FailureKind::BuildFailure, e.to_string())),
            Ok(Ok(image)) => image,
        };

        match timeout(self.config.build_timeout, self.builder.push(&image)).await {
            Err(_) => return Ok(Outcome::timeout(format!("push of {image}"))),
            Ok(Err(e)) => return Ok(Outcome::failure(FailureKind::PushFailure, e.to_string())),
            Ok(Ok(())) => {}
        }

        let manifests = ManifestSet::single(DeploymentImage {
            deployment: spec.deployment.clone(),
            container: spec.container.clone(),
            image: image.to_string(),
        })
        .with_change_cause(format!("{} attempt {sequence}: rebuild {target}", self.config.run_id));

        let namespace = self.config.namespace();
        let apply = self.store.apply(namespace, &manifests);
        let applied = match timed(self.config.call_timeout, "apply", apply).await {
            Ok(applied) => applied,
            Err(e) => return Ok(store_failure(e)),
        };

        // An unchanged manifest (fixed tag) keeps the old pods; recreate them
        // so the controller pulls the re-pushed image.
        if applied.changed.is_empty() {
            debug!(deployment = %spec.deployment, "Manifest unchanged, recreating pods");
            let deleted = self.delete_pods(&spec.selector).await;
            if !deleted.is_success() {
                return Ok(deleted);
            }
        }

        self.await_rollout(&spec.deployment, cancel).await
    }

    async fn rollback(&self, cancel: &CancellationToken) -> Result<Outcome, Cancelled> {
        if self.known_good.is_empty() {
            return Ok(Outcome::failure(
                FailureKind::NoPriorRevision,
                "no deployment was rebuilt in this run",
            ));
        }

        for (deployment, revision) in &self.known_good {
            let outcome = self.rollback_to_revision(deployment, *revision, cancel).await?;
            if !outcome.is_success() {
                return Ok(outcome);
            }
        }

        Ok(Outcome::Success)
    }

    async fn delete_pods(&self, selector: &str) -> Outcome {
        let namespace = self.config.namespace();
        let delete = self.store.delete_pods(namespace, selector);
        match timed(self.config.call_timeout, "delete pods", delete).await {
            Ok(count) => {
                info!(selector = %selector, count, "Deleted pods for recreation");
                Outcome::Success
            }
            Err(e) => store_failure(e),
        }
    }

    /// Poll the rollout until it completes, fails, or the rollout timeout elapses
    async fn await_rollout(
        &self,
        deployment: &str,
        cancel: &CancellationToken,
    ) -> Result<Outcome, Cancelled> {
        let namespace = self.config.namespace();
        let deadline = Instant::now() + self.config.rollout_timeout;

        loop {
            let status = timed(
                self.config.call_timeout,
                "rollout status",
                self.store.rollout_status(namespace, deployment),
            )
            .await;

            match status {
                Ok(RolloutStatus::Complete) => {
                    info!(deployment = %deployment, "Rollout complete");
                    return Ok(Outcome::Success);
                }
                Ok(RolloutStatus::Failed { reason }) => {
                    return Ok(Outcome::timeout(format!("rollout of {deployment}: {reason}")));
                }
                Ok(RolloutStatus::Progressing {
                    desired,
                    updated,
                    available,
                }) => {
                    debug!(
                        deployment = %deployment,
                        desired,
                        updated,
                        available,
                        "Rollout in progress"
                    );
                }
                Err(e) if e.is_retryable() => {
                    debug!(
                        deployment = %deployment,
                        error = %e,
                        "Rollout status unavailable, retrying"
                    );
                }
                Err(e) => return Ok(store_failure(e)),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Outcome::timeout(format!("rollout of {deployment}")));
            }

            let pause = self.config.rollout_poll.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Err(Cancelled),
                _ = sleep(pause) => {}
            }
        }
    }

    async fn remember_known_good(&mut self, deployment: &str) -> Result<(), StoreError> {
        if self.known_good.contains_key(deployment) {
            return Ok(());
        }

        let revision = timed(
            self.config.call_timeout,
            "read revision",
            self.store.current_revision(self.config.namespace(), deployment),
        )
        .await?;

        match revision {
            Some(revision) => {
                debug!(deployment = %deployment, revision, "Recorded known-good revision");
                self.known_good.insert(deployment.to_string(), revision);
            }
            None => warn!(deployment = %deployment, "Deployment has no revision to return to"),
        }
        Ok(())
    }

    fn image_tag(&self, spec: &TargetSpec, sequence: u32) -> String {
        match self.config.tag_strategy {
            TagStrategy::RunScoped => format!("{}:{}-{sequence}", spec.image, self.config.run_id),
            TagStrategy::Fixed => format!("{}:{}", spec.image, self.config.fixed_tag),
        }
    }
}

/// Map a store error onto the outcome recorded for the attempt
fn store_failure(error: StoreError) -> Outcome {
    match error {
        StoreError::Timeout(operation) => Outcome::timeout(operation),
        StoreError::Unavailable(_) => {
            Outcome::failure(FailureKind::StoreUnavailable, error.to_string())
        }
        StoreError::RevisionNotFound { .. } => {
            Outcome::failure(FailureKind::NoPriorRevision, error.to_string())
        }
        StoreError::Rejected { .. } | StoreError::NotFound { .. } => {
            Outcome::failure(FailureKind::StoreRejected, error.to_string())
        }
    }
}
