//! Orchestrator loop
//!
//! Runs Snapshot → Classify → Plan → Execute cycles until the workload is
//! healthy, the planner gives up, the attempt budget runs out, or the run is
//! cancelled. Cycles are strictly sequential and at most one action is in
//! flight at a time.

mod report;

#[cfg(test)]
mod tests;

pub use report::{
    new_run_id, DiagnosticEntry, RunReport, RunStatus, EXIT_ABORTED, EXIT_FAILED, EXIT_SUCCEEDED,
};

use crate::builder::ImageBuilder;
use crate::classifier::Classifier;
use crate::credentials::ClusterCredentials;
use crate::executor::{Cancelled, Executor, ExecutorConfig};
use crate::health::{components, HealthRegistry};
use crate::models::{Action, Condition, FailureKind, Outcome, RemediationAttempt};
use crate::observability::{run_status, RemedyMetrics, RunLogger};
use crate::planner::{Planner, BUDGET_EXHAUSTED};
use crate::probe::{verify, ProbeClient, ProbeSpec};
use crate::settings::{RemedySettings, SettingsError};
use crate::snapshot::SnapshotReader;
use crate::store::WorkloadStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("orchestrator requires a {0}")]
    Missing(&'static str),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// Drives one remediation run to a terminal status
pub struct Orchestrator {
    reader: SnapshotReader,
    classifier: Classifier,
    planner: Planner,
    executor: Executor,
    credentials: ClusterCredentials,
    settings: RemedySettings,
    health: HealthRegistry,
    metrics: RemedyMetrics,
    logger: RunLogger,
    probe_client: Option<Arc<dyn ProbeClient>>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn run_id(&self) -> &str {
        self.logger.run_id()
    }

    /// Run cycles until a terminal status and return the run report.
    ///
    /// Cancellation is checked at the top of every cycle and again before the
    /// decided action runs; a cancelled action appends no attempt.
    pub async fn run(mut self, cancel: CancellationToken) -> RunReport {
        let started_at = Utc::now();
        let namespace = self.settings.workload.namespace.clone();
        let selector = self.settings.workload.selector.clone();
        let budget = self.settings.policy.attempt_budget;

        self.logger
            .log_run_started(&self.credentials.cluster, &namespace, &selector, budget);
        self.metrics.set_run_status(run_status::RUNNING);
        self.health.set_healthy(components::ORCHESTRATOR).await;
        self.health.set_ready(true).await;

        let mut attempts: Vec<RemediationAttempt> = Vec::new();
        let mut diagnostics = Vec::new();
        let mut final_condition = None;
        let mut cycle = 0u32;

        let status = loop {
            if cancel.is_cancelled() {
                break RunStatus::Aborted;
            }
            cycle += 1;
            self.metrics.inc_cycles();

            let read_started = Instant::now();
            let read = self.reader.read(&namespace, &selector).await;
            self.metrics
                .observe_snapshot_latency(read_started.elapsed().as_secs_f64());
            self.health.record(components::WORKLOAD_STORE, &read).await;

            let snapshot = match read {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    self.metrics.inc_snapshot_errors();
                    self.logger.log_snapshot_failed(cycle, &e.to_string());
                    None
                }
            };

            let condition = match &snapshot {
                Some(snapshot) => self.classifier.classify(snapshot, &attempts),
                None => Condition::Unknown,
            };
            final_condition = Some(condition);
            self.metrics.set_condition(condition);
            self.logger
                .log_cycle_classified(cycle, condition, snapshot.as_ref().map(|s| s.pods().len()));

            let Some(mut action) = self.planner.plan(condition, &attempts) else {
                break RunStatus::Succeeded;
            };

            let sequence = attempts.len() as u32 + 1;
            if sequence >= budget && !matches!(action, Action::GiveUp { .. }) {
                debug!(sequence, budget, planned = %action, "Attempt budget reached");
                action = Action::give_up(BUDGET_EXHAUSTED);
            }

            if cancel.is_cancelled() {
                break RunStatus::Aborted;
            }

            let executed = match self
                .executor
                .execute(&action, sequence, snapshot.as_ref(), &cancel)
                .await
            {
                Ok(executed) => executed,
                Err(Cancelled) => break RunStatus::Aborted,
            };

            self.record_component_health(&action, &executed.outcome).await;
            self.metrics.record_attempt(&action, &executed.outcome);
            self.logger
                .log_action_executed(sequence, condition, &action, &executed.outcome);

            if let Some(report) = executed.diagnostics {
                diagnostics.push(DiagnosticEntry { sequence, report });
            }

            attempts.push(RemediationAttempt {
                sequence,
                condition,
                action: action.clone(),
                outcome: executed.outcome,
                timestamp: Utc::now(),
                observed_restarts: snapshot.map(|s| s.restart_counts()).unwrap_or_default(),
            });

            if let Action::GiveUp { reason } = action {
                break RunStatus::Failed { reason };
            }
        };

        let verification = match (&status, &self.probe_client) {
            (RunStatus::Succeeded, Some(client)) if !self.settings.probes.is_empty() => {
                let report = verify(client.as_ref(), &self.settings.probes).await;
                if !report.all_passed() {
                    info!(failed = report.failed().count(), "Smoke probes reported failures");
                }
                Some(report)
            }
            _ => None,
        };

        self.finish(&status, attempts.len()).await;

        RunReport {
            run_id: self.logger.run_id().to_string(),
            cluster: self.credentials.cluster.clone(),
            namespace,
            selector,
            started_at,
            finished_at: Utc::now(),
            status,
            final_condition,
            attempts,
            diagnostics,
            verification,
        }
    }

    async fn record_component_health(&self, action: &Action, outcome: &Outcome) {
        match outcome.failure_kind() {
            Some(FailureKind::BuildFailure | FailureKind::PushFailure) => {
                self.health
                    .set_degraded(components::IMAGE_BUILDER, outcome.to_string())
                    .await;
            }
            Some(FailureKind::StoreUnavailable) => {
                self.health
                    .set_degraded(components::WORKLOAD_STORE, outcome.to_string())
                    .await;
            }
            _ if matches!(action, Action::RebuildAndRedeploy { .. }) && outcome.is_success() => {
                self.health.set_healthy(components::IMAGE_BUILDER).await;
            }
            _ => {}
        }
    }

    async fn finish(&self, status: &RunStatus, attempts: usize) {
        let value = match status {
            RunStatus::Succeeded => run_status::SUCCEEDED,
            RunStatus::Failed { .. } => run_status::FAILED,
            RunStatus::Aborted => run_status::ABORTED,
        };
        self.metrics.set_run_status(value);

        match status {
            RunStatus::Succeeded => self.health.set_healthy(components::ORCHESTRATOR).await,
            RunStatus::Failed { reason } => {
                self.health
                    .set_degraded(components::ORCHESTRATOR, reason.clone())
                    .await
            }
            RunStatus::Aborted => {
                self.health
                    .set_degraded(components::ORCHESTRATOR, "run aborted")
                    .await
            }
        }

        self.logger
            .log_run_finished(status.label(), status.reason(), attempts);
    }
}

/// Builder for an [`Orchestrator`]
pub struct OrchestratorBuilder {
    store: Option<Arc<dyn WorkloadStore>>,
    image_builder: Option<Arc<dyn ImageBuilder>>,
    credentials: Option<ClusterCredentials>,
    settings: RemedySettings,
    run_id: Option<String>,
    health: Option<HealthRegistry>,
    probe_client: Option<Arc<dyn ProbeClient>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            image_builder: None,
            credentials: None,
            settings: RemedySettings::default(),
            run_id: None,
            health: None,
            probe_client: None,
        }
    }

    /// Set the Workload Store client
    pub fn store(mut self, store: Arc<dyn WorkloadStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the Image Builder
    pub fn image_builder(mut self, builder: Arc<dyn ImageBuilder>) -> Self {
        self.image_builder = Some(builder);
        self
    }

    /// Set the credentials acquired before the run
    pub fn credentials(mut self, credentials: ClusterCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn settings(mut self, settings: RemedySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Override the generated run id
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Share a health registry with the HTTP endpoint
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Enable post-run smoke probes
    pub fn probe_client(mut self, client: Arc<dyn ProbeClient>) -> Self {
        self.probe_client = Some(client);
        self
    }

    pub fn probes(mut self, probes: Vec<ProbeSpec>) -> Self {
        self.settings.probes = probes;
        self
    }

    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        let store = self.store.ok_or(OrchestratorError::Missing("workload store"))?;
        let image_builder = self
            .image_builder
            .ok_or(OrchestratorError::Missing("image builder"))?;
        let credentials = self
            .credentials
            .ok_or(OrchestratorError::Missing("cluster credentials"))?;
        self.settings.validate()?;

        let run_id = self.run_id.unwrap_or_else(|| new_run_id(Utc::now()));
        let call_timeout = Duration::from_secs(self.settings.execution.store_call_timeout_secs);

        Ok(Orchestrator {
            reader: SnapshotReader::new(store.clone(), call_timeout),
            classifier: self.settings.policy.classifier(),
            planner: Planner::new(self.settings.policy.planner_policy()),
            executor: Executor::new(
                store,
                image_builder,
                ExecutorConfig::from_settings(&self.settings, run_id.clone()),
            ),
            credentials,
            settings: self.settings,
            health: self.health.unwrap_or_default(),
            metrics: RemedyMetrics::new(),
            logger: RunLogger::new(run_id),
            probe_client: self.probe_client,
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
