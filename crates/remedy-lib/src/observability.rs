//! Observability infrastructure for remediation runs
//!
//! Provides:
//! - Prometheus metrics (cycles, attempts by action/outcome, snapshot latency,
//!   current condition, run status)
//! - Structured lifecycle logging with tracing

use crate::models::{Action, Condition, Outcome};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Histogram, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Snapshot reads are a handful of API calls; buckets in seconds
const SNAPSHOT_LATENCY_BUCKETS: &[f64] = &[
    0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

static GLOBAL_METRICS: OnceLock<RemedyMetricsInner> = OnceLock::new();

struct RemedyMetricsInner {
    cycles_total: IntCounter,
    attempts_total: IntCounterVec,
    snapshot_latency_seconds: Histogram,
    snapshot_errors_total: IntCounter,
    condition: IntGaugeVec,
    run_status: IntGauge,
}

impl RemedyMetricsInner {
    fn new() -> Self {
        Self {
            cycles_total: register_int_counter!(
                "remedy_cycles_total",
                "Number of orchestrator cycles started"
            )
            .expect("Failed to register cycles_total"),

            attempts_total: register_int_counter_vec!(
                "remedy_attempts_total",
                "Remediation attempts by action and outcome",
                &["action", "outcome"]
            )
            .expect("Failed to register attempts_total"),

            snapshot_latency_seconds: register_histogram!(
                "remedy_snapshot_latency_seconds",
                "Time spent reading a workload snapshot",
                SNAPSHOT_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register snapshot_latency_seconds"),

            snapshot_errors_total: register_int_counter!(
                "remedy_snapshot_errors_total",
                "Snapshot reads that failed with a transient error"
            )
            .expect("Failed to register snapshot_errors_total"),

            condition: register_int_gauge_vec!(
                "remedy_workload_condition",
                "1 for the most recently classified workload condition",
                &["condition"]
            )
            .expect("Failed to register workload_condition"),

            run_status: register_int_gauge!(
                "remedy_run_status",
                "0 running, 1 succeeded, 2 failed, 3 aborted"
            )
            .expect("Failed to register run_status"),
        }
    }
}

/// Run status values exported by `remedy_run_status`
pub mod run_status {
    pub const RUNNING: i64 = 0;
    pub const SUCCEEDED: i64 = 1;
    pub const FAILED: i64 = 2;
    pub const ABORTED: i64 = 3;
}

/// Handle to the process-wide remediation metrics
#[derive(Clone)]
pub struct RemedyMetrics {
    _private: (),
}

impl Default for RemedyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RemedyMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(RemedyMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &RemedyMetricsInner {
        GLOBAL_METRICS.get_or_init(RemedyMetricsInner::new)
    }

    pub fn inc_cycles(&self) {
        self.inner().cycles_total.inc();
    }

    pub fn record_attempt(&self, action: &Action, outcome: &Outcome) {
        self.inner()
            .attempts_total
            .with_label_values(&[action.kind(), outcome.label()])
            .inc();
    }

    pub fn observe_snapshot_latency(&self, duration_secs: f64) {
        self.inner().snapshot_latency_seconds.observe(duration_secs);
    }

    pub fn inc_snapshot_errors(&self) {
        self.inner().snapshot_errors_total.inc();
    }

    /// Set the current condition to 1 and every other condition to 0
    pub fn set_condition(&self, current: Condition) {
        for condition in Condition::ALL {
            self.inner()
                .condition
                .with_label_values(&[condition.as_str()])
                .set(i64::from(condition == current));
        }
    }

    pub fn set_run_status(&self, status: i64) {
        self.inner().run_status.set(status);
    }
}

/// Structured logger for run lifecycle events
#[derive(Debug, Clone)]
pub struct RunLogger {
    run_id: String,
}

impl RunLogger {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn log_run_started(&self, cluster: &str, namespace: &str, selector: &str, budget: u32) {
        info!(
            event = "run_started",
            run_id = %self.run_id,
            cluster = %cluster,
            namespace = %namespace,
            selector = %selector,
            attempt_budget = budget,
            "Remediation run started"
        );
    }

    pub fn log_cycle_classified(&self, cycle: u32, condition: Condition, pods: Option<usize>) {
        info!(
            event = "cycle_classified",
            run_id = %self.run_id,
            cycle = cycle,
            condition = %condition,
            pods = ?pods,
            "Workload classified"
        );
    }

    pub fn log_snapshot_failed(&self, cycle: u32, error: &str) {
        warn!(
            event = "snapshot_failed",
            run_id = %self.run_id,
            cycle = cycle,
            error = %error,
            "Snapshot read failed, treating workload as unknown"
        );
    }

    pub fn log_action_executed(
        &self,
        sequence: u32,
        condition: Condition,
        action: &Action,
        outcome: &Outcome,
    ) {
        if outcome.is_success() {
            info!(
                event = "action_executed",
                run_id = %self.run_id,
                sequence = sequence,
                condition = %condition,
                action = %action,
                outcome = %outcome,
                "Remediation action executed"
            );
        } else {
            warn!(
                event = "action_executed",
                run_id = %self.run_id,
                sequence = sequence,
                condition = %condition,
                action = %action,
                outcome = %outcome,
                "Remediation action did not succeed"
            );
        }
    }

    pub fn log_run_finished(&self, status: &str, reason: Option<&str>, attempts: usize) {
        info!(
            event = "run_finished",
            run_id = %self.run_id,
            status = %status,
            reason = ?reason,
            attempts = attempts,
            "Remediation run finished"
        );
    }
}
