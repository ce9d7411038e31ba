//! Run report produced for the operator

use crate::executor::DiagnosticReport;
use crate::models::{Condition, RemediationAttempt};
use crate::probe::VerificationReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

pub const EXIT_SUCCEEDED: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ABORTED: i32 = 130;

/// Terminal state of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed { reason: String },
    Aborted,
}

impl RunStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed { .. } => "failed",
            RunStatus::Aborted => "aborted",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            RunStatus::Failed { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Succeeded => EXIT_SUCCEEDED,
            RunStatus::Failed { .. } => EXIT_FAILED,
            RunStatus::Aborted => EXIT_ABORTED,
        }
    }
}

/// Diagnostics collected by one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticEntry {
    pub sequence: u32,
    pub report: DiagnosticReport,
}

/// Structured summary of one remediation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub cluster: String,
    pub namespace: String,
    pub selector: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    /// Condition observed by the last cycle, if any cycle ran
    pub final_condition: Option<Condition>,
    pub attempts: Vec<RemediationAttempt>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<DiagnosticEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    /// Plain-language summary with the full attempt trail
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let condition = self
            .final_condition
            .map(|c| c.to_string())
            .unwrap_or_else(|| "not observed".to_string());

        let _ = match &self.status {
            RunStatus::Succeeded => writeln!(
                out,
                "Run {} succeeded: workload is {condition}",
                self.run_id
            ),
            RunStatus::Failed { reason } => writeln!(
                out,
                "Run {} failed: {reason} (last condition {condition})",
                self.run_id
            ),
            RunStatus::Aborted => writeln!(
                out,
                "Run {} aborted (last condition {condition})",
                self.run_id
            ),
        };

        for attempt in &self.attempts {
            let _ = writeln!(
                out,
                "  #{:<2} {:<18} {:<40} {}",
                attempt.sequence,
                attempt.condition.to_string(),
                attempt.action.to_string(),
                attempt.outcome
            );
        }

        if let Some(verification) = &self.verification {
            let passed = verification.results.iter().filter(|r| r.passed).count();
            let _ = writeln!(out, "  smoke probes: {passed}/{} passed", verification.results.len());
        }

        out
    }
}

/// Run identifier derived from the start time
pub fn new_run_id(now: DateTime<Utc>) -> String {
    format!("remedy-{}", now.format("%Y%m%d%H%M%S"))
}
