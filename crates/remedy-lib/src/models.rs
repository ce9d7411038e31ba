//! Core data models for workload diagnosis and remediation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

/// Pod lifecycle phase as reported by the Workload Store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Parse the phase string used by the Kubernetes API
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// State of the pod's primary container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ContainerState {
    Waiting {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Running,
    Terminated {
        reason: String,
        exit_code: i32,
    },
}

impl ContainerState {
    pub fn waiting(reason: impl Into<String>) -> Self {
        ContainerState::Waiting {
            reason: reason.into(),
            message: None,
        }
    }

    /// Reason string when the container is waiting
    pub fn waiting_reason(&self) -> Option<&str> {
        match self {
            ContainerState::Waiting { reason, .. } => Some(reason.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Waiting { reason, .. } => write!(f, "Waiting({reason})"),
            ContainerState::Running => write!(f, "Running"),
            ContainerState::Terminated { reason, exit_code } => {
                write!(f, "Terminated({reason}, exit {exit_code})")
            }
        }
    }
}

/// One pod of the workload at the time of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodRecord {
    pub name: String,
    pub phase: PodPhase,
    pub container_state: ContainerState,
    pub restart_count: u32,
    pub ready: bool,
}

impl PodRecord {
    /// Whether phase and container state agree with each other.
    ///
    /// A failed container (non-zero exit) is only legitimate in a `Failed` pod
    /// or a `Running` pod waiting for its restart.
    pub fn is_consistent(&self) -> bool {
        match (&self.container_state, self.phase) {
            (ContainerState::Terminated { exit_code, .. }, phase) if *exit_code != 0 => {
                matches!(phase, PodPhase::Failed | PodPhase::Running)
            }
            (ContainerState::Terminated { .. }, phase) => {
                matches!(phase, PodPhase::Succeeded | PodPhase::Running)
            }
            (ContainerState::Running, phase) => phase == PodPhase::Running,
            (ContainerState::Waiting { .. }, phase) => {
                matches!(phase, PodPhase::Pending | PodPhase::Running)
            }
        }
    }
}

/// A service in the workload namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub selector: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,
    pub ports: Vec<i32>,
}

/// A namespace event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Name of the involved object
    pub object: String,
    pub reason: String,
    pub message: String,
    /// Normal or Warning
    pub event_type: String,
    pub count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Point-in-time view of one namespaced workload.
///
/// Produced fresh by every poll and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSnapshot {
    namespace: String,
    pods: Vec<PodRecord>,
    services: Vec<ServiceRecord>,
    events: Vec<EventRecord>,
    captured_at: DateTime<Utc>,
}

impl WorkloadSnapshot {
    pub fn new(
        namespace: impl Into<String>,
        pods: Vec<PodRecord>,
        services: Vec<ServiceRecord>,
        events: Vec<EventRecord>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pods,
            services,
            events,
            captured_at: Utc::now(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn pods(&self) -> &[PodRecord] {
        &self.pods
    }

    pub fn services(&self) -> &[ServiceRecord] {
        &self.services
    }

    /// Events ordered most-recent-last
    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Restart count per pod name
    pub fn restart_counts(&self) -> BTreeMap<String, u32> {
        self.pods
            .iter()
            .map(|p| (p.name.clone(), p.restart_count))
            .collect()
    }
}

/// Classified health of the workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Healthy,
    Starting,
    CrashLooping,
    ConfigurationError,
    Unknown,
}

impl Condition {
    pub const ALL: [Condition; 5] = [
        Condition::Healthy,
        Condition::Starting,
        Condition::CrashLooping,
        Condition::ConfigurationError,
        Condition::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Healthy => "healthy",
            Condition::Starting => "starting",
            Condition::CrashLooping => "crash_looping",
            Condition::ConfigurationError => "configuration_error",
            Condition::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Condition::Healthy => "Healthy",
            Condition::Starting => "Starting",
            Condition::CrashLooping => "CrashLooping",
            Condition::ConfigurationError => "ConfigurationError",
            Condition::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

/// Tier of the application that can be rebuilt
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Backend,
    Frontend,
}

impl Target {
    pub const ALL: [Target; 2] = [Target::Backend, Target::Frontend];

    /// Both tiers
    pub fn all() -> BTreeSet<Target> {
        Self::ALL.into_iter().collect()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Backend => f.write_str("backend"),
            Target::Frontend => f.write_str("frontend"),
        }
    }
}

/// Remediation step chosen by the planner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Wait(Duration),
    CollectDiagnostics,
    RebuildAndRedeploy { targets: BTreeSet<Target> },
    DeletePodsForRecreate,
    Rollback,
    GiveUp { reason: String },
}

impl Action {
    pub fn give_up(reason: impl Into<String>) -> Self {
        Action::GiveUp {
            reason: reason.into(),
        }
    }

    pub fn rebuild_all() -> Self {
        Action::RebuildAndRedeploy {
            targets: Target::all(),
        }
    }

    /// Stable label used in metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Wait(_) => "wait",
            Action::CollectDiagnostics => "collect_diagnostics",
            Action::RebuildAndRedeploy { .. } => "rebuild_and_redeploy",
            Action::DeletePodsForRecreate => "delete_pods_for_recreate",
            Action::Rollback => "rollback",
            Action::GiveUp { .. } => "give_up",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Wait(duration) => write!(f, "Wait({}s)", duration.as_secs()),
            Action::CollectDiagnostics => f.write_str("CollectDiagnostics"),
            Action::RebuildAndRedeploy { targets } => {
                let names: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
                write!(f, "RebuildAndRedeploy{{{}}}", names.join(","))
            }
            Action::DeletePodsForRecreate => f.write_str("DeletePodsForRecreate"),
            Action::Rollback => f.write_str("Rollback"),
            Action::GiveUp { reason } => write!(f, "GiveUp({reason:?})"),
        }
    }
}

/// Category of a failed action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    BuildFailure,
    PushFailure,
    NoPriorRevision,
    StoreRejected,
    StoreUnavailable,
}

/// Recorded result of executing an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure { kind: FailureKind, message: String },
    Timeout { operation: String },
}

impl Outcome {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Outcome::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Outcome::Timeout {
            operation: operation.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure { .. } => "failure",
            Outcome::Timeout { .. } => "timeout",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => f.write_str("success"),
            Outcome::Failure { kind, message } => write!(f, "failure ({kind:?}): {message}"),
            Outcome::Timeout { operation } => write!(f, "timeout: {operation}"),
        }
    }
}

/// One Condition + Action + Outcome entry in the run history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationAttempt {
    /// 1-based position in the run
    pub sequence: u32,
    pub condition: Condition,
    pub action: Action,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
    /// Restart count per pod seen by the cycle that produced this attempt
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub observed_restarts: BTreeMap<String, u32>,
}
