//! Condition classification
//!
//! Maps a [`WorkloadSnapshot`] onto a single [`Condition`]. Rules are checked
//! in priority order and the first rule that holds for any pod decides the
//! condition for the whole workload.

use crate::models::{
    Condition, ContainerState, PodPhase, PodRecord, RemediationAttempt, WorkloadSnapshot,
};

/// Waiting reasons caused by a broken image reference or pod configuration
pub const CONFIG_ERROR_REASONS: &[&str] = &[
    "ImagePullBackOff",
    "ErrImagePull",
    "CreateContainerConfigError",
    "InvalidImageName",
];

/// Waiting reasons of a pod that is still coming up
pub const STARTING_REASONS: &[&str] = &["ContainerCreating", "PodInitializing"];

pub const CRASH_LOOP_REASON: &str = "CrashLoopBackOff";

pub const DEFAULT_RESTART_THRESHOLD: u32 = 5;

/// Snapshot classifier with a configurable restart threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classifier {
    restart_threshold: u32,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_RESTART_THRESHOLD)
    }
}

impl Classifier {
    pub fn new(restart_threshold: u32) -> Self {
        Self { restart_threshold }
    }

    pub fn restart_threshold(&self) -> u32 {
        self.restart_threshold
    }

    /// Classify a snapshot.
    ///
    /// `prior_attempts` is consulted only for the restart-count trend of pods
    /// whose container is currently terminated.
    pub fn classify(
        &self,
        snapshot: &WorkloadSnapshot,
        prior_attempts: &[RemediationAttempt],
    ) -> Condition {
        let pods = snapshot.pods();

        if pods.is_empty() {
            return Condition::Unknown;
        }

        if pods.iter().any(is_misconfigured) {
            return Condition::ConfigurationError;
        }

        if pods.iter().any(|pod| self.is_crash_looping(pod, prior_attempts)) {
            return Condition::CrashLooping;
        }

        if pods.iter().any(is_starting) {
            return Condition::Starting;
        }

        if pods.iter().all(is_serving) {
            return Condition::Healthy;
        }

        Condition::Unknown
    }

    fn is_crash_looping(&self, pod: &PodRecord, prior_attempts: &[RemediationAttempt]) -> bool {
        if pod.restart_count <= self.restart_threshold {
            return false;
        }

        match &pod.container_state {
            ContainerState::Waiting { reason, .. } => reason == CRASH_LOOP_REASON,
            ContainerState::Terminated { .. } => is_repeatedly_terminated(pod, prior_attempts),
            ContainerState::Running => false,
        }
    }
}

/// Classify with the default restart threshold
pub fn classify(snapshot: &WorkloadSnapshot, prior_attempts: &[RemediationAttempt]) -> Condition {
    Classifier::default().classify(snapshot, prior_attempts)
}

fn is_misconfigured(pod: &PodRecord) -> bool {
    pod.container_state
        .waiting_reason()
        .is_some_and(|reason| CONFIG_ERROR_REASONS.contains(&reason))
}

fn is_starting(pod: &PodRecord) -> bool {
    pod.phase == PodPhase::Pending
        || pod
            .container_state
            .waiting_reason()
            .is_some_and(|reason| STARTING_REASONS.contains(&reason))
}

// Running, ready and with a running container
fn is_serving(pod: &PodRecord) -> bool {
    pod.phase == PodPhase::Running
        && pod.ready
        && pod.is_consistent()
        && matches!(pod.container_state, ContainerState::Running)
}

// A terminated container counts as cycling when its restart count grew since
// the most recent attempt that observed the pod, or when no attempt did.
// Attempts from failed reads carry no observations and are skipped.
fn is_repeatedly_terminated(pod: &PodRecord, prior_attempts: &[RemediationAttempt]) -> bool {
    let previous = prior_attempts
        .iter()
        .rev()
        .find_map(|attempt| attempt.observed_restarts.get(&pod.name));

    match previous {
        Some(previous) => pod.restart_count > *previous,
        None => true,
    }
}
