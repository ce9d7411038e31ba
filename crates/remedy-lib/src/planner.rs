//! Remediation planning
//!
//! Chooses the next [`Action`] from the current [`Condition`] and the run's
//! attempt history. The planner is deterministic: it never reads the clock and
//! holds no state of its own. For a crash-looping workload the escalation
//! ladder only moves forward within a run:
//! `CollectDiagnostics → RebuildAndRedeploy → Rollback → GiveUp`.

use crate::models::{Action, Condition, FailureKind, Outcome, RemediationAttempt};
use std::time::Duration;

pub const PERSISTENT_CRASH: &str = "persistent crash after rebuild and rollback";
pub const MANUAL_FIX_REQUIRED: &str = "configuration error requires manual manifest fix";
pub const UNDETERMINED_STATE: &str = "unable to determine workload state";
pub const BUDGET_EXHAUSTED: &str = "attempt budget exhausted";
pub const NO_PRIOR_REVISION: &str = "no prior revision to roll back to";

/// Tunables of the planning policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerPolicy {
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Consecutive `Starting` observations tolerated before collecting diagnostics
    pub max_starting_observations: usize,
    pub unknown_wait: Duration,
    /// Consecutive `Unknown` observations tolerated before giving up
    pub max_unknown_observations: usize,
}

impl Default for PlannerPolicy {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(60),
            max_starting_observations: 6,
            unknown_wait: Duration::from_secs(10),
            max_unknown_observations: 3,
        }
    }
}

/// Remediation planner
#[derive(Debug, Clone, Default)]
pub struct Planner {
    policy: PlannerPolicy,
}

impl Planner {
    pub fn new(policy: PlannerPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PlannerPolicy {
        &self.policy
    }

    /// Next action for `condition`, or `None` when the workload is healthy
    pub fn plan(&self, condition: Condition, attempts: &[RemediationAttempt]) -> Option<Action> {
        if condition == Condition::Healthy {
            return None;
        }

        if let Some(last) = attempts.last() {
            if let Some(action) = self.follow_up(condition, last, attempts) {
                return Some(action);
            }
        }

        let action = match condition {
            Condition::Healthy => return None,
            Condition::Starting => self.plan_starting(attempts),
            Condition::CrashLooping => plan_crash_looping(attempts),
            Condition::ConfigurationError => {
                if trailing(attempts, Condition::ConfigurationError).any(is_diagnostics) {
                    Action::give_up(MANUAL_FIX_REQUIRED)
                } else {
                    Action::CollectDiagnostics
                }
            }
            Condition::Unknown => {
                let observed = trailing(attempts, Condition::Unknown).count();
                if observed >= self.policy.max_unknown_observations {
                    Action::give_up(UNDETERMINED_STATE)
                } else {
                    Action::Wait(self.policy.unknown_wait)
                }
            }
        };

        Some(action)
    }

    /// Capped exponential backoff for the `n`-th consecutive observation
    pub fn backoff(&self, n: usize) -> Duration {
        let factor = u32::try_from(n)
            .ok()
            .and_then(|n| 1u32.checked_shl(n))
            .unwrap_or(u32::MAX);

        self.policy
            .backoff_base
            .checked_mul(factor)
            .map_or(self.policy.backoff_cap, |d| d.min(self.policy.backoff_cap))
    }

    // Reactions to the outcome of the previous action that override the
    // condition-driven policy.
    fn follow_up(
        &self,
        condition: Condition,
        last: &RemediationAttempt,
        attempts: &[RemediationAttempt],
    ) -> Option<Action> {
        match (&last.action, &last.outcome) {
            (Action::Rollback, Outcome::Failure { kind: FailureKind::NoPriorRevision, .. }) => {
                Some(Action::give_up(NO_PRIOR_REVISION))
            }
            (Action::Rollback, Outcome::Failure { message, .. }) => {
                Some(Action::give_up(format!("rollback failed: {message}")))
            }
            (Action::Rollback, Outcome::Timeout { operation }) => {
                Some(Action::give_up(format!("rollback timed out: {operation}")))
            }
            (Action::RebuildAndRedeploy { .. }, outcome)
                if !outcome.is_success() && condition != Condition::ConfigurationError =>
            {
                if attempts.iter().any(|a| matches!(a.action, Action::Rollback)) {
                    Some(Action::give_up(PERSISTENT_CRASH))
                } else {
                    Some(Action::Rollback)
                }
            }
            _ => None,
        }
    }

    fn plan_starting(&self, attempts: &[RemediationAttempt]) -> Action {
        let streak: Vec<&RemediationAttempt> = trailing(attempts, Condition::Starting).collect();

        if streak.iter().any(|a| is_diagnostics(a)) {
            Action::Wait(self.policy.backoff_cap)
        } else if streak.len() >= self.policy.max_starting_observations {
            Action::CollectDiagnostics
        } else {
            Action::Wait(self.backoff(streak.len()))
        }
    }
}

/// Plan with the default policy
pub fn plan(condition: Condition, attempts: &[RemediationAttempt]) -> Option<Action> {
    Planner::default().plan(condition, attempts)
}

fn plan_crash_looping(attempts: &[RemediationAttempt]) -> Action {
    let attempted = |pred: fn(&Action) -> bool| attempts.iter().any(|a| pred(&a.action));

    if attempted(|a| matches!(a, Action::Rollback)) {
        Action::give_up(PERSISTENT_CRASH)
    } else if attempted(|a| matches!(a, Action::RebuildAndRedeploy { .. })) {
        Action::Rollback
    } else if attempts
        .iter()
        .any(|a| a.condition == Condition::CrashLooping && is_diagnostics(a))
    {
        Action::rebuild_all()
    } else {
        Action::CollectDiagnostics
    }
}

/// Most recent attempts observed under `condition`, newest first
fn trailing(
    attempts: &[RemediationAttempt],
    condition: Condition,
) -> impl Iterator<Item = &RemediationAttempt> {
    attempts
        .iter()
        .rev()
        .take_while(move |a| a.condition == condition)
}

fn is_diagnostics(attempt: &RemediationAttempt) -> bool {
    matches!(attempt.action, Action::CollectDiagnostics)
}
