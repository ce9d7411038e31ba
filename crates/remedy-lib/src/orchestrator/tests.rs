use super::*;
use crate::health::ComponentStatus;
use crate::models::{ContainerState, PodPhase, PodRecord, Target};
use crate::planner::{MANUAL_FIX_REQUIRED, PERSISTENT_CRASH, UNDETERMINED_STATE};
use crate::probe::{ProbeError, ProbeResponse};
use crate::store::StoreError;
use crate::testing::{
    crash_looping_pod, pending_pod, running_pod, waiting_pod, MockBuilder, MockStore,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::time::sleep;

const RUN_ID: &str = "remedy-20250101120000";

fn credentials() -> ClusterCredentials {
    ClusterCredentials {
        cluster: "lingua-cluster".to_string(),
        zone: "us-central1-a".to_string(),
        context: None,
        acquired_at: Utc::now(),
    }
}

fn orchestrator(
    store: &Arc<MockStore>,
    builder: &Arc<MockBuilder>,
    settings: RemedySettings,
) -> Orchestrator {
    Orchestrator::builder()
        .store(store.clone())
        .image_builder(builder.clone())
        .credentials(credentials())
        .settings(settings)
        .run_id(RUN_ID)
        .build()
        .unwrap()
}

fn healthy_pods() -> Vec<crate::models::PodRecord> {
    vec![running_pod("lingua-backend-1"), running_pod("lingua-frontend-1")]
}

fn actions(report: &RunReport) -> Vec<Action> {
    report.attempts.iter().map(|a| a.action.clone()).collect()
}

#[derive(Default)]
struct OkProbeClient {
    urls: Mutex<Vec<String>>,
}

#[async_trait]
impl ProbeClient for OkProbeClient {
    async fn http_get(&self, url: &str, _timeout: Duration) -> Result<ProbeResponse, ProbeError> {
        self.urls.lock().unwrap().push(url.to_string());
        Ok(ProbeResponse {
            status: 200,
            headers: BTreeMap::new(),
            body: "ok".to_string(),
        })
    }

    async fn http_post(
        &self,
        url: &str,
        _body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<ProbeResponse, ProbeError> {
        self.http_get(url, timeout).await
    }
}

#[test]
fn test_builder_requires_collaborators() {
    let missing_store = Orchestrator::builder()
        .image_builder(Arc::new(MockBuilder::new()))
        .credentials(credentials())
        .build();
    assert!(matches!(missing_store, Err(OrchestratorError::Missing("workload store"))));

    let missing_credentials = Orchestrator::builder()
        .store(Arc::new(MockStore::new()))
        .image_builder(Arc::new(MockBuilder::new()))
        .build();
    assert!(matches!(
        missing_credentials,
        Err(OrchestratorError::Missing("cluster credentials"))
    ));
}

#[test]
fn test_builder_rejects_invalid_settings() {
    let mut settings = RemedySettings::default();
    settings.policy.attempt_budget = 0;

    let result = Orchestrator::builder()
        .store(Arc::new(MockStore::new()))
        .image_builder(Arc::new(MockBuilder::new()))
        .credentials(credentials())
        .settings(settings)
        .build();

    assert!(matches!(result, Err(OrchestratorError::Settings(_))));
}

#[tokio::test(start_paused = true)]
async fn test_image_pull_backoff_gives_up_after_diagnostics() {
    let store = Arc::new(MockStore::scripted(vec![vec![waiting_pod(
        "lingua-backend-1",
        PodPhase::Pending,
        "ImagePullBackOff",
    )]]));
    let builder = Arc::new(MockBuilder::new());

    let report = orchestrator(&store, &builder, RemedySettings::default())
        .run(CancellationToken::new())
        .await;

    assert_eq!(
        report.status,
        RunStatus::Failed {
            reason: MANUAL_FIX_REQUIRED.to_string()
        }
    );
    assert_eq!(
        actions(&report),
        vec![Action::CollectDiagnostics, Action::give_up(MANUAL_FIX_REQUIRED)]
    );
    assert!(report
        .attempts
        .iter()
        .all(|a| a.condition == Condition::ConfigurationError));
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].sequence, 1);
    assert_eq!(report.exit_code(), EXIT_FAILED);
    assert!(builder.builds().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_pending_pod_waits_then_collects_diagnostics() {
    let store = Arc::new(MockStore::scripted(vec![vec![pending_pod("lingua-frontend-1")]]));
    let builder = Arc::new(MockBuilder::new());

    let report = orchestrator(&store, &builder, RemedySettings::default())
        .run(CancellationToken::new())
        .await;

    let secs = |s| Action::Wait(Duration::from_secs(s));
    let taken = actions(&report);
    assert_eq!(&taken[..7], &[
        secs(5),
        secs(10),
        secs(20),
        secs(40),
        secs(60),
        secs(60),
        Action::CollectDiagnostics,
    ]);
    assert!(report.attempts.iter().all(|a| a.condition == Condition::Starting));
}

#[tokio::test(start_paused = true)]
async fn test_never_healthy_fails_within_attempt_budget() {
    let store = Arc::new(MockStore::scripted(vec![vec![pending_pod("lingua-frontend-1")]]));
    let builder = Arc::new(MockBuilder::new());

    let report = orchestrator(&store, &builder, RemedySettings::default())
        .run(CancellationToken::new())
        .await;

    assert_eq!(report.attempts.len(), 10);
    assert_eq!(
        report.status,
        RunStatus::Failed {
            reason: BUDGET_EXHAUSTED.to_string()
        }
    );
    assert_eq!(
        report.attempts.last().map(|a| a.action.clone()),
        Some(Action::give_up(BUDGET_EXHAUSTED))
    );
    let sequences: Vec<u32> = report.attempts.iter().map(|a| a.sequence).collect();
    assert_eq!(sequences, (1..=10).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn test_budget_of_one_gives_up_immediately() {
    let mut settings = RemedySettings::default();
    settings.policy.attempt_budget = 1;
    let store = Arc::new(MockStore::scripted(vec![vec![crash_looping_pod(
        "lingua-frontend-1",
        12,
    )]]));
    let builder = Arc::new(MockBuilder::new());

    let report = orchestrator(&store, &builder, settings)
        .run(CancellationToken::new())
        .await;

    assert_eq!(actions(&report), vec![Action::give_up(BUDGET_EXHAUSTED)]);
    assert!(report.diagnostics.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_crash_loop_rebuild_then_healthy_succeeds() {
    let store = Arc::new(MockStore::scripted(vec![
        vec![crash_looping_pod("lingua-frontend-1", 12), running_pod("lingua-backend-1")],
        vec![crash_looping_pod("lingua-frontend-1", 13), running_pod("lingua-backend-1")],
        healthy_pods(),
    ]));
    let builder = Arc::new(MockBuilder::new());

    let report = orchestrator(&store, &builder, RemedySettings::default())
        .run(CancellationToken::new())
        .await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.final_condition, Some(Condition::Healthy));
    assert_eq!(
        actions(&report),
        vec![
            Action::CollectDiagnostics,
            Action::RebuildAndRedeploy {
                targets: [Target::Frontend, Target::Backend].into_iter().collect()
            },
        ]
    );
    assert!(report.attempts.iter().all(|a| a.outcome == Outcome::Success));
    assert_eq!(report.attempts[1].observed_restarts.get("lingua-frontend-1"), Some(&13));
    assert_eq!(builder.builds().len(), 2);
    assert_eq!(store.calls_to("list_pods").len(), 3);
    assert_eq!(report.exit_code(), EXIT_SUCCEEDED);
    assert!(report.verification.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failed_rebuild_rolls_back_then_gives_up() {
    let store = Arc::new(MockStore::scripted(vec![vec![crash_looping_pod("lingua-backend-1", 9)]]));
    let builder = Arc::new(MockBuilder::new());
    builder.fail_build("error: failed to solve: process \"/bin/sh -c npm ci\" did not complete");
    let health = HealthRegistry::new();

    let report = Orchestrator::builder()
        .store(store.clone())
        .image_builder(builder.clone())
        .credentials(credentials())
        .health(health.clone())
        .run_id(RUN_ID)
        .build()
        .unwrap()
        .run(CancellationToken::new())
        .await;

    assert_eq!(
        actions(&report),
        vec![
            Action::CollectDiagnostics,
            Action::rebuild_all(),
            Action::Rollback,
            Action::give_up(PERSISTENT_CRASH),
        ]
    );
    assert_eq!(
        report.attempts[1].outcome.failure_kind(),
        Some(FailureKind::BuildFailure)
    );
    assert_eq!(report.attempts[2].outcome, Outcome::Success);
    assert_eq!(store.calls_to("rollback_to"), vec!["rollback_to lingua-backend 3".to_string()]);

    let health = health.health().await;
    assert_eq!(health.components[components::IMAGE_BUILDER].status, ComponentStatus::Degraded);
}

#[tokio::test(start_paused = true)]
async fn test_no_pods_gives_up_as_undetermined() {
    let store = Arc::new(MockStore::new());
    let builder = Arc::new(MockBuilder::new());

    let report = orchestrator(&store, &builder, RemedySettings::default())
        .run(CancellationToken::new())
        .await;

    let wait = Action::Wait(Duration::from_secs(10));
    assert_eq!(
        actions(&report),
        vec![wait.clone(), wait.clone(), wait, Action::give_up(UNDETERMINED_STATE)]
    );
    assert_eq!(report.final_condition, Some(Condition::Unknown));
}

#[tokio::test(start_paused = true)]
async fn test_transient_read_error_is_unknown_then_recovers() {
    let store = Arc::new(MockStore::scripted(vec![healthy_pods()]));
    store.fail_pods(StoreError::Unavailable("connection refused".into()));
    let builder = Arc::new(MockBuilder::new());

    let healer = store.clone();
    tokio::spawn(async move {
        sleep(Duration::from_secs(5)).await;
        healer.clear_pods_failure();
    });

    let report = orchestrator(&store, &builder, RemedySettings::default())
        .run(CancellationToken::new())
        .await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].condition, Condition::Unknown);
    assert_eq!(report.attempts[0].action, Action::Wait(Duration::from_secs(10)));
    assert!(report.attempts[0].observed_restarts.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_terminated_pod_with_flat_restarts_is_not_rebuilt_after_failed_read() {
    let exited = PodRecord {
        name: "lingua-backend-1".to_string(),
        phase: PodPhase::Running,
        container_state: ContainerState::Terminated {
            reason: "Error".to_string(),
            exit_code: 1,
        },
        restart_count: 9,
        ready: false,
    };
    let store = Arc::new(MockStore::scripted(vec![vec![exited]]));
    store.fail_pods_once_at(2, StoreError::Unavailable("connection refused".into()));
    let builder = Arc::new(MockBuilder::new());

    let report = orchestrator(&store, &builder, RemedySettings::default())
        .run(CancellationToken::new())
        .await;

    // First sighting has no earlier observation, so the exit counts as a crash loop
    assert_eq!(report.attempts[0].condition, Condition::CrashLooping);
    assert_eq!(report.attempts[0].action, Action::CollectDiagnostics);
    assert_eq!(report.attempts[1].condition, Condition::Unknown);
    assert!(report.attempts[1].observed_restarts.is_empty());
    // The count is compared with the first attempt, not the failed read
    assert_eq!(report.attempts[2].condition, Condition::Unknown);

    assert!(builder.builds().is_empty());
    assert!(!actions(&report)
        .iter()
        .any(|a| matches!(a, Action::RebuildAndRedeploy { .. })));
    assert!(matches!(report.status, RunStatus::Failed { .. }));
    assert_eq!(report.status.reason(), Some(UNDETERMINED_STATE));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_wait_aborts_without_attempt() {
    let store = Arc::new(MockStore::scripted(vec![vec![pending_pod("lingua-frontend-1")]]));
    let builder = Arc::new(MockBuilder::new());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        sleep(Duration::from_secs(30)).await;
        trigger.cancel();
    });

    let report = orchestrator(&store, &builder, RemedySettings::default())
        .run(cancel)
        .await;

    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(report.exit_code(), EXIT_ABORTED);
    // 5s and 10s waits complete; the 20s wait is interrupted
    assert_eq!(report.attempts.len(), 2);
}

#[tokio::test]
async fn test_cancelled_before_start_reads_nothing() {
    let store = Arc::new(MockStore::scripted(vec![healthy_pods()]));
    let builder = Arc::new(MockBuilder::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = orchestrator(&store, &builder, RemedySettings::default())
        .run(cancel)
        .await;

    assert_eq!(report.status, RunStatus::Aborted);
    assert!(report.final_condition.is_none());
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn test_successful_run_attaches_verification() {
    let store = Arc::new(MockStore::scripted(vec![healthy_pods()]));
    let builder = Arc::new(MockBuilder::new());
    let probes = Arc::new(OkProbeClient::default());

    let report = Orchestrator::builder()
        .store(store.clone())
        .image_builder(builder.clone())
        .credentials(credentials())
        .probe_client(probes.clone())
        .build()
        .unwrap()
        .run(CancellationToken::new())
        .await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert!(report.attempts.is_empty());
    assert!(report.run_id.starts_with("remedy-"));
    let verification = report.verification.expect("verification report");
    assert_eq!(verification.results.len(), 3);
    assert!(verification.all_passed());
    assert_eq!(probes.urls.lock().unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_failed_run_skips_verification() {
    let store = Arc::new(MockStore::scripted(vec![vec![waiting_pod(
        "lingua-frontend-1",
        PodPhase::Pending,
        "ErrImagePull",
    )]]));
    let builder = Arc::new(MockBuilder::new());
    let probes = Arc::new(OkProbeClient::default());

    let report = Orchestrator::builder()
        .store(store)
        .image_builder(builder)
        .credentials(credentials())
        .probe_client(probes.clone())
        .build()
        .unwrap()
        .run(CancellationToken::new())
        .await;

    assert!(matches!(report.status, RunStatus::Failed { .. }));
    assert!(report.verification.is_none());
    assert!(probes.urls.lock().unwrap().is_empty());
}
