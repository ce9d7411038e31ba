use super::*;
use crate::models::Target;
use crate::testing::{crash_looping_pod, running_pod, snapshot, MockBuilder, MockStore};

fn config() -> ExecutorConfig {
    ExecutorConfig::from_settings(&RemedySettings::default(), "remedy-20250101120000")
}

fn executor(store: &Arc<MockStore>, builder: &Arc<MockBuilder>) -> Executor {
    Executor::new(store.clone(), builder.clone(), config())
}

fn frontend_only() -> Action {
    Action::RebuildAndRedeploy {
        targets: [Target::Frontend].into_iter().collect(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_wait_sleeps_for_duration() {
    let store = Arc::new(MockStore::new());
    let builder = Arc::new(MockBuilder::new());
    let mut executor = executor(&store, &builder);

    let started = Instant::now();
    let executed = executor
        .execute(&Action::Wait(Duration::from_secs(20)), 1, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(executed.outcome, Outcome::Success);
    assert!(started.elapsed() >= Duration::from_secs(20));
    assert!(store.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_wait_observes_cancellation() {
    let store = Arc::new(MockStore::new());
    let builder = Arc::new(MockBuilder::new());
    let mut executor = executor(&store, &builder);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = executor
        .execute(&Action::Wait(Duration::from_secs(60)), 1, None, &cancel)
        .await;

    assert_eq!(result.unwrap_err(), Cancelled);
    assert!(started.elapsed() < Duration::from_secs(60));
}

#[tokio::test]
async fn test_collect_diagnostics_uses_snapshot_pods() {
    let store = Arc::new(MockStore::new());
    let builder = Arc::new(MockBuilder::new());
    let mut executor = executor(&store, &builder);
    let snap = snapshot(vec![crash_looping_pod("lingua-frontend-1", 12)]);

    let executed = executor
        .execute(&Action::CollectDiagnostics, 1, Some(&snap), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(executed.outcome, Outcome::Success);
    let report = executed.diagnostics.expect("diagnostic report");
    assert_eq!(report.pods.len(), 1);
    assert_eq!(
        report.pods[0].previous_logs.as_deref(),
        Some("previous log of lingua-frontend-1")
    );
    assert!(store.calls_to("list_pods").is_empty());
}

#[tokio::test]
async fn test_collect_diagnostics_without_snapshot_lists_pods() {
    let store = Arc::new(MockStore::scripted(vec![vec![running_pod("lingua-backend-1")]]));
    let builder = Arc::new(MockBuilder::new());
    let mut executor = executor(&store, &builder);

    let executed = executor
        .execute(&Action::CollectDiagnostics, 1, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(executed.diagnostics.unwrap().pods[0].name, "lingua-backend-1");
    assert_eq!(store.calls_to("list_pods").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rebuild_builds_pushes_applies_and_waits() {
    let store = Arc::new(MockStore::new());
    store.push_rollout(RolloutStatus::Progressing {
        desired: 1,
        updated: 0,
        available: 0,
    });
    let builder = Arc::new(MockBuilder::new());
    let mut executor = executor(&store, &builder);

    let executed = executor
        .execute(&Action::rebuild_all(), 2, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(executed.outcome, Outcome::Success);
    assert_eq!(
        builder.builds(),
        vec![
            "docker/backend.Dockerfile gcr.io/lingua-phone/lingua-backend:remedy-20250101120000-2"
                .to_string(),
            "docker/frontend-k8s.Dockerfile gcr.io/lingua-phone/lingua-frontend:remedy-20250101120000-2"
                .to_string(),
        ]
    );
    assert_eq!(builder.pushes().len(), 2);
    assert_eq!(store.calls_to("apply").len(), 2);
    assert_eq!(store.calls_to("rollout_status lingua-backend").len(), 2);
    assert!(store.calls_to("delete_pods").is_empty());
    assert_eq!(executor.known_good().get("lingua-backend"), Some(&3));
    assert_eq!(executor.known_good().get("lingua-frontend"), Some(&3));
}

#[tokio::test]
async fn test_build_failure_is_recorded_outcome() {
    let store = Arc::new(MockStore::new());
    let builder = Arc::new(MockBuilder::new());
    builder.fail_build("npm ERR! missing script: build");
    let mut executor = executor(&store, &builder);

    let executed = executor
        .execute(&frontend_only(), 1, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(executed.outcome.failure_kind(), Some(FailureKind::BuildFailure));
    assert!(builder.pushes().is_empty());
    assert!(store.calls_to("apply").is_empty());
}

#[tokio::test]
async fn test_push_failure_is_recorded_outcome() {
    let store = Arc::new(MockStore::new());
    let builder = Arc::new(MockBuilder::new());
    builder.fail_push("denied: requested access to the resource is denied");
    let mut executor = executor(&store, &builder);

    let executed = executor
        .execute(&frontend_only(), 1, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(executed.outcome.failure_kind(), Some(FailureKind::PushFailure));
}

#[tokio::test(start_paused = true)]
async fn test_slow_build_times_out() {
    let store = Arc::new(MockStore::new());
    let builder = Arc::new(MockBuilder::new());
    builder.set_build_delay(Duration::from_secs(3600));
    let mut executor = executor(&store, &builder);

    let executed = executor
        .execute(&frontend_only(), 1, None, &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(
        executed.outcome,
        Outcome::Timeout { ref operation } if operation.starts_with("build of")
    ));
}

#[tokio::test]
async fn test_rejected_apply_is_store_rejected() {
    let store = Arc::new(MockStore::new());
    store.fail_apply(StoreError::Rejected {
        operation: "apply".into(),
        message: "the object has been modified".into(),
    });
    let builder = Arc::new(MockBuilder::new());
    let mut executor = executor(&store, &builder);

    let executed = executor
        .execute(&frontend_only(), 1, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(executed.outcome.failure_kind(), Some(FailureKind::StoreRejected));
}

#[tokio::test(start_paused = true)]
async fn test_rollout_that_never_completes_times_out() {
    let store = Arc::new(MockStore::new());
    for _ in 0..100 {
        store.push_rollout(RolloutStatus::Progressing {
            desired: 1,
            updated: 1,
            available: 0,
        });
    }
    let builder = Arc::new(MockBuilder::new());
    let mut executor = executor(&store, &builder);

    let started = Instant::now();
    let executed = executor
        .execute(&frontend_only(), 1, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(executed.outcome, Outcome::timeout("rollout of lingua-frontend"));
    assert!(started.elapsed() >= Duration::from_secs(120));
    assert!(started.elapsed() < Duration::from_secs(130));
}

#[tokio::test]
async fn test_fixed_tag_unchanged_manifest_recreates_pods() {
    let mut settings = RemedySettings::default();
    settings.execution.tag_strategy = TagStrategy::Fixed;
    let store = Arc::new(MockStore::new());
    store.set_apply_changes(false);
    let builder = Arc::new(MockBuilder::new());
    let mut executor = Executor::new(
        store.clone(),
        builder.clone(),
        ExecutorConfig::from_settings(&settings, "remedy-20250101120000"),
    );

    let executed = executor
        .execute(&frontend_only(), 1, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(executed.outcome, Outcome::Success);
    assert_eq!(builder.pushes(), vec!["gcr.io/lingua-phone/lingua-frontend:latest".to_string()]);
    assert_eq!(store.calls_to("delete_pods"), vec!["delete_pods app=lingua-frontend".to_string()]);
}

#[tokio::test]
async fn test_rollback_without_rebuild_has_no_prior_revision() {
    let store = Arc::new(MockStore::new());
    let builder = Arc::new(MockBuilder::new());
    let mut executor = executor(&store, &builder);

    let executed = executor
        .execute(&Action::Rollback, 1, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(executed.outcome.failure_kind(), Some(FailureKind::NoPriorRevision));
    assert!(store.calls_to("rollback_to").is_empty());
}

#[tokio::test]
async fn test_rollback_returns_to_revision_before_first_rebuild() {
    let store = Arc::new(MockStore::new());
    store.set_revision("lingua-frontend", Some(7));
    let builder = Arc::new(MockBuilder::new());
    let mut executor = executor(&store, &builder);
    let cancel = CancellationToken::new();

    executor.execute(&frontend_only(), 1, None, &cancel).await.unwrap();
    executor.execute(&frontend_only(), 2, None, &cancel).await.unwrap();
    let executed = executor.execute(&Action::Rollback, 3, None, &cancel).await.unwrap();

    assert_eq!(executed.outcome, Outcome::Success);
    assert_eq!(store.calls_to("rollback_to"), vec!["rollback_to lingua-frontend 7".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_revision_read_timeout_stops_rebuild_before_changes() {
    let store = Arc::new(MockStore::new());
    store.set_revision_delay(Duration::from_secs(120));
    let builder = Arc::new(MockBuilder::new());
    let mut executor = executor(&store, &builder);

    let executed = executor
        .execute(&frontend_only(), 1, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(executed.outcome, Outcome::timeout("read revision"));
    assert!(builder.builds().is_empty());
    assert!(store.calls_to("apply").is_empty());
    assert!(executor.known_good().is_empty());
}

#[tokio::test]
async fn test_unreadable_revision_is_store_failure() {
    let store = Arc::new(MockStore::new());
    store.fail_revision(StoreError::Unavailable("connection reset".to_string()));
    let builder = Arc::new(MockBuilder::new());
    let mut executor = executor(&store, &builder);

    let executed = executor
        .execute(&Action::rebuild_all(), 1, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(executed.outcome.failure_kind(), Some(FailureKind::StoreUnavailable));
    assert!(builder.builds().is_empty());
    assert_eq!(
        store.calls_to("current_revision"),
        vec!["current_revision lingua-backend".to_string()]
    );
}

#[tokio::test]
async fn test_missing_revision_still_rebuilds() {
    let store = Arc::new(MockStore::new());
    store.set_revision("lingua-frontend", None);
    let builder = Arc::new(MockBuilder::new());
    let mut executor = executor(&store, &builder);

    let executed = executor
        .execute(&frontend_only(), 1, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(executed.outcome, Outcome::Success);
    assert_eq!(builder.builds().len(), 1);
    assert!(executor.known_good().is_empty());
}

#[tokio::test]
async fn test_delete_pods_uses_workload_selector() {
    let store = Arc::new(MockStore::new());
    let builder = Arc::new(MockBuilder::new());
    let mut executor = executor(&store, &builder);

    let executed = executor
        .execute(&Action::DeletePodsForRecreate, 1, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(executed.outcome, Outcome::Success);
    assert_eq!(
        store.calls(),
        vec!["delete_pods app.kubernetes.io/part-of=lingua-phone".to_string()]
    );
}

#[tokio::test]
async fn test_give_up_makes_no_calls() {
    let store = Arc::new(MockStore::new());
    let builder = Arc::new(MockBuilder::new());
    let mut executor = executor(&store, &builder);

    let executed = executor
        .execute(&Action::give_up("done"), 1, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(executed.outcome, Outcome::Success);
    assert!(store.calls().is_empty());
    assert!(builder.builds().is_empty());
}
