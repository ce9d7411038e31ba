//! In-memory collaborators and fixtures shared by the unit tests

use crate::builder::{BuildError, ImageBuilder, ImageRef};
use crate::models::{
    ContainerState, EventRecord, PodPhase, PodRecord, ServiceRecord, WorkloadSnapshot,
};
use crate::store::{ApplyResult, LogOptions, ManifestSet, RolloutStatus, StoreError, WorkloadStore};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

pub fn running_pod(name: &str) -> PodRecord {
    PodRecord {
        name: name.to_string(),
        phase: PodPhase::Running,
        container_state: ContainerState::Running,
        restart_count: 0,
        ready: true,
    }
}

pub fn pending_pod(name: &str) -> PodRecord {
    waiting_pod(name, PodPhase::Pending, "ContainerCreating")
}

pub fn waiting_pod(name: &str, phase: PodPhase, reason: &str) -> PodRecord {
    PodRecord {
        name: name.to_string(),
        phase,
        container_state: ContainerState::waiting(reason),
        restart_count: 0,
        ready: false,
    }
}

pub fn crash_looping_pod(name: &str, restarts: u32) -> PodRecord {
    PodRecord {
        restart_count: restarts,
        ..waiting_pod(name, PodPhase::Running, "CrashLoopBackOff")
    }
}

pub fn lingua_services() -> Vec<ServiceRecord> {
    ["backend", "frontend"]
        .into_iter()
        .map(|tier| ServiceRecord {
            name: format!("lingua-{tier}-service"),
            selector: BTreeMap::from([("app".to_string(), format!("lingua-{tier}"))]),
            cluster_ip: Some("10.0.0.10".to_string()),
            ports: vec![80],
        })
        .collect()
}

pub fn snapshot(pods: Vec<PodRecord>) -> WorkloadSnapshot {
    WorkloadSnapshot::new("lingua-app", pods, lingua_services(), Vec::new())
}

/// Scripted Workload Store.
///
/// Each `list_pods` call takes the next scripted pod list; the last list
/// repeats once the script runs out. Every call is recorded in order.
pub struct MockStore {
    pods: Mutex<VecDeque<Vec<PodRecord>>>,
    events: Mutex<Vec<EventRecord>>,
    revisions: Mutex<BTreeMap<String, i64>>,
    rollouts: Mutex<VecDeque<RolloutStatus>>,
    apply_changes: Mutex<bool>,
    list_delay: Mutex<Duration>,
    pods_error: Mutex<Option<StoreError>>,
    pods_error_at: Mutex<BTreeMap<usize, StoreError>>,
    events_error: Mutex<Option<StoreError>>,
    describe_error: Mutex<Option<StoreError>>,
    apply_error: Mutex<Option<StoreError>>,
    revision_error: Mutex<Option<StoreError>>,
    revision_delay: Mutex<Duration>,
    calls: Mutex<Vec<String>>,
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            pods: Mutex::new(VecDeque::new()),
            events: Mutex::new(Vec::new()),
            revisions: Mutex::new(BTreeMap::from([
                ("lingua-backend".to_string(), 3),
                ("lingua-frontend".to_string(), 3),
            ])),
            rollouts: Mutex::new(VecDeque::new()),
            apply_changes: Mutex::new(true),
            list_delay: Mutex::new(Duration::ZERO),
            pods_error: Mutex::new(None),
            pods_error_at: Mutex::new(BTreeMap::new()),
            events_error: Mutex::new(None),
            describe_error: Mutex::new(None),
            apply_error: Mutex::new(None),
            revision_error: Mutex::new(None),
            revision_delay: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Store whose pod listings follow `script`
    pub fn scripted(script: Vec<Vec<PodRecord>>) -> Self {
        let store = Self::new();
        for pods in script {
            store.push_pods(pods);
        }
        store
    }

    pub fn push_pods(&self, pods: Vec<PodRecord>) {
        self.pods.lock().unwrap().push_back(pods);
    }

    pub fn set_events(&self, events: Vec<EventRecord>) {
        *self.events.lock().unwrap() = events;
    }

    /// Queue rollout statuses; `Complete` is reported once the queue is empty
    pub fn push_rollout(&self, status: RolloutStatus) {
        self.rollouts.lock().unwrap().push_back(status);
    }

    pub fn set_apply_changes(&self, changes: bool) {
        *self.apply_changes.lock().unwrap() = changes;
    }

    pub fn set_revision(&self, deployment: &str, revision: Option<i64>) {
        let mut revisions = self.revisions.lock().unwrap();
        match revision {
            Some(revision) => revisions.insert(deployment.to_string(), revision),
            None => revisions.remove(deployment),
        };
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = delay;
    }

    pub fn fail_pods(&self, error: StoreError) {
        *self.pods_error.lock().unwrap() = Some(error);
    }

    /// Fail only the `call`-th `list_pods` call (counting from 1)
    pub fn fail_pods_once_at(&self, call: usize, error: StoreError) {
        self.pods_error_at.lock().unwrap().insert(call, error);
    }

    pub fn clear_pods_failure(&self) {
        *self.pods_error.lock().unwrap() = None;
    }

    pub fn fail_events(&self, error: StoreError) {
        *self.events_error.lock().unwrap() = Some(error);
    }

    pub fn fail_describe(&self, error: StoreError) {
        *self.describe_error.lock().unwrap() = Some(error);
    }

    pub fn fail_apply(&self, error: StoreError) {
        *self.apply_error.lock().unwrap() = Some(error);
    }

    pub fn fail_revision(&self, error: StoreError) {
        *self.revision_error.lock().unwrap() = Some(error);
    }

    pub fn set_revision_delay(&self, delay: Duration) {
        *self.revision_delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded calls starting with `prefix`
    pub fn calls_to(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn injected(slot: &Mutex<Option<StoreError>>) -> Result<(), StoreError> {
        match slot.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl WorkloadStore for MockStore {
    async fn list_pods(
        &self,
        _namespace: &str,
        selector: &str,
    ) -> Result<Vec<PodRecord>, StoreError> {
        self.record(format!("list_pods {selector}"));
        let delay = *self.list_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Self::injected(&self.pods_error)?;
        let call = self.calls_to("list_pods").len();
        if let Some(error) = self.pods_error_at.lock().unwrap().remove(&call) {
            return Err(error);
        }

        let mut script = self.pods.lock().unwrap();
        let pods = if script.len() > 1 {
            script.pop_front().unwrap_or_default()
        } else {
            script.front().cloned().unwrap_or_default()
        };
        Ok(pods)
    }

    async fn list_services(&self, _namespace: &str) -> Result<Vec<ServiceRecord>, StoreError> {
        self.record("list_services".to_string());
        Ok(lingua_services())
    }

    async fn list_events(&self, _namespace: &str) -> Result<Vec<EventRecord>, StoreError> {
        self.record("list_events".to_string());
        Self::injected(&self.events_error)?;
        Ok(self.events.lock().unwrap().clone())
    }

    async fn describe_pod(&self, _namespace: &str, name: &str) -> Result<String, StoreError> {
        self.record(format!("describe_pod {name}"));
        Self::injected(&self.describe_error)?;
        Ok(format!("Name: {name}"))
    }

    async fn get_logs(
        &self,
        _namespace: &str,
        name: &str,
        options: LogOptions,
    ) -> Result<String, StoreError> {
        let which = if options.previous { "previous" } else { "current" };
        self.record(format!("get_logs {name} {which} tail={}", options.tail));
        Ok(format!("{which} log of {name}"))
    }

    async fn apply(
        &self,
        _namespace: &str,
        manifests: &ManifestSet,
    ) -> Result<ApplyResult, StoreError> {
        for image in &manifests.deployments {
            self.record(format!("apply {} {}", image.deployment, image.image));
        }
        Self::injected(&self.apply_error)?;

        let names = manifests.deployments.iter().map(|d| d.deployment.clone()).collect();
        if *self.apply_changes.lock().unwrap() {
            let mut revisions = self.revisions.lock().unwrap();
            for image in &manifests.deployments {
                *revisions.entry(image.deployment.clone()).or_insert(0) += 1;
            }
            Ok(ApplyResult {
                changed: names,
                unchanged: Vec::new(),
            })
        } else {
            Ok(ApplyResult {
                changed: Vec::new(),
                unchanged: names,
            })
        }
    }

    async fn rollout_status(
        &self,
        _namespace: &str,
        deployment: &str,
    ) -> Result<RolloutStatus, StoreError> {
        self.record(format!("rollout_status {deployment}"));
        Ok(self
            .rollouts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RolloutStatus::Complete))
    }

    async fn current_revision(
        &self,
        _namespace: &str,
        deployment: &str,
    ) -> Result<Option<i64>, StoreError> {
        self.record(format!("current_revision {deployment}"));
        let delay = *self.revision_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Self::injected(&self.revision_error)?;
        Ok(self.revisions.lock().unwrap().get(deployment).copied())
    }

    async fn delete_pods(&self, _namespace: &str, selector: &str) -> Result<usize, StoreError> {
        self.record(format!("delete_pods {selector}"));
        Ok(1)
    }

    async fn rollback_to(
        &self,
        _namespace: &str,
        deployment: &str,
        revision: i64,
    ) -> Result<(), StoreError> {
        self.record(format!("rollback_to {deployment} {revision}"));
        Ok(())
    }
}

/// Image builder that records builds and pushes
#[derive(Default)]
pub struct MockBuilder {
    build_error: Mutex<Option<String>>,
    push_error: Mutex<Option<String>>,
    build_delay: Mutex<Duration>,
    builds: Mutex<Vec<String>>,
    pushes: Mutex<Vec<String>>,
}

impl MockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_build(&self, message: &str) {
        *self.build_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_push(&self, message: &str) {
        *self.push_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_build_delay(&self, delay: Duration) {
        *self.build_delay.lock().unwrap() = delay;
    }

    pub fn builds(&self) -> Vec<String> {
        self.builds.lock().unwrap().clone()
    }

    pub fn pushes(&self) -> Vec<String> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageBuilder for MockBuilder {
    async fn build(&self, dockerfile: &Path, tag: &str) -> Result<ImageRef, BuildError> {
        self.builds
            .lock()
            .unwrap()
            .push(format!("{} {tag}", dockerfile.display()));

        let delay = *self.build_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self.build_error.lock().unwrap().clone() {
            Some(message) => Err(BuildError::Build {
                tag: tag.to_string(),
                message,
            }),
            None => Ok(ImageRef::parse(tag)),
        }
    }

    async fn push(&self, image: &ImageRef) -> Result<(), BuildError> {
        self.pushes.lock().unwrap().push(image.to_string());
        match self.push_error.lock().unwrap().clone() {
            Some(message) => Err(BuildError::Push {
                image: image.to_string(),
                message,
            }),
            None => Ok(()),
        }
    }
}
