//! Kubernetes-backed Workload Store
//!
//! Talks to the cluster API through `kube`. Conversions from API objects into
//! the workload models are plain functions so they can be tested without a
//! cluster.

use super::{ApplyResult, LogOptions, ManifestSet, RolloutStatus, StoreError, WorkloadStore};
use crate::credentials::ClusterCredentials;
use crate::models::{ContainerState, EventRecord, PodPhase, PodRecord, ServiceRecord};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{ContainerStatus, Event, Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, LogParams, Patch, PatchParams};
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::{debug, info};

const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";
const CHANGE_CAUSE_ANNOTATION: &str = "kubernetes.io/change-cause";
const POD_TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

/// Workload Store backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeWorkloadStore {
    client: Client,
}

impl KubeWorkloadStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the kubeconfig context produced by the credential provider,
    /// or the inferred configuration when no context was named
    pub async fn connect(credentials: &ClusterCredentials) -> Result<Self, StoreError> {
        let config = match &credentials.context {
            Some(context) => {
                let options = KubeConfigOptions {
                    context: Some(context.clone()),
                    ..KubeConfigOptions::default()
                };
                Config::from_kubeconfig(&options).await.map_err(|e| {
                    StoreError::Unavailable(format!(
                        "failed to load kubeconfig context {context}: {e}"
                    ))
                })?
            }
            None => Config::infer().await.map_err(|e| {
                StoreError::Unavailable(format!("failed to infer cluster config: {e}"))
            })?,
        };

        let client = Client::try_from(config)
            .map_err(|e| StoreError::Unavailable(format!("failed to create client: {e}")))?;

        info!(cluster = %credentials.cluster, "Connected to workload store");
        Ok(Self::new(client))
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn events(&self, namespace: &str) -> Api<Event> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl WorkloadStore for KubeWorkloadStore {
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<PodRecord>, StoreError> {
        let pods = self
            .pods(namespace)
            .list(&selector_params(selector))
            .await
            .map_err(|e| map_kube_error(e, "list pods", "namespace", namespace))?;

        debug!(
            namespace = %namespace,
            selector = %selector,
            count = pods.items.len(),
            "Listed pods"
        );
        Ok(pods.items.iter().map(pod_record_from).collect())
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<ServiceRecord>, StoreError> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let list = services
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error(e, "list services", "namespace", namespace))?;

        Ok(list.items.iter().map(service_record_from).collect())
    }

    async fn list_events(&self, namespace: &str) -> Result<Vec<EventRecord>, StoreError> {
        let list = self
            .events(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error(e, "list events", "namespace", namespace))?;

        let mut events: Vec<EventRecord> = list.items.iter().map(event_record_from).collect();
        events.sort_by_key(|e| e.last_seen);
        Ok(events)
    }

    async fn describe_pod(&self, namespace: &str, name: &str) -> Result<String, StoreError> {
        let pod = self
            .pods(namespace)
            .get(name)
            .await
            .map_err(|e| map_kube_error(e, "describe pod", "pod", name))?;

        let field_selector = format!("involvedObject.name={name}");
        let events = self
            .events(namespace)
            .list(&ListParams::default().fields(&field_selector))
            .await
            .map_err(|e| map_kube_error(e, "list pod events", "pod", name))?;

        let mut events: Vec<EventRecord> = events.items.iter().map(event_record_from).collect();
        events.sort_by_key(|e| e.last_seen);

        Ok(describe(&pod, &events))
    }

    async fn get_logs(
        &self,
        namespace: &str,
        name: &str,
        options: LogOptions,
    ) -> Result<String, StoreError> {
        let params = LogParams {
            previous: options.previous,
            tail_lines: Some(options.tail),
            ..LogParams::default()
        };

        self.pods(namespace)
            .logs(name, &params)
            .await
            .map_err(|e| map_kube_error(e, "get logs", "pod", name))
    }

    async fn apply(
        &self,
        namespace: &str,
        manifests: &ManifestSet,
    ) -> Result<ApplyResult, StoreError> {
        let api = self.deployments(namespace);
        let mut result = ApplyResult::default();

        for desired in &manifests.deployments {
            let current = api
                .get(&desired.deployment)
                .await
                .map_err(|e| map_kube_error(e, "apply", "deployment", &desired.deployment))?;

            if container_image(&current, &desired.container) == Some(desired.image.as_str()) {
                debug!(
                    deployment = %desired.deployment,
                    image = %desired.image,
                    "Deployment already up to date"
                );
                result.unchanged.push(desired.deployment.clone());
                continue;
            }

            let mut patch = json!({
                "spec": {
                    "template": {
                        "spec": {
                            "containers": [{ "name": desired.container, "image": desired.image }]
                        }
                    }
                }
            });
            if let Some(cause) = &manifests.change_cause {
                let mut annotations = serde_json::Map::new();
                annotations.insert(CHANGE_CAUSE_ANNOTATION.to_string(), json!(cause));
                patch["metadata"] = json!({ "annotations": annotations });
            }

            api.patch(&desired.deployment, &PatchParams::default(), &Patch::Strategic(&patch))
                .await
                .map_err(|e| map_kube_error(e, "apply", "deployment", &desired.deployment))?;

            info!(
                namespace = %namespace,
                deployment = %desired.deployment,
                image = %desired.image,
                "Applied deployment image"
            );
            result.changed.push(desired.deployment.clone());
        }

        Ok(result)
    }

    async fn rollout_status(
        &self,
        namespace: &str,
        deployment: &str,
    ) -> Result<RolloutStatus, StoreError> {
        let current = self
            .deployments(namespace)
            .get(deployment)
            .await
            .map_err(|e| map_kube_error(e, "rollout status", "deployment", deployment))?;

        Ok(rollout_status_of(&current))
    }

    async fn current_revision(
        &self,
        namespace: &str,
        deployment: &str,
    ) -> Result<Option<i64>, StoreError> {
        let current = self
            .deployments(namespace)
            .get(deployment)
            .await
            .map_err(|e| map_kube_error(e, "read revision", "deployment", deployment))?;

        Ok(revision_of(&current.metadata))
    }

    async fn delete_pods(&self, namespace: &str, selector: &str) -> Result<usize, StoreError> {
        let deleted = self
            .pods(namespace)
            .delete_collection(&DeleteParams::default(), &selector_params(selector))
            .await
            .map_err(|e| map_kube_error(e, "delete pods", "namespace", namespace))?;

        let count = deleted.left().map(|list| list.items.len()).unwrap_or(0);
        info!(namespace = %namespace, selector = %selector, count, "Deleted pods for recreation");
        Ok(count)
    }

    async fn rollback_to(
        &self,
        namespace: &str,
        deployment: &str,
        revision: i64,
    ) -> Result<(), StoreError> {
        let deployments = self.deployments(namespace);
        let current = deployments
            .get(deployment)
            .await
            .map_err(|e| map_kube_error(e, "rollback", "deployment", deployment))?;

        let selector = current
            .spec
            .as_ref()
            .and_then(|s| s.selector.match_labels.as_ref())
            .map(label_selector)
            .unwrap_or_default();
        let owner_uid = current.metadata.uid.clone();

        let replica_sets: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let candidates = replica_sets
            .list(&selector_params(&selector))
            .await
            .map_err(|e| map_kube_error(e, "rollback", "deployment", deployment))?;

        let not_found = || StoreError::RevisionNotFound {
            deployment: deployment.to_string(),
            revision,
        };

        let mut template = candidates
            .items
            .into_iter()
            .filter(|rs| is_owned_by(&rs.metadata, owner_uid.as_deref()))
            .find(|rs| revision_of(&rs.metadata) == Some(revision))
            .and_then(|rs| rs.spec)
            .and_then(|spec| spec.template)
            .ok_or_else(not_found)?;

        if let Some(labels) = template.metadata.as_mut().and_then(|m| m.labels.as_mut()) {
            labels.remove(POD_TEMPLATE_HASH_LABEL);
        }

        let patch = json!({ "spec": { "template": template } });
        deployments
            .patch(deployment, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(e, "rollback", "deployment", deployment))?;

        info!(namespace = %namespace, deployment = %deployment, revision, "Rolled back deployment");
        Ok(())
    }
}

/// Convert an API pod into a workload record.
///
/// The record describes the first container that is not ready (or the first
/// container when all are ready); the restart count is the highest of all
/// containers.
pub fn pod_record_from(pod: &Pod) -> PodRecord {
    let status = pod.status.as_ref();
    let phase = status
        .and_then(|s| s.phase.as_deref())
        .map(PodPhase::parse)
        .unwrap_or(PodPhase::Unknown);

    let statuses: &[ContainerStatus] = status
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or(&[]);
    let primary = statuses.iter().find(|c| !c.ready).or_else(|| statuses.first());

    let container_state = match primary {
        Some(container) => container_state_of(container),
        None => ContainerState::waiting(
            status
                .and_then(|s| s.reason.clone())
                .unwrap_or_else(|| "Pending".to_string()),
        ),
    };

    let restart_count = statuses
        .iter()
        .map(|c| c.restart_count.max(0) as u32)
        .max()
        .unwrap_or(0);

    let ready_condition = status
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .map(|c| c.status == "True");
    let ready = ready_condition
        .unwrap_or_else(|| !statuses.is_empty() && statuses.iter().all(|c| c.ready));

    PodRecord {
        name: pod.metadata.name.clone().unwrap_or_default(),
        phase,
        container_state,
        restart_count,
        ready,
    }
}

fn container_state_of(container: &ContainerStatus) -> ContainerState {
    let state = container.state.as_ref();

    if let Some(waiting) = state.and_then(|s| s.waiting.as_ref()) {
        return ContainerState::Waiting {
            reason: waiting.reason.clone().unwrap_or_else(|| "Waiting".to_string()),
            message: waiting.message.clone(),
        };
    }
    if let Some(terminated) = state.and_then(|s| s.terminated.as_ref()) {
        return ContainerState::Terminated {
            reason: terminated
                .reason
                .clone()
                .unwrap_or_else(|| "Terminated".to_string()),
            exit_code: terminated.exit_code,
        };
    }
    if state.and_then(|s| s.running.as_ref()).is_some() {
        return ContainerState::Running;
    }

    ContainerState::waiting("Unknown")
}

/// Convert an API service into a workload record
pub fn service_record_from(service: &Service) -> ServiceRecord {
    let spec = service.spec.as_ref();

    ServiceRecord {
        name: service.metadata.name.clone().unwrap_or_default(),
        selector: spec.and_then(|s| s.selector.clone()).unwrap_or_default(),
        cluster_ip: spec.and_then(|s| s.cluster_ip.clone()),
        ports: spec
            .and_then(|s| s.ports.as_ref())
            .map(|ports| ports.iter().map(|p| p.port).collect())
            .unwrap_or_default(),
    }
}

fn event_record_from(event: &Event) -> EventRecord {
    EventRecord {
        object: event.involved_object.name.clone().unwrap_or_default(),
        reason: event.reason.clone().unwrap_or_default(),
        message: event.message.clone().unwrap_or_default(),
        event_type: event.type_.clone().unwrap_or_else(|| "Normal".to_string()),
        count: event.count.unwrap_or(1),
        last_seen: event
            .last_timestamp
            .as_ref()
            .map(|t| t.0)
            .or_else(|| event.event_time.as_ref().map(|t| t.0)),
    }
}

/// Rollout progress of a deployment, following the same checks as
/// `kubectl rollout status`
pub fn rollout_status_of(deployment: &Deployment) -> RolloutStatus {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);

    let Some(status) = deployment.status.as_ref() else {
        return RolloutStatus::Progressing {
            desired,
            updated: 0,
            available: 0,
        };
    };

    let updated = status.updated_replicas.unwrap_or(0);
    let available = status.available_replicas.unwrap_or(0);
    let progressing = RolloutStatus::Progressing {
        desired,
        updated,
        available,
    };

    let generation = deployment.metadata.generation.unwrap_or(0);
    if status.observed_generation.unwrap_or(0) < generation {
        return progressing;
    }

    let deadline_exceeded = status
        .conditions
        .iter()
        .flatten()
        .find(|c| {
            c.type_ == "Progressing" && c.reason.as_deref() == Some("ProgressDeadlineExceeded")
        });
    if let Some(condition) = deadline_exceeded {
        return RolloutStatus::Failed {
            reason: condition
                .message
                .clone()
                .unwrap_or_else(|| "progress deadline exceeded".to_string()),
        };
    }

    let total = status.replicas.unwrap_or(0);
    if updated < desired || total > updated || available < updated {
        return progressing;
    }

    RolloutStatus::Complete
}

fn revision_of(metadata: &ObjectMeta) -> Option<i64> {
    metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(REVISION_ANNOTATION))
        .and_then(|r| r.parse().ok())
}

fn is_owned_by(metadata: &ObjectMeta, owner_uid: Option<&str>) -> bool {
    let Some(uid) = owner_uid else {
        return true;
    };
    metadata
        .owner_references
        .iter()
        .flatten()
        .any(|owner| owner.uid == uid)
}

fn container_image<'a>(deployment: &'a Deployment, container: &str) -> Option<&'a str> {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|pod| pod.containers.iter().find(|c| c.name == container))
        .and_then(|c| c.image.as_deref())
}

fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn selector_params(selector: &str) -> ListParams {
    if selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(selector)
    }
}

fn map_kube_error(err: kube::Error, operation: &str, kind: &'static str, name: &str) -> StoreError {
    match err {
        kube::Error::Api(response) => match response.code {
            404 => StoreError::NotFound {
                kind,
                name: name.to_string(),
            },
            400 | 403 | 409 | 422 => StoreError::Rejected {
                operation: operation.to_string(),
                message: response.message,
            },
            _ => StoreError::Unavailable(format!("{operation}: {}", response.message)),
        },
        other => StoreError::Unavailable(format!("{operation}: {other}")),
    }
}

/// Render a `kubectl describe`-style summary of a pod
fn describe(pod: &Pod, events: &[EventRecord]) -> String {
    let mut out = String::new();
    let record = pod_record_from(pod);
    let spec = pod.spec.as_ref();
    let status = pod.status.as_ref();

    let _ = writeln!(out, "Name:         {}", record.name);
    let _ = writeln!(
        out,
        "Namespace:    {}",
        pod.metadata.namespace.as_deref().unwrap_or("")
    );
    let _ = writeln!(
        out,
        "Node:         {}",
        spec.and_then(|s| s.node_name.as_deref()).unwrap_or("<none>")
    );
    let _ = writeln!(out, "Phase:        {}", record.phase);
    if let Some(reason) = status.and_then(|s| s.reason.as_deref()) {
        let _ = writeln!(out, "Reason:       {reason}");
    }
    if let Some(message) = status.and_then(|s| s.message.as_deref()) {
        let _ = writeln!(out, "Message:      {message}");
    }

    let _ = writeln!(out, "Containers:");
    for container in spec.map(|s| s.containers.as_slice()).unwrap_or(&[]) {
        let _ = writeln!(out, "  {}:", container.name);
        let _ = writeln!(out, "    Image:          {}", container.image.as_deref().unwrap_or(""));
        let container_status = status
            .and_then(|s| s.container_statuses.as_ref())
            .and_then(|all| all.iter().find(|c| c.name == container.name));
        if let Some(cs) = container_status {
            let _ = writeln!(out, "    State:          {}", container_state_of(cs));
            let _ = writeln!(out, "    Ready:          {}", cs.ready);
            let _ = writeln!(out, "    Restart Count:  {}", cs.restart_count);
        }
    }

    let _ = writeln!(out, "Conditions:");
    for condition in status.and_then(|s| s.conditions.as_ref()).into_iter().flatten() {
        let _ = writeln!(out, "  {:<18}{}", condition.type_, condition.status);
    }

    let _ = writeln!(out, "Events:");
    if events.is_empty() {
        let _ = writeln!(out, "  <none>");
    }
    for event in events {
        let _ = writeln!(
            out,
            "  {:<8} {:<22} x{:<4} {}",
            event.event_type, event.reason, event.count, event.message
        );
    }

    out
}
