//! Workload Store access
//!
//! The Workload Store is the cluster control plane. Everything the orchestrator
//! reads or mutates goes through the [`WorkloadStore`] trait so the decision
//! logic never touches a live cluster in tests.

mod cluster;

pub use cluster::{pod_record_from, rollout_status_of, service_record_from, KubeWorkloadStore};

use crate::models::{EventRecord, PodRecord, ServiceRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the Workload Store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("workload store unavailable: {0}")]
    Unavailable(String),

    #[error("workload store rejected {operation}: {message}")]
    Rejected { operation: String, message: String },

    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("revision {revision} of deployment {deployment} not found")]
    RevisionNotFound { deployment: String, revision: i64 },

    #[error("{0} timed out")]
    Timeout(String),
}

impl StoreError {
    /// Whether re-issuing the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

/// Options for reading container logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    /// Read the previous (crashed) container instance
    pub previous: bool,
    /// Number of trailing lines
    pub tail: i64,
}

/// Desired image for one deployment container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentImage {
    pub deployment: String,
    pub container: String,
    pub image: String,
}

/// Set of manifest updates applied in one call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSet {
    pub deployments: Vec<DeploymentImage>,
    /// Annotation value recorded on every changed deployment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_cause: Option<String>,
}

impl ManifestSet {
    pub fn single(image: DeploymentImage) -> Self {
        Self {
            deployments: vec![image],
            change_cause: None,
        }
    }

    pub fn with_change_cause(mut self, cause: impl Into<String>) -> Self {
        self.change_cause = Some(cause.into());
        self
    }
}

/// Result of applying a manifest set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyResult {
    /// Deployments whose spec changed
    pub changed: Vec<String>,
    /// Deployments already matching the desired spec
    pub unchanged: Vec<String>,
}

/// Progress of a deployment rollout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RolloutStatus {
    Complete,
    Progressing {
        desired: i32,
        updated: i32,
        available: i32,
    },
    Failed {
        reason: String,
    },
}

impl RolloutStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, RolloutStatus::Complete)
    }
}

/// Namespaced access to the cluster control plane
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    /// List pods matching a label-equality selector
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<PodRecord>, StoreError>;

    async fn list_services(&self, namespace: &str) -> Result<Vec<ServiceRecord>, StoreError>;

    /// List events, most recent last
    async fn list_events(&self, namespace: &str) -> Result<Vec<EventRecord>, StoreError>;

    /// Human-readable description of a pod
    async fn describe_pod(&self, namespace: &str, name: &str) -> Result<String, StoreError>;

    async fn get_logs(
        &self,
        namespace: &str,
        name: &str,
        options: LogOptions,
    ) -> Result<String, StoreError>;

    async fn apply(
        &self,
        namespace: &str,
        manifests: &ManifestSet,
    ) -> Result<ApplyResult, StoreError>;

    async fn rollout_status(
        &self,
        namespace: &str,
        deployment: &str,
    ) -> Result<RolloutStatus, StoreError>;

    /// Current revision number of a deployment, if the controller assigned one
    async fn current_revision(
        &self,
        namespace: &str,
        deployment: &str,
    ) -> Result<Option<i64>, StoreError>;

    /// Delete pods matching the selector, leaving their controllers intact.
    /// Returns the number of pods deleted.
    async fn delete_pods(&self, namespace: &str, selector: &str) -> Result<usize, StoreError>;

    async fn rollback_to(
        &self,
        namespace: &str,
        deployment: &str,
        revision: i64,
    ) -> Result<(), StoreError>;
}

/// Bound a store call by `limit`, turning an elapsed deadline into [`StoreError::Timeout`]
pub async fn timed<T, F>(limit: Duration, operation: &str, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(operation.to_string())),
    }
}
