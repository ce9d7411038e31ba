//! Cluster session shared by the commands that talk to the cluster

use anyhow::{Context, Result};
use chrono::Utc;
use remedy_lib::{
    builder::DockerImageBuilder,
    credentials::ClusterCredentials,
    executor::{Executor, ExecutorConfig},
    models::WorkloadSnapshot,
    orchestrator::new_run_id,
    snapshot::SnapshotReader,
    store::{KubeWorkloadStore, WorkloadStore},
    RemedySettings,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Authenticated connection to the configured cluster
pub struct ClusterSession {
    pub settings: RemedySettings,
    pub credentials: ClusterCredentials,
    store: Arc<KubeWorkloadStore>,
}

impl ClusterSession {
    /// Acquire credentials and connect to the cluster
    pub async fn connect(settings: RemedySettings) -> Result<Self> {
        let cluster = &settings.cluster;
        let credentials = cluster
            .credential_provider()
            .acquire(&cluster.name, &cluster.zone)
            .await?;

        let store = KubeWorkloadStore::connect(&credentials)
            .await
            .with_context(|| format!("Failed to connect to cluster {}", credentials.cluster))?;
        debug!(cluster = %credentials.cluster, context = ?credentials.context, "Connected");

        Ok(Self {
            settings,
            credentials,
            store: Arc::new(store),
        })
    }

    pub fn store(&self) -> &dyn WorkloadStore {
        self.store.as_ref()
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.execution.store_call_timeout_secs)
    }

    /// Read the workload's current snapshot
    pub async fn snapshot(&self) -> Result<WorkloadSnapshot> {
        let workload = &self.settings.workload;
        let reader = SnapshotReader::new(self.store.clone(), self.call_timeout());
        let snapshot = reader
            .read(&workload.namespace, &workload.selector)
            .await
            .context("Failed to read workload snapshot")?;
        Ok(snapshot)
    }

    /// Executor for one manual operation, tagged with a fresh run id
    pub fn executor(&self) -> Executor {
        let run_id = new_run_id(Utc::now());
        let builder = DockerImageBuilder::new(self.settings.execution.build_context.clone());
        Executor::new(
            self.store.clone(),
            Arc::new(builder),
            ExecutorConfig::from_settings(&self.settings, run_id),
        )
    }
}
