//! Cluster credential acquisition
//!
//! Credentials are acquired exactly once, before the remediation loop starts.
//! A failure here is terminal for the run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::config::Kubeconfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to acquire credentials for cluster {cluster} in {zone}: {message}")]
    AuthFailure {
        cluster: String,
        zone: String,
        message: String,
    },
}

/// Handle proving access to a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterCredentials {
    pub cluster: String,
    pub zone: String,
    /// Kubeconfig context to connect with. `None` means the inferred default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub acquired_at: DateTime<Utc>,
}

/// Source of cluster credentials
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn acquire(
        &self,
        cluster: &str,
        zone: &str,
    ) -> Result<ClusterCredentials, CredentialError>;
}

/// Acquires credentials through `gcloud container clusters get-credentials`,
/// which writes a context into the local kubeconfig
#[derive(Debug, Clone)]
pub struct GcloudCredentialProvider {
    program: String,
    project: Option<String>,
}

impl Default for GcloudCredentialProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GcloudCredentialProvider {
    pub fn new() -> Self {
        Self {
            program: "gcloud".to_string(),
            project: None,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_project(mut self, project: Option<String>) -> Self {
        self.project = project;
        self
    }
}

#[async_trait]
impl CredentialProvider for GcloudCredentialProvider {
    async fn acquire(
        &self,
        cluster: &str,
        zone: &str,
    ) -> Result<ClusterCredentials, CredentialError> {
        let auth_failure = |message: String| CredentialError::AuthFailure {
            cluster: cluster.to_string(),
            zone: zone.to_string(),
            message,
        };

        let mut command = Command::new(&self.program);
        command.args(["container", "clusters", "get-credentials", cluster, "--zone", zone]);
        if let Some(project) = &self.project {
            command.args(["--project", project]);
        }

        debug!(
            program = %self.program,
            cluster = %cluster,
            zone = %zone,
            "Requesting cluster credentials"
        );
        let output = command
            .output()
            .await
            .map_err(|e| auth_failure(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(auth_failure(stderr.trim().to_string()));
        }

        let kubeconfig = Kubeconfig::read()
            .map_err(|e| auth_failure(format!("failed to read kubeconfig: {e}")))?;
        let context = kubeconfig
            .current_context
            .ok_or_else(|| auth_failure("kubeconfig has no current context".to_string()))?;

        info!(cluster = %cluster, zone = %zone, context = %context, "Acquired cluster credentials");
        Ok(ClusterCredentials {
            cluster: cluster.to_string(),
            zone: zone.to_string(),
            context: Some(context),
            acquired_at: Utc::now(),
        })
    }
}

/// Uses whatever configuration is already available: the in-cluster service
/// account or the current kubeconfig context
#[derive(Debug, Clone, Default)]
pub struct KubeconfigCredentialProvider {
    context: Option<String>,
}

impl KubeconfigCredentialProvider {
    pub fn new(context: Option<String>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl CredentialProvider for KubeconfigCredentialProvider {
    async fn acquire(
        &self,
        cluster: &str,
        zone: &str,
    ) -> Result<ClusterCredentials, CredentialError> {
        kube::Config::infer().await.map_err(|e| CredentialError::AuthFailure {
            cluster: cluster.to_string(),
            zone: zone.to_string(),
            message: e.to_string(),
        })?;

        Ok(ClusterCredentials {
            cluster: cluster.to_string(),
            zone: zone.to_string(),
            context: self.context.clone(),
            acquired_at: Utc::now(),
        })
    }
}
