//! Remediation settings
//!
//! Layered configuration: an optional TOML file followed by `REMEDY_*`
//! environment variables (`__` separates nested keys, e.g.
//! `REMEDY_WORKLOAD__NAMESPACE`). Every field has a default, so an empty
//! configuration describes the stock Lingua deployment.

use crate::classifier::Classifier;
use crate::credentials::{
    CredentialProvider, GcloudCredentialProvider, KubeconfigCredentialProvider,
};
use crate::models::Target;
use crate::planner::PlannerPolicy;
use crate::probe::ProbeSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_PREFIX: &str = "REMEDY";
pub const DEFAULT_CONFIG_FILE: &str = "remedy";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete settings for one remediation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemedySettings {
    pub cluster: ClusterSettings,
    pub workload: WorkloadSettings,
    pub policy: PolicySettings,
    pub execution: ExecutionSettings,
    pub probes: Vec<ProbeSpec>,
}

impl Default for RemedySettings {
    fn default() -> Self {
        Self {
            cluster: ClusterSettings::default(),
            workload: WorkloadSettings::default(),
            policy: PolicySettings::default(),
            execution: ExecutionSettings::default(),
            probes: ProbeSpec::defaults(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialSource {
    /// `gcloud container clusters get-credentials`
    Gcloud,
    /// In-cluster service account or the current kubeconfig context
    Kubeconfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    pub name: String,
    pub zone: String,
    pub project: Option<String>,
    pub credentials: CredentialSource,
    /// Kubeconfig context used with `kubeconfig` credentials
    pub context: Option<String>,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            name: "lingua-cluster".to_string(),
            zone: "us-central1-a".to_string(),
            project: None,
            credentials: CredentialSource::Gcloud,
            context: None,
        }
    }
}

impl ClusterSettings {
    /// Provider selected by `credentials`
    pub fn credential_provider(&self) -> Box<dyn CredentialProvider> {
        match self.credentials {
            CredentialSource::Gcloud => {
                Box::new(GcloudCredentialProvider::new().with_project(self.project.clone()))
            }
            CredentialSource::Kubeconfig => {
                Box::new(KubeconfigCredentialProvider::new(self.context.clone()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadSettings {
    pub namespace: String,
    /// Label selector covering every pod of the workload
    pub selector: String,
    pub backend: TargetSpec,
    pub frontend: TargetSpec,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            namespace: "lingua-app".to_string(),
            selector: "app.kubernetes.io/part-of=lingua-phone".to_string(),
            backend: TargetSpec::for_tier("backend", "docker/backend.Dockerfile"),
            frontend: TargetSpec::for_tier("frontend", "docker/frontend-k8s.Dockerfile"),
        }
    }
}

impl WorkloadSettings {
    pub fn target(&self, target: Target) -> &TargetSpec {
        match target {
            Target::Backend => &self.backend,
            Target::Frontend => &self.frontend,
        }
    }
}

/// Deployment, image and service of one tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub deployment: String,
    pub container: String,
    /// Image repository without tag
    pub image: String,
    pub dockerfile: PathBuf,
    /// Selector matching only this tier's pods
    pub selector: String,
    pub service: String,
}

impl TargetSpec {
    fn for_tier(tier: &str, dockerfile: &str) -> Self {
        let name = format!("lingua-{tier}");
        Self {
            deployment: name.clone(),
            container: name.clone(),
            image: format!("gcr.io/lingua-phone/{name}"),
            dockerfile: PathBuf::from(dockerfile),
            selector: format!("app={name}"),
            service: format!("{name}-service"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    pub restart_threshold: u32,
    pub max_starting_observations: usize,
    pub max_unknown_observations: usize,
    pub attempt_budget: u32,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    pub unknown_wait_secs: u64,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            restart_threshold: 5,
            max_starting_observations: 6,
            max_unknown_observations: 3,
            attempt_budget: 10,
            backoff_base_secs: 5,
            backoff_cap_secs: 60,
            unknown_wait_secs: 10,
        }
    }
}

impl PolicySettings {
    pub fn classifier(&self) -> Classifier {
        Classifier::new(self.restart_threshold)
    }

    pub fn planner_policy(&self) -> PlannerPolicy {
        PlannerPolicy {
            backoff_base: Duration::from_secs(self.backoff_base_secs),
            backoff_cap: Duration::from_secs(self.backoff_cap_secs),
            max_starting_observations: self.max_starting_observations,
            unknown_wait: Duration::from_secs(self.unknown_wait_secs),
            max_unknown_observations: self.max_unknown_observations,
        }
    }
}

/// How rebuilt images are tagged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagStrategy {
    /// `<image>:<run-id>-<attempt>`, a fresh tag per rebuild
    RunScoped,
    /// Re-push a fixed tag and recreate pods so they pull it again
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub rollout_timeout_secs: u64,
    pub rollout_poll_secs: u64,
    pub store_call_timeout_secs: u64,
    pub build_timeout_secs: u64,
    pub log_tail_lines: i64,
    /// Directory docker builds run from
    pub build_context: PathBuf,
    pub tag_strategy: TagStrategy,
    pub fixed_tag: String,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            rollout_timeout_secs: 120,
            rollout_poll_secs: 5,
            store_call_timeout_secs: 30,
            build_timeout_secs: 900,
            log_tail_lines: 50,
            build_context: PathBuf::from("."),
            tag_strategy: TagStrategy::RunScoped,
            fixed_tag: "latest".to_string(),
        }
    }
}

impl RemedySettings {
    /// Load settings from `path` (or `remedy.toml` in the working directory
    /// when present) and the environment, then validate them
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings: RemedySettings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.policy.attempt_budget == 0 {
            return Err(SettingsError::Invalid("policy.attempt_budget must be at least 1".into()));
        }
        if self.workload.namespace.trim().is_empty() {
            return Err(SettingsError::Invalid("workload.namespace must not be empty".into()));
        }
        if self.policy.backoff_base_secs > self.policy.backoff_cap_secs {
            return Err(SettingsError::Invalid(format!(
                "policy.backoff_base_secs ({}) exceeds policy.backoff_cap_secs ({})",
                self.policy.backoff_base_secs, self.policy.backoff_cap_secs
            )));
        }
        if self.execution.rollout_poll_secs == 0 {
            return Err(SettingsError::Invalid(
                "execution.rollout_poll_secs must be at least 1".into(),
            ));
        }
        if self.execution.tag_strategy == TagStrategy::Fixed
            && self.execution.fixed_tag.trim().is_empty()
        {
            return Err(SettingsError::Invalid(
                "execution.fixed_tag is required with the fixed tag strategy".into(),
            ));
        }
        for probe in &self.probes {
            url::Url::parse(&probe.url).map_err(|e| {
                SettingsError::Invalid(format!(
                    "probe {} has invalid url {}: {e}",
                    probe.name, probe.url
                ))
            })?;
        }
        Ok(())
    }
}
