//! Agent configuration

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

pub const ENV_PREFIX: &str = "REMEDY_AGENT";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Where the JSON run report is written
    #[serde(default = "default_report_path")]
    pub report_path: PathBuf,

    /// Remediation settings file; `remedy.toml` in the working directory when unset
    #[serde(default)]
    pub settings_path: Option<PathBuf>,

    /// Run smoke probes after a successful run
    #[serde(default = "default_run_probes")]
    pub run_probes: bool,
}

fn default_api_port() -> u16 {
    9090
}

fn default_report_path() -> PathBuf {
    PathBuf::from("remedy-report.json")
}

fn default_run_probes() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            report_path: default_report_path(),
            settings_path: None,
            run_probes: default_run_probes(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from `REMEDY_AGENT_*` environment variables
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
