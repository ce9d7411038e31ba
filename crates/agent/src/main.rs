//! Remedy Agent - Lingua workload remediation
//!
//! Acquires cluster credentials, runs the remediation loop once, writes the
//! run report and exits with the run's status code.

use anyhow::{Context, Result};
use remedy_agent::{api, config::AgentConfig, report::write_report};
use remedy_lib::{
    builder::DockerImageBuilder,
    health::{components, HealthRegistry},
    observability::RemedyMetrics,
    probe::HttpProbeClient,
    store::KubeWorkloadStore,
    Orchestrator, RemedySettings,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit status when credentials cannot be acquired
const EXIT_AUTH_FAILURE: i32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting remedy-agent");

    let config = AgentConfig::load().context("failed to load agent configuration")?;
    let settings = RemedySettings::load(config.settings_path.as_deref())
        .context("failed to load remediation settings")?;
    info!(
        cluster = %settings.cluster.name,
        namespace = %settings.workload.namespace,
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::WORKLOAD_STORE).await;
    health_registry.register(components::IMAGE_BUILDER).await;
    health_registry.register(components::ORCHESTRATOR).await;

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), RemedyMetrics::new()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let provider = settings.cluster.credential_provider();
    let credentials = match provider
        .acquire(&settings.cluster.name, &settings.cluster.zone)
        .await
    {
        Ok(credentials) => credentials,
        Err(e) => {
            error!(error = %e, "Credential acquisition failed, not starting the run");
            api_handle.abort();
            std::process::exit(EXIT_AUTH_FAILURE);
        }
    };

    let store = KubeWorkloadStore::connect(&credentials)
        .await
        .context("failed to connect to the cluster")?;
    let image_builder = DockerImageBuilder::new(settings.execution.build_context.clone());
    let report_path = config.report_path.clone();

    let mut builder = Orchestrator::builder()
        .store(Arc::new(store))
        .image_builder(Arc::new(image_builder))
        .credentials(credentials)
        .settings(settings)
        .health(health_registry.clone());
    if config.run_probes {
        builder = builder.probe_client(Arc::new(HttpProbeClient::new()));
    }
    let orchestrator = builder.build()?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("SIGINT received, aborting run");
            on_signal.cancel();
        }
    });

    let report = orchestrator.run(cancel).await;

    if let Err(e) = write_report(&report_path, &report).await {
        error!(error = %format!("{e:#}"), "Failed to save run report");
    } else {
        info!(path = %report_path.display(), "Run report written");
    }
    println!("{}", report.summary());

    api_handle.abort();
    std::process::exit(report.exit_code());
}
