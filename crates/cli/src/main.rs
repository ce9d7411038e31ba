//! Remedy operator CLI
//!
//! Inspects the Lingua workload and runs single remediation steps by hand:
//! status, diagnostics, rebuild, pod recreation, rollback and smoke probes.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use commands::{diagnose, probe, remediate, report, status};
use remedy_lib::models::Target;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Lingua workload remediation CLI
#[derive(Parser)]
#[command(name = "remedy")]
#[command(author, version, about = "Diagnose and remediate the Lingua workload", long_about = None)]
pub struct Cli {
    /// Settings file (defaults to ~/.config/remedy/remedy.toml, then ./remedy.toml)
    #[arg(long, env = "REMEDY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify the workload and check its services
    Status,

    /// Collect pod descriptions, logs, events and service checks
    Diagnose,

    /// Rebuild, push and redeploy images
    Rebuild {
        /// Tier to rebuild; repeat for several (default: all)
        #[arg(long = "target", short)]
        targets: Vec<TargetArg>,
    },

    /// Delete the workload's pods so their controllers recreate them
    Recreate,

    /// Roll a deployment back to a revision
    Rollback {
        /// Deployment name
        #[arg(long, short)]
        deployment: String,

        /// Revision to return to
        #[arg(long, short)]
        revision: i64,
    },

    /// Run the configured smoke probes
    Probe,

    /// Render a saved run report
    Report {
        /// Path to the JSON report written by remedy-agent
        file: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TargetArg {
    Backend,
    Frontend,
}

impl From<TargetArg> for Target {
    fn from(arg: TargetArg) -> Self {
        match arg {
            TargetArg::Backend => Target::Backend,
            TargetArg::Frontend => Target::Frontend,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    // Reading a saved report needs neither settings nor a cluster
    if let Commands::Report { file } = &cli.command {
        return report::show_report(file, cli.format);
    }

    let settings = config::load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Status => {
            let session = client::ClusterSession::connect(settings).await?;
            status::show_status(&session, cli.format).await?;
        }
        Commands::Diagnose => {
            let session = client::ClusterSession::connect(settings).await?;
            diagnose::run_diagnostics(&session, cli.format).await?;
        }
        Commands::Rebuild { targets } => {
            let session = client::ClusterSession::connect(settings).await?;
            let targets = targets.into_iter().map(Target::from).collect();
            remediate::rebuild(&session, targets, cli.format).await?;
        }
        Commands::Recreate => {
            let session = client::ClusterSession::connect(settings).await?;
            remediate::recreate(&session, cli.format).await?;
        }
        Commands::Rollback {
            deployment,
            revision,
        } => {
            let session = client::ClusterSession::connect(settings).await?;
            remediate::rollback(&session, &deployment, revision, cli.format).await?;
        }
        Commands::Probe => {
            probe::run_probes(&settings, cli.format).await?;
        }
        Commands::Report { .. } => {}
    }

    Ok(())
}
