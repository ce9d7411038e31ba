//! Smoke probe command

use anyhow::{bail, Result};
use remedy_lib::{
    probe::{verify, HttpProbeClient, VerificationReport},
    RemedySettings,
};
use tabled::Tabled;

use crate::output::{color_status, print_json, print_table, print_warning, OutputFormat};

#[derive(Tabled)]
struct ProbeRow {
    #[tabled(rename = "Probe")]
    name: String,
    #[tabled(rename = "Request")]
    request: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Latency")]
    latency: String,
    #[tabled(rename = "Result")]
    result: String,
}

/// Run the configured smoke probes
pub async fn run_probes(settings: &RemedySettings, format: OutputFormat) -> Result<()> {
    if settings.probes.is_empty() {
        print_warning("No probes configured");
        return Ok(());
    }

    let report = verify(&HttpProbeClient::new(), &settings.probes).await;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_table(probe_rows(&report)),
    }

    if !report.all_passed() {
        let failed: Vec<&str> = report.failed().map(|r| r.name.as_str()).collect();
        bail!("Probes failed: {}", failed.join(", "));
    }
    Ok(())
}

fn probe_rows(report: &VerificationReport) -> Vec<ProbeRow> {
    report
        .results
        .iter()
        .map(|r| ProbeRow {
            name: r.name.clone(),
            request: format!("{} {}", r.method, r.url),
            status: r.status.map_or_else(|| "-".to_string(), |s| s.to_string()),
            latency: format!("{}ms", r.latency_ms),
            result: match &r.error {
                Some(error) => color_status("failed") + ": " + error,
                None if r.passed => color_status("passed"),
                None => color_status("failed"),
            },
        })
        .collect()
}
