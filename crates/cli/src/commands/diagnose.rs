//! Diagnostics command

use anyhow::Result;
use colored::Colorize;
use remedy_lib::executor::{collect_diagnostics, DiagnosticReport};
use tabled::Tabled;

use crate::client::ClusterSession;
use crate::output::{
    color_status, format_timestamp, print_heading, print_info, print_json, print_table,
    print_warning, tail, OutputFormat,
};

/// Log lines shown per pod in table output
const LOG_PREVIEW_LINES: usize = 15;

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "Last Seen")]
    last_seen: String,
    #[tabled(rename = "Object")]
    object: String,
    #[tabled(rename = "Reason")]
    reason: String,
    #[tabled(rename = "Count")]
    count: i32,
    #[tabled(rename = "Message")]
    message: String,
}

/// Collect and print diagnostics for every pod of the workload
pub async fn run_diagnostics(session: &ClusterSession, format: OutputFormat) -> Result<()> {
    let execution = &session.settings.execution;
    let report = collect_diagnostics(
        session.store(),
        &session.settings.workload,
        None,
        session.call_timeout(),
        execution.log_tail_lines,
    )
    .await;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_report(&report),
    }

    Ok(())
}

fn print_report(report: &DiagnosticReport) {
    print_heading("Diagnostics");
    println!("Namespace: {}", report.namespace.cyan());
    println!("Collected: {}", format_timestamp(&report.collected_at));
    println!();

    if report.pods.is_empty() {
        print_warning("No pods match the workload selector");
    }

    for pod in &report.pods {
        println!("{}", format!("Pod {}", pod.name).bold());
        println!("{}", "-".repeat(60));
        if let Some(description) = &pod.description {
            println!("{}", tail(description, LOG_PREVIEW_LINES));
        }
        if let Some(logs) = &pod.logs {
            println!("{}", "Logs:".bold());
            println!("{}", tail(logs, LOG_PREVIEW_LINES));
        }
        if let Some(previous) = &pod.previous_logs {
            println!("{}", "Previous container logs:".bold());
            println!("{}", tail(previous, LOG_PREVIEW_LINES));
        }
        println!();
    }

    println!("{}", "Warning events".bold());
    print_table(
        report
            .warnings()
            .map(|e| EventRow {
                last_seen: e.last_seen.as_ref().map(format_timestamp).unwrap_or_default(),
                object: e.object.clone(),
                reason: e.reason.clone(),
                count: e.count,
                message: e.message.clone(),
            })
            .collect(),
    );
    println!();

    println!("{}", "Services".bold());
    for check in &report.services {
        println!(
            "  {:<10} {:<28} {}",
            check.target.to_string(),
            check.service,
            color_status(&check.status.to_string())
        );
    }

    if !report.is_complete() {
        println!();
        for error in &report.errors {
            print_warning(error);
        }
        print_info("Diagnostics are incomplete; the listed calls failed");
    }
}
