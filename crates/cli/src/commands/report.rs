//! Saved run report viewer

use anyhow::{Context, Result};
use colored::Colorize;
use remedy_lib::{RunReport, RunStatus};
use std::path::Path;
use tabled::Tabled;

use crate::output::{
    color_condition, color_outcome, color_status, format_timestamp, print_heading, print_json,
    print_table, OutputFormat,
};

#[derive(Tabled)]
struct AttemptRow {
    #[tabled(rename = "#")]
    sequence: u32,
    #[tabled(rename = "Time")]
    timestamp: String,
    #[tabled(rename = "Condition")]
    condition: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

/// Load a run report from `path`
pub fn load_report(path: &Path) -> Result<RunReport> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read report {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse report {}", path.display()))
}

/// Render a saved run report
pub fn show_report(path: &Path, format: OutputFormat) -> Result<()> {
    let report = load_report(path)?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_heading(&format!("Run {}", report.run_id));
            println!("Cluster:   {}", report.cluster.cyan());
            println!("Namespace: {}", report.namespace.cyan());
            println!(
                "Started:   {}  Finished: {}",
                format_timestamp(&report.started_at),
                format_timestamp(&report.finished_at)
            );
            println!("Status:    {}", status_line(&report.status));
            if let Some(condition) = report.final_condition {
                println!("Condition: {}", color_condition(condition));
            }
            println!();

            println!("{}", "Attempts".bold());
            print_table(attempt_rows(&report));

            if !report.diagnostics.is_empty() {
                println!();
                println!("{}", "Diagnostics".bold());
                for entry in &report.diagnostics {
                    println!(
                        "  attempt {}: {} pods, {} warning events, {} errors",
                        entry.sequence,
                        entry.report.pods.len(),
                        entry.report.warnings().count(),
                        entry.report.errors.len()
                    );
                }
            }

            if let Some(verification) = &report.verification {
                println!();
                println!("{}", "Smoke probes".bold());
                for result in &verification.results {
                    let label = if result.passed { "passed" } else { "failed" };
                    println!("  {:<14} {}", result.name, color_status(label));
                }
            }
        }
    }

    Ok(())
}

fn status_line(status: &RunStatus) -> String {
    match status.reason() {
        Some(reason) => format!("{} ({reason})", color_status(status.label())),
        None => color_status(status.label()),
    }
}

fn attempt_rows(report: &RunReport) -> Vec<AttemptRow> {
    report
        .attempts
        .iter()
        .map(|a| AttemptRow {
            sequence: a.sequence,
            timestamp: format_timestamp(&a.timestamp),
            condition: a.condition.to_string(),
            action: a.action.to_string(),
            outcome: color_outcome(&a.outcome),
        })
        .collect()
}
