//! Run report persistence

use anyhow::{Context, Result};
use remedy_lib::RunReport;
use std::path::Path;

/// Write `report` as pretty JSON, creating parent directories as needed
pub async fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let json = serde_json::to_vec_pretty(report).context("failed to serialize run report")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("failed to write run report to {}", path.display()))?;

    Ok(())
}
