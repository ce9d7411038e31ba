//! Configuration management for the CLI

use anyhow::{Context, Result};
use remedy_lib::RemedySettings;
use std::path::{Path, PathBuf};

/// Load remediation settings.
///
/// An explicit path wins; otherwise the per-user file is used when it exists,
/// and finally `remedy.toml` in the working directory (optional).
pub fn load_settings(explicit: Option<&Path>) -> Result<RemedySettings> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => config_path().filter(|p| p.exists()),
    };

    RemedySettings::load(path.as_deref()).with_context(|| match &path {
        Some(path) => format!("Failed to load settings from {}", path.display()),
        None => "Failed to load settings".to_string(),
    })
}

/// Per-user settings file
fn config_path() -> Option<PathBuf> {
    dirs_next::home_dir().map(|home| home.join(".config").join("remedy").join("remedy.toml"))
}
