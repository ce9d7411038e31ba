//! Docker CLI image builder
//!
//! Shells out to `docker build` / `docker push` from the build context.

use super::{BuildError, ImageBuilder, ImageRef};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info};

/// Image builder driving the docker CLI
#[derive(Debug, Clone)]
pub struct DockerImageBuilder {
    context: PathBuf,
    program: String,
}

impl DockerImageBuilder {
    pub fn new(context: impl Into<PathBuf>) -> Self {
        Self {
            context: context.into(),
            program: "docker".to_string(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn context(&self) -> &Path {
        &self.context
    }

    async fn run(&self, args: &[&str]) -> std::io::Result<Output> {
        Command::new(&self.program)
            .args(args)
            .current_dir(&self.context)
            .kill_on_drop(true)
            .output()
            .await
    }
}

#[async_trait]
impl ImageBuilder for DockerImageBuilder {
    async fn build(&self, dockerfile: &Path, tag: &str) -> Result<ImageRef, BuildError> {
        let build_failure = |message: String| BuildError::Build {
            tag: tag.to_string(),
            message,
        };

        let dockerfile = dockerfile.to_string_lossy().into_owned();
        debug!(
            dockerfile = %dockerfile,
            tag = %tag,
            context = %self.context.display(),
            "Building image"
        );

        let output = self
            .run(&["build", "-t", tag, "-f", dockerfile.as_str(), "."])
            .await
            .map_err(|e| build_failure(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(build_failure(last_lines(&output.stderr)));
        }

        info!(tag = %tag, "Built image");
        Ok(ImageRef::parse(tag))
    }

    async fn push(&self, image: &ImageRef) -> Result<(), BuildError> {
        let reference = image.to_string();
        let push_failure = |message: String| BuildError::Push {
            image: reference.clone(),
            message,
        };

        let output = self
            .run(&["push", reference.as_str()])
            .await
            .map_err(|e| push_failure(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(push_failure(last_lines(&output.stderr)));
        }

        info!(image = %reference, "Pushed image");
        Ok(())
    }
}

/// Tail of a command's stderr, enough to identify the failing step
fn last_lines(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join("\n")
}
