//! Image building and publishing

mod docker;

pub use docker::DockerImageBuilder;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("build of {tag} failed: {message}")]
    Build { tag: String, message: String },

    #[error("push of {image} failed: {message}")]
    Push { image: String, message: String },
}

/// Fully qualified image reference, `repository:tag`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Split `repository:tag`. A colon inside a registry host port
    /// (`host:5000/image`) is not taken as the tag separator.
    pub fn parse(reference: &str) -> Self {
        match reference.rsplit_once(':') {
            Some((repository, tag)) if !tag.contains('/') => Self::new(repository, tag),
            _ => Self::new(reference, "latest"),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Builds container images and pushes them to a registry
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build `dockerfile` and tag the result as `tag` (`repository:tag`)
    async fn build(&self, dockerfile: &Path, tag: &str) -> Result<ImageRef, BuildError>;

    async fn push(&self, image: &ImageRef) -> Result<(), BuildError>;
}
