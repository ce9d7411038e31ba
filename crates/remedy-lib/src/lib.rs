//! Remediation library for the Lingua Phone workload
//!
//! This crate provides the core functionality for:
//! - Reading workload snapshots from the cluster
//! - Classifying workload health and planning remediation
//! - Executing remediation actions (rebuild, recreate, rollback)
//! - The orchestrator loop and its run report
//! - Health checks and observability

pub mod builder;
pub mod classifier;
pub mod credentials;
pub mod executor;
pub mod health;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod planner;
pub mod probe;
pub mod settings;
pub mod snapshot;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{RemedyMetrics, RunLogger};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, RunReport, RunStatus};
pub use settings::RemedySettings;
