//! Workload snapshot reader
//!
//! Reads pods, services and events for one namespace and assembles them into
//! an immutable [`WorkloadSnapshot`]. A failure in any sub-read fails the whole
//! read: callers never see a partially populated snapshot.

use crate::models::WorkloadSnapshot;
use crate::store::{timed, StoreError, WorkloadStore};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Store read failure that is expected to clear on a later poll
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("transient read error during {operation}: {source}")]
pub struct TransientReadError {
    pub operation: &'static str,
    #[source]
    pub source: StoreError,
}

impl TransientReadError {
    fn new(operation: &'static str, source: StoreError) -> Self {
        Self { operation, source }
    }

    /// Always true: the loop re-polls instead of failing
    pub fn is_retryable(&self) -> bool {
        true
    }
}

/// Reads workload snapshots from a Workload Store
#[derive(Clone)]
pub struct SnapshotReader {
    store: Arc<dyn WorkloadStore>,
    call_timeout: Duration,
}

impl SnapshotReader {
    pub fn new(store: Arc<dyn WorkloadStore>, call_timeout: Duration) -> Self {
        Self { store, call_timeout }
    }

    /// Capture the current state of the workload selected by `selector`
    pub async fn read(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<WorkloadSnapshot, TransientReadError> {
        let pods = timed(self.call_timeout, "list pods", self.store.list_pods(namespace, selector))
            .await
            .map_err(|e| TransientReadError::new("list pods", e))?;

        let services = timed(
            self.call_timeout,
            "list services",
            self.store.list_services(namespace),
        )
        .await
            .map_err(|e| TransientReadError::new("list services", e))?;

        let events = timed(self.call_timeout, "list events", self.store.list_events(namespace))
            .await
            .map_err(|e| TransientReadError::new("list events", e))?;

        debug!(
            namespace = %namespace,
            pods = pods.len(),
            services = services.len(),
            events = events.len(),
            "Captured workload snapshot"
        );

        Ok(WorkloadSnapshot::new(namespace, pods, services, events))
    }
}
