//! Best-effort diagnostic collection
//!
//! Unlike snapshot reads, a failing sub-call here does not fail the whole
//! collection: the error is recorded in the report and collection continues.

use crate::models::{EventRecord, PodRecord, ServiceRecord, Target};
use crate::settings::WorkloadSettings;
use crate::store::{timed, LogOptions, WorkloadStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Diagnostics gathered for one pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodDiagnostics {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    /// Logs of the previous container instance, when one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_logs: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceStatus {
    Ok,
    Missing,
    SelectorMismatch {
        expected: BTreeMap<String, String>,
        actual: BTreeMap<String, String>,
    },
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Ok => f.write_str("ok"),
            ServiceStatus::Missing => f.write_str("missing"),
            ServiceStatus::SelectorMismatch { expected, actual } => {
                write!(
                    f,
                    "selector mismatch (expected {}, found {})",
                    render(expected),
                    render(actual)
                )
            }
        }
    }
}

/// Whether a tier's service exists and selects that tier's pods
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCheck {
    pub target: Target,
    pub service: String,
    pub status: ServiceStatus,
}

/// Advisory report produced by `CollectDiagnostics`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub collected_at: DateTime<Utc>,
    pub namespace: String,
    pub pods: Vec<PodDiagnostics>,
    pub events: Vec<EventRecord>,
    pub services: Vec<ServiceCheck>,
    /// Sub-calls that failed during collection
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl DiagnosticReport {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    /// Warning events, most recent last
    pub fn warnings(&self) -> impl Iterator<Item = &EventRecord> {
        self.events.iter().filter(|e| e.event_type == "Warning")
    }
}

/// Collect diagnostics for `pods`, or for every pod matching the workload
/// selector when `pods` is `None`
pub async fn collect_diagnostics(
    store: &dyn WorkloadStore,
    workload: &WorkloadSettings,
    pods: Option<&[PodRecord]>,
    call_timeout: Duration,
    log_tail: i64,
) -> DiagnosticReport {
    let namespace = workload.namespace.as_str();
    let mut errors = Vec::new();

    let pods: Vec<PodRecord> = match pods {
        Some(pods) => pods.to_vec(),
        None => match timed(
            call_timeout,
            "list pods",
            store.list_pods(namespace, &workload.selector),
        )
        .await
        {
            Ok(pods) => pods,
            Err(e) => {
                errors.push(format!("list pods: {e}"));
                Vec::new()
            }
        },
    };

    let mut pod_diagnostics = Vec::with_capacity(pods.len());
    for pod in &pods {
        let description = timed(
            call_timeout,
            "describe pod",
            store.describe_pod(namespace, &pod.name),
        )
        .await
            .map_err(|e| errors.push(format!("describe {}: {e}", pod.name)))
            .ok();

        let current = LogOptions {
            previous: false,
            tail: log_tail,
        };
        let logs = timed(call_timeout, "get logs", store.get_logs(namespace, &pod.name, current))
            .await
            .map_err(|e| errors.push(format!("logs {}: {e}", pod.name)))
            .ok();

        // A pod that never restarted has no previous instance; that is not an error
        let previous_logs = if pod.restart_count > 0 {
            let previous = LogOptions {
                previous: true,
                tail: log_tail,
            };
            timed(call_timeout, "get previous logs", store.get_logs(namespace, &pod.name, previous))
                .await
                .map_err(|e| errors.push(format!("previous logs {}: {e}", pod.name)))
                .ok()
        } else {
            None
        };

        pod_diagnostics.push(PodDiagnostics {
            name: pod.name.clone(),
            description,
            logs,
            previous_logs,
        });
    }

    let events = timed(call_timeout, "list events", store.list_events(namespace))
        .await
        .unwrap_or_else(|e| {
            errors.push(format!("list events: {e}"));
            Vec::new()
        });

    let listed = timed(call_timeout, "list services", store.list_services(namespace)).await;
    let services = match listed {
        Ok(services) => check_services(&services, workload),
        Err(e) => {
            errors.push(format!("list services: {e}"));
            Vec::new()
        }
    };

    debug!(
        namespace = %namespace,
        pods = pod_diagnostics.len(),
        events = events.len(),
        errors = errors.len(),
        "Collected diagnostics"
    );

    DiagnosticReport {
        collected_at: Utc::now(),
        namespace: namespace.to_string(),
        pods: pod_diagnostics,
        events,
        services,
        errors,
    }
}

/// Compare the namespace's services with each tier's expected service
pub fn check_services(
    services: &[ServiceRecord],
    workload: &WorkloadSettings,
) -> Vec<ServiceCheck> {
    Target::ALL
        .into_iter()
        .map(|target| {
            let spec = workload.target(target);
            let expected = parse_selector(&spec.selector);

            let status = match services.iter().find(|s| s.name == spec.service) {
                None => ServiceStatus::Missing,
                Some(service) if selects(&service.selector, &expected) => ServiceStatus::Ok,
                Some(service) => ServiceStatus::SelectorMismatch {
                    expected,
                    actual: service.selector.clone(),
                },
            };

            ServiceCheck {
                target,
                service: spec.service.clone(),
                status,
            }
        })
        .collect()
}

/// Parse a label-equality selector (`app=x,tier=y`)
pub fn parse_selector(selector: &str) -> BTreeMap<String, String> {
    selector
        .split(',')
        .filter_map(|term| term.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

// A service selects the tier when its selector equals the tier selector on
// every key it names.
fn selects(actual: &BTreeMap<String, String>, expected: &BTreeMap<String, String>) -> bool {
    !actual.is_empty() && actual.iter().all(|(k, v)| expected.get(k) == Some(v))
}

fn render(labels: &BTreeMap<String, String>) -> String {
    if labels.is_empty() {
        return "<none>".to_string();
    }
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
