//! HTTP smoke probes
//!
//! Probes are advisory. Their results are attached to the run report and
//! never feed the classifier.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Longest body excerpt kept in a probe result
const BODY_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("invalid probe url {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
}

/// Response captured by a probe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// HTTP client used for smoke probes
#[async_trait]
pub trait ProbeClient: Send + Sync {
    async fn http_get(&self, url: &str, timeout: Duration) -> Result<ProbeResponse, ProbeError>;

    async fn http_post(
        &self,
        url: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<ProbeResponse, ProbeError>;
}

/// Probe client backed by `reqwest`
#[derive(Debug, Clone, Default)]
pub struct HttpProbeClient {
    client: reqwest::Client,
}

impl HttpProbeClient {
    pub fn new() -> Self {
        Self::default()
    }

    async fn capture(url: &str, response: reqwest::Response) -> Result<ProbeResponse, ProbeError> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(|e| request_error(url, e))?;

        Ok(ProbeResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl ProbeClient for HttpProbeClient {
    async fn http_get(&self, url: &str, timeout: Duration) -> Result<ProbeResponse, ProbeError> {
        let parsed = parse_url(url)?;
        let response = self
            .client
            .get(parsed)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(url, e))?;

        Self::capture(url, response).await
    }

    async fn http_post(
        &self,
        url: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<ProbeResponse, ProbeError> {
        let parsed = parse_url(url)?;
        let response = self
            .client
            .post(parsed)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(url, e))?;

        Self::capture(url, response).await
    }
}

fn parse_url(url: &str) -> Result<Url, ProbeError> {
    Url::parse(url).map_err(|e| ProbeError::InvalidUrl {
        url: url.to_string(),
        message: e.to_string(),
    })
}

fn request_error(url: &str, err: reqwest::Error) -> ProbeError {
    if err.is_timeout() {
        ProbeError::Timeout {
            url: url.to_string(),
        }
    } else {
        ProbeError::Request {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProbeMethod {
    Get,
    Post,
}

impl std::fmt::Display for ProbeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeMethod::Get => f.write_str("GET"),
            ProbeMethod::Post => f.write_str("POST"),
        }
    }
}

/// One configured smoke probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSpec {
    pub name: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: ProbeMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
}

fn default_method() -> ProbeMethod {
    ProbeMethod::Get
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_expected_status() -> u16 {
    200
}

impl ProbeSpec {
    pub fn get(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            method: ProbeMethod::Get,
            body: None,
            timeout_secs: default_timeout_secs(),
            expected_status: default_expected_status(),
        }
    }

    pub fn post(name: impl Into<String>, url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: ProbeMethod::Post,
            body: Some(body),
            timeout_secs: 10,
            ..Self::get(name, url)
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Frontend page, backend root and a sample chat request
    pub fn defaults() -> Vec<ProbeSpec> {
        vec![
            ProbeSpec::get("frontend", "http://localhost:8080"),
            ProbeSpec::get("backend", "http://localhost:3002"),
            ProbeSpec::post(
                "backend-chat",
                "http://localhost:3002/api/chat",
                serde_json::json!({
                    "message": "I am looking for a women's t-shirt",
                    "language": "en"
                }),
            ),
        ]
    }
}

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub name: String,
    pub url: String,
    pub method: ProbeMethod,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_excerpt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Smoke verification attached to a successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub checked_at: DateTime<Utc>,
    pub results: Vec<ProbeResult>,
}

impl VerificationReport {
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ProbeResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

/// Run every probe in order and collect the results
pub async fn verify(client: &dyn ProbeClient, probes: &[ProbeSpec]) -> VerificationReport {
    let mut results = Vec::with_capacity(probes.len());

    for probe in probes {
        let started = Instant::now();
        let response = match probe.method {
            ProbeMethod::Get => client.http_get(&probe.url, probe.timeout()).await,
            ProbeMethod::Post => {
                let body = probe.body.clone().unwrap_or(serde_json::Value::Null);
                client.http_post(&probe.url, &body, probe.timeout()).await
            }
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let result = match response {
            Ok(response) => {
                let passed = response.status == probe.expected_status;
                debug!(probe = %probe.name, status = response.status, passed, "Probe completed");
                ProbeResult {
                    name: probe.name.clone(),
                    url: probe.url.clone(),
                    method: probe.method,
                    passed,
                    status: Some(response.status),
                    latency_ms,
                    content_type: response.headers.get("content-type").cloned(),
                    body_excerpt: excerpt(&response.body),
                    error: None,
                }
            }
            Err(e) => {
                warn!(probe = %probe.name, error = %e, "Probe failed");
                ProbeResult {
                    name: probe.name.clone(),
                    url: probe.url.clone(),
                    method: probe.method,
                    passed: false,
                    status: None,
                    latency_ms,
                    content_type: None,
                    body_excerpt: None,
                    error: Some(e.to_string()),
                }
            }
        };
        results.push(result);
    }

    VerificationReport {
        checked_at: Utc::now(),
        results,
    }
}

fn excerpt(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(BODY_EXCERPT_CHARS).collect())
}
