use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::time::Duration;
use tracing::debug;

use crate::error::PodError;
use crate::job::{JobEnvelope, JobRecord};

/// Backend that accepts jobs and reports their progress.
///
/// `pod` is the base endpoint of the worker (e.g. `http://10.0.0.5:15415`).
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Submit a job. Success means the pod accepted it, nothing more.
    async fn submit(&self, pod: &str, envelope: &JobEnvelope) -> Result<(), PodError>;

    /// Fetch the current state of a job.
    async fn poll(&self, pod: &str, job_id: &str) -> Result<JobRecord, PodError>;
}

/// Timeouts for the two job calls
#[derive(Debug, Clone)]
pub struct PodClientConfig {
    /// Submission is the important call, so it gets the longer budget
    pub submit_timeout: Duration,
    /// Polls are cheap and repeated, a slow one is simply retried
    pub poll_timeout: Duration,
}

impl Default for PodClientConfig {
    fn default() -> Self {
        Self {
            submit_timeout: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(1),
        }
    }
}

/// HTTP implementation of [`JobBackend`]
#[derive(Debug, Clone)]
pub struct PodClient {
    http: reqwest::Client,
    config: PodClientConfig,
}

impl PodClient {
    pub fn new(config: PodClientConfig) -> Result<Self, PodError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(PodError::Client)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &PodClientConfig {
        &self.config
    }
}

/// Validate a pod endpoint and strip surrounding whitespace and trailing slashes.
///
/// Endpoints come straight from configuration, where a stray space or a
/// missing scheme otherwise only surfaces on the first request.
pub fn normalize_endpoint(endpoint: &str) -> Result<String, PodError> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    let invalid = |reason: &str| PodError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.is_empty() {
        return Err(invalid("empty"));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(invalid("contains whitespace"));
    }

    let url = Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host"));
    }

    Ok(trimmed.to_string())
}

fn jobs_url(pod: &str) -> Result<Url, PodError> {
    let base = normalize_endpoint(pod)?;
    Url::parse(&format!("{}/jobs", base)).map_err(|e| PodError::InvalidEndpoint {
        endpoint: pod.to_string(),
        reason: e.to_string(),
    })
}

fn job_url(pod: &str, job_id: &str) -> Result<Url, PodError> {
    let base = normalize_endpoint(pod)?;
    Url::parse(&format!("{}/jobs/{}", base, job_id)).map_err(|e| PodError::InvalidEndpoint {
        endpoint: pod.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl JobBackend for PodClient {
    async fn submit(&self, pod: &str, envelope: &JobEnvelope) -> Result<(), PodError> {
        let url = jobs_url(pod)?;
        let url_str = url.to_string();
        debug!(job = %envelope.id, pod, "POST {}", url_str);

        let response = self
            .http
            .post(url)
            .timeout(self.config.submit_timeout)
            .json(envelope)
            .send()
            .await
            .map_err(|e| PodError::from_reqwest(&url_str, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PodError::Status {
                url: url_str,
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    async fn poll(&self, pod: &str, job_id: &str) -> Result<JobRecord, PodError> {
        let url = job_url(pod, job_id)?;
        let url_str = url.to_string();

        let response = self
            .http
            .get(url)
            .timeout(self.config.poll_timeout)
            .send()
            .await
            .map_err(|e| PodError::from_reqwest(&url_str, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(PodError::NotFound {
                job_id: job_id.to_string(),
            });
        }
        if !status.is_success() {
            return Err(PodError::Status {
                url: url_str,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| PodError::from_reqwest(&url_str, e))?;

        serde_json::from_slice(&body).map_err(|source| PodError::Decode {
            url: url_str,
            source,
        })
    }
}
