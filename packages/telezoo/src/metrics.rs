//! Relay metrics for observability
//!
//! Plain atomic counters, read as a [`MetricsSnapshot`] by `/metrics` and at shutdown.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::error::RelayError;

#[derive(Debug, Default)]
pub struct RelayMetrics {
    // Users
    pub users_created: AtomicU64,
    pub messages_received: AtomicU64,

    // Jobs
    /// Jobs currently between admission and release
    pub active_jobs: AtomicU64,
    pub jobs_submitted: AtomicU64,
    pub jobs_finished: AtomicU64,
    pub jobs_abandoned: AtomicU64,
    /// Jobs whose pod answered 404 and dropped the session
    pub sessions_lost: AtomicU64,

    // Admission
    /// Prompts that had to wait for the user's previous job
    pub admission_waits: AtomicU64,
    pub admission_timeouts: AtomicU64,

    // Errors
    pub transport_errors: AtomicU64,
    pub decode_errors: AtomicU64,
    pub channel_errors: AtomicU64,

    start_time: Option<Instant>,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn user_created(&self) {
        self.users_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_started(&self) {
        self.active_jobs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_finished(&self) {
        self.active_jobs.fetch_sub(1, Ordering::Relaxed);
        self.jobs_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_abandoned(&self) {
        self.active_jobs.fetch_sub(1, Ordering::Relaxed);
        self.jobs_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn admission_waited(&self) {
        self.admission_waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an error by kind
    pub fn record_error(&self, err: &RelayError) {
        let counter = match err {
            RelayError::Transport(_) => &self.transport_errors,
            RelayError::Decode(_) => &self.decode_errors,
            RelayError::Channel(_) => &self.channel_errors,
            RelayError::BackendNotFound { .. } => &self.sessions_lost,
            RelayError::AdmissionTimeout { .. } => &self.admission_timeouts,
            RelayError::Configuration(_) | RelayError::JobTimeout { .. } | RelayError::UnknownUser(_) => {
                return;
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            users: UserMetrics {
                created: self.users_created.load(Ordering::Relaxed),
                messages_received: self.messages_received.load(Ordering::Relaxed),
            },
            jobs: JobMetrics {
                active: self.active_jobs.load(Ordering::Relaxed),
                submitted: self.jobs_submitted.load(Ordering::Relaxed),
                finished: self.jobs_finished.load(Ordering::Relaxed),
                abandoned: self.jobs_abandoned.load(Ordering::Relaxed),
                sessions_lost: self.sessions_lost.load(Ordering::Relaxed),
            },
            admission: AdmissionMetrics {
                waits: self.admission_waits.load(Ordering::Relaxed),
                timeouts: self.admission_timeouts.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                transport: self.transport_errors.load(Ordering::Relaxed),
                decode: self.decode_errors.load(Ordering::Relaxed),
                channel: self.channel_errors.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub users: UserMetrics,
    pub jobs: JobMetrics,
    pub admission: AdmissionMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMetrics {
    pub created: u64,
    pub messages_received: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetrics {
    pub active: u64,
    pub submitted: u64,
    pub finished: u64,
    pub abandoned: u64,
    pub sessions_lost: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionMetrics {
    pub waits: u64,
    pub timeouts: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub transport: u64,
    pub decode: u64,
    pub channel: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub users: UserHealth,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserHealth {
    pub known: u64,
    pub processing: u64,
}
