use pod_client::PodError;

use crate::channel::ChannelError;

/// Failure taxonomy of the relay pipeline.
///
/// Only `Configuration` is fatal, and only at startup. Everything else stays
/// inside the task handling one message and ends as a notice plus a log event.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network failure, timeout or HTTP error status from a pod
    #[error("transport error: {0}")]
    Transport(String),

    /// Pod answered 404: it lost the job and the session with it
    #[error("backend has no record of job {job_id}")]
    BackendNotFound { job_id: String },

    #[error("malformed backend response: {0}")]
    Decode(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("user {channel_id} is still busy after {waited_secs}s")]
    AdmissionTimeout { channel_id: i64, waited_secs: u64 },

    #[error("job {job_id} exceeded its {limit_secs}s deadline")]
    JobTimeout { job_id: String, limit_secs: u64 },

    #[error("unknown user {0}")]
    UnknownUser(i64),
}

impl From<PodError> for RelayError {
    fn from(err: PodError) -> Self {
        match err {
            PodError::NotFound { job_id } => Self::BackendNotFound { job_id },
            PodError::Decode { .. } => Self::Decode(err.to_string()),
            PodError::InvalidEndpoint { .. } | PodError::Client(_) => {
                Self::Configuration(err.to_string())
            }
            PodError::Timeout { .. } | PodError::Transport { .. } | PodError::Status { .. } => {
                Self::Transport(err.to_string())
            }
        }
    }
}

impl RelayError {
    /// Short label for structured logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Transport(_) => "transport",
            Self::BackendNotFound { .. } => "backend_not_found",
            Self::Decode(_) => "decode",
            Self::Channel(_) => "channel",
            Self::AdmissionTimeout { .. } => "admission_timeout",
            Self::JobTimeout { .. } => "job_timeout",
            Self::UnknownUser(_) => "unknown_user",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_not_found_maps_to_backend_not_found() {
        let err: RelayError = PodError::NotFound {
            job_id: "j1".into(),
        }
        .into();
        assert!(matches!(err, RelayError::BackendNotFound { ref job_id } if job_id == "j1"));
        assert_eq!(err.kind(), "backend_not_found");
    }

    #[test]
    fn pod_status_and_timeout_map_to_transport() {
        let status: RelayError = PodError::Status {
            url: "http://pod/jobs".into(),
            status: 503,
        }
        .into();
        assert_eq!(status.kind(), "transport");

        let timeout: RelayError = PodError::Timeout {
            url: "http://pod/jobs".into(),
        }
        .into();
        assert_eq!(timeout.kind(), "transport");
    }

    #[test]
    fn pod_decode_maps_to_decode() {
        let source = serde_json::from_str::<serde_json::Value>("nope").unwrap_err();
        let err: RelayError = PodError::Decode {
            url: "http://pod/jobs/1".into(),
            source,
        }
        .into();
        assert_eq!(err.kind(), "decode");
    }

    #[test]
    fn invalid_endpoint_is_configuration() {
        let err: RelayError = PodError::InvalidEndpoint {
            endpoint: "x".into(),
            reason: "bad".into(),
        }
        .into();
        assert!(matches!(err, RelayError::Configuration(_)));
    }

    #[test]
    fn admission_timeout_display() {
        let err = RelayError::AdmissionTimeout {
            channel_id: 42,
            waited_secs: 30,
        };
        assert_eq!(err.to_string(), "user 42 is still busy after 30s");
    }
}
