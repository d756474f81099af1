/// Errors that can occur while talking to a pod
#[derive(Debug, thiserror::Error)]
pub enum PodError {
    /// Endpoint is not a usable http(s) base URL
    #[error("invalid pod endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// Request did not complete within its timeout
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// Connection, DNS or body transfer failure
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Pod answered 404: it has no record of the job (or its session)
    #[error("pod has no record of job {job_id}")]
    NotFound { job_id: String },

    /// Pod answered with a non-success status other than 404
    #[error("pod returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// Response body was not a job record
    #[error("malformed job record from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PodError {
    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Transport {
                url: url.to_string(),
                source: err,
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
