use serde::{Deserialize, Serialize};

/// Submission body for `POST {pod}/jobs`.
///
/// Field names are part of the wire contract with existing pods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: String,
    pub session: String,
    pub prompt: String,
}

/// Lifecycle of a job as reported by the pod
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Finished,
    /// Also the landing state for any status string this client does not know
    #[serde(other)]
    Running,
}

/// Job as returned by `GET {pod}/jobs/{id}`. `output` is cumulative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub session: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub status: JobStatus,
}

impl JobRecord {
    pub fn is_finished(&self) -> bool {
        self.status == JobStatus::Finished
    }
}
