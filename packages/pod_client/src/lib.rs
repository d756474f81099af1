//! Pod Client - job API client for inference pods
//!
//! A pod is a backend worker that accepts a prompt as a job and exposes the
//! job's growing output until it reports `finished`. This crate only speaks
//! that protocol; it knows nothing about users, sessions or chat transports.
//!
//! # Example
//!
//! ```no_run
//! use pod_client::{JobBackend, JobEnvelope, PodClient, PodClientConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = PodClient::new(PodClientConfig::default()).unwrap();
//!     let pod = "http://127.0.0.1:15415";
//!
//!     let envelope = JobEnvelope {
//!         id: "job-1".to_string(),
//!         session: "session-1".to_string(),
//!         prompt: "Hello there".to_string(),
//!     };
//!     client.submit(pod, &envelope).await.unwrap();
//!
//!     loop {
//!         let record = client.poll(pod, &envelope.id).await.unwrap();
//!         println!("{}", record.output);
//!         if record.is_finished() {
//!             break;
//!         }
//!     }
//! }
//! ```

mod client;
mod error;
mod job;

pub use client::{JobBackend, PodClient, PodClientConfig, normalize_endpoint};
pub use error::PodError;
pub use job::{JobEnvelope, JobRecord, JobStatus};
