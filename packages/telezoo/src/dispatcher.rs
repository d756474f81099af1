use pod_client::{JobBackend, JobEnvelope};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::admission::AdmissionPermit;
use crate::channel::MessageChannel;
use crate::config::{DispatchConfig, Messages};
use crate::error::RelayError;
use crate::metrics::RelayMetrics;
use crate::models::{ChannelId, new_session_id};
use crate::registry::SessionStore;
use crate::relay::OutputRelay;

/// Lifecycle of one job, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Submitted,
    Polling,
    Finished,
    Abandoned,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Created => "created",
            JobState::Submitted => "submitted",
            JobState::Polling => "polling",
            JobState::Finished => "finished",
            JobState::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// How a job ended. Failures end here rather than propagating further.
#[derive(Debug)]
pub enum JobOutcome {
    Finished { job_id: String },
    Abandoned { job_id: String, reason: RelayError },
}

#[cfg(test)]
impl JobOutcome {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobOutcome::Finished { .. })
    }
}

/// Consecutive failure counters, one per kind.
#[derive(Debug, Default)]
struct FailureCounters {
    transport: u32,
    decode: u32,
    channel: u32,
}

/// Runs one prompt through submit and poll against the user's pinned pod.
pub struct Dispatcher {
    store: Arc<SessionStore>,
    backend: Arc<dyn JobBackend>,
    channel: Arc<dyn MessageChannel>,
    config: DispatchConfig,
    messages: Arc<Messages>,
    metrics: Arc<RelayMetrics>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<SessionStore>,
        backend: Arc<dyn JobBackend>,
        channel: Arc<dyn MessageChannel>,
        config: DispatchConfig,
        messages: Arc<Messages>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            store,
            backend,
            channel,
            config,
            messages,
            metrics,
        }
    }

    /// Dispatch `prompt` for the permit holder and relay its output.
    ///
    /// The permit is held until the job is finished or abandoned, and
    /// dropped on every path.
    pub async fn dispatch(&self, permit: AdmissionPermit, prompt: &str) -> JobOutcome {
        let channel_id = permit.channel_id();
        let job_id = uuid::Uuid::new_v4().to_string();

        // Created: affinity is captured once, later mode switches apply to the next prompt
        let captured = self.store.update(channel_id, |user| {
            if user.session_id.is_empty() {
                user.session_id = new_session_id();
            }
            (user.server.clone(), user.session_id.clone())
        });
        let Some((pod, session)) = captured else {
            return JobOutcome::Abandoned {
                job_id,
                reason: RelayError::UnknownUser(channel_id.0),
            };
        };

        let envelope = JobEnvelope {
            id: job_id.clone(),
            session,
            prompt: prompt.to_string(),
        };
        let started = Instant::now();
        self.metrics.job_started();
        debug!(user = %channel_id, job = %job_id, pod = %pod, state = %JobState::Created, "Job created");

        let mut relay = OutputRelay::new(self.channel.clone(), channel_id);
        let result = match self.config.job_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.run(channel_id, &pod, &envelope, &mut relay))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(RelayError::JobTimeout {
                        job_id: job_id.clone(),
                        limit_secs: limit.as_secs(),
                    }),
                }
            }
            None => self.run(channel_id, &pod, &envelope, &mut relay).await,
        };

        let outcome = match result {
            Ok(()) => {
                if !relay.has_message() {
                    if let Err(e) = relay.abandon(&self.messages.empty_reply).await {
                        warn!(user = %channel_id, job = %job_id, "Failed to send empty reply notice: {}", e);
                    }
                }
                self.metrics.job_finished();
                info!(
                    user = %channel_id,
                    job = %job_id,
                    pod = %pod,
                    state = %JobState::Finished,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job finished"
                );
                JobOutcome::Finished { job_id }
            }
            Err(reason) => {
                let notice = match reason {
                    RelayError::BackendNotFound { .. } => &self.messages.session_lost,
                    _ => &self.messages.transport_failure,
                };
                if let Err(e) = relay.abandon(notice).await {
                    warn!(user = %channel_id, job = %job_id, "Failed to deliver failure notice: {}", e);
                }
                self.metrics.job_abandoned();
                warn!(
                    user = %channel_id,
                    job = %job_id,
                    pod = %pod,
                    state = %JobState::Abandoned,
                    kind = reason.kind(),
                    "Job abandoned: {}",
                    reason
                );
                JobOutcome::Abandoned { job_id, reason }
            }
        };

        drop(permit);
        outcome
    }

    /// Submit, settle, then poll until finished, a stop sentinel, or a failure budget runs out.
    async fn run(
        &self,
        channel_id: ChannelId,
        pod: &str,
        envelope: &JobEnvelope,
        relay: &mut OutputRelay,
    ) -> Result<(), RelayError> {
        let job_id = envelope.id.as_str();

        match self.backend.submit(pod, envelope).await {
            Ok(()) => {}
            // The pod may have taken the job; polling will tell
            Err(e) if e.is_timeout() => {
                warn!(user = %channel_id, job = %job_id, pod = %pod, "Submit timed out, polling anyway");
            }
            Err(e) => {
                let err = RelayError::from(e);
                self.metrics.record_error(&err);
                return Err(err);
            }
        }
        self.metrics.job_submitted();
        debug!(user = %channel_id, job = %job_id, state = %JobState::Submitted, "Job submitted");

        tokio::time::sleep(self.config.settle_delay).await;
        debug!(user = %channel_id, job = %job_id, state = %JobState::Polling, "Polling job");

        let mut failures = FailureCounters::default();
        loop {
            let record = match self.backend.poll(pod, job_id).await {
                Ok(record) => record,
                Err(e) if e.is_not_found() => {
                    self.clear_session(channel_id, &envelope.session);
                    let err = RelayError::from(e);
                    self.metrics.record_error(&err);
                    return Err(err);
                }
                Err(e) => {
                    let err = RelayError::from(e);
                    self.metrics.record_error(&err);
                    let (count, budget) = match err {
                        RelayError::Decode(_) => {
                            (&mut failures.decode, self.config.max_decode_failures)
                        }
                        _ => (&mut failures.transport, self.config.max_transport_failures),
                    };
                    *count += 1;
                    if *count > budget {
                        return Err(err);
                    }
                    debug!(user = %channel_id, job = %job_id, attempt = *count, "Poll failed, retrying: {}", err);
                    tokio::time::sleep(self.config.retry_delay).await;
                    continue;
                }
            };
            failures.transport = 0;
            failures.decode = 0;

            let delivered = relay.update(&record.output).await;
            let done = record.is_finished() || relay.latest().terminal;
            match delivered {
                Ok(()) => failures.channel = 0,
                Err(e) => {
                    let err = RelayError::from(e);
                    self.metrics.record_error(&err);
                    failures.channel += 1;
                    if failures.channel > self.config.max_channel_failures {
                        return Err(err);
                    }
                    debug!(user = %channel_id, job = %job_id, "Delivery failed: {}", err);
                }
            }

            if done {
                return self.deliver_final(relay, &mut failures).await;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Keep retrying the last rendering until the user has it.
    async fn deliver_final(
        &self,
        relay: &mut OutputRelay,
        failures: &mut FailureCounters,
    ) -> Result<(), RelayError> {
        while relay.is_dirty() {
            tokio::time::sleep(self.config.retry_delay).await;
            if let Err(e) = relay.flush().await {
                let err = RelayError::from(e);
                self.metrics.record_error(&err);
                failures.channel += 1;
                if failures.channel > self.config.max_channel_failures {
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Forget the session the pod lost, unless the user already moved on to
    /// another one while the job ran.
    fn clear_session(&self, channel_id: ChannelId, session: &str) {
        let cleared = self.store.update(channel_id, |user| {
            if user.session_id == session {
                user.session_id.clear();
                true
            } else {
                false
            }
        });
        if cleared == Some(true) {
            info!(user = %channel_id, "Pod lost the session, a new one starts with the next prompt");
        }
    }
}
