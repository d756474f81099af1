use async_trait::async_trait;
use parking_lot::Mutex;
use pod_client::{JobBackend, JobEnvelope, JobRecord, JobStatus, PodError};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::channel::{ChannelError, MessageChannel, MessageHandle};
use crate::config::{DispatchConfig, DispatchFileConfig, Messages};
use crate::metrics::RelayMetrics;
use crate::models::{ChannelId, Mode};
use crate::pods::PodDirectory;
use crate::registry::SessionStore;

pub fn test_pods(chat: &[&str], pro: &[&str]) -> PodDirectory {
    PodDirectory::new(HashMap::from([
        (Mode::Chat, chat.iter().map(|s| s.to_string()).collect()),
        (Mode::Pro, pro.iter().map(|s| s.to_string()).collect()),
    ]))
    .expect("test pods")
}

/// Store over two chat pods and one pro pod.
pub fn test_store() -> SessionStore {
    SessionStore::new(Arc::new(test_pods(
        &["http://chat-a", "http://chat-b"],
        &["http://pro-a"],
    )))
}

/// Dispatch timing shrunk to milliseconds, budgets left at their defaults.
pub fn fast_dispatch_config() -> DispatchConfig {
    DispatchConfig {
        settle_delay: Duration::from_millis(5),
        poll_interval: Duration::from_millis(5),
        retry_delay: Duration::from_millis(5),
        ..DispatchConfig::from_file(&DispatchFileConfig::default())
    }
}

pub fn test_messages() -> Arc<Messages> {
    Arc::new(Messages::default())
}

pub fn test_metrics() -> Arc<RelayMetrics> {
    Arc::new(RelayMetrics::new())
}

// =============================================================================
// Scripted job backend
// =============================================================================

/// One scripted answer to `poll`.
#[derive(Debug, Clone)]
pub enum PollReply {
    Output { text: String, finished: bool },
    NotFound,
    Status(u16),
    Timeout,
    Garbage,
}

impl PollReply {
    pub fn running(text: &str) -> Self {
        Self::Output {
            text: text.to_string(),
            finished: false,
        }
    }

    pub fn finished(text: &str) -> Self {
        Self::Output {
            text: text.to_string(),
            finished: true,
        }
    }
}

#[derive(Default)]
struct BackendState {
    submit_replies: VecDeque<PollReply>,
    poll_replies: VecDeque<PollReply>,
    submitted: Vec<(String, JobEnvelope)>,
    polls: usize,
    /// job id -> session of jobs submitted and not yet finished or lost
    in_flight: HashMap<String, String>,
    max_in_flight: usize,
    max_in_flight_per_session: usize,
}

/// In-memory [`JobBackend`].
///
/// Polls consume scripted replies first. With the script empty, a job
/// reports `running` for `running_polls` polls and then finishes with
/// `"done"`. Jobs in flight are tracked to check admission from outside.
pub struct ScriptedBackend {
    state: Mutex<BackendState>,
    running_polls: usize,
    poll_counts: Mutex<HashMap<String, usize>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::with_running_polls(0)
    }

    pub fn with_running_polls(running_polls: usize) -> Self {
        Self {
            state: Mutex::new(BackendState::default()),
            running_polls,
            poll_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn push_poll(&self, reply: PollReply) -> &Self {
        self.state.lock().poll_replies.push_back(reply);
        self
    }

    pub fn push_submit(&self, reply: PollReply) -> &Self {
        self.state.lock().submit_replies.push_back(reply);
        self
    }

    pub fn submitted(&self) -> Vec<(String, JobEnvelope)> {
        self.state.lock().submitted.clone()
    }

    pub fn poll_count(&self) -> usize {
        self.state.lock().polls
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.lock().max_in_flight
    }

    pub fn max_in_flight_per_session(&self) -> usize {
        self.state.lock().max_in_flight_per_session
    }

    fn track(state: &mut BackendState, envelope: &JobEnvelope) {
        state
            .in_flight
            .insert(envelope.id.clone(), envelope.session.clone());
        let total = state.in_flight.len();
        let same_session = state
            .in_flight
            .values()
            .filter(|s| **s == envelope.session)
            .count();
        state.max_in_flight = state.max_in_flight.max(total);
        state.max_in_flight_per_session = state.max_in_flight_per_session.max(same_session);
    }

    fn to_error(reply: &PollReply, job_id: &str) -> Option<PodError> {
        let url = format!("http://fake/jobs/{}", job_id);
        match reply {
            PollReply::Output { .. } => None,
            PollReply::NotFound => Some(PodError::NotFound {
                job_id: job_id.to_string(),
            }),
            PollReply::Status(status) => Some(PodError::Status {
                url,
                status: *status,
            }),
            PollReply::Timeout => Some(PodError::Timeout { url }),
            PollReply::Garbage => Some(PodError::Decode {
                url,
                source: serde_json::from_str::<JobRecord>("<html>").unwrap_err(),
            }),
        }
    }
}

#[async_trait]
impl JobBackend for ScriptedBackend {
    async fn submit(&self, pod: &str, envelope: &JobEnvelope) -> Result<(), PodError> {
        let mut state = self.state.lock();
        state.submitted.push((pod.to_string(), envelope.clone()));

        let err = state
            .submit_replies
            .pop_front()
            .and_then(|reply| Self::to_error(&reply, &envelope.id));
        match err {
            // Timed out, but the pod took the job anyway
            Some(err @ PodError::Timeout { .. }) => {
                Self::track(&mut state, envelope);
                Err(err)
            }
            Some(err) => Err(err),
            None => {
                Self::track(&mut state, envelope);
                Ok(())
            }
        }
    }

    async fn poll(&self, _pod: &str, job_id: &str) -> Result<JobRecord, PodError> {
        // Give other tasks a chance to overlap with this job
        tokio::task::yield_now().await;

        let mut state = self.state.lock();
        state.polls += 1;

        let reply = match state.poll_replies.pop_front() {
            Some(reply) => reply,
            None => {
                let mut counts = self.poll_counts.lock();
                let count = counts.entry(job_id.to_string()).or_default();
                *count += 1;
                if *count > self.running_polls {
                    PollReply::finished("done")
                } else {
                    PollReply::running("working")
                }
            }
        };

        if let Some(err) = Self::to_error(&reply, job_id) {
            if err.is_not_found() {
                state.in_flight.remove(job_id);
            }
            return Err(err);
        }

        let PollReply::Output { text, finished } = reply else {
            unreachable!("errors handled above");
        };
        let session = state.in_flight.get(job_id).cloned().unwrap_or_default();
        if finished {
            state.in_flight.remove(job_id);
        }
        Ok(JobRecord {
            id: job_id.to_string(),
            session,
            prompt: String::new(),
            output: text,
            status: if finished {
                JobStatus::Finished
            } else {
                JobStatus::Running
            },
        })
    }
}

// =============================================================================
// Recording channel
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Send {
        recipient: ChannelId,
        message_id: String,
        text: String,
    },
    Edit {
        message_id: String,
        text: String,
    },
}

/// [`MessageChannel`] that records every delivery and can be told to fail.
#[derive(Default)]
pub struct RecordingChannel {
    events: Mutex<Vec<ChannelEvent>>,
    next_id: Mutex<u64>,
    failures_left: Mutex<usize>,
    limit: Option<usize>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any text longer than `limit` UTF-16 units, like Telegram does.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Fail the next `n` sends or edits.
    pub fn fail_next(&self, n: usize) {
        *self.failures_left.lock() = n;
    }

    pub fn events(&self) -> Vec<ChannelEvent> {
        self.events.lock().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ChannelEvent::Send { text, .. } => Some(text.clone()),
                ChannelEvent::Edit { .. } => None,
            })
            .collect()
    }

    /// Final text of every message, in send order.
    pub fn final_texts(&self) -> Vec<String> {
        let mut texts: Vec<(String, String)> = Vec::new();
        for event in self.events.lock().iter() {
            match event {
                ChannelEvent::Send {
                    message_id, text, ..
                } => texts.push((message_id.clone(), text.clone())),
                ChannelEvent::Edit { message_id, text } => {
                    if let Some(entry) = texts.iter_mut().find(|(id, _)| id == message_id) {
                        entry.1 = text.clone();
                    }
                }
            }
        }
        texts.into_iter().map(|(_, text)| text).collect()
    }

    fn too_long(&self, text: &str) -> Option<String> {
        let limit = self.limit?;
        let len = text.encode_utf16().count();
        (len > limit).then(|| format!("message is too long: {} > {}", len, limit))
    }

    fn should_fail(&self) -> bool {
        let mut left = self.failures_left.lock();
        if *left > 0 {
            *left -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl MessageChannel for RecordingChannel {
    async fn send(&self, recipient: ChannelId, text: &str) -> Result<MessageHandle, ChannelError> {
        if self.should_fail() {
            return Err(ChannelError::Send {
                recipient,
                reason: "scripted failure".to_string(),
            });
        }
        if let Some(reason) = self.too_long(text) {
            return Err(ChannelError::Send { recipient, reason });
        }
        let message_id = {
            let mut next = self.next_id.lock();
            *next += 1;
            next.to_string()
        };
        self.events.lock().push(ChannelEvent::Send {
            recipient,
            message_id: message_id.clone(),
            text: text.to_string(),
        });
        Ok(MessageHandle {
            recipient,
            message_id,
        })
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<(), ChannelError> {
        if self.should_fail() {
            return Err(ChannelError::Edit {
                recipient: handle.recipient,
                message_id: handle.message_id.clone(),
                reason: "scripted failure".to_string(),
            });
        }
        if let Some(reason) = self.too_long(text) {
            return Err(ChannelError::Edit {
                recipient: handle.recipient,
                message_id: handle.message_id.clone(),
                reason,
            });
        }
        self.events.lock().push(ChannelEvent::Edit {
            message_id: handle.message_id.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    fn max_text_len(&self) -> Option<usize> {
        self.limit
    }
}
