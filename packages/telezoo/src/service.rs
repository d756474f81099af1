//! Inbound pipeline: one call per received message.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::admission::AdmissionController;
use crate::channel::{InboundMessage, MessageChannel};
use crate::commands::{Command, SessionController};
use crate::config::Messages;
use crate::dispatcher::{Dispatcher, JobOutcome};
use crate::error::RelayError;
use crate::metrics::RelayMetrics;
use crate::models::{ChannelId, Mode};
use crate::registry::SessionStore;

pub struct RelayService {
    store: Arc<SessionStore>,
    admission: Arc<AdmissionController>,
    dispatcher: Arc<Dispatcher>,
    sessions: SessionController,
    channel: Arc<dyn MessageChannel>,
    messages: Arc<Messages>,
    metrics: Arc<RelayMetrics>,
}

impl RelayService {
    pub fn new(
        store: Arc<SessionStore>,
        admission: Arc<AdmissionController>,
        dispatcher: Arc<Dispatcher>,
        channel: Arc<dyn MessageChannel>,
        messages: Arc<Messages>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            sessions: SessionController::new(store.clone()),
            store,
            admission,
            dispatcher,
            channel,
            messages,
            metrics,
        }
    }

    /// Look up or register the sender, then either apply a command or run
    /// the text as a prompt. Never fails: problems end as a notice and a log
    /// line.
    pub async fn handle(&self, inbound: InboundMessage) {
        self.metrics.message_received();
        let InboundMessage {
            channel_id,
            username,
            text,
        } = inbound;

        let text = text.trim();
        if text.is_empty() {
            debug!(user = %channel_id, "Ignoring empty message");
            return;
        }

        let (_, is_new) = self.store.get_or_create(channel_id, username);
        if is_new {
            self.metrics.user_created();
            self.notify(channel_id, &self.messages.hello).await;
        }

        match Command::parse(text) {
            Some(Command::Start) => {
                if !is_new {
                    self.notify(channel_id, &self.messages.hello).await;
                }
            }
            Some(Command::New) => {
                if self.sessions.reset_session(channel_id).is_some() {
                    self.notify(channel_id, &self.messages.new_session).await;
                }
            }
            Some(Command::Chat) => self.switch(channel_id, Mode::Chat).await,
            Some(Command::Pro) => self.switch(channel_id, Mode::Pro).await,
            None => self.prompt(channel_id, text).await,
        }
    }

    async fn switch(&self, channel_id: ChannelId, mode: Mode) {
        if self.sessions.switch_mode(channel_id, mode).is_none() {
            return;
        }
        let notice = match mode {
            Mode::Chat => &self.messages.chat_mode,
            Mode::Pro => &self.messages.pro_mode,
        };
        self.notify(channel_id, notice).await;
    }

    async fn prompt(&self, channel_id: ChannelId, text: &str) {
        let permit = match self.admission.acquire(channel_id).await {
            Ok(permit) => permit,
            Err(e) => {
                self.metrics.record_error(&e);
                warn!(user = %channel_id, kind = e.kind(), "Prompt not admitted: {}", e);
                if matches!(e, RelayError::AdmissionTimeout { .. }) {
                    self.notify(channel_id, &self.messages.busy).await;
                }
                return;
            }
        };

        match self.dispatcher.dispatch(permit, text).await {
            JobOutcome::Finished { job_id } => {
                info!(user = %channel_id, job = %job_id, "Prompt answered");
            }
            JobOutcome::Abandoned { job_id, reason } => {
                info!(user = %channel_id, job = %job_id, kind = reason.kind(), "Prompt not answered");
            }
        }
    }

    async fn notify(&self, channel_id: ChannelId, text: &str) {
        if let Err(e) = self.channel.send(channel_id, text).await {
            warn!(user = %channel_id, "Failed to send notice: {}", e);
            self.metrics.record_error(&RelayError::from(e));
        }
    }
}
