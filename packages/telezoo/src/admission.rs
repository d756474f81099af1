use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::debug;

use crate::config::AdmissionConfig;
use crate::error::RelayError;
use crate::metrics::RelayMetrics;
use crate::models::{ChannelId, UserStatus};
use crate::registry::SessionStore;

/// Per-user gate: at most one job in flight per user.
///
/// The `Idle → Processing` flip happens under the registry lock. Waiters
/// sleep on a [`Notify`] signalled by every release, re-checking at least
/// every `poll_interval` in case a wake-up is missed. There is no queue; a
/// user's waiting prompts go in whatever order the re-checks land.
pub struct AdmissionController {
    store: Arc<SessionStore>,
    released: Arc<Notify>,
    config: AdmissionConfig,
    metrics: Arc<RelayMetrics>,
}

impl AdmissionController {
    pub fn new(store: Arc<SessionStore>, config: AdmissionConfig, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            store,
            released: Arc::new(Notify::new()),
            config,
            metrics,
        }
    }

    /// Wait until the user is idle and mark them processing.
    pub async fn acquire(&self, channel_id: ChannelId) -> Result<AdmissionPermit, RelayError> {
        let started = Instant::now();
        let mut waiting = false;

        loop {
            // Register for the wake-up before checking, so a release between
            // the check and the wait is not lost
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(permit) = self.try_acquire(channel_id)? {
                if waiting {
                    debug!(user = %channel_id, waited_ms = started.elapsed().as_millis() as u64, "Admitted after wait");
                }
                return Ok(permit);
            }

            if !waiting {
                waiting = true;
                self.metrics.admission_waited();
                debug!(user = %channel_id, "Previous job still running, waiting");
            }

            let mut pause = self.config.poll_interval;
            if let Some(limit) = self.config.timeout {
                let elapsed = started.elapsed();
                if elapsed >= limit {
                    return Err(RelayError::AdmissionTimeout {
                        channel_id: channel_id.0,
                        waited_secs: elapsed.as_secs(),
                    });
                }
                pause = pause.min(limit - elapsed);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Single non-blocking attempt.
    pub fn try_acquire(&self, channel_id: ChannelId) -> Result<Option<AdmissionPermit>, RelayError> {
        let admitted = self
            .store
            .update(channel_id, |user| {
                if user.status == UserStatus::Idle {
                    user.status = UserStatus::Processing;
                    true
                } else {
                    false
                }
            })
            .ok_or(RelayError::UnknownUser(channel_id.0))?;

        Ok(admitted.then(|| AdmissionPermit {
            channel_id,
            store: self.store.clone(),
            released: self.released.clone(),
        }))
    }
}

/// Proof that a user is marked processing. Dropping it marks them idle
/// again and wakes any waiting prompts, whatever path the job took.
#[must_use = "dropping the permit releases the user immediately"]
pub struct AdmissionPermit {
    channel_id: ChannelId,
    store: Arc<SessionStore>,
    released: Arc<Notify>,
}

impl AdmissionPermit {
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.store.update(self.channel_id, |user| {
            user.status = UserStatus::Idle;
        });
        self.released.notify_waiters();
    }
}
