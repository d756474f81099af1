use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::User;
use crate::registry::SessionStore;

/// Line-oriented JSON file holding one [`User`] per line.
#[derive(Debug, Clone)]
pub struct UserDb {
    path: PathBuf,
}

impl UserDb {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record. A missing file is an empty database, and lines
    /// that do not parse are skipped with a warning.
    pub fn load_all(&self) -> Result<Vec<User>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No user database at {}", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to open user database: {:?}", self.path));
            }
        };

        let mut users = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line
                .with_context(|| format!("Failed to read user database: {:?}", self.path))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<User>(&line) {
                Ok(user) => users.push(user),
                Err(e) => warn!(line = index + 1, "Skipping malformed user record: {}", e),
            }
        }
        Ok(users)
    }

    /// Replace the database with `users`.
    ///
    /// Written to a sibling temp file, synced, then renamed over the old one,
    /// so readers see either the previous or the new snapshot.
    pub fn dump_all(&self, users: &[User]) -> Result<usize> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let mut buf = Vec::new();
        for user in users {
            serde_json::to_writer(&mut buf, user).context("Failed to serialize user")?;
            buf.push(b'\n');
        }

        let tmp_path = self.path.with_extension("db.tmp");
        let mut tmp_file = File::create(&tmp_path)
            .with_context(|| format!("Failed to create {:?}", tmp_path))?;
        tmp_file.write_all(&buf)?;
        tmp_file.sync_all()?;
        drop(tmp_file);

        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace user database: {:?}", self.path))?;
        Ok(users.len())
    }
}

/// Periodic snapshot of the session store to disk.
///
/// Best effort: a crash between checkpoints loses session continuity and
/// in-flight status, never the user list itself.
pub struct CheckpointService {
    db: UserDb,
    store: Arc<SessionStore>,
    interval: Option<Duration>,
}

impl CheckpointService {
    pub fn new(db: UserDb, store: Arc<SessionStore>, interval: Option<Duration>) -> Self {
        Self {
            db,
            store,
            interval,
        }
    }

    /// Write the current snapshot, returning how many users were saved.
    pub fn checkpoint(&self) -> Result<usize> {
        self.db.dump_all(&self.store.snapshot())
    }

    /// Spawn the interval loop. Does nothing when checkpointing is disabled.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) {
        let Some(period) = self.interval else {
            info!("Periodic checkpoints disabled, saving on shutdown only");
            return;
        };
        info!("Starting checkpoint service with interval: {:?}", period);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        match self.checkpoint() {
                            Ok(n) => debug!("Checkpointed {} users", n),
                            Err(e) => error!("Failed to checkpoint users: {:#}", e),
                        }
                    }
                }
            }
        });
    }
}
