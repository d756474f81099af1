//! In-memory registry of users and their pod affinity.
//!
//! All user state sits behind one `parking_lot::Mutex`. Its guard is `!Send`,
//! so it cannot be held across an `.await`; callers get clones out and push
//! changes back through [`SessionStore::update`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::models::{ChannelId, Mode, User, UserStatus, new_session_id};
use crate::pods::PodDirectory;

/// Counts from [`SessionStore::restore`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub loaded: usize,
    /// Records that were left `processing` by the previous run
    pub reset: usize,
    /// Records moved off a pod that is no longer configured
    pub migrated: usize,
}

pub struct SessionStore {
    users: Mutex<HashMap<ChannelId, User>>,
    pods: Arc<PodDirectory>,
}

impl SessionStore {
    pub fn new(pods: Arc<PodDirectory>) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            pods,
        }
    }

    pub fn pods(&self) -> &PodDirectory {
        &self.pods
    }

    pub fn get(&self, channel_id: ChannelId) -> Option<User> {
        self.users.lock().get(&channel_id).cloned()
    }

    /// Look up a user, creating a chat-mode record on first contact.
    ///
    /// Returns `true` only to the caller that created the record.
    pub fn get_or_create(&self, channel_id: ChannelId, username: Option<String>) -> (User, bool) {
        let mut users = self.users.lock();
        if let Some(user) = users.get_mut(&channel_id) {
            // Telegram usernames can change; keep the latest for display
            if let Some(name) = username.filter(|n| !n.is_empty()) {
                user.username = Some(name);
            }
            return (user.clone(), false);
        }

        let user = User::new(
            channel_id,
            username,
            Mode::Chat,
            self.pods.pick_pod(Mode::Chat),
        );
        info!(user = %channel_id, pod = %user.server, "New user");
        users.insert(channel_id, user.clone());
        (user, true)
    }

    /// Insert or replace the record for `user.channel_id`.
    pub fn save(&self, user: User) {
        self.users.lock().insert(user.channel_id, user);
    }

    /// Mutate a record under the lock. `None` when the user is unknown.
    pub fn update<R>(&self, channel_id: ChannelId, f: impl FnOnce(&mut User) -> R) -> Option<R> {
        self.users.lock().get_mut(&channel_id).map(f)
    }

    /// Clone of every record, ordered by channel id.
    pub fn snapshot(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.lock().values().cloned().collect();
        users.sort_by_key(|u| u.channel_id);
        users
    }

    pub fn len(&self) -> usize {
        self.users.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn processing_count(&self) -> usize {
        self.users
            .lock()
            .values()
            .filter(|u| u.is_processing())
            .count()
    }

    /// Rebuild the registry from persisted records.
    ///
    /// Jobs in flight at the last checkpoint are gone, so every status comes
    /// back idle. Users pinned to a pod that left the directory get a new pod
    /// and a fresh session, since their backend context is unreachable.
    pub fn restore(&self, records: Vec<User>) -> RestoreReport {
        let mut report = RestoreReport::default();

        for mut user in records {
            report.loaded += 1;

            if user.status != UserStatus::Idle {
                user.status = UserStatus::Idle;
                report.reset += 1;
            }

            if !self.pods.is_live(user.mode, &user.server) {
                let pod = self.pods.pick_pod(user.mode);
                debug!(user = %user.channel_id, from = %user.server, to = %pod, "Migrating user off retired pod");
                user.server = pod;
                user.session_id = new_session_id();
                report.migrated += 1;
            } else if user.session_id.is_empty() {
                user.session_id = new_session_id();
            }

            self.save(user);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::test_pods;

    fn store() -> SessionStore {
        SessionStore::new(Arc::new(test_pods(&["http://chat-a", "http://chat-b"], &["http://pro-a"])))
    }

    #[test]
    fn get_or_create_initializes_chat_user() {
        let store = store();
        let (user, is_new) = store.get_or_create(ChannelId(1), Some("bob".into()));
        assert!(is_new);
        assert_eq!(user.mode, Mode::Chat);
        assert!(store.pods().is_live(Mode::Chat, &user.server));
        assert!(!user.session_id.is_empty());
        assert_eq!(user.status, UserStatus::Idle);

        let (again, is_new) = store.get_or_create(ChannelId(1), None);
        assert!(!is_new);
        assert_eq!(again, user);
    }

    #[test]
    fn concurrent_get_or_create_yields_one_creator() {
        let store = store();
        let results: Vec<(User, bool)> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| s.spawn(|| store.get_or_create(ChannelId(9), None)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|(_, is_new)| *is_new).count(), 1);
        let first = &results[0].0;
        for (user, _) in &results {
            assert_eq!(user.server, first.server);
            assert_eq!(user.session_id, first.session_id);
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn save_inserts_then_replaces() {
        let store = store();
        let user = User::new(ChannelId(4), Some("ann".into()), Mode::Chat, "http://chat-a".into());
        store.save(user.clone());
        assert_eq!(store.get(ChannelId(4)), Some(user.clone()));

        let replacement = User {
            mode: Mode::Pro,
            server: "http://pro-a".into(),
            session_id: "s-2".into(),
            ..user
        };
        store.save(replacement.clone());

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(ChannelId(4)), Some(replacement));
        // Later lookups see the saved record, not a fresh one
        let (found, is_new) = store.get_or_create(ChannelId(4), None);
        assert!(!is_new);
        assert_eq!(found.session_id, "s-2");
    }

    #[test]
    fn update_unknown_user_is_none() {
        let store = store();
        assert!(store.update(ChannelId(5), |u| u.mode = Mode::Pro).is_none());
    }

    #[test]
    fn update_mutates_in_place() {
        let store = store();
        store.get_or_create(ChannelId(5), None);
        let prev = store.update(ChannelId(5), |u| {
            u.status = UserStatus::Processing;
            u.channel_id
        });
        assert_eq!(prev, Some(ChannelId(5)));
        assert_eq!(store.processing_count(), 1);
    }

    #[test]
    fn snapshot_is_sorted() {
        let store = store();
        for id in [3, 1, 2] {
            store.get_or_create(ChannelId(id), None);
        }
        let ids: Vec<i64> = store.snapshot().iter().map(|u| u.channel_id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn restore_resets_processing() {
        let store = store();
        let mut user = User::new(ChannelId(1), None, Mode::Chat, "http://chat-a".into());
        user.status = UserStatus::Processing;
        let session = user.session_id.clone();

        let report = store.restore(vec![user]);
        assert_eq!(report, RestoreReport { loaded: 1, reset: 1, migrated: 0 });

        let restored = store.get(ChannelId(1)).unwrap();
        assert_eq!(restored.status, UserStatus::Idle);
        assert_eq!(restored.session_id, session);
        assert_eq!(restored.server, "http://chat-a");
    }

    #[test]
    fn restore_migrates_user_whose_pod_was_removed() {
        let store = store();
        let user = User::new(ChannelId(1), None, Mode::Pro, "http://retired-pod".into());
        let old_session = user.session_id.clone();

        let report = store.restore(vec![user]);
        assert_eq!(report.migrated, 1);

        let restored = store.get(ChannelId(1)).unwrap();
        assert_eq!(restored.server, "http://pro-a");
        assert_ne!(restored.session_id, old_session);
        assert_eq!(restored.mode, Mode::Pro);
    }

    #[test]
    fn restore_pod_from_other_mode_is_migrated() {
        let store = store();
        let user = User::new(ChannelId(1), None, Mode::Pro, "http://chat-a".into());
        store.restore(vec![user]);
        assert_eq!(store.get(ChannelId(1)).unwrap().server, "http://pro-a");
    }

    #[test]
    fn restore_fills_empty_session() {
        let store = store();
        let mut user = User::new(ChannelId(1), None, Mode::Chat, "http://chat-b".into());
        user.session_id.clear();
        let report = store.restore(vec![user]);
        assert_eq!(report.migrated, 0);
        assert!(!store.get(ChannelId(1)).unwrap().session_id.is_empty());
    }
}
