use crate::{
    coordinator::{spawn_from_storage, spawn_new, CoordinatorHandle},
    db::PersistentStorage,
    model::{Queue, SessionId},
    notifications::NotificationSender,
};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

/// Keeps one live `CoordinatorHandle` per active queue, spawning the actor
/// lazily the first time a queue is touched after process start and
/// reusing it for every request thereafter.
#[derive(Clone)]
pub struct CoordinatorRegistry {
    inner: Arc<RwLock<HashMap<SessionId, CoordinatorHandle>>>,
    storage: PersistentStorage,
    notifications: NotificationSender,
    call_window_secs: i64,
}

impl CoordinatorRegistry {
    #[must_use]
    pub fn new(storage: PersistentStorage, notifications: NotificationSender, call_window_secs: i64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            storage,
            notifications,
            call_window_secs,
        }
    }

    /// Registers a coordinator for a queue that was just created in this
    /// process; the caller already holds the freshly inserted `Queue` row.
    pub async fn insert_new(&self, queue: Queue) -> CoordinatorHandle {
        let handle = spawn_new(
            queue.clone(),
            self.storage.clone(),
            self.notifications.clone(),
            self.call_window_secs,
        );
        self.inner
            .write()
            .await
            .insert(queue.session_id.clone(), handle.clone());
        handle
    }

    /// Returns the live handle for `session_id`, spawning an actor from
    /// durable storage if this is the first touch since process start.
    /// Returns `None` if no such queue exists at all.
    pub async fn get_or_load(&self, session_id: &SessionId) -> Option<CoordinatorHandle> {
        if let Some(handle) = self.inner.read().await.get(session_id) {
            return Some(handle.clone());
        }

        let queue = self.storage.get_queue_by_session(session_id).await.ok()??;
        let parties = self
            .storage
            .list_parties_for_session(session_id)
            .await
            .ok()?
            .into_iter()
            .filter(|p| p.status.is_active())
            .collect();

        let mut guard = self.inner.write().await;
        // Another request may have raced us to load the same queue.
        if let Some(handle) = guard.get(session_id) {
            return Some(handle.clone());
        }
        let handle = spawn_from_storage(
            queue,
            parties,
            self.storage.clone(),
            self.notifications.clone(),
            self.call_window_secs,
        );
        guard.insert(session_id.clone(), handle.clone());
        Some(handle)
    }

    pub async fn remove(&self, session_id: &SessionId) {
        self.inner.write().await.remove(session_id);
    }
}
