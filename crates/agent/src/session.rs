use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use calhelper_core::domain::session::{Session, SessionId};

/// Owns every live conversation. Work on one session is serialized through
/// its own mutex; different sessions never wait on each other.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, id: &SessionId) -> Arc<Mutex<Session>> {
        if let Some(existing) = self.sessions.read().await.get(id) {
            return Arc::clone(existing);
        }

        let mut sessions = self.sessions.write().await;
        let entry = sessions.entry(id.clone()).or_insert_with(|| {
            tracing::info!(event_name = "session.created", session_id = %id, "session created");
            Arc::new(Mutex::new(Session::new(id.clone())))
        });
        Arc::clone(entry)
    }

    /// Snapshot of the session, created when absent.
    pub async fn get(&self, id: &SessionId) -> Session {
        self.entry(id).await.lock().await.clone()
    }

    pub async fn update<F, R>(&self, id: &SessionId, mutator: F) -> R
    where
        F: FnOnce(&mut Session) -> R,
    {
        let entry = self.entry(id).await;
        let mut session = entry.lock().await;
        mutator(&mut session)
    }

    /// Holds the session for a whole turn.
    pub async fn lock(&self, id: &SessionId) -> OwnedMutexGuard<Session> {
        self.entry(id).await.lock_owned().await
    }

    pub async fn end(&self, id: &SessionId) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            tracing::info!(event_name = "session.ended", session_id = %id, "session ended");
        }
        removed
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }
}
