// src/session/registry.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use uuid::Uuid;

use super::coordinator::ExamSession;

/// Live sessions by id. Each session owns its own state; the registry only
/// hands out references to the session that was asked for.
///
/// A session is evicted `linger` after its submission reaches storage, so
/// repeated submit and status calls keep working for a while. A session whose
/// persistence failed stays until a manual retry stores it or it is removed.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, Arc<ExamSession>>>>,
    linger: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_linger(Self::DEFAULT_LINGER)
    }
}

impl SessionRegistry {
    pub const DEFAULT_LINGER: Duration = Duration::from_secs(60);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_linger(linger: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            linger,
        }
    }

    pub async fn insert(&self, session: ExamSession) -> Arc<ExamSession> {
        let session = Arc::new(session);
        self.sessions
            .write()
            .await
            .insert(session.id(), Arc::clone(&session));
        self.spawn_eviction(&session);
        session
    }

    pub async fn get(&self, id: &Uuid) -> Option<Arc<ExamSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Closes and forgets the session. Dropping the last handle releases its listeners.
    pub async fn remove(&self, id: &Uuid) -> Option<Arc<ExamSession>> {
        let session = self.sessions.write().await.remove(id)?;
        session.close();
        Some(session)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drops the entry once the session is stored (after `linger`) or closed.
    fn spawn_eviction(&self, session: &Arc<ExamSession>) {
        let id = session.id();
        let watched = Arc::downgrade(session);
        let sessions = Arc::downgrade(&self.sessions);
        let linger = self.linger;

        tokio::spawn(async move {
            let Some(session) = watched.upgrade() else {
                return;
            };
            let stored = session.stored().await;
            drop(session);

            if stored {
                tokio::time::sleep(linger).await;
            }
            let Some(sessions) = sessions.upgrade() else {
                return;
            };
            if sessions.write().await.remove(&id).is_some() {
                tracing::debug!(session_id = %id, "session evicted from registry");
            }
        });
    }
}
