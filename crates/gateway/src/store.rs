//! In-memory session store
//!
//! Each session sits behind its own async mutex, so one session never runs two
//! turns at once while other sessions proceed independently.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;
use wizsearch_common::errors::{AppError, Result};
use wizsearch_context::Session;

pub type SharedSession = Arc<Mutex<Session>>;

#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, SharedSession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new chat; returns a snapshot of it
    pub async fn create(&self, greeting: &str) -> Session {
        let session = Session::new(greeting);
        let snapshot = session.clone();
        self.sessions
            .write()
            .await
            .insert(session.id, Arc::new(Mutex::new(session)));
        tracing::info!(session_id = %snapshot.id, "Session created");
        snapshot
    }

    pub async fn get(&self, id: Uuid) -> Result<SharedSession> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::SessionNotFound { id: id.to_string() })
    }

    /// Exclusive access for a turn or a reset; fails fast while a turn runs
    pub async fn acquire(&self, id: Uuid) -> Result<OwnedMutexGuard<Session>> {
        self.get(id)
            .await?
            .try_lock_owned()
            .map_err(|_| AppError::TurnInProgress { id: id.to_string() })
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let store = SessionStore::new();
        let id = store.create("Hi").await.id;

        let guard = store.acquire(id).await.unwrap();
        let err = store.acquire(id).await.unwrap_err();
        assert!(matches!(err, AppError::TurnInProgress { .. }));

        drop(guard);
        assert!(store.acquire(id).await.is_ok());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_missing_session() {
        let store = SessionStore::new();
        let err = store.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::SessionNotFound { .. }));
    }
}
