//! The session registry: one interview controller per user, behind a
//! per-entry lock so concurrent requests on the same session serialise.

use crate::session::InterviewSession;
use crate::store::QuestionStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone, Serialize)]
pub struct RegistryInfo {
    pub active_sessions: usize,
    pub session_ids: Vec<String>,
}

pub struct SessionRegistry {
    store: Arc<QuestionStore>,
    sessions: RwLock<HashMap<String, Arc<Mutex<InterviewSession>>>>,
}

impl SessionRegistry {
    pub fn new(store: Arc<QuestionStore>) -> Self {
        Self {
            store,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the user's session, constructing one bound to the current
    /// store if none exists. Creation is idempotent.
    pub async fn get_or_create(&self, user_id: &str) -> Arc<Mutex<InterviewSession>> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(user_id) {
                return session.clone();
            }
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(user_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(InterviewSession::new(
                    user_id.to_string(),
                    self.store.clone(),
                )))
            })
            .clone()
    }

    pub async fn has(&self, user_id: &str) -> bool {
        self.sessions.read().await.contains_key(user_id)
    }

    /// Drops the user's session if present. Returns whether one existed.
    pub async fn reset(&self, user_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(user_id).is_some();
        if removed {
            tracing::info!("session removed for user {user_id}");
        }
        removed
    }

    /// Starts a fresh interview: any previous session is discarded first.
    pub async fn start(&self, user_id: &str) -> Arc<Mutex<InterviewSession>> {
        self.reset(user_id).await;
        self.get_or_create(user_id).await
    }

    pub async fn info(&self) -> RegistryInfo {
        let sessions = self.sessions.read().await;
        RegistryInfo {
            active_sessions: sessions.len(),
            session_ids: sessions.keys().cloned().collect(),
        }
    }

    /// Finds a session by its opaque session id (the value handed out by
    /// `start`).
    pub async fn find_by_session_id(&self, session_id: &str) -> Option<Arc<Mutex<InterviewSession>>> {
        let sessions = self.sessions.read().await;
        for session in sessions.values() {
            if session.lock().await.session_id == session_id {
                return Some(session.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(QuestionStore::new()))
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let registry = registry();
        let first = registry.get_or_create("alice").await;
        let second = registry.get_or_create("alice").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.has("alice").await);
    }

    #[tokio::test]
    async fn start_discards_the_previous_session() {
        let registry = registry();
        let first = registry.get_or_create("alice").await;
        let first_id = first.lock().await.session_id.clone();

        let fresh = registry.start("alice").await;
        let fresh_id = fresh.lock().await.session_id.clone();
        assert_ne!(first_id, fresh_id);
        assert_eq!(registry.info().await.active_sessions, 1);
    }

    #[tokio::test]
    async fn reset_reports_whether_a_session_existed() {
        let registry = registry();
        assert!(!registry.reset("bob").await);
        registry.get_or_create("bob").await;
        assert!(registry.reset("bob").await);
        assert!(!registry.has("bob").await);
    }

    #[tokio::test]
    async fn find_by_session_id_resolves_the_opaque_id() {
        let registry = registry();
        let session = registry.start("carol").await;
        let sid = session.lock().await.session_id.clone();

        let found = registry.find_by_session_id(&sid).await;
        assert!(found.is_some());
        assert!(registry.find_by_session_id("nope").await.is_none());
    }
}
