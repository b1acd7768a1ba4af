use super::types::{Role, Session, Turn};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Durable home of sessions and their turns.
///
/// Every operation is atomic at single-session granularity; there are no
/// cross-session transactions. `append_turn` must move the session's
/// `last_message_at` to the new turn's timestamp in the same atomic step.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn create_session(&self, owner_id: &str, title: &str) -> Result<Session, StoreError>;

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// Sessions for one owner, most recent `last_message_at` first.
    async fn list_sessions(&self, owner_id: &str, limit: usize)
    -> Result<Vec<Session>, StoreError>;

    /// Appends one turn. Fails with `SessionNotFound` when the session is
    /// absent; returns the persisted turn on success.
    async fn append_turn(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<Turn, StoreError>;

    /// Full overwrite of the mutable session fields (title, turns,
    /// last-activity). Identity and creation time never change.
    async fn update_session(&self, session: &Session) -> Result<(), StoreError>;

    /// Idempotent: returns whether a record was actually removed. Deleting
    /// a nonexistent session is not an error for the caller.
    async fn delete_session(&self, id: &str) -> Result<bool, StoreError>;

    async fn session_exists(&self, id: &str) -> Result<bool, StoreError>;
}

/// Reference in-memory implementation. Backs tests and the `db_path = ""`
/// configuration; nothing survives process exit.
#[derive(Default)]
pub struct MemoryHistoryStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Session>>, StoreError> {
        self.sessions.lock().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn create_session(&self, owner_id: &str, title: &str) -> Result<Session, StoreError> {
        let session = Session::new(owner_id, title);
        self.lock()?.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.lock()?.get(id).cloned())
    }

    async fn list_sessions(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<Session>, StoreError> {
        let guard = self.lock()?;
        let mut sessions: Vec<Session> = guard
            .values()
            .filter(|session| session.owner_id == owner_id)
            .cloned()
            .collect();
        drop(guard);

        sessions.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn append_turn(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<Turn, StoreError> {
        let mut guard = self.lock()?;
        let session = guard
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;

        let mut turn = Turn::new(role, content);
        turn.metadata = metadata;
        session.last_message_at = turn.timestamp;
        session.turns.push(turn.clone());
        Ok(turn)
    }

    async fn update_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let stored = guard
            .get_mut(&session.id)
            .ok_or_else(|| StoreError::SessionNotFound(session.id.clone()))?;

        stored.title.clone_from(&session.title);
        stored.turns.clone_from(&session.turns);
        stored.last_message_at = session.last_message_at;
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.remove(id).is_some())
    }

    async fn session_exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.contains_key(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = MemoryHistoryStore::new();
        let created = store.create_session("u1", "First chat").await.unwrap();

        let found = store.get_session(&created.id).await.unwrap().unwrap();
        assert_eq!(found.owner_id, "u1");
        assert_eq!(found.title, "First chat");
        assert!(found.turns.is_empty());
    }

    #[tokio::test]
    async fn get_missing_session_is_none() {
        let store = MemoryHistoryStore::new();
        assert!(store.get_session("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn append_turn_updates_last_message_at() {
        let store = MemoryHistoryStore::new();
        let session = store.create_session("u1", "t").await.unwrap();

        let turn = store
            .append_turn(&session.id, Role::User, "hello", None)
            .await
            .unwrap();

        let reloaded = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(reloaded.turns.len(), 1);
        assert_eq!(reloaded.last_message_at, turn.timestamp);
    }

    #[tokio::test]
    async fn append_turn_to_missing_session_fails() {
        let store = MemoryHistoryStore::new();
        let err = store
            .append_turn("ghost", Role::User, "hello", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SessionNotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn append_turn_keeps_metadata() {
        let store = MemoryHistoryStore::new();
        let session = store.create_session("u1", "t").await.unwrap();

        store
            .append_turn(
                &session.id,
                Role::Assistant,
                "hi",
                Some(serde_json::json!({"model": "gemma2:2b"})),
            )
            .await
            .unwrap();

        let reloaded = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(
            reloaded.turns[0].metadata.as_ref().unwrap()["model"],
            "gemma2:2b"
        );
    }

    #[tokio::test]
    async fn list_sessions_filters_owner_and_orders_by_recency() {
        let store = MemoryHistoryStore::new();
        let a = store.create_session("u1", "a").await.unwrap();
        let b = store.create_session("u1", "b").await.unwrap();
        store.create_session("u2", "other").await.unwrap();

        // Touch `a` so it becomes the most recent.
        store
            .append_turn(&a.id, Role::User, "bump", None)
            .await
            .unwrap();

        let listed = store.list_sessions("u1", 50).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, a.id);
        assert_eq!(listed[1].id, b.id);
    }

    #[tokio::test]
    async fn list_sessions_respects_limit() {
        let store = MemoryHistoryStore::new();
        for i in 0..5 {
            store.create_session("u1", &format!("s{i}")).await.unwrap();
        }
        let listed = store.list_sessions("u1", 3).await.unwrap();
        assert_eq!(listed.len(), 3);
    }

    #[tokio::test]
    async fn update_session_overwrites_title_and_turns() {
        let store = MemoryHistoryStore::new();
        let mut session = store.create_session("u1", "Old").await.unwrap();

        session.title = "New".into();
        session.turns.push(Turn::new(Role::System, "seed"));
        store.update_session(&session).await.unwrap();

        let reloaded = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(reloaded.title, "New");
        assert_eq!(reloaded.turns.len(), 1);
    }

    #[tokio::test]
    async fn delete_session_is_idempotent() {
        let store = MemoryHistoryStore::new();
        let session = store.create_session("u1", "t").await.unwrap();

        assert!(store.delete_session(&session.id).await.unwrap());
        assert!(!store.delete_session(&session.id).await.unwrap());
        assert!(!store.session_exists(&session.id).await.unwrap());
    }
}
