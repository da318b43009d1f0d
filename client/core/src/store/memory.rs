//! In-process chat store

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{ChatStore, SessionSummary, StoredSession};
use crate::error::ClientError;
use crate::messages::{ChatMessage, SessionId};

struct Entry {
    session: StoredSession,
    updated_at: DateTime<Utc>,
}

/// Chat store that keeps every conversation in memory
#[derive(Default)]
pub struct MemoryChatStore {
    sessions: RwLock<HashMap<SessionId, Entry>>,
}

impl MemoryChatStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored conversations
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no conversation is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Insert a conversation as-is (seeding)
    pub fn insert(&self, session: StoredSession) {
        self.sessions.write().insert(
            session.id.clone(),
            Entry {
                session,
                updated_at: Utc::now(),
            },
        );
    }

    /// Copy of a stored conversation
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<StoredSession> {
        self.sessions.read().get(id).map(|e| e.session.clone())
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_session(&self, title: &str) -> Result<SessionId, ClientError> {
        let id = SessionId::new(uuid::Uuid::new_v4().to_string());
        self.insert(StoredSession {
            id: id.clone(),
            title: title.to_string(),
            messages: Vec::new(),
        });
        Ok(id)
    }

    async fn append_message(
        &self,
        id: &SessionId,
        message: &ChatMessage,
    ) -> Result<(), ClientError> {
        let mut sessions = self.sessions.write();
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| ClientError::Store(format!("session not found: {id}")))?;
        entry.session.messages.push(message.clone());
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn load_session(&self, id: &SessionId) -> Result<Option<StoredSession>, ClientError> {
        Ok(self.get(id))
    }

    async fn update_title(&self, id: &SessionId, title: &str) -> Result<(), ClientError> {
        let mut sessions = self.sessions.write();
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| ClientError::Store(format!("session not found: {id}")))?;
        entry.session.title = title.to_string();
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ClientError> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .read()
            .values()
            .map(|e| SessionSummary {
                id: e.session.id.clone(),
                title: e.session.title.clone(),
                updated_at: e.updated_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_append_load() {
        let store = MemoryChatStore::new();
        let id = store.create_session("I have a fever").await.unwrap();
        store
            .append_message(&id, &ChatMessage::user("I have a fever"))
            .await
            .unwrap();
        store
            .append_message(&id, &ChatMessage::assistant("Rest and hydrate."))
            .await
            .unwrap();

        let session = store.load_session(&id).await.unwrap().unwrap();
        assert_eq!(session.title, "I have a fever");
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[1].content, "Rest and hydrate.");
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let store = MemoryChatStore::new();
        let missing = SessionId::new("missing");
        assert!(store.load_session(&missing).await.unwrap().is_none());
        assert!(matches!(
            store.append_message(&missing, &ChatMessage::user("x")).await,
            Err(ClientError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_list_most_recent_first() {
        let store = MemoryChatStore::new();
        let first = store.create_session("first").await.unwrap();
        let second = store.create_session("second").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store.update_title(&first, "renamed").await.unwrap();

        let list = store.list_sessions().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, first);
        assert_eq!(list[0].title, "renamed");
        assert_eq!(list[1].id, second);
    }
}
