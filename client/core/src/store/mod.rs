//! Chat Store
//!
//! Remote persistence of conversations. The session state machine writes
//! every user message, reply and cancellation note through a [`ChatStore`];
//! it never reads back what it just wrote, so the store and the in-memory
//! list converge on a best-effort basis.
//!
//! # Implementations
//!
//! - [`MemoryChatStore`] keeps everything in process (tests, offline use)
//! - [`RestChatStore`] talks to a PostgREST-style hosted backend

mod memory;
mod rest;

pub use memory::MemoryChatStore;
pub use rest::RestChatStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::messages::{ChatMessage, SessionId};

/// A conversation as stored remotely
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    /// Store-assigned id
    pub id: SessionId,
    /// Conversation title
    pub title: String,
    /// Messages in chronological order
    pub messages: Vec<ChatMessage>,
}

/// One row of the conversation list
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Store-assigned id
    pub id: SessionId,
    /// Conversation title
    pub title: String,
    /// Last time the conversation changed
    pub updated_at: DateTime<Utc>,
}

/// Remote persistence for chat sessions
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Store name for logs
    fn name(&self) -> &str;

    /// Create a conversation and return its id
    async fn create_session(&self, title: &str) -> Result<SessionId, ClientError>;

    /// Append one message to a conversation
    async fn append_message(&self, id: &SessionId, message: &ChatMessage)
        -> Result<(), ClientError>;

    /// Fetch a conversation with its full history; `None` if it does not exist
    async fn load_session(&self, id: &SessionId) -> Result<Option<StoredSession>, ClientError>;

    /// Rename a conversation
    async fn update_title(&self, id: &SessionId, title: &str) -> Result<(), ClientError>;

    /// List conversations, most recently updated first
    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ClientError>;
}
