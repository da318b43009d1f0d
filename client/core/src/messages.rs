//! Chat Messages
//!
//! The message and session types shared by the session state machine, the
//! chat stores, the local state file and the typing driver.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Text of the synthetic message appended when the user stops a reply
pub const CANCELLED_TEXT: &str = "Response generation cancelled.";

/// Text of the synthetic message appended when a reply fails
pub const ERROR_TEXT: &str = "Sorry, I encountered an error. Please try again.";

/// Who sent a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User input
    User,
    /// AI assistant
    Assistant,
    /// System prompt / context
    System,
}

impl MessageRole {
    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// A message in a conversation
///
/// Messages are immutable once appended to a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Who sent this message
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// When the message was created
    pub timestamp: DateTime<Utc>,
    /// Preview URL of an attached image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_preview: Option<String>,
    /// Whether this is a synthetic error message
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ChatMessage {
    /// Create a message stamped with the current time
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            image_preview: None,
            is_error: false,
        }
    }

    /// A user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// An assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// A system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// The assistant message shown in place of a failed reply
    #[must_use]
    pub fn error() -> Self {
        Self {
            is_error: true,
            ..Self::assistant(ERROR_TEXT)
        }
    }

    /// The assistant message shown in place of a cancelled reply
    #[must_use]
    pub fn cancelled() -> Self {
        Self::assistant(CANCELLED_TEXT)
    }

    /// Attach an image preview URL
    #[must_use]
    pub fn with_image_preview(mut self, url: impl Into<String>) -> Self {
        self.image_preview = Some(url.into());
        self
    }

    /// Key used by the typing driver's displayed-text map
    #[must_use]
    pub fn key(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }
}

/// Opaque session identifier assigned by the chat store
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Wrap a store-assigned id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Point-in-time copy of a conversation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatSessionSnapshot {
    /// Store-assigned id (`None` until the first message is persisted)
    pub id: Option<SessionId>,
    /// Conversation title
    pub title: String,
    /// Messages in chronological order
    pub messages: Vec<ChatMessage>,
}

/// Role/content pair sent to the chat endpoint as history
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Who sent the message
    pub role: MessageRole,
    /// Message content
    pub content: String,
}

impl From<&ChatMessage> for HistoryEntry {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}
