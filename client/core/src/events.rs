//! Chat Events
//!
//! Typed notifications from the client core to whatever surface renders it.
//! Surfaces subscribe to an [`EventBus`] instead of listening for ad hoc
//! global events; the core never needs to know who is listening.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::messages::{ChatMessage, SessionId};

/// Notification levels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyLevel {
    /// Informational
    Info,
    /// Warning (recoverable)
    Warning,
    /// Error
    Error,
    /// Success
    Success,
}

/// Events published by the session and the typing driver
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ChatEvent {
    /// A message was appended to the visible list
    MessageAppended {
        /// Session the message belongs to (if already assigned)
        session_id: Option<SessionId>,
        /// The appended message
        message: ChatMessage,
    },

    /// A send started or finished; input should be disabled while true
    ProcessingChanged {
        /// Whether a send is in flight
        processing: bool,
    },

    /// Session history loading started or finished
    LoadingChanged {
        /// Whether a load is in flight
        loading: bool,
    },

    /// The store assigned an id to the current session
    SessionAdopted {
        /// The new session id
        session_id: SessionId,
    },

    /// The conversation title changed
    TitleChanged {
        /// Session the title belongs to
        session_id: Option<SessionId>,
        /// The new title
        title: String,
    },

    /// The message list was replaced by a loaded session
    SessionReplaced {
        /// Loaded session id (`None` for locally kept transcripts)
        session_id: Option<SessionId>,
        /// Loaded title
        title: String,
        /// Number of loaded messages
        message_count: usize,
    },

    /// Local state was cleared for a new conversation
    SessionCleared,

    /// Something the user should be told about
    Notify {
        /// Severity
        level: NotifyLevel,
        /// Human-readable text
        message: String,
    },

    /// Typing animation progress for one message
    Typing {
        /// Message key
        key: String,
        /// Currently revealed prefix
        revealed: String,
        /// Whether the full text is now shown
        done: bool,
    },
}

/// Broadcast bus for [`ChatEvent`]s
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<ChatEvent>,
}

impl EventBus {
    /// Create a bus that buffers up to `capacity` events per slow subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to future events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; having no subscribers is fine
    pub fn emit(&self, event: ChatEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }

    /// Publish a notification
    pub fn notify(&self, level: NotifyLevel, message: impl Into<String>) {
        self.emit(ChatEvent::Notify {
            level,
            message: message.into(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Drain every event currently buffered for `rx`
pub fn drain(rx: &mut broadcast::Receiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped = skipped, "Event subscriber lagged");
            }
            Err(_) => break,
        }
    }
    events
}
