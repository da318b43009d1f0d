//! Chat Session State
//!
//! One conversation: its messages, store-assigned id, title and the
//! processing/loading flags a surface needs to render it.
//!
//! # Design
//!
//! The session is optimistic. A user message is appended and published
//! before any network call, so the surface shows it immediately; remote
//! persistence and the assistant reply follow. Only one send is in flight
//! at a time. A second send while one is processing is ignored, not queued.
//!
//! The same state machine serves the general assistant and the chat about a
//! scanned medicine; [`SessionMode`] selects where transcripts live and what
//! context is sent with each request.

mod chat_session;
mod state;
mod title;

pub use chat_session::{ChatSession, SessionContext};
pub use title::{fallback_title, initial_title, DEFAULT_TITLE};

use crate::config::ChatConfig;
use crate::local::StorageKey;
use crate::messages::ChatMessage;
use crate::scan::{medicine_chat_key, scan_prompt, CurrentScan};

/// What the conversation is about
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionMode {
    /// General chat, persisted to the remote chat store
    Assistant,
    /// Chat about one scanned medicine, kept in local state
    ScanContext {
        /// Medicine name
        medicine: String,
        /// Scan analysis as text
        summary: String,
    },
}

impl SessionMode {
    /// Mode for chatting about `scan`
    #[must_use]
    pub fn for_scan(scan: &CurrentScan) -> Self {
        Self::ScanContext {
            medicine: scan.name.clone(),
            summary: scan.summary(),
        }
    }

    /// System prompt sent with every chat request
    #[must_use]
    pub fn system_prompt(&self, config: &ChatConfig) -> Option<String> {
        match self {
            Self::Assistant => config.system_prompt.clone(),
            Self::ScanContext { medicine, summary } => Some(scan_prompt(medicine, summary)),
        }
    }

    /// Local key of the transcript (scan chats only)
    #[must_use]
    pub fn transcript_key(&self) -> Option<StorageKey> {
        match self {
            Self::Assistant => None,
            Self::ScanContext { medicine, .. } => Some(medicine_chat_key(medicine)),
        }
    }

    /// Messages a fresh conversation starts with
    fn initial_messages(&self, config: &ChatConfig) -> Vec<ChatMessage> {
        match self {
            Self::Assistant => Vec::new(),
            Self::ScanContext { .. } => self
                .system_prompt(config)
                .map(ChatMessage::system)
                .into_iter()
                .collect(),
        }
    }
}

/// How a send ended
#[derive(Clone, Debug, PartialEq)]
pub enum SendOutcome {
    /// The assistant replied
    Replied(ChatMessage),
    /// The user aborted the reply; a cancellation note was appended
    Cancelled,
    /// The reply failed; an error message was appended
    Failed(String),
    /// The conversation was replaced while waiting; the reply was dropped
    Discarded,
    /// Nothing to send
    Ignored,
    /// Another send is still in flight
    Busy,
}

/// How a load ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The conversation replaced the current one
    Loaded {
        /// Number of loaded messages
        message_count: usize,
    },
    /// No such conversation; a fresh one was started
    NotFound,
    /// Loading failed; a fresh one was started
    Failed(String),
    /// Nothing to restore
    Fresh,
}
