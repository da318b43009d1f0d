//! In-memory conversation state

use crate::abort::AbortSignal;
use crate::messages::{ChatMessage, ChatSessionSnapshot, HistoryEntry, MessageRole, SessionId};

use super::title::DEFAULT_TITLE;

/// Everything the session tracks behind its lock
///
/// `generation` changes whenever the conversation is replaced or cleared; a
/// reply that was requested under an older generation is dropped.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) id: Option<SessionId>,
    pub(crate) title: String,
    pub(crate) messages: Vec<ChatMessage>,
    pub(crate) generation: u64,
    pub(crate) in_flight: Option<AbortSignal>,
}

impl SessionState {
    pub(crate) fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            id: None,
            title: DEFAULT_TITLE.to_string(),
            messages,
            generation: 0,
            in_flight: None,
        }
    }

    /// Abort the pending reply (if any) and make it stale
    pub(crate) fn invalidate(&mut self) {
        if let Some(signal) = self.in_flight.take() {
            signal.abort();
        }
        self.generation += 1;
    }

    /// Start over with `messages`
    pub(crate) fn reset(&mut self, messages: Vec<ChatMessage>) {
        self.invalidate();
        self.id = None;
        self.title = DEFAULT_TITLE.to_string();
        self.messages = messages;
    }

    /// Take over a loaded conversation wholesale
    pub(crate) fn replace(&mut self, id: Option<SessionId>, title: String, messages: Vec<ChatMessage>) {
        self.invalidate();
        self.id = id;
        self.title = title;
        self.messages = messages;
    }

    /// The last `max` real exchanges, oldest first
    ///
    /// System prompts and synthetic error messages are not history.
    pub(crate) fn history(&self, max: usize) -> Vec<HistoryEntry> {
        let relevant: Vec<&ChatMessage> = self
            .messages
            .iter()
            .filter(|m| !m.is_error && m.role != MessageRole::System)
            .collect();
        let skip = relevant.len().saturating_sub(max);
        relevant.into_iter().skip(skip).map(HistoryEntry::from).collect()
    }

    pub(crate) fn snapshot(&self) -> ChatSessionSnapshot {
        ChatSessionSnapshot {
            id: self.id.clone(),
            title: self.title.clone(),
            messages: self.messages.clone(),
        }
    }
}
