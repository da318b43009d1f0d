//! The session state machine

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::state::SessionState;
use super::title::{fallback_title, initial_title};
use super::{LoadOutcome, SendOutcome, SessionMode};
use crate::abort::AbortSignal;
use crate::api::{ChatRequest, MediscanApi, UploadLimit};
use crate::config::ChatConfig;
use crate::error::ClientError;
use crate::events::{ChatEvent, EventBus, NotifyLevel};
use crate::fallback::HttpTransport;
use crate::local::{LocalStore, StorageKey};
use crate::messages::{ChatMessage, ChatSessionSnapshot, MessageRole, SessionId};
use crate::store::ChatStore;
use crate::upload::{CloudinaryUploader, ImageAttachment};

/// Services a session talks to
pub struct SessionContext<T: HttpTransport> {
    /// MediScan API
    pub api: Arc<MediscanApi<T>>,
    /// Remote chat store
    pub store: Arc<dyn ChatStore>,
    /// Local state
    pub local: Arc<LocalStore>,
    /// Where session events are published
    pub events: EventBus,
    /// Image host for stored previews (optional)
    pub uploader: Option<Arc<CloudinaryUploader<T>>>,
}

impl<T: HttpTransport> Clone for SessionContext<T> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            store: Arc::clone(&self.store),
            local: Arc::clone(&self.local),
            events: self.events.clone(),
            uploader: self.uploader.clone(),
        }
    }
}

/// Sets a flag for its lifetime and publishes the transitions
struct FlagGuard<'a> {
    flag: &'a AtomicBool,
    events: &'a EventBus,
    event: fn(bool) -> ChatEvent,
}

impl<'a> FlagGuard<'a> {
    /// `None` if the flag is already set
    fn acquire(flag: &'a AtomicBool, events: &'a EventBus, event: fn(bool) -> ChatEvent) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        events.emit(event(true));
        Some(Self {
            flag,
            events,
            event,
        })
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        self.events.emit((self.event)(false));
    }
}

fn processing_event(processing: bool) -> ChatEvent {
    ChatEvent::ProcessingChanged { processing }
}

fn loading_event(loading: bool) -> ChatEvent {
    ChatEvent::LoadingChanged { loading }
}

struct Inner<T: HttpTransport> {
    ctx: SessionContext<T>,
    mode: SessionMode,
    config: ChatConfig,
    state: Mutex<SessionState>,
    processing: AtomicBool,
    loading: AtomicBool,
}

/// A single conversation
///
/// Cheap to clone; clones share the same conversation.
pub struct ChatSession<T: HttpTransport + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: HttpTransport + 'static> Clone for ChatSession<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: HttpTransport + 'static> ChatSession<T> {
    /// Create an empty session
    ///
    /// Call [`restore`](Self::restore) to pick up where the user left off.
    pub fn new(ctx: SessionContext<T>, mode: SessionMode, config: ChatConfig) -> Self {
        let state = SessionState::new(mode.initial_messages(&config));
        Self {
            inner: Arc::new(Inner {
                ctx,
                mode,
                config,
                state: Mutex::new(state),
                processing: AtomicBool::new(false),
                loading: AtomicBool::new(false),
            }),
        }
    }

    /// Conversation mode
    pub fn mode(&self) -> &SessionMode {
        &self.inner.mode
    }

    /// Event bus this session publishes on
    pub fn events(&self) -> &EventBus {
        &self.inner.ctx.events
    }

    /// Store-assigned id, once the first message was persisted
    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.state.lock().id.clone()
    }

    /// Current title
    pub fn title(&self) -> String {
        self.inner.state.lock().title.clone()
    }

    /// Visible messages in order
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.state.lock().messages.clone()
    }

    /// Copy of the whole conversation
    pub fn snapshot(&self) -> ChatSessionSnapshot {
        self.inner.state.lock().snapshot()
    }

    /// Whether a send is in flight (input should be disabled)
    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::Acquire)
    }

    /// Whether a conversation is being loaded
    pub fn is_loading(&self) -> bool {
        self.inner.loading.load(Ordering::Acquire)
    }

    /// Send a user message and wait for the assistant
    ///
    /// The user message is appended and published before any request is
    /// made. Failures never escape: they end up as a synthetic message in
    /// the conversation plus a notification.
    pub async fn send_message(&self, text: &str, image: Option<ImageAttachment>) -> SendOutcome {
        let text = text.trim();
        if text.is_empty() && image.is_none() {
            return SendOutcome::Ignored;
        }
        let Some(_processing) = FlagGuard::acquire(
            &self.inner.processing,
            &self.inner.ctx.events,
            processing_event,
        ) else {
            debug!("Send ignored, a reply is already in flight");
            return SendOutcome::Busy;
        };

        let mut user = ChatMessage::user(text);
        if let Some(ref image) = image {
            user = user.with_image_preview(image.data_url());
        }

        let signal = AbortSignal::new();
        let (generation, session_id, history) = {
            let mut state = self.inner.state.lock();
            let history = state.history(self.inner.config.max_context_messages);
            state.messages.push(user.clone());
            state.in_flight = Some(signal.clone());
            (state.generation, state.id.clone(), history)
        };
        self.emit_appended(session_id.clone(), &user);
        self.save_local().await;

        let session_id = match self.inner.mode {
            SessionMode::Assistant => {
                self.persist_user_message(generation, session_id, &user, image.as_ref())
                    .await
            }
            SessionMode::ScanContext { .. } => None,
        };

        let request = ChatRequest {
            message: text.to_string(),
            history,
            image: image.map(|i| i.data_url().to_string()),
            session_id,
            system_prompt: self.inner.mode.system_prompt(&self.inner.config),
        };
        debug!(
            history = request.history.len(),
            has_image = request.image.is_some(),
            "Requesting reply"
        );
        let result = self.inner.ctx.api.chat(&request, Some(signal)).await;

        let completed = {
            let mut state = self.inner.state.lock();
            if state.generation == generation {
                state.in_flight = None;
                let message = match &result {
                    Ok(reply) => ChatMessage::assistant(&reply.response),
                    Err(e) if e.is_aborted() => ChatMessage::cancelled(),
                    Err(_) => ChatMessage::error(),
                };
                state.messages.push(message.clone());
                Some((message, state.id.clone()))
            } else {
                None
            }
        };
        let Some((message, session_id)) = completed else {
            debug!("Conversation changed while waiting, dropping reply");
            return SendOutcome::Discarded;
        };

        self.emit_appended(session_id.clone(), &message);
        if !message.is_error && self.inner.mode == SessionMode::Assistant {
            if let Some(ref id) = session_id {
                self.persist_message(id, &message).await;
            }
        }
        self.save_local().await;

        match result {
            Ok(_) => SendOutcome::Replied(message),
            Err(e) if e.is_aborted() => {
                info!("Reply cancelled by user");
                SendOutcome::Cancelled
            }
            Err(e) => {
                warn!(error = %e, "Chat request failed");
                self.inner.ctx.events.notify(
                    NotifyLevel::Error,
                    "Failed to get a response. Please try again.",
                );
                SendOutcome::Failed(e.to_string())
            }
        }
    }

    /// Abort the in-flight reply
    ///
    /// Returns whether there was one to abort.
    pub fn abort(&self) -> bool {
        let signal = self.inner.state.lock().in_flight.clone();
        match signal {
            Some(signal) => {
                signal.abort();
                true
            }
            None => false,
        }
    }

    /// Replace the conversation with a stored one
    ///
    /// A reply still in flight is dropped. When the conversation does not
    /// exist or cannot be loaded, a fresh one is started.
    pub async fn load_session(&self, id: &SessionId) -> LoadOutcome {
        if self.inner.mode != SessionMode::Assistant {
            return self.restore_transcript().await;
        }
        let _loading = FlagGuard::acquire(&self.inner.loading, &self.inner.ctx.events, loading_event);
        self.inner.state.lock().invalidate();

        match self.inner.ctx.store.load_session(id).await {
            Ok(Some(stored)) => {
                let message_count = stored.messages.len();
                self.inner.state.lock().replace(
                    Some(stored.id.clone()),
                    stored.title.clone(),
                    stored.messages,
                );
                info!(session_id = %stored.id, messages = message_count, "Loaded conversation");
                self.inner.ctx.events.emit(ChatEvent::SessionReplaced {
                    session_id: Some(stored.id),
                    title: stored.title,
                    message_count,
                });
                self.save_local().await;
                LoadOutcome::Loaded { message_count }
            }
            Ok(None) => {
                warn!(session_id = %id, "Conversation not found, starting a new one");
                self.start_new().await;
                LoadOutcome::NotFound
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "Failed to load conversation");
                self.inner.ctx.events.notify(
                    NotifyLevel::Warning,
                    "Could not load that conversation. Starting a new one.",
                );
                self.start_new().await;
                LoadOutcome::Failed(e.to_string())
            }
        }
    }

    /// Pick up where the user left off
    ///
    /// An id from the URL wins over the locally remembered one. Scan chats
    /// reload their local transcript.
    pub async fn restore(&self, url_id: Option<SessionId>) -> LoadOutcome {
        if self.inner.mode != SessionMode::Assistant {
            return self.restore_transcript().await;
        }
        let id = url_id.or_else(|| {
            self.inner
                .ctx
                .local
                .get_raw(&StorageKey::CurrentChatId)
                .filter(|id| !id.is_empty())
                .map(SessionId::new)
        });
        match id {
            Some(id) => self.load_session(&id).await,
            None => LoadOutcome::Fresh,
        }
    }

    /// Clear the conversation and start over
    ///
    /// The remote record of the old conversation is kept.
    pub async fn start_new(&self) {
        self.inner
            .state
            .lock()
            .reset(self.inner.mode.initial_messages(&self.inner.config));
        self.inner.ctx.events.emit(ChatEvent::SessionCleared);

        let keys = match self.inner.mode.transcript_key() {
            Some(key) => vec![key],
            None => vec![
                StorageKey::CurrentChatId,
                StorageKey::CurrentChatTitle,
                StorageKey::CurrentChatMessages,
            ],
        };
        if let Err(e) = self.inner.ctx.local.remove(&keys).await {
            warn!(error = %e, "Failed to clear local chat state");
        }
    }

    /// Ask for a title for a conversation starting with `first_message`
    ///
    /// Falls back to the first few words when the endpoint fails.
    pub async fn generate_title(&self, first_message: &str) -> String {
        match self.inner.ctx.api.generate_title(first_message).await {
            Ok(title) => title,
            Err(e) => {
                warn!(error = %e, "Title generation failed, deriving one from the message");
                fallback_title(first_message)
            }
        }
    }

    /// Check whether another image may be attached
    ///
    /// A refusal is also published as a warning.
    pub async fn check_upload_limit(&self) -> Result<UploadLimit, ClientError> {
        let limit = self.inner.ctx.api.upload_limit().await?;
        if !limit.can_upload {
            let detail = limit
                .limit
                .map(|n| format!(" ({n} images per day)"))
                .unwrap_or_default();
            self.inner.ctx.events.notify(
                NotifyLevel::Warning,
                format!("Image upload limit reached{detail}. Try again later."),
            );
        }
        Ok(limit)
    }

    async fn persist_user_message(
        &self,
        generation: u64,
        session_id: Option<SessionId>,
        user: &ChatMessage,
        image: Option<&ImageAttachment>,
    ) -> Option<SessionId> {
        let id = match session_id {
            Some(id) => id,
            None => self.create_remote_session(generation, &user.content).await?,
        };

        let mut stored = user.clone();
        if let (Some(uploader), Some(image)) = (&self.inner.ctx.uploader, image) {
            match uploader.upload(image).await {
                Ok(url) => stored.image_preview = Some(url),
                Err(e) => warn!(error = %e, "Image upload failed, storing the data URL"),
            }
        }
        self.persist_message(&id, &stored).await;
        Some(id)
    }

    async fn create_remote_session(&self, generation: u64, first_message: &str) -> Option<SessionId> {
        let title = initial_title(first_message);
        let id = match self.inner.ctx.store.create_session(&title).await {
            Ok(id) => id,
            Err(e) => {
                self.persistence_failed("create the conversation", &e);
                return None;
            }
        };

        let adopted = {
            let mut state = self.inner.state.lock();
            if state.generation == generation && state.id.is_none() {
                state.id = Some(id.clone());
                state.title = title.clone();
                true
            } else {
                false
            }
        };
        if !adopted {
            debug!(session_id = %id, "Conversation changed before the new id arrived");
            return None;
        }

        info!(session_id = %id, store = self.inner.ctx.store.name(), "Created conversation");
        self.inner.ctx.events.emit(ChatEvent::SessionAdopted {
            session_id: id.clone(),
        });
        self.inner.ctx.events.emit(ChatEvent::TitleChanged {
            session_id: Some(id.clone()),
            title,
        });

        if !first_message.is_empty() {
            let session = self.clone();
            let title_id = id.clone();
            let first_message = first_message.to_string();
            tokio::spawn(async move {
                session.apply_generated_title(title_id, first_message).await;
            });
        }
        Some(id)
    }

    async fn apply_generated_title(&self, id: SessionId, first_message: String) {
        let title = self.generate_title(&first_message).await;

        let current = {
            let mut state = self.inner.state.lock();
            if state.id.as_ref() == Some(&id) {
                state.title = title.clone();
                true
            } else {
                false
            }
        };
        if current {
            self.inner.ctx.events.emit(ChatEvent::TitleChanged {
                session_id: Some(id.clone()),
                title: title.clone(),
            });
            self.save_local().await;
        }

        if let Err(e) = self.inner.ctx.store.update_title(&id, &title).await {
            warn!(session_id = %id, error = %e, "Failed to store generated title");
        }
    }

    async fn persist_message(&self, id: &SessionId, message: &ChatMessage) {
        if let Err(e) = self.inner.ctx.store.append_message(id, message).await {
            self.persistence_failed("save the message", &e);
        }
    }

    fn persistence_failed(&self, action: &str, error: &ClientError) {
        warn!(action = action, error = %error, "Chat persistence failed");
        self.inner.ctx.events.notify(
            NotifyLevel::Warning,
            format!("Could not {action}; this conversation may not be saved."),
        );
    }

    async fn restore_transcript(&self) -> LoadOutcome {
        let Some(key) = self.inner.mode.transcript_key() else {
            return LoadOutcome::Fresh;
        };
        let mut messages: Vec<ChatMessage> = self.inner.ctx.local.get(&key).unwrap_or_default();
        if messages.first().map(|m| m.role) != Some(MessageRole::System) {
            messages.splice(0..0, self.inner.mode.initial_messages(&self.inner.config));
        }

        let message_count = messages.len();
        let title = {
            let mut state = self.inner.state.lock();
            let title = state.title.clone();
            state.replace(None, title.clone(), messages);
            title
        };
        debug!(key = %key, messages = message_count, "Restored scan chat");
        self.inner.ctx.events.emit(ChatEvent::SessionReplaced {
            session_id: None,
            title,
            message_count,
        });
        LoadOutcome::Loaded { message_count }
    }

    fn emit_appended(&self, session_id: Option<SessionId>, message: &ChatMessage) {
        self.inner.ctx.events.emit(ChatEvent::MessageAppended {
            session_id,
            message: message.clone(),
        });
    }

    /// Mirror the conversation into local state (best effort)
    async fn save_local(&self) {
        let snapshot = self.snapshot();
        let local = &self.inner.ctx.local;

        let result = match self.inner.mode.transcript_key() {
            Some(key) => local.set(&key, &snapshot.messages).await,
            None => {
                let mut result = local
                    .set_raw(&StorageKey::CurrentChatTitle, snapshot.title.as_str())
                    .await;
                if result.is_ok() {
                    result = local
                        .set(&StorageKey::CurrentChatMessages, &snapshot.messages)
                        .await;
                }
                if let (Ok(()), Some(id)) = (&result, &snapshot.id) {
                    result = local
                        .set_raw(&StorageKey::CurrentChatId, id.as_str())
                        .await;
                }
                result
            }
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to save chat to local state");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::broadcast;

    use super::*;
    use crate::events::drain;
    use crate::fallback::FallbackClient;
    use crate::messages::CANCELLED_TEXT;
    use crate::scan::medicine_chat_key;
    use crate::store::{MemoryChatStore, StoredSession};
    use crate::testing::{MockReply, MockTransport, PRIMARY, PRODUCTION};

    struct Harness {
        session: ChatSession<MockTransport>,
        transport: MockTransport,
        store: Arc<MemoryChatStore>,
        local: Arc<LocalStore>,
        rx: broadcast::Receiver<ChatEvent>,
    }

    fn harness(mode: SessionMode) -> Harness {
        let transport = MockTransport::new();
        let store = Arc::new(MemoryChatStore::new());
        let local = Arc::new(LocalStore::in_memory());
        let events = EventBus::new(256);
        let rx = events.subscribe();
        let api = MediscanApi::new(FallbackClient::new(
            Some(PRIMARY.to_string()),
            Some(PRODUCTION.to_string()),
            transport.clone(),
        ));
        let ctx = SessionContext {
            api: Arc::new(api),
            store: store.clone(),
            local: local.clone(),
            events,
            uploader: None,
        };
        Harness {
            session: ChatSession::new(ctx, mode, ChatConfig::default()),
            transport,
            store,
            local,
            rx,
        }
    }

    fn scan_mode() -> SessionMode {
        SessionMode::ScanContext {
            medicine: "Ibuprofen 200mg".to_string(),
            summary: r#"{"dosage":"1-2 tablets every 4-6 hours"}"#.to_string(),
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_first_send_creates_session_and_titles_it() {
        let mut h = harness(SessionMode::Assistant);
        h.transport
            .route("/api/chat", MockReply::json(200, json!({"response": "Rest and drink fluids."})));
        h.transport.route(
            "/api/generate-title",
            MockReply::Delayed(
                Duration::from_millis(20),
                Box::new(MockReply::json(200, json!({"title": "Fever Care"}))),
            ),
        );

        let outcome = h.session.send_message("I have a fever", None).await;

        let id = h.session.session_id().expect("session id adopted");
        assert!(matches!(outcome, SendOutcome::Replied(ref m) if m.content == "Rest and drink fluids."));

        let session = h.session.clone();
        wait_until(|| session.title() == "Fever Care").await;

        let titles: Vec<String> = drain(&mut h.rx)
            .into_iter()
            .filter_map(|e| match e {
                ChatEvent::TitleChanged { title, .. } => Some(title),
                _ => None,
            })
            .collect();
        assert_eq!(titles, vec!["I have a fever".to_string(), "Fever Care".to_string()]);

        let stored = h.store.get(&id).unwrap();
        assert_eq!(stored.messages.len(), 2);
        let store = h.store.clone();
        let stored_id = id.clone();
        wait_until(move || store.get(&stored_id).is_some_and(|s| s.title == "Fever Care")).await;
        assert_eq!(
            h.local.get_raw(&StorageKey::CurrentChatId).as_deref(),
            Some(id.as_str())
        );
    }

    #[tokio::test]
    async fn test_user_message_visible_before_reply() {
        let mut h = harness(SessionMode::Assistant);
        h.transport.route("/api/chat", MockReply::Hang);

        let session = h.session.clone();
        let send = tokio::spawn(async move { session.send_message("Is this safe?", None).await });

        let transport = h.transport.clone();
        wait_until(move || transport.calls_to("/api/chat") == 1).await;

        let messages = h.session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Is this safe?");
        assert!(h.session.is_processing());

        let events = drain(&mut h.rx);
        assert_eq!(events[0], ChatEvent::ProcessingChanged { processing: true });
        assert!(matches!(
            &events[1],
            ChatEvent::MessageAppended { message, .. } if message.content == "Is this safe?"
        ));

        assert!(h.session.abort());
        assert_eq!(send.await.unwrap(), SendOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_abort_appends_single_cancel_note() {
        let h = harness(SessionMode::Assistant);
        h.transport.route("/api/chat", MockReply::Hang);

        let session = h.session.clone();
        let send = tokio::spawn(async move { session.send_message("Tell me about aspirin", None).await });
        let transport = h.transport.clone();
        wait_until(move || transport.calls_to("/api/chat") == 1).await;

        h.session.abort();
        assert_eq!(send.await.unwrap(), SendOutcome::Cancelled);

        let messages = h.session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, CANCELLED_TEXT);
        assert_eq!(
            messages
                .iter()
                .filter(|m| m.role == MessageRole::Assistant)
                .count(),
            1
        );
        assert_eq!(h.transport.calls_to(&format!("{PRODUCTION}/api/chat")), 0);
        assert!(!h.session.is_processing());
        assert!(!h.session.abort());

        let id = h.session.session_id().unwrap();
        assert_eq!(h.store.get(&id).unwrap().messages[1].content, CANCELLED_TEXT);
    }

    #[tokio::test]
    async fn test_second_send_while_processing_is_ignored() {
        let h = harness(SessionMode::Assistant);
        h.transport.route("/api/chat", MockReply::Hang);

        let session = h.session.clone();
        let first = tokio::spawn(async move { session.send_message("first", None).await });
        let transport = h.transport.clone();
        wait_until(move || transport.calls_to("/api/chat") == 1).await;

        assert_eq!(h.session.send_message("second", None).await, SendOutcome::Busy);
        assert_eq!(h.session.messages().len(), 1);

        h.session.abort();
        first.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_input_ignored() {
        let h = harness(SessionMode::Assistant);
        assert_eq!(h.session.send_message("   ", None).await, SendOutcome::Ignored);
        assert!(h.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failure_appends_local_error() {
        let mut h = harness(SessionMode::Assistant);
        h.transport.route("/api/chat", MockReply::status(500, "model overloaded"));

        let outcome = h.session.send_message("Hello", None).await;

        assert!(matches!(outcome, SendOutcome::Failed(ref e) if e.contains("/api/chat")));
        let messages = h.session.messages();
        assert!(messages[1].is_error);
        assert!(!h.session.is_processing());
        assert!(drain(&mut h.rx).iter().any(|e| matches!(
            e,
            ChatEvent::Notify { level: NotifyLevel::Error, .. }
        )));

        let id = h.session.session_id().unwrap();
        assert_eq!(h.store.get(&id).unwrap().messages.len(), 1);
        assert_eq!(h.transport.calls_to("/api/chat"), 2);
    }

    #[tokio::test]
    async fn test_history_sent_with_request() {
        let h = harness(SessionMode::Assistant);
        h.transport
            .route("/api/chat", MockReply::json(200, json!({"response": "ok"})));

        h.session.send_message("one", None).await;
        h.session.send_message("two", None).await;

        let call = h
            .transport
            .calls()
            .into_iter()
            .filter(|c| c.url.ends_with("/api/chat"))
            .last()
            .unwrap();
        let body: serde_json::Value = serde_json::from_str(&call.body_text()).unwrap();
        assert_eq!(body["message"], "two");
        assert_eq!(
            body["history"],
            json!([
                {"role": "user", "content": "one"},
                {"role": "assistant", "content": "ok"}
            ])
        );
        assert_eq!(body["sessionId"], h.session.session_id().unwrap().as_str());
    }

    #[tokio::test]
    async fn test_load_replaces_messages() {
        let mut h = harness(SessionMode::Assistant);
        h.transport
            .route("/api/chat", MockReply::json(200, json!({"response": "local reply"})));
        h.session.send_message("local question", None).await;

        let stored = StoredSession {
            id: SessionId::new("stored-1"),
            title: "Allergy meds".to_string(),
            messages: vec![
                ChatMessage::user("Which antihistamine?"),
                ChatMessage::assistant("Loratadine is non-drowsy."),
                ChatMessage::user("Thanks"),
            ],
        };
        h.store.insert(stored.clone());
        drain(&mut h.rx);

        let outcome = h.session.load_session(&stored.id).await;

        assert_eq!(outcome, LoadOutcome::Loaded { message_count: 3 });
        assert_eq!(h.session.messages(), stored.messages);
        assert_eq!(h.session.title(), "Allergy meds");
        assert_eq!(h.session.session_id(), Some(stored.id.clone()));

        let events = drain(&mut h.rx);
        assert_eq!(events.first(), Some(&ChatEvent::LoadingChanged { loading: true }));
        assert!(events.contains(&ChatEvent::SessionReplaced {
            session_id: Some(stored.id),
            title: "Allergy meds".to_string(),
            message_count: 3,
        }));
        assert!(!h.session.is_loading());
    }

    #[tokio::test]
    async fn test_load_missing_starts_fresh() {
        let h = harness(SessionMode::Assistant);
        h.local
            .set_raw(&StorageKey::CurrentChatId, "gone")
            .await
            .unwrap();

        let outcome = h.session.restore(None).await;

        assert_eq!(outcome, LoadOutcome::NotFound);
        assert!(h.session.messages().is_empty());
        assert_eq!(h.session.session_id(), None);
        assert!(h.local.get_raw(&StorageKey::CurrentChatId).is_none());
    }

    #[tokio::test]
    async fn test_restore_prefers_url_id() {
        let h = harness(SessionMode::Assistant);
        h.store.insert(StoredSession {
            id: SessionId::new("from-url"),
            title: "URL".to_string(),
            messages: vec![ChatMessage::user("hi")],
        });
        h.local
            .set_raw(&StorageKey::CurrentChatId, "cached")
            .await
            .unwrap();

        let outcome = h.session.restore(Some(SessionId::new("from-url"))).await;

        assert_eq!(outcome, LoadOutcome::Loaded { message_count: 1 });
        assert_eq!(h.session.title(), "URL");
        assert_eq!(h.session.restore(None).await, LoadOutcome::Loaded { message_count: 1 });
    }

    #[tokio::test]
    async fn test_load_drops_reply_in_flight() {
        let h = harness(SessionMode::Assistant);
        h.transport.route(
            "/api/chat",
            MockReply::Delayed(
                Duration::from_millis(50),
                Box::new(MockReply::json(200, json!({"response": "late"}))),
            ),
        );
        let target = StoredSession {
            id: SessionId::new("other"),
            title: "Other".to_string(),
            messages: vec![ChatMessage::user("older question")],
        };
        h.store.insert(target.clone());

        let session = h.session.clone();
        let send = tokio::spawn(async move { session.send_message("new question", None).await });
        let transport = h.transport.clone();
        wait_until(move || transport.calls_to("/api/chat") == 1).await;

        h.session.load_session(&target.id).await;

        assert_eq!(send.await.unwrap(), SendOutcome::Discarded);
        assert_eq!(h.session.messages(), target.messages);
    }

    #[tokio::test]
    async fn test_start_new_clears_local_state() {
        let h = harness(SessionMode::Assistant);
        h.transport
            .route("/api/chat", MockReply::json(200, json!({"response": "ok"})));
        h.session.send_message("hello", None).await;
        let old_id = h.session.session_id().unwrap();

        h.session.start_new().await;

        assert!(h.session.messages().is_empty());
        assert_eq!(h.session.title(), crate::session::DEFAULT_TITLE);
        assert!(h.local.get_raw(&StorageKey::CurrentChatId).is_none());
        assert!(h.local.get_raw(&StorageKey::CurrentChatMessages).is_none());
        assert!(h.store.get(&old_id).is_some());
    }

    #[tokio::test]
    async fn test_title_falls_back_to_first_words() {
        let h = harness(SessionMode::Assistant);
        h.transport
            .route("/api/generate-title", MockReply::status(500, "down"));

        let title = h
            .session
            .generate_title("What is the right dose of amoxicillin for adults")
            .await;

        assert_eq!(title, "What is the right dose...");
    }

    #[tokio::test]
    async fn test_store_failure_does_not_stop_chat() {
        struct FailingStore;

        #[async_trait::async_trait]
        impl ChatStore for FailingStore {
            fn name(&self) -> &str {
                "failing"
            }
            async fn create_session(&self, _title: &str) -> Result<SessionId, ClientError> {
                Err(ClientError::Store("offline".to_string()))
            }
            async fn append_message(
                &self,
                _id: &SessionId,
                _message: &ChatMessage,
            ) -> Result<(), ClientError> {
                Err(ClientError::Store("offline".to_string()))
            }
            async fn load_session(
                &self,
                _id: &SessionId,
            ) -> Result<Option<StoredSession>, ClientError> {
                Err(ClientError::Store("offline".to_string()))
            }
            async fn update_title(&self, _id: &SessionId, _title: &str) -> Result<(), ClientError> {
                Err(ClientError::Store("offline".to_string()))
            }
            async fn list_sessions(
                &self,
            ) -> Result<Vec<crate::store::SessionSummary>, ClientError> {
                Err(ClientError::Store("offline".to_string()))
            }
        }

        let transport = MockTransport::new();
        transport.route("/api/chat", MockReply::json(200, json!({"response": "fine"})));
        let events = EventBus::new(64);
        let mut rx = events.subscribe();
        let session = ChatSession::new(
            SessionContext {
                api: Arc::new(MediscanApi::new(FallbackClient::new(
                    Some(PRIMARY.to_string()),
                    Some(PRODUCTION.to_string()),
                    transport,
                ))),
                store: Arc::new(FailingStore),
                local: Arc::new(LocalStore::in_memory()),
                events,
                uploader: None,
            },
            SessionMode::Assistant,
            ChatConfig::default(),
        );

        let outcome = session.send_message("hi", None).await;

        assert!(matches!(outcome, SendOutcome::Replied(_)));
        assert_eq!(session.session_id(), None);
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            ChatEvent::Notify { level: NotifyLevel::Warning, .. }
        )));
    }

    #[tokio::test]
    async fn test_upload_limit_refusal_warns() {
        let mut h = harness(SessionMode::Assistant);
        h.transport.route(
            "/api/chat/upload-limit",
            MockReply::json(200, json!({"canUpload": false, "remaining": 0, "limit": 3})),
        );

        let limit = h.session.check_upload_limit().await.unwrap();

        assert!(!limit.can_upload);
        let events = drain(&mut h.rx);
        assert!(matches!(
            &events[..],
            [ChatEvent::Notify { level: NotifyLevel::Warning, message }] if message.contains("3 images")
        ));
    }

    #[tokio::test]
    async fn test_scan_chat_malformed_transcript_starts_with_prompt() {
        let h = harness(scan_mode());
        h.local
            .set_raw(&medicine_chat_key("Ibuprofen 200mg"), "[{\"role\":")
            .await
            .unwrap();

        let outcome = h.session.restore(None).await;

        assert_eq!(outcome, LoadOutcome::Loaded { message_count: 1 });
        let messages = h.session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::System);
        assert!(messages[0].content.contains("Ibuprofen 200mg"));
    }

    #[tokio::test]
    async fn test_scan_chat_stays_local() {
        let h = harness(scan_mode());
        h.transport
            .route("/api/chat", MockReply::json(200, json!({"response": "Take with food."})));

        h.session.send_message("Should I eat first?", None).await;

        assert!(h.store.is_empty());
        assert!(h.transport.calls_to("/api/generate-title") == 0);

        let body: serde_json::Value =
            serde_json::from_str(&h.transport.calls()[0].body_text()).unwrap();
        assert!(body["systemPrompt"]
            .as_str()
            .unwrap()
            .contains("Ibuprofen 200mg"));
        assert_eq!(body["history"], json!([]));

        let saved: Vec<ChatMessage> = h.local.get(&medicine_chat_key("Ibuprofen 200mg")).unwrap();
        assert_eq!(saved.len(), 3);
        assert_eq!(saved[2].content, "Take with food.");

        let reopened = harness(scan_mode());
        reopened
            .local
            .set(&medicine_chat_key("Ibuprofen 200mg"), &saved)
            .await
            .unwrap();
        assert_eq!(
            reopened.session.restore(None).await,
            LoadOutcome::Loaded { message_count: 3 }
        );
    }
}
