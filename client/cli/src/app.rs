//! Interactive Chat Loop
//!
//! Reads lines from stdin and drives one [`ChatSession`]. Replies are typed
//! out by a [`TypingAnimator`] publishing on the session's event bus, and
//! the loop renders whatever the bus carries. Ctrl-C stops the reply in
//! flight, or the animation if the reply already arrived; at the prompt it
//! quits.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use mediscan_core::{
    ChatEvent, ChatSession, ChatStore, ClientConfig, ClientError, CloudinaryUploader, EventBus,
    FallbackClient, ImageAttachment, LocalStore, MediscanApi, MemoryChatStore, MessageRole,
    ReqwestTransport, RestChatStore, SendOutcome, SessionContext, SessionFlags, SessionMode,
    TypingAnimator, TypingConfig, UploadLimit,
};

use crate::display::Display;

/// Everything a command needs, built once from configuration
pub struct Services {
    pub config: ClientConfig,
    pub api: Arc<MediscanApi<ReqwestTransport>>,
    pub store: Arc<dyn ChatStore>,
    pub local: Arc<LocalStore>,
    pub uploader: Option<Arc<CloudinaryUploader<ReqwestTransport>>>,
    /// Flags that last for this run only
    pub flags: SessionFlags,
}

impl Services {
    pub async fn build(config: ClientConfig) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(config.api.timeout)?;
        let client = FallbackClient::from_config(&config.api, transport.clone());
        if !client.is_configured() {
            warn!("API origins incomplete; set MEDISCAN_API_URL and MEDISCAN_PRODUCTION_URL");
        }

        let store: Arc<dyn ChatStore> = match &config.store {
            Some(store) => Arc::new(RestChatStore::new(store, transport.clone())),
            None => {
                debug!("No chat store configured, conversations last for this run only");
                Arc::new(MemoryChatStore::new())
            }
        };

        let local = match &config.state_path {
            Some(path) => LocalStore::open(path)
                .await
                .with_context(|| format!("Failed to open state file {}", path.display()))?,
            None => LocalStore::in_memory(),
        };

        let uploader = config
            .cloudinary
            .clone()
            .map(|cloudinary| Arc::new(CloudinaryUploader::new(cloudinary, transport)));

        Ok(Self {
            api: Arc::new(MediscanApi::new(client)),
            store,
            local: Arc::new(local),
            uploader,
            flags: SessionFlags::new(),
            config,
        })
    }

    /// A session publishing on its own bus
    pub fn session(&self, mode: SessionMode) -> ChatSession<ReqwestTransport> {
        ChatSession::new(
            SessionContext {
                api: Arc::clone(&self.api),
                store: Arc::clone(&self.store),
                local: Arc::clone(&self.local),
                events: EventBus::default(),
                uploader: self.uploader.clone(),
            },
            mode,
            self.config.chat.clone(),
        )
    }
}

/// One line of user input
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Empty,
    Quit,
    New,
    Image(&'a str),
    Help,
    Unknown(&'a str),
    Message(&'a str),
}

impl<'a> Input<'a> {
    fn parse(line: &'a str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Self::Message(line);
        };
        let (name, arg) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(name, arg)| (name, arg.trim()));
        match name {
            "quit" | "exit" => Self::Quit,
            "new" => Self::New,
            "image" if !arg.is_empty() => Self::Image(arg),
            "help" => Self::Help,
            _ => Self::Unknown(line),
        }
    }
}

const HELP: &str = "Commands: /new starts over, /image <path> attaches a photo to the next message, /quit exits. Ctrl-C stops a reply.";

/// Interactive chat over one session
pub struct ChatRepl {
    session: ChatSession<ReqwestTransport>,
    animator: TypingAnimator,
    events: broadcast::Receiver<ChatEvent>,
    display: Display<std::io::Stdout>,
    /// Key of the reply currently being typed
    typing: Option<String>,
}

impl ChatRepl {
    pub fn new(session: ChatSession<ReqwestTransport>, typing: TypingConfig) -> Self {
        let events = session.events().subscribe();
        let animator = TypingAnimator::new(typing).with_events(session.events().clone());
        Self {
            session,
            animator,
            events,
            display: Display::stdout(),
            typing: None,
        }
    }

    /// Run until stdin closes or the user quits
    pub async fn run(mut self, mut pending_image: Option<ImageAttachment>) -> anyhow::Result<()> {
        self.flush_events()?;
        self.display.transcript(&self.session.messages())?;
        self.display.notice(HELP)?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            self.display.prompt()?;
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                break;
            };

            match Input::parse(&line) {
                Input::Empty => {}
                Input::Quit => break,
                Input::Help => self.display.notice(HELP)?,
                Input::Unknown(command) => {
                    self.display.notice(&format!("Unknown command {command}. {HELP}"))?;
                }
                Input::New => {
                    self.session.start_new().await;
                    pending_image = None;
                    self.flush_events()?;
                    self.display.notice("Started a new conversation.")?;
                }
                Input::Image(path) => {
                    if let Some(image) = self.attach(Path::new(path)).await? {
                        self.display.notice(&format!(
                            "Attached {} ({} KiB); it will be sent with your next message.",
                            path,
                            image.size() / 1024
                        ))?;
                        pending_image = Some(image);
                    }
                }
                Input::Message(text) => self.send(text, pending_image.take()).await?,
            }
        }

        self.animator.stop();
        Ok(())
    }

    async fn send(&mut self, text: &str, image: Option<ImageAttachment>) -> anyhow::Result<()> {
        let session = self.session.clone();
        let send = session.send_message(text, image);
        tokio::pin!(send);

        let outcome = loop {
            tokio::select! {
                outcome = &mut send => break outcome,
                event = self.events.recv() => self.handle_event(event)?,
                _ = tokio::signal::ctrl_c() => {
                    if self.session.abort() {
                        debug!("Stopping reply");
                    }
                }
            }
        };
        self.flush_events()?;

        match outcome {
            SendOutcome::Busy => self.display.notice("Still waiting for the previous reply.")?,
            SendOutcome::Discarded => debug!("Reply dropped, conversation changed"),
            SendOutcome::Replied(_)
            | SendOutcome::Cancelled
            | SendOutcome::Failed(_)
            | SendOutcome::Ignored => {}
        }

        while self.typing.is_some() {
            tokio::select! {
                event = self.events.recv() => self.handle_event(event)?,
                _ = tokio::signal::ctrl_c() => {
                    self.animator.stop();
                }
            }
        }
        Ok(())
    }

    /// Check the daily image limit, showing the refusal if there is one
    pub async fn may_attach(&mut self) -> anyhow::Result<bool> {
        let limit = self.session.check_upload_limit().await;
        let allowed = upload_allowed(&limit);
        if !allowed {
            self.flush_events()?;
        }
        Ok(allowed)
    }

    /// Load an image after checking the daily limit
    async fn attach(&mut self, path: &Path) -> anyhow::Result<Option<ImageAttachment>> {
        if !self.may_attach().await? {
            return Ok(None);
        }

        match ImageAttachment::from_path(path).await {
            Ok(image) => Ok(Some(image)),
            Err(e) => {
                self.display.notice(&format!("Cannot attach {}: {e}", path.display()))?;
                Ok(None)
            }
        }
    }

    /// Handle everything already published
    fn flush_events(&mut self) -> anyhow::Result<()> {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.handle_event(Ok(event))?,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(()),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    self.handle_event(Err(RecvError::Lagged(skipped)))?;
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    self.handle_event(Err(RecvError::Closed))?;
                    return Ok(());
                }
            }
        }
    }

    fn handle_event(&mut self, event: Result<ChatEvent, RecvError>) -> anyhow::Result<()> {
        match event {
            Ok(ChatEvent::MessageAppended { message, .. })
                if message.role == MessageRole::Assistant =>
            {
                let key = message.key();
                self.typing = Some(key.clone());
                self.animator.start(key, message.content);
            }
            Ok(ChatEvent::Typing {
                key,
                revealed,
                done,
            }) => {
                self.display.typing(&key, &revealed, done)?;
                if done && self.typing.as_deref() == Some(key.as_str()) {
                    self.typing = None;
                }
            }
            Ok(ChatEvent::TitleChanged { title, .. }) => self.display.title(&title)?,
            Ok(ChatEvent::SessionReplaced {
                title,
                message_count,
                ..
            }) => {
                self.animator.displayed().clear();
                self.display
                    .notice(&format!("Loaded \"{title}\" ({message_count} messages)"))?;
            }
            Ok(ChatEvent::SessionCleared) => self.animator.displayed().clear(),
            Ok(ChatEvent::Notify { level, message }) => self.display.notify(level, &message)?,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Display fell behind the event bus");
                // Stopping re-publishes the full reply; nothing to wait for otherwise
                if self.typing.is_some() && self.animator.stop().is_none() {
                    self.typing = None;
                }
            }
            Err(RecvError::Closed) => self.typing = None,
        }
        Ok(())
    }
}

/// Whether a limit check leaves room for another image
///
/// A failed check allows the upload.
fn upload_allowed(limit: &Result<UploadLimit, ClientError>) -> bool {
    match limit {
        Ok(limit) => {
            if let (true, Some(remaining)) = (limit.can_upload, limit.remaining) {
                debug!(remaining, "Upload allowed");
            }
            limit.can_upload
        }
        Err(e) => {
            warn!(error = %e, "Could not check the upload limit, attaching anyway");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_input() {
        assert_eq!(Input::parse("   "), Input::Empty);
        assert_eq!(Input::parse("/quit"), Input::Quit);
        assert_eq!(Input::parse("/new"), Input::New);
        assert_eq!(Input::parse("/image  box.png "), Input::Image("box.png"));
        assert_eq!(Input::parse("/image"), Input::Unknown("/image"));
        assert_eq!(
            Input::parse(" What is ibuprofen? "),
            Input::Message("What is ibuprofen?")
        );
    }

    #[test]
    fn test_upload_allowed_follows_limit() {
        let limit = |can_upload| UploadLimit {
            can_upload,
            remaining: Some(u32::from(can_upload)),
            limit: Some(5),
        };
        assert!(upload_allowed(&Ok(limit(true))));
        assert!(!upload_allowed(&Ok(limit(false))));
        assert!(upload_allowed(&Err(ClientError::Aborted)));
    }
}
