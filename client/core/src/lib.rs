//! MediScan Core - Headless Chat Client for MediScan
//!
//! This crate holds the network and state layer behind MediScan's chat:
//! talking to the MediScan API with a local-then-production fallback,
//! keeping a conversation consistent while replies are in flight, and
//! revealing replies with a typing animation. It has no UI; a terminal,
//! desktop or test harness drives it and renders what it publishes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Surfaces                              │
//! │        ┌───────────┐   ┌────────────┐   ┌──────────────┐      │
//! │        │    CLI    │   │  Desktop   │   │    Tests     │      │
//! │        └─────┬─────┘   └─────┬──────┘   └──────┬───────┘      │
//! │              └───────────────┼─────────────────┘              │
//! │               method calls ↓ │ ↑ ChatEvent (EventBus)          │
//! └──────────────────────────────┼───────────────────────────────┘
//!                                │
//! ┌──────────────────────────────┼───────────────────────────────┐
//! │                      MEDISCAN CORE                            │
//! │  ┌───────────────┐  ┌────────┴──────┐  ┌──────────────────┐   │
//! │  │ TypingAnimator│  │  ChatSession  │  │    LocalStore    │   │
//! │  └───────────────┘  └───┬───────┬───┘  └──────────────────┘   │
//! │                 ┌───────┘       └────────┐                    │
//! │        ┌────────┴───────┐       ┌────────┴────────┐           │
//! │        │  MediscanApi   │       │    ChatStore    │           │
//! │        │ FallbackClient │       │ (memory / REST) │           │
//! │        └────────┬───────┘       └────────┬────────┘           │
//! │                 └─────── HttpTransport ──┘                    │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use mediscan_core::{
//!     load_config, ChatConfig, ChatSession, EventBus, FallbackClient, LocalStore,
//!     MediscanApi, MemoryChatStore, ReqwestTransport, SessionContext, SessionMode,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config().await?;
//!     let transport = ReqwestTransport::new(config.api.timeout)?;
//!     let api = MediscanApi::new(FallbackClient::from_config(&config.api, transport));
//!
//!     let session = ChatSession::new(
//!         SessionContext {
//!             api: Arc::new(api),
//!             store: Arc::new(MemoryChatStore::new()),
//!             local: Arc::new(LocalStore::in_memory()),
//!             events: EventBus::default(),
//!             uploader: None,
//!         },
//!         SessionMode::Assistant,
//!         config.chat.clone(),
//!     );
//!
//!     session.send_message("I have a fever", None).await;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`fallback`]: primary/production request client over an [`HttpTransport`]
//! - [`api`]: typed wrappers for the MediScan endpoints
//! - [`session`]: the conversation state machine
//! - [`typing`]: the typing animation driver
//! - [`store`]: remote chat persistence
//! - [`local`]: on-device key/value state
//! - [`events`]: the event bus surfaces subscribe to
//! - [`scan`], [`upload`]: scan state and image attachments
//! - [`config`]: layered configuration

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod abort;
pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod fallback;
pub mod local;
pub mod messages;
pub mod scan;
pub mod session;
pub mod store;
pub mod typing;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

pub use abort::AbortSignal;
pub use api::{ChatReply, ChatRequest, MediscanApi, NotificationRequest, UploadLimit};
pub use error::ClientError;
pub use events::{ChatEvent, EventBus, NotifyLevel};
pub use fallback::{
    FallbackClient, FallbackResponse, HttpMethod, HttpRequest, HttpResponse, HttpTransport,
    ReqwestTransport, RequestOptions, TransportError,
};
pub use local::{LocalStore, SessionFlags, StorageKey};
pub use messages::{
    ChatMessage, ChatSessionSnapshot, HistoryEntry, MessageRole, SessionId, CANCELLED_TEXT,
    ERROR_TEXT,
};
pub use scan::{CurrentScan, ScanAnalysis};
pub use session::{ChatSession, LoadOutcome, SendOutcome, SessionContext, SessionMode};
pub use store::{ChatStore, MemoryChatStore, RestChatStore, SessionSummary, StoredSession};
pub use typing::{DisplayedText, TypingAnimator, TypingConfig, TypingSpeed};
pub use upload::{CloudinaryUploader, ImageAttachment};

// Config exports
pub use config::{
    default_config_path, default_state_path, load_config, load_config_from_path, ChatConfig,
    ClientConfig, ConfigError, ConfigOverrides, ConfigSource,
};
