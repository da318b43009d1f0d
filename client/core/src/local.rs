//! Local State
//!
//! A small string key/value store persisted as one JSON file. It holds what
//! the app keeps between runs on the device: the current chat id, title and
//! transcript, the last scan, per-medicine chat transcripts and the welcome
//! flag. Per-process flags that must not survive a restart live in
//! [`SessionFlags`] instead.
//!
//! Values are stored as strings, the way they were written. Typed reads
//! parse the string as JSON; a value that does not parse is logged and read
//! as absent. A state file that does not parse opens as empty.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ClientError;

/// Keys of the local state file
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StorageKey {
    /// Id of the conversation shown on the chat page
    CurrentChatId,
    /// Title of that conversation
    CurrentChatTitle,
    /// Cached transcript of that conversation
    CurrentChatMessages,
    /// Id of the last scan
    CurrentScanId,
    /// Analysis JSON of the last scan
    CurrentScanData,
    /// Medicine name of the last scan
    CurrentScanName,
    /// Image (URL or data URL) of the last scan
    CurrentScanImage,
    /// Whether the welcome screen was shown
    HasSeenWelcome,
    /// Transcript of the chat about one medicine, by slug
    MedicineChat(String),
}

impl StorageKey {
    /// Key as written in the state file
    #[must_use]
    pub fn as_str(&self) -> Cow<'static, str> {
        match self {
            Self::CurrentChatId => Cow::Borrowed("currentChatId"),
            Self::CurrentChatTitle => Cow::Borrowed("currentChatTitle"),
            Self::CurrentChatMessages => Cow::Borrowed("currentChatMessages"),
            Self::CurrentScanId => Cow::Borrowed("currentScanId"),
            Self::CurrentScanData => Cow::Borrowed("currentScanData"),
            Self::CurrentScanName => Cow::Borrowed("currentScanName"),
            Self::CurrentScanImage => Cow::Borrowed("currentScanImage"),
            Self::HasSeenWelcome => Cow::Borrowed("hasSeenWelcome"),
            Self::MedicineChat(slug) => Cow::Owned(format!("medicineChat_{slug}")),
        }
    }
}

impl std::fmt::Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_str())
    }
}

/// File-backed (or in-memory) key/value state
pub struct LocalStore {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, String>>,
    // Serializes file writes so they land in mutation order
    write_lock: tokio::sync::Mutex<()>,
}

impl LocalStore {
    /// State that lives only as long as the process
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(BTreeMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Open the state file at `path`
    ///
    /// A missing file is an empty store; so is one that does not parse.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<BTreeMap<String, String>>(&content) {
                Ok(entries) => {
                    tracing::debug!(path = %path.display(), keys = entries.len(), "Loaded local state");
                    entries
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Local state file is malformed, starting empty"
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(ClientError::Io(e)),
        };

        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Backing file, if any
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Raw string stored under `key`
    #[must_use]
    pub fn get_raw(&self, key: &StorageKey) -> Option<String> {
        self.entries.lock().get(key.as_str().as_ref()).cloned()
    }

    /// Parse the value under `key` as JSON
    ///
    /// Missing and malformed values both read as `None`.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, key: &StorageKey) -> Option<T> {
        let raw = self.get_raw(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Ignoring malformed local value");
                None
            }
        }
    }

    /// Store a raw string
    pub async fn set_raw(
        &self,
        key: &StorageKey,
        value: impl Into<String>,
    ) -> Result<(), ClientError> {
        let value = value.into();
        self.mutate(|entries| {
            entries.insert(key.as_str().into_owned(), value);
        })
        .await
    }

    /// Store a value serialized as JSON
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &StorageKey,
        value: &T,
    ) -> Result<(), ClientError> {
        let raw = serde_json::to_string(value)?;
        self.set_raw(key, raw).await
    }

    /// Remove every key in `keys`
    pub async fn remove(&self, keys: &[StorageKey]) -> Result<(), ClientError> {
        self.mutate(|entries| {
            for key in keys {
                entries.remove(key.as_str().as_ref());
            }
        })
        .await
    }

    /// Whether the welcome screen was already shown on this device
    #[must_use]
    pub fn has_seen_welcome(&self) -> bool {
        self.get::<bool>(&StorageKey::HasSeenWelcome)
            .unwrap_or(false)
    }

    /// Remember that the welcome screen was shown
    pub async fn mark_welcome_seen(&self) -> Result<(), ClientError> {
        self.set(&StorageKey::HasSeenWelcome, &true).await
    }

    async fn mutate(
        &self,
        apply: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), ClientError> {
        let _write = self.write_lock.lock().await;
        let snapshot = {
            let mut entries = self.entries.lock();
            apply(&mut entries);
            self.path.as_ref().map(|_| entries.clone())
        };

        match (&self.path, snapshot) {
            (Some(path), Some(entries)) => write_atomic(path, &entries).await,
            _ => Ok(()),
        }
    }
}

async fn write_atomic(path: &Path, entries: &BTreeMap<String, String>) -> Result<(), ClientError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_vec_pretty(entries)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Flags that last for one process only
#[derive(Debug, Default)]
pub struct SessionFlags {
    updates_seen: AtomicBool,
}

impl SessionFlags {
    /// Create cleared flags
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the "what's new" notice was shown in this process
    #[must_use]
    pub fn updates_seen(&self) -> bool {
        self.updates_seen.load(Ordering::Relaxed)
    }

    /// Mark the notice as shown; returns whether it already was
    pub fn mark_updates_seen(&self) -> bool {
        self.updates_seen.swap(true, Ordering::Relaxed)
    }
}
