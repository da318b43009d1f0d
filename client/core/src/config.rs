//! Client Configuration
//!
//! Configuration is layered (highest priority first):
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file (`$XDG_CONFIG_HOME/mediscan/config.toml`)
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [api]
//! primary_url = "http://localhost:3000"
//! production_url = "https://mediscan.example.com"
//! timeout_secs = 60
//!
//! [cloudinary]
//! cloud_name = "mediscan"
//! upload_preset = "unsigned_scans"
//!
//! [store]
//! url = "https://project.supabase.co"
//! anon_key = "public-anon-key"
//!
//! [typing]
//! tick_ms = 15
//!
//! [chat]
//! max_context_messages = 10
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::typing::{TypingConfig, TypingSpeed};

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Tracks where the configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[api]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiToml {
    /// Primary ("local") API origin
    pub primary_url: Option<String>,
    /// Production API origin used as fallback
    pub production_url: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// `[cloudinary]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudinaryToml {
    /// Cloudinary cloud name
    pub cloud_name: Option<String>,
    /// Unsigned upload preset
    pub upload_preset: Option<String>,
}

/// `[store]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreToml {
    /// Hosted backend URL
    pub url: Option<String>,
    /// Public (anon) API key
    pub anon_key: Option<String>,
}

/// `[state]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateToml {
    /// Local state file path
    pub path: Option<PathBuf>,
}

/// `[typing]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingToml {
    /// Fixed tick in milliseconds (unset = length-scaled, 0 = no animation)
    pub tick_ms: Option<u64>,
    /// Characters revealed per tick
    pub chars_per_tick: Option<usize>,
}

/// `[chat]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatToml {
    /// How many previous messages are sent as history
    pub max_context_messages: Option<usize>,
    /// System prompt for the general assistant
    pub system_prompt: Option<String>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// API origins
    pub api: ApiToml,
    /// Image uploads
    pub cloudinary: CloudinaryToml,
    /// Hosted chat store
    pub store: StoreToml,
    /// Local state file
    pub state: StateToml,
    /// Typing animation
    pub typing: TypingToml,
    /// Chat behaviour
    pub chat: ChatToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// API origins for the fallback client
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Primary ("local") origin
    pub primary_url: Option<String>,
    /// Production origin
    pub production_url: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            primary_url: None,
            production_url: None,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Cloudinary unsigned-upload settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloudinaryConfig {
    /// Cloud name
    pub cloud_name: String,
    /// Unsigned upload preset
    pub upload_preset: String,
}

/// Hosted chat store settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    /// Backend URL
    pub url: String,
    /// Public API key
    pub anon_key: String,
}

/// Chat behaviour
#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// How many previous messages are sent as history
    pub max_context_messages: usize,
    /// System prompt for the general assistant
    pub system_prompt: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_context_messages: 10,
            system_prompt: None,
        }
    }
}

/// Fully resolved client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// API origins
    pub api: ApiConfig,
    /// Image uploads (disabled when unset)
    pub cloudinary: Option<CloudinaryConfig>,
    /// Hosted chat store (in-memory store when unset)
    pub store: Option<StoreConfig>,
    /// Local state file (in-memory state when unset)
    pub state_path: Option<PathBuf>,
    /// Typing animation
    pub typing: TypingConfig,
    /// Chat behaviour
    pub chat: ChatConfig,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            cloudinary: None,
            store: None,
            state_path: default_state_path(),
            typing: TypingConfig::default(),
            chat: ChatConfig::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ClientConfig {
    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Create configuration from defaults and environment variables only
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        apply_env_config(&mut config, &|key| std::env::var(key).ok());
        config
    }

    /// Check that the configuration can be used to talk to the API
    pub fn validate(&self) -> Result<(), ConfigError> {
        for url in [&self.api.primary_url, &self.api.production_url]
            .into_iter()
            .flatten()
        {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::ValidationError(format!(
                    "API origin must be an http(s) URL: {url}"
                )));
            }
        }
        if self.typing.chars_per_tick == 0 {
            return Err(ConfigError::ValidationError(
                "typing.chars_per_tick must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("mediscan").join("config.toml"))
}

/// Get the default local state file path
#[must_use]
pub fn default_state_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("mediscan").join("state.json"))
}

/// Load configuration from the default path, then the environment
///
/// A missing config file is not an error (defaults are used).
pub async fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(default_config_path().as_deref()).await
}

/// Load configuration from a specific path, then the environment
pub async fn load_config_from_path(path: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    let mut config = ClientConfig::default();

    if let Some(config_path) = path {
        match tokio::fs::read_to_string(config_path).await {
            Ok(content) => {
                let toml_config: ClientToml = toml::from_str(&content)?;
                apply_toml_config(&mut config, &toml_config);
                config.config_file_path = Some(config_path.to_path_buf());
                config.source = ConfigSource::File;

                tracing::info!(
                    path = %config_path.display(),
                    "Loaded configuration from file"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(
                    path = %config_path.display(),
                    "Config file not found, using defaults"
                );
            }
            Err(e) => {
                return Err(ConfigError::ReadError {
                    path: config_path.to_path_buf(),
                    source: e,
                });
            }
        }
    }

    apply_env_config(&mut config, &|key| std::env::var(key).ok());
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ClientConfig, toml: &ClientToml) {
    if toml.api.primary_url.is_some() {
        config.api.primary_url = toml.api.primary_url.clone();
    }
    if toml.api.production_url.is_some() {
        config.api.production_url = toml.api.production_url.clone();
    }
    if let Some(secs) = toml.api.timeout_secs {
        config.api.timeout = Duration::from_secs(secs);
    }

    if let (Some(cloud_name), Some(upload_preset)) = (
        toml.cloudinary.cloud_name.clone(),
        toml.cloudinary.upload_preset.clone(),
    ) {
        config.cloudinary = Some(CloudinaryConfig {
            cloud_name,
            upload_preset,
        });
    }

    if let (Some(url), Some(anon_key)) = (toml.store.url.clone(), toml.store.anon_key.clone()) {
        config.store = Some(StoreConfig { url, anon_key });
    }

    if toml.state.path.is_some() {
        config.state_path = toml.state.path.clone();
    }

    if let Some(ms) = toml.typing.tick_ms {
        config.typing.speed = TypingSpeed::from_tick_ms(ms);
    }
    if let Some(chars) = toml.typing.chars_per_tick {
        config.typing.chars_per_tick = chars;
    }

    if let Some(max) = toml.chat.max_context_messages {
        config.chat.max_context_messages = max;
    }
    if toml.chat.system_prompt.is_some() {
        config.chat.system_prompt = toml.chat.system_prompt.clone();
    }
}

/// Apply environment variable overrides to the config
///
/// `lookup` abstracts `std::env::var` so tests don't mutate the process
/// environment.
fn apply_env_config(config: &mut ClientConfig, lookup: &dyn Fn(&str) -> Option<String>) {
    let first = |keys: &[&str]| keys.iter().find_map(|k| lookup(k).filter(|v| !v.is_empty()));

    if let Some(url) = first(&["MEDISCAN_API_URL", "VITE_API_URL"]) {
        config.api.primary_url = Some(url);
        config.source = ConfigSource::Env;
    }
    if let Some(url) = first(&["MEDISCAN_PRODUCTION_URL", "VITE_PRODUCTION_URL"]) {
        config.api.production_url = Some(url);
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = first(&["MEDISCAN_TIMEOUT_SECS"]).and_then(|v| v.parse::<u64>().ok()) {
        config.api.timeout = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }

    let cloud_name = first(&["VITE_CLOUDINARY_CLOUD_NAME"]);
    let upload_preset = first(&["VITE_CLOUDINARY_UPLOAD_PRESET"]);
    if cloud_name.is_some() || upload_preset.is_some() {
        let current = config.cloudinary.take();
        let cloud_name = cloud_name.or_else(|| current.as_ref().map(|c| c.cloud_name.clone()));
        let upload_preset =
            upload_preset.or_else(|| current.as_ref().map(|c| c.upload_preset.clone()));
        if let (Some(cloud_name), Some(upload_preset)) = (cloud_name, upload_preset) {
            config.cloudinary = Some(CloudinaryConfig {
                cloud_name,
                upload_preset,
            });
            config.source = ConfigSource::Env;
        }
    }

    let store_url = first(&["SUPABASE_URL", "VITE_SUPABASE_URL"]);
    let anon_key = first(&["SUPABASE_ANON_KEY", "VITE_SUPABASE_ANON_KEY"]);
    if store_url.is_some() || anon_key.is_some() {
        let current = config.store.take();
        let url = store_url.or_else(|| current.as_ref().map(|s| s.url.clone()));
        let anon_key = anon_key.or_else(|| current.as_ref().map(|s| s.anon_key.clone()));
        if let (Some(url), Some(anon_key)) = (url, anon_key) {
            config.store = Some(StoreConfig { url, anon_key });
            config.source = ConfigSource::Env;
        }
    }

    if let Some(path) = first(&["MEDISCAN_STATE_FILE"]) {
        config.state_path = Some(PathBuf::from(path));
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = first(&["MEDISCAN_TYPING_MS"]).and_then(|v| v.parse::<u64>().ok()) {
        config.typing.speed = TypingSpeed::from_tick_ms(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(max) = first(&["MEDISCAN_MAX_CONTEXT"]).and_then(|v| v.parse::<usize>().ok()) {
        config.chat.max_context_messages = max;
        config.source = ConfigSource::Env;
    }
    if let Some(prompt) = first(&["MEDISCAN_SYSTEM_PROMPT"]) {
        config.chat.system_prompt = Some(prompt);
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Primary origin override
    pub primary_url: Option<String>,
    /// Production origin override
    pub production_url: Option<String>,
    /// State file override
    pub state_path: Option<PathBuf>,
    /// Disable the typing animation
    pub instant_replies: bool,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set primary origin override
    #[must_use]
    pub fn with_primary_url(mut self, url: String) -> Self {
        self.primary_url = Some(url);
        self
    }

    /// Set production origin override
    #[must_use]
    pub fn with_production_url(mut self, url: String) -> Self {
        self.production_url = Some(url);
        self
    }

    /// Set state file override
    #[must_use]
    pub fn with_state_path(mut self, path: PathBuf) -> Self {
        self.state_path = Some(path);
        self
    }

    /// Reveal replies at once instead of typing them out
    #[must_use]
    pub fn with_instant_replies(mut self, instant: bool) -> Self {
        self.instant_replies = instant;
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ClientConfig) {
        let mut changed = false;
        if let Some(ref url) = self.primary_url {
            config.api.primary_url = Some(url.clone());
            changed = true;
        }
        if let Some(ref url) = self.production_url {
            config.api.production_url = Some(url.clone());
            changed = true;
        }
        if let Some(ref path) = self.state_path {
            config.state_path = Some(path.clone());
            changed = true;
        }
        if self.instant_replies {
            config.typing.speed = TypingSpeed::Instant;
            changed = true;
        }
        if changed {
            config.source = ConfigSource::Cli;
        }
    }
}
