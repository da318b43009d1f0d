//! MediScan CLI
//!
//! Terminal surface for the MediScan assistant: chat, scan a medicine
//! package, and ask follow-up questions about the last scan.
//!
//! # Usage
//!
//! ```bash
//! # Continue the last conversation (or start one)
//! mediscan chat
//!
//! # Start over with a photo attached to the first message
//! mediscan chat --new --image rash.jpg
//!
//! # Scan a package, then ask about it
//! mediscan scan box.png
//! mediscan ask-scan
//!
//! # With verbose logging
//! RUST_LOG=debug mediscan chat
//! ```
//!
//! # Environment Variables
//!
//! - `MEDISCAN_API_URL`: primary ("local") API origin
//! - `MEDISCAN_PRODUCTION_URL`: production API origin
//! - `MEDISCAN_STATE_FILE`: local state file
//! - `SUPABASE_URL` / `SUPABASE_ANON_KEY`: hosted chat store
//! - `VITE_CLOUDINARY_CLOUD_NAME` / `VITE_CLOUDINARY_UPLOAD_PRESET`: image uploads
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

mod app;
mod display;

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;

use mediscan_core::{
    default_config_path, load_config_from_path, CurrentScan, ImageAttachment, SessionFlags,
    SessionId, SessionMode,
};

use app::{ChatRepl, Services};
use display::Display;

#[derive(Parser, Debug)]
#[command(name = "mediscan", version, about = "MediScan assistant in the terminal")]
struct Cli {
    /// Config file (default: ~/.config/mediscan/config.toml)
    #[arg(long, global = true, env = "MEDISCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Primary API origin
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Production API origin, used when the primary fails
    #[arg(long, global = true)]
    production_url: Option<String>,

    /// Local state file
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,

    /// Show replies at once instead of typing them out
    #[arg(long, global = true)]
    instant: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chat with the assistant (default)
    Chat {
        /// Open a stored conversation
        #[arg(long, conflicts_with = "new")]
        session: Option<String>,

        /// Start a new conversation instead of resuming
        #[arg(long)]
        new: bool,

        /// Attach a photo to the first message
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// List stored conversations, or print one
    History {
        /// Conversation to print
        id: Option<String>,
    },
    /// Analyze a photo of a medicine package
    Scan {
        /// Image file (jpg, png, gif, webp)
        image: PathBuf,
    },
    /// Chat about the last scanned medicine
    AskScan,
    /// Forget the current conversation and scan
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mediscan=info".parse()?)
                .add_directive("mediscan_core=info".parse()?),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(config_path.as_deref()).await?;
    cli_overrides(&cli).apply(&mut config);
    config.validate()?;
    info!(source = %config.source(), "Configuration loaded");

    let services = Services::build(config).await?;
    let command = cli.command.unwrap_or(Command::Chat {
        session: None,
        new: false,
        image: None,
    });
    welcome(&services, command.is_interactive()).await;

    match command {
        Command::Chat {
            session,
            new,
            image,
        } => chat(&services, session, new, image).await,
        Command::History { id } => history(&services, id).await,
        Command::Scan { image } => scan(&services, &image).await,
        Command::AskScan => ask_scan(&services).await,
        Command::Reset => reset(&services).await,
    }
}

impl Command {
    fn is_interactive(&self) -> bool {
        matches!(self, Self::Chat { .. } | Self::AskScan)
    }
}

fn cli_overrides(cli: &Cli) -> mediscan_core::ConfigOverrides {
    let mut overrides = mediscan_core::ConfigOverrides::new().with_instant_replies(cli.instant);
    if let Some(ref url) = cli.api_url {
        overrides = overrides.with_primary_url(url.clone());
    }
    if let Some(ref url) = cli.production_url {
        overrides = overrides.with_production_url(url.clone());
    }
    if let Some(ref path) = cli.state_file {
        overrides = overrides.with_state_path(path.clone());
    }
    overrides
}

const WELCOME: &str = "Welcome to MediScan. Answers are informational; ask a pharmacist or doctor before changing any treatment.";

const WHATS_NEW: &str =
    "New: run `mediscan scan <image>`, then `mediscan ask-scan` to ask about that medicine.";

/// Line to greet with, if any
///
/// First-time users get the welcome once per device. Returning users get
/// the "what's new" notice once per run, in interactive commands only.
fn greeting(seen_welcome: bool, interactive: bool, flags: &SessionFlags) -> Option<&'static str> {
    if !seen_welcome {
        flags.mark_updates_seen();
        return Some(WELCOME);
    }
    (interactive && !flags.mark_updates_seen()).then_some(WHATS_NEW)
}

async fn welcome(services: &Services, interactive: bool) {
    let seen_welcome = services.local.has_seen_welcome();
    if let Some(line) = greeting(seen_welcome, interactive, &services.flags) {
        println!("{line}");
    }
    if seen_welcome {
        return;
    }
    if let Err(e) = services.local.mark_welcome_seen().await {
        tracing::warn!(error = %e, "Failed to remember the welcome screen");
    }
}

async fn chat(
    services: &Services,
    session_id: Option<String>,
    new: bool,
    image: Option<PathBuf>,
) -> anyhow::Result<()> {
    let session = services.session(SessionMode::Assistant);
    let mut repl = ChatRepl::new(session.clone(), services.config.typing.clone());

    if new {
        session.start_new().await;
    } else {
        session.restore(session_id.map(SessionId::new)).await;
    }

    let image = match image {
        Some(path) => {
            if repl.may_attach().await? {
                Some(
                    ImageAttachment::from_path(&path)
                        .await
                        .with_context(|| format!("Cannot attach {}", path.display()))?,
                )
            } else {
                tracing::info!(path = %path.display(), "Upload limit reached, starting without the image");
                None
            }
        }
        None => None,
    };
    repl.run(image).await
}

async fn history(services: &Services, id: Option<String>) -> anyhow::Result<()> {
    let mut display = Display::stdout();
    match id {
        Some(id) => {
            let Some(stored) = services.store.load_session(&SessionId::new(id.clone())).await? else {
                bail!("No conversation with id {id}");
            };
            display.title(&stored.title)?;
            display.transcript(&stored.messages)?;
        }
        None => display.sessions(&services.store.list_sessions().await?)?,
    }
    Ok(())
}

async fn scan(services: &Services, path: &std::path::Path) -> anyhow::Result<()> {
    let image = ImageAttachment::from_path(path)
        .await
        .with_context(|| format!("Cannot read {}", path.display()))?;
    let analysis = services.api.analyze(&image).await?;

    let stored_image = match &services.uploader {
        Some(uploader) => match uploader.upload(&image).await {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, "Image upload failed, keeping the image locally");
                image.data_url().to_string()
            }
        },
        None => image.data_url().to_string(),
    };
    let scan = CurrentScan::from_analysis(analysis, Some(stored_image));
    scan.save(&services.local).await?;

    let mut display = Display::stdout();
    display.title(&scan.name)?;
    println!("{}", serde_json::to_string_pretty(&scan.data)?);
    display.notice("Run `mediscan ask-scan` to ask about this medicine.")?;
    Ok(())
}

async fn ask_scan(services: &Services) -> anyhow::Result<()> {
    let Some(scan) = CurrentScan::load(&services.local) else {
        bail!("No scan yet. Run `mediscan scan <image>` first.");
    };
    let session = services.session(SessionMode::for_scan(&scan));
    let repl = ChatRepl::new(session.clone(), services.config.typing.clone());
    session.restore(None).await;

    Display::stdout().title(&format!("Asking about {}", scan.name))?;
    repl.run(None).await
}

async fn reset(services: &Services) -> anyhow::Result<()> {
    services.session(SessionMode::Assistant).start_new().await;
    CurrentScan::clear(&services.local).await?;
    println!("Cleared the current conversation and scan.");
    Ok(())
}
