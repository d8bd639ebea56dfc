//! # parley
//!
//! Terminal client for Parley conversations.
//!
//! ## Commands
//!
//! - `chat`: Interactive conversation, switchable between audio and text
//! - `send`: Send one text message and print the reply
//! - `check`: Validate the configuration and show what it resolves to
//!
//! ## Example
//!
//! ```bash
//! # Talk to the text model
//! parley chat
//!
//! # Start in audio mode with a custom config
//! parley --config ./parley.toml chat --mode audio
//!
//! # Try the REPL offline with scripted replies
//! parley --mock chat
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use parley_core::ConversationMode;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{chat, check, send};

/// Terminal client for Parley conversations.
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, short, global = true, default_value = config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Use mock transports with scripted replies (no network, no API key)
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start an interactive conversation
    Chat {
        /// Mode to start in (default: from config)
        #[arg(long, short)]
        mode: Option<ModeArg>,
    },

    /// Send one text message and print the reply
    Send {
        /// Message text
        message: String,
    },

    /// Validate the configuration
    Check,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Audio,
    Text,
}

impl From<ModeArg> for ConversationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Audio => ConversationMode::Audio,
            ModeArg::Text => ConversationMode::Text,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let mut config = config::load(&cli.config)?;

    match cli.command {
        Commands::Chat { mode } => {
            if let Some(mode) = mode {
                config.session.initial_mode = mode.into();
            }
            chat::run(config, cli.mock).await?;
        }
        Commands::Send { message } => {
            config.session.initial_mode = ConversationMode::Text;
            send::run(config, cli.mock, &message).await?;
        }
        Commands::Check => {
            check::run(&cli.config, &config)?;
        }
    }

    Ok(())
}

/// Log to stderr so replies on stdout stay clean. `RUST_LOG` overrides.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("parley=info,parley_client=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
