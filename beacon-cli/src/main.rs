//! # beacon
//!
//! CLI tool for the beacon location-sharing client.
//!
//! ## Commands
//!
//! - `decode`: Decode a payload and show the typed message
//! - `replay`: Replay captured traffic into a roster
//! - `status`: Show the broker endpoint the configuration describes
//! - `config`: Show, edit, import and export the configuration
//!
//! ## Example
//!
//! ```bash
//! # Point at a broker
//! beacon config set host broker.example
//! beacon config set experimentalFeatures "this, that"
//!
//! # Inspect a payload
//! beacon decode '{"_type":"location","lat":52.5,"lon":13.4,"tst":1700000000}'
//!
//! # Rebuild a roster from captured traffic
//! beacon replay capture.jsonl
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;

use commands::{decode, prefs, replay, status};

/// CLI tool for the beacon location-sharing client.
#[derive(Parser, Debug)]
#[command(name = "beacon")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory holding the preference file
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode a payload and show the typed message
    Decode {
        /// JSON payload (or use --file)
        payload: Option<String>,

        /// File holding the payload
        #[arg(long, short, conflicts_with = "payload")]
        file: Option<PathBuf>,
    },

    /// Replay captured traffic (JSON lines of {"topic","payload"}) into a roster
    Replay {
        /// Capture file
        capture: PathBuf,
    },

    /// Show the broker endpoint the configuration describes
    Status,

    /// Show or change the configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Set a preference (string sets take a comma-separated list)
    Set {
        /// Preference name, e.g. host
        key: String,
        /// New value
        value: String,
    },

    /// Return a preference to its default
    Reset {
        /// Preference name
        key: String,
    },

    /// Import a configuration document
    Import {
        /// Document to import
        file: PathBuf,
    },

    /// Export the effective configuration
    Export {
        /// Write to this file instead of stdout
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so command output stays pipeable
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Commands::Decode { payload, file } = &cli.command {
        let data = if let Some(payload) = payload {
            payload.clone().into_bytes()
        } else if let Some(path) = file {
            tokio::fs::read(path).await.context("Failed to read file")?
        } else {
            anyhow::bail!("Must specify a payload or --file");
        };
        return decode::run(&data).await;
    }

    // Determine data directory
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => config::default_data_dir()?,
    };
    config::ensure_data_dir(&data_dir).await?;
    let configuration = config::open_configuration(&data_dir)?;
    tracing::debug!("Using data directory {}", data_dir.display());

    match cli.command {
        Commands::Decode { .. } => {}
        Commands::Replay { capture } => {
            replay::run(configuration, &capture).await?;
        }
        Commands::Status => {
            status::run(&configuration)?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => prefs::show(&configuration)?,
            ConfigCommands::Set { key, value } => prefs::set(&configuration, &key, &value)?,
            ConfigCommands::Reset { key } => prefs::reset(&configuration, &key)?,
            ConfigCommands::Import { file } => prefs::import(&configuration, &file).await?,
            ConfigCommands::Export { file } => {
                prefs::export(&configuration, file.as_deref()).await?
            }
        },
    }

    Ok(())
}
