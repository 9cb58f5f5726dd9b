//! Optionix CLI - sign in to the Optionix backend from a terminal.
//!
//! The binary drives the same session manager the mobile and web clients
//! use: it restores the stored credential, signs in, registers and signs out,
//! and can issue authenticated requests against the backend.

mod commands;

use std::io;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use optionix_core::{open_store, ApiClient, AuthController, Config, Platform, StorageBackend};

/// Log file name prefix inside the cache directory
const LOG_FILE_PREFIX: &str = "optionix.log";

#[derive(Debug, Parser)]
#[command(name = "optionix", version, about = "Sign in to Optionix from the terminal")]
struct Cli {
    /// Behave as the mobile or web client
    #[arg(long, global = true)]
    platform: Option<Platform>,

    /// Where to keep the credential (keyring or file)
    #[arg(long, global = true)]
    store: Option<StorageBackend>,

    /// Backend base URL
    #[arg(long, global = true, env = "OPTIONIX_API_URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// Create a new account
    Register,
    /// Sign out and forget the stored credential
    Logout,
    /// Show the current session
    Status,
    /// Authenticated GET against the backend, printed as JSON
    Get { path: String },
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr and to a daily file under the cache directory. The
/// returned guard must live until exit so buffered file output is flushed.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match Config::default().cache_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir.join("logs"), LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .init();

    guard
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load().context("Failed to load config")?;
    if let Some(platform) = cli.platform {
        config.platform = platform;
    }
    if let Some(store) = cli.store {
        config.storage = store;
    }
    if let Some(ref url) = cli.api_url {
        config.api_base_url = url.clone();
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(&cli)?;
    let store = open_store(&config).context("Failed to open credential store")?;
    let api = ApiClient::new(&config, store).context("Failed to create API client")?;
    let auth = AuthController::new(api);
    info!(platform = ?config.platform, url = %config.api_base_url, "Optionix CLI starting");

    match cli.command {
        Command::Login { email } => commands::login(&auth, &mut config, email).await,
        Command::Register => commands::register(&auth).await,
        Command::Logout => commands::logout(&auth).await,
        Command::Status => commands::status(&auth).await,
        Command::Get { path } => commands::get(&auth, &path).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "Command failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
