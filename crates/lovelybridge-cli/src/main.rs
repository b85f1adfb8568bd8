//! LovelyBridge CLI - a terminal client for the LovelyBridge couple app.
//!
//! Logs in against the LovelyBridge backend, keeps the session on disk and
//! drives the couple, attendance and memory endpoints. Expired access tokens
//! are refreshed transparently.

mod commands;

use std::io;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lovelybridge_core::config::{Config, StorageBackend};
use lovelybridge_core::models::{Gender, MemoryOrdering};

use commands::App;

/// Log file prefix inside the data directory
const LOG_FILE_PREFIX: &str = "lovelybridge.log";

#[derive(Parser, Debug)]
#[command(name = "lovelybridge", version, about = "Terminal client for LovelyBridge")]
struct Args {
    #[arg(long, global = true, env = "LOVELYBRIDGE_API_URL", help = "Backend base URL (overrides config)")]
    api_url: Option<String>,

    #[arg(long, global = true, help = "Keep the session in memory only")]
    ephemeral: bool,

    #[arg(long, global = true, help = "Also write logs to a daily file in the data directory")]
    log_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in with email and password
    Login {
        #[arg(long)]
        email: String,
    },
    /// Create an account
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
    },
    /// Forget the stored session
    Logout,
    /// Session state with couple and attendance summary
    Status,
    /// Show or set the inactivity timeout in minutes
    Timeout { minutes: Option<u32> },
    #[command(subcommand)]
    Profile(ProfileCommand),
    #[command(subcommand)]
    Couple(CoupleCommand),
    #[command(subcommand)]
    Attendance(AttendanceCommand),
    #[command(subcommand)]
    Memory(MemoryCommand),
    #[command(subcommand)]
    Password(PasswordCommand),
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    Show,
    Set {
        #[arg(long)]
        nickname: Option<String>,
        #[arg(long, help = "female, male or other")]
        gender: Option<Gender>,
    },
}

#[derive(Subcommand, Debug)]
pub enum CoupleCommand {
    Status,
    /// Send a couple request to another user
    Request { partner_username: String },
    Incoming,
    Sent,
    Accept { request_id: i64 },
    Reject { request_id: i64 },
    Cancel { request_id: i64 },
}

#[derive(Subcommand, Debug)]
pub enum AttendanceCommand {
    Status,
    CheckIn,
}

#[derive(Subcommand, Debug)]
pub enum MemoryCommand {
    List {
        #[arg(long, help = "Search text")]
        search: Option<String>,
        #[arg(long, allow_hyphen_values = true, help = "newest, oldest, title or -title")]
        order: Option<MemoryOrdering>,
        #[arg(long, help = "Print JSON")]
        json: bool,
    },
    Show { id: i64 },
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
    },
    Edit {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
    },
    Delete { id: i64 },
}

#[derive(Subcommand, Debug)]
pub enum PasswordCommand {
    Verify,
    Change,
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_file: bool) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = if log_file {
        let dir = Config::data_dir()?;
        std::fs::create_dir_all(&dir)?;
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer().with_writer(writer).with_ansi(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let log_guard = init_tracing(args.log_file)?;
    info!("LovelyBridge CLI starting");

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(url) = args.api_url {
        config.api_base_url = url;
    }
    if args.ephemeral {
        config.storage = StorageBackend::Memory;
    }

    let app = App::new(&config)?;
    let result = app.run(args.command).await;

    if app.session_expired() {
        eprintln!("{}", commands::SESSION_EXPIRED_MESSAGE);
        drop(log_guard);
        std::process::exit(1);
    }
    result
}
