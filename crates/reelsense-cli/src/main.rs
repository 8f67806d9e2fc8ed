//! reelsense - sign in to a reelsense backend and manage the local session.
//!
//! Session commands talk to the API configured in `~/.config/reelsense` (or
//! `REELSENSE_API_URL`). The `token` commands work offline against the
//! signing secret in `REELSENSE_SECRET_KEY`.

mod commands;

use std::io;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reelsense_core::Config;

#[derive(Parser, Debug)]
#[command(name = "reelsense", version, about = "reelsense session client")]
struct Cli {
    /// API base URL; overrides the config file and REELSENSE_API_URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the session token
    Login {
        /// Defaults to the last email used
        #[arg(long)]
        email: Option<String>,
    },

    /// Create an account; signs in when the server returns a token
    Register {
        #[arg(long)]
        email: String,

        /// Request the admin role
        #[arg(long, default_value_t = false)]
        admin: bool,
    },

    /// Show the signed-in user as reported by the server
    Whoami,

    /// Forget the stored session
    Logout,

    /// Show the stored session without contacting the server
    Status,

    /// Offline token tools (need REELSENSE_SECRET_KEY, except `secret` and `inspect`)
    Token {
        #[command(subcommand)]
        cmd: TokenCommand,
    },
}

#[derive(Subcommand, Debug)]
enum TokenCommand {
    /// Print a fresh random signing secret
    Secret,

    /// Issue a token for a user
    Issue {
        #[arg(long)]
        user_id: String,

        #[arg(long)]
        email: String,

        /// Lifetime in hours; defaults to the configured TTL
        #[arg(long)]
        ttl_hours: Option<i64>,
    },

    /// Check a token's signature and expiry
    Verify { token: String },

    /// Print a token's claims without checking the signature
    Inspect { token: String },
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr through a background writer; keep the guard alive until exit.
fn init_tracing() -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _guard = init_tracing();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    debug!(command = ?cli.cmd, "Starting");

    match cli.cmd {
        Command::Token { cmd } => match cmd {
            TokenCommand::Secret => commands::token_secret(),
            TokenCommand::Issue {
                user_id,
                email,
                ttl_hours,
            } => commands::token_issue(&config, &user_id, &email, ttl_hours),
            TokenCommand::Verify { token } => commands::token_verify(&config, &token),
            TokenCommand::Inspect { token } => commands::token_inspect(&token),
        },
        Command::Status => commands::status(&config),
        Command::Logout => commands::logout(&config, cli.api_url.as_deref()),
        Command::Whoami => commands::whoami(&config, cli.api_url.as_deref()).await,
        Command::Login { email } => {
            commands::login(&mut config, cli.api_url.as_deref(), email).await
        }
        Command::Register { email, admin } => {
            commands::register(&mut config, cli.api_url.as_deref(), &email, admin).await
        }
    }
}
