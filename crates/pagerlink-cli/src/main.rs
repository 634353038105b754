//! pagerlink CLI entry point.
//!
//! Loads `.env` and the TOML config, initializes tracing, and dispatches
//! to the subcommand handlers in [`commands`].

mod cli;
mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal outside development.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing("info");

    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Migrate => commands::migrate(&config).await,
        Commands::Authorize { backend, user, org } => {
            commands::authorize(&config, &backend, &user, &org).await
        }
        Commands::Complete {
            backend,
            callback_url,
        } => commands::complete(&config, &backend, &callback_url).await,
        Commands::Login {
            backend,
            user,
            org,
            port,
        } => commands::login(&config, &backend, &user, &org, port).await,
        Commands::Host { action } => commands::host(&config, action).await,
        Commands::Messages { action } => commands::messages(&config, action).await,
        Commands::Identities { action } => commands::identities(&config, action).await,
        Commands::Tokens { action } => commands::tokens(&config, action).await,
    }
}

/// Initialize the tracing subscriber with the given default log level.
///
/// `RUST_LOG` takes precedence when set.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();
}
