//! Webhooked CLI
//!
//! Validate webhook specifications, list them, and replay recorded calls
//! through the full security, formatting and storage chain.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use webhooked_core::config::DEFAULT_CONFIG_FILE;

mod commands;

/// Webhooked - webhook ingestion gateway
#[derive(Parser)]
#[command(name = "webhooked")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file or directory of configuration files
    #[arg(short, long, env = "WEBHOOKED_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration, security steps and storages without serving
    Validate,

    /// List the configured webhook specifications
    Specs {
        /// Print the specifications as JSON
        #[arg(long)]
        json: bool,
    },

    /// Replay a recorded call against an entrypoint
    Replay {
        /// Entrypoint URL of the webhook, e.g. /webhooks/example
        endpoint: String,

        /// File holding the request body
        #[arg(short, long)]
        body: String,

        /// Request header as `Name: value`, may be repeated
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Validate => {
            commands::validate::run(&cli.config).await?;
        }
        Commands::Specs { json } => {
            commands::specs::run(&cli.config, json)?;
        }
        Commands::Replay {
            endpoint,
            body,
            headers,
        } => {
            commands::replay::run(&cli.config, &endpoint, &body, &headers).await?;
        }
    }

    Ok(())
}
