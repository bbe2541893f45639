//! # docqa CLI
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa serve` | Start the HTTP chat host |
//! | `docqa chat [FILE]` | Chat with one document in the terminal |
//! | `docqa departments` | Print the department tag options |
//!
//! Credentials are read from the environment (`.env` is loaded first):
//! `OPENAI_API_KEY`, `PINECONE_API_KEY`, `PINECONE_ENV`,
//! `PINECONE_INDEX_NAME`. With `--offline` none are needed.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use docqa::chat::{run_chat, ChatOptions};
use docqa::config::{load_config, Config, Credentials};
use docqa::server::run_server;
use docqa::services::Services;
use docqa_core::departments::department_options;
use tracing_subscriber::EnvFilter;

/// docqa: ask sourced questions about your documents.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "docqa: conversational question answering over uploaded documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when it is absent.
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    /// Use the in-memory index, hashing embedder and extractive model
    /// instead of OpenAI and Pinecone.
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP chat host.
    Serve {
        /// Override `[server].bind`.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Chat with one document in the terminal.
    Chat {
        /// File to upload; prompts for a path when omitted.
        file: Option<PathBuf>,

        /// Comma-separated departments; prompts when omitted.
        #[arg(long, value_delimiter = ',')]
        departments: Option<Vec<String>>,
    },

    /// Print the department tag options.
    Departments,
}

fn services(config: Config, offline: bool) -> Result<Services> {
    if offline {
        return Ok(Services::offline(config));
    }
    let credentials = Credentials::from_env(config.index.name.as_deref())?;
    tracing::debug!(?credentials, "loaded credentials");
    Services::remote(config, &credentials)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            run_server(services(config, cli.offline)?).await?;
        }
        Commands::Chat { file, departments } => {
            let services = services(config, cli.offline)?;
            let departments = departments.map(|names| {
                names
                    .into_iter()
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .collect()
            });
            run_chat(&services, ChatOptions { file, departments }).await?;
        }
        Commands::Departments => {
            for option in department_options(config.departments.names.as_slice()) {
                println!("{}", option);
            }
        }
    }

    Ok(())
}
