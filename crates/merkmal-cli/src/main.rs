//! Merkmal command line.
//!
//! Two subcommands: `serve` runs the HTTP identification server, `index`
//! walks a directory tree and characterises every file through the same
//! dispatcher, writing JSONL and/or CSV records.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use merkmal::MerkmalConfig;

mod indexer;

#[derive(Parser)]
#[command(name = "merkmal", version, about = "File characterisation for digital preservation")]
struct Cli {
    /// Configuration file; defaults to discovering merkmal.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP identification server.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8083)]
        port: u16,
    },
    /// Recursively index a directory tree.
    Index {
        /// Directory to iterate.
        #[arg(long)]
        path: PathBuf,
        /// JSONL output file.
        #[arg(long)]
        json: Option<PathBuf>,
        /// CSV output file.
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Number of concurrent workers.
        #[arg(long, default_value_t = 3)]
        n: usize,
        /// Comma separated actions to perform; defaults to all
        /// stream-capable actions.
        #[arg(long)]
        actions: Option<String>,
    },
}

fn load_config(path: &Option<PathBuf>) -> Result<MerkmalConfig> {
    match path {
        Some(path) => MerkmalConfig::from_toml_file(path)
            .with_context(|| format!("cannot load config {}", path.display())),
        None => match MerkmalConfig::discover()? {
            Some(config) => {
                tracing::info!("loaded discovered merkmal.toml");
                Ok(config)
            }
            None => {
                tracing::info!("no config file found, using defaults");
                Ok(MerkmalConfig::default())
            }
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Serve { host, port } => {
            merkmal::api::serve(host, port, config, None)
                .await
                .context("server failed")?;
        }
        Command::Index {
            path,
            json,
            csv,
            n,
            actions,
        } => {
            let actions = actions.map(|list| {
                list.split(',')
                    .map(|a| a.trim().to_ascii_lowercase())
                    .filter(|a| !a.is_empty())
                    .collect::<Vec<_>>()
            });
            indexer::run(&config, &path, json.as_deref(), csv.as_deref(), n, actions).await?;
        }
    }
    Ok(())
}
