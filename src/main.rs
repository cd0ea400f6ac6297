//! # chat-assist CLI
//!
//! ## Usage
//!
//! ```bash
//! chat-assist [--config ./config/chat-assist.toml] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chat-assist chat` | Interactive terminal chat |
//! | `chat-assist serve` | Start the JSON HTTP API |
//! | `chat-assist models` | List configured models |
//! | `chat-assist chunk <file>` | Show how a file would be chunked |
//!
//! Without `--config` every setting takes its default: Ollama on
//! `http://localhost:11434`, the four DeepSeek-R1 / Llama models, and
//! embeddings via Ollama's `all-minilm`.
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `chat_assist=info`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use chat_assist::chunk::Chunker;
use chat_assist::config::{load_config, Config, ModelCatalog};
use chat_assist::extract::extract_file;
use chat_assist::repl::run_interactive;
use chat_assist::server::run_server;
use chat_assist::session::Services;

/// chat-assist: chat with local Ollama models, grounded in your own files.
#[derive(Parser)]
#[command(name = "chat-assist", version, about)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat in the terminal.
    Chat,

    /// Serve the JSON HTTP API on `[server].bind`.
    Serve,

    /// List the configured models and their runtime tags.
    Models,

    /// Extract and chunk a file, printing one line per chunk.
    Chunk {
        /// File to chunk (.txt, .md, .json, .docx, .pdf).
        file: PathBuf,

        /// Print chunks as JSON instead.
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_assist=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = match &cli.config {
        Some(path) => load_config(path)?,
        None => {
            let cfg = Config::default();
            cfg.validate()?;
            cfg
        }
    };

    match cli.command {
        Commands::Models => {
            let catalog = ModelCatalog::from_config(&cfg)?;
            for entry in catalog.entries() {
                let marker = if entry.name == catalog.default_name() {
                    " (default)"
                } else {
                    ""
                };
                println!("{:<20} {}{}", entry.name, entry.tag, marker);
            }
        }
        Commands::Chunk { file, json } => {
            let document = extract_file(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let chunker = Chunker::from_config(&cfg.chunking)?;
            let chunks = chunker.chunk(&document.source_id, &document.text);
            if json {
                println!("{}", serde_json::to_string_pretty(&chunks)?);
            } else {
                for chunk in &chunks {
                    let preview: String = chunk.text.chars().take(60).collect();
                    println!(
                        "#{:<4} [{}..{}) {} {:?}",
                        chunk.ordinal,
                        chunk.start,
                        chunk.end,
                        &chunk.hash[..12],
                        preview
                    );
                }
                println!("{} chunks", chunks.len());
            }
        }
        Commands::Chat => {
            let services = Arc::new(Services::from_config(cfg)?);
            run_interactive(services).await?;
        }
        Commands::Serve => {
            let services = Arc::new(Services::from_config(cfg)?);
            run_server(services).await.context("Server failed")?;
        }
    }

    Ok(())
}
