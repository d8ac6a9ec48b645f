mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ragmem::config::RagConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ragmem", version, about = "Embed, store, and retrieve text for RAG")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Embed and store texts
    Ingest {
        /// Texts to ingest
        texts: Vec<String>,
        /// Read texts from a file, one per line
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Target collection (defaults to the configured inputs collection)
        #[arg(short, long)]
        collection: Option<String>,
        /// JSON object merged into every record's metadata
        #[arg(short, long)]
        metadata: Option<String>,
    },
    /// Find stored texts similar to a query
    Search {
        query: String,
        /// Number of results
        #[arg(short)]
        k: Option<usize>,
        #[arg(short, long)]
        collection: Option<String>,
    },
    /// Record and query conversation turns
    Context {
        #[command(subcommand)]
        action: ContextAction,
    },
    /// List collections and record counts
    Stats,
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ContextAction {
    /// Record a user turn
    AddUser {
        text: String,
        #[arg(long)]
        conversation: Option<String>,
    },
    /// Record an assistant turn
    AddAssistant {
        text: String,
        #[arg(long)]
        conversation: Option<String>,
    },
    /// Retrieve turns relevant to a query
    Query {
        query: String,
        #[arg(short)]
        k: Option<usize>,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the configured embedding model to the model cache
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = RagConfig::load()?;

    // Log to stderr so stdout carries only command output.
    let filter = EnvFilter::try_new(&config.logging.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Ingest {
            texts,
            file,
            collection,
            metadata,
        } => {
            cli::ingest::ingest(config, texts, file, collection, metadata).await?;
        }
        Command::Search {
            query,
            k,
            collection,
        } => {
            cli::search::search(config, query, k, collection).await?;
        }
        Command::Context { action } => match action {
            ContextAction::AddUser { text, conversation } => {
                cli::context::add_turn(config, ragmem::Role::User, text, conversation).await?;
            }
            ContextAction::AddAssistant { text, conversation } => {
                cli::context::add_turn(config, ragmem::Role::Assistant, text, conversation)
                    .await?;
            }
            ContextAction::Query { query, k } => {
                cli::context::query(config, query, k).await?;
            }
        },
        Command::Stats => {
            cli::stats::stats(&config)?;
        }
        Command::Model { action } => match action {
            ModelAction::Download => {
                cli::model_download(&config.embedding).await?;
            }
        },
    }

    Ok(())
}
