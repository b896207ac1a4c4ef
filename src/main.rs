use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mnemon::config::MemoryConfig;
use mnemon::memory::types::{EntryKind, SearchRequest};
use mnemon::MemoryEngine;

#[derive(Parser)]
#[command(name = "mnemon", version, about = "Cross-session memory engine for AI agents")]
struct Cli {
    /// Path to a config file (defaults to ~/.mnemon/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile notes, skills, and session transcripts into the index
    Sync,
    /// Search the index
    Search {
        query: String,
        /// Maximum results to print
        #[arg(long)]
        limit: Option<usize>,
        /// Restrict to one entry kind: session, note, or skill
        #[arg(long)]
        kind: Option<String>,
    },
    /// Write a note into the notes directory and index it
    Note {
        title: String,
        /// Note body; reads stdin when omitted
        content: Option<String>,
        /// Comma-separated tags
        #[arg(long)]
        tags: Option<String>,
    },
    /// Show index statistics
    Status,
    /// Sync, then watch for changes until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => MemoryConfig::load_from(path)?,
        None => MemoryConfig::load()?,
    };

    // Log to stderr so stdout stays clean for piped output.
    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let engine = MemoryEngine::new(config)?;

    match cli.command {
        Command::Sync => {
            let report = engine.full_sync().await?;
            println!("{report}");
        }
        Command::Search { query, limit, kind } => {
            let mut request = SearchRequest::from_config(&query, &engine.config().search);
            if let Some(limit) = limit {
                request.limit = limit;
            }
            if let Some(kind) = kind {
                request.kind = Some(
                    EntryKind::from_str(&kind).map_err(|e| anyhow::anyhow!(e))?,
                );
            }
            let results = engine.search_with(&request).await?;
            if results.is_empty() {
                println!("no matches");
            }
            for result in results {
                let title = result
                    .entry
                    .title
                    .as_deref()
                    .unwrap_or(&result.entry.source_key);
                println!(
                    "{:.3}  [{}] {}",
                    result.score,
                    result.entry.kind.as_str(),
                    title
                );
                for highlight in &result.highlights {
                    println!("       {highlight}");
                }
            }
        }
        Command::Note { title, content, tags } => {
            let content = match content {
                Some(c) => c,
                None => std::io::read_to_string(std::io::stdin())?,
            };
            let tags: Vec<String> = tags
                .map(|t| {
                    t.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            let path = engine.write_note(&title, &content, &tags).await?;
            println!("{}", path.display());
        }
        Command::Status => {
            let status = engine.status()?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Watch => {
            let report = engine.full_sync().await?;
            println!("initial sync: {report}");
            engine.start_watching()?;
            tokio::signal::ctrl_c().await?;
            engine.stop_watching();
        }
    }

    Ok(())
}
