//! # Compliance RAG CLI (`crag`)
//!
//! Builds and queries a persistent collection of regulatory document chunks.
//!
//! ## Usage
//!
//! ```bash
//! crag --config ./config/crag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `crag init` | Create the persist directory, schema and collection |
//! | `crag ingest [DIR]` | Extract, chunk, embed and store documents |
//! | `crag search "<query>"` | Ranked chunks for a question |
//! | `crag context "<query>"` | Numbered context block for an answer generator |
//! | `crag stats` | Collection statistics |
//! | `crag reset` | Discard every record in the collection |
//! | `crag collections` | List collections in the persist directory |
//!
//! Logs are written to stderr and filtered with `RUST_LOG`
//! (default `compliance_rag=info`); command output goes to stdout.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use compliance_rag::{config, ingest, search, stats};

/// Compliance RAG — retrieval over regulatory and compliance documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/crag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "crag",
    about = "Compliance RAG — local retrieval over regulatory and compliance documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/crag.toml`. A missing file means built-in defaults.
    #[arg(long, global = true, default_value = "./config/crag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the persist directory, database schema and collection.
    ///
    /// Idempotent.
    Init,

    /// Ingest a folder of documents into the collection.
    ///
    /// Each immediate subfolder of DIR is a category. Unsupported files are
    /// skipped; documents that fail to extract are reported and skipped.
    Ingest {
        /// Source directory. Defaults to `[ingest].root`.
        dir: Option<PathBuf>,

        /// Discard existing records first (full rebuild).
        #[arg(long)]
        reset: bool,

        /// Extract and chunk only; show counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,

        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Search the collection.
    Search {
        /// The question or search text.
        query: String,

        /// Number of results. Defaults to `[retrieval].top_k`.
        #[arg(long)]
        top_k: Option<usize>,

        /// Restrict results to one category (subfolder name).
        #[arg(long)]
        category: Option<String>,

        /// Print the response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the rendered context block for a question.
    Context {
        query: String,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Show collection statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Discard every record in the collection.
    Reset,

    /// List collections in the persist directory.
    Collections,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("compliance_rag=info,compliance_rag_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            stats::run_init(&cfg).await?;
        }
        Commands::Ingest {
            dir,
            reset,
            dry_run,
            json,
        } => {
            ingest::run_ingest(&cfg, dir, reset, dry_run, json).await?;
        }
        Commands::Search {
            query,
            top_k,
            category,
            json,
        } => {
            search::run_search(&cfg, &query, top_k, category, json).await?;
        }
        Commands::Context { query, top_k } => {
            search::run_context(&cfg, &query, top_k).await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json).await?;
        }
        Commands::Reset => {
            stats::run_reset(&cfg).await?;
        }
        Commands::Collections => {
            stats::run_collections(&cfg).await?;
        }
    }

    Ok(())
}
