//! TOML configuration.
//!
//! Every section has serde defaults, so an empty file (or no file at all)
//! yields a working configuration:
//!
//! ```toml
//! [index]
//! persist_dir = "./vectorstore"
//! collection = "compliance_docs"
//! metric = "cosine"
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [retrieval]
//! top_k = 5
//!
//! [embedding]
//! provider = "local"
//! model = "all-minilm-l6-v2"
//! batch_size = 32
//!
//! [ingest]
//! root = "./data/raw"
//! batch_size = 100
//! workers = 4
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use compliance_rag_core::index::DistanceMetric;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_persist_dir")]
    pub persist_dir: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub metric: DistanceMetric,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            persist_dir: default_persist_dir(),
            collection: default_collection(),
            metric: DistanceMetric::default(),
        }
    }
}

fn default_persist_dir() -> PathBuf {
    PathBuf::from("./vectorstore")
}
fn default_collection() -> String {
    "compliance_docs".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `local` (fastembed) or `hash` (model-free feature hashing).
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Overrides the model's native dimensionality; required to size `hash`.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dims: None,
            batch_size: default_embed_batch_size(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_model() -> String {
    "all-minilm-l6-v2".to_string()
}
fn default_embed_batch_size() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_root")]
    pub root: PathBuf,
    #[serde(default = "default_ingest_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            root: default_ingest_root(),
            batch_size: default_ingest_batch_size(),
            workers: default_workers(),
        }
    }
}

fn default_ingest_root() -> PathBuf {
    PathBuf::from("./data/raw")
}
fn default_ingest_batch_size() -> usize {
    100
}
fn default_workers() -> usize {
    4
}

/// Load and validate the configuration at `path`.
///
/// A missing file is not an error: defaults apply.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.index.collection.trim().is_empty() {
        bail!("index.collection must not be empty");
    }

    // Validate chunking
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "local" | "hash" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be local or hash.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size < 1 {
        bail!("embedding.batch_size must be >= 1");
    }

    if config.ingest.batch_size < 1 {
        bail!("ingest.batch_size must be >= 1");
    }
    if config.ingest.workers < 1 {
        bail!("ingest.workers must be >= 1");
    }

    Ok(())
}
