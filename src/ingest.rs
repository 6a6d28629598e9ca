//! Ingestion pipeline orchestration.
//!
//! Builds a collection from a directory of source documents:
//! walk → extract → chunk → embed → add. Extraction and chunking run on
//! blocking worker threads; embedding and index writes happen in batches,
//! in path order, one batch at a time.
//!
//! A document is all-or-nothing: if it cannot be extracted, or extracts to
//! blank text, it is recorded in [`IngestSummary::failures`] and skipped.
//! Embedding and index errors abort the run.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use compliance_rag_core::chunk::Chunker;
use compliance_rag_core::embedding::{check_output, Embedder, HashingEmbedder};
use compliance_rag_core::index::memory::MemoryIndex;
use compliance_rag_core::index::VectorIndex;
use compliance_rag_core::models::{Chunk, Metadata, NewRecord};
use compliance_rag_core::{Error, Result};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::embedding::{configured_model_name, create_embedder, DEFAULT_HASH_DIMS};
use crate::extract::ExtractorRegistry;
use crate::sqlite_index::SqliteIndex;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Directory holding the collection's lock file.
    pub persist_dir: PathBuf,
    /// Replace the collection's records with this run's.
    ///
    /// Every chunk is embedded before the old records are discarded, so an
    /// embedding failure leaves the previous collection in place.
    pub reset: bool,
    /// Extract and chunk only.
    pub dry_run: bool,
    /// Chunks embedded and added per batch.
    pub batch_size: usize,
    /// Documents extracted concurrently.
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub total_documents: usize,
    pub total_chunks: usize,
    /// Chunks per category.
    pub per_category: BTreeMap<String, usize>,
    /// Files without a registered extractor.
    pub skipped: usize,
    pub failures: Vec<IngestFailure>,
    pub records_added: usize,
    pub dry_run: bool,
}

/// Exclusive per-collection ingestion lock, released on drop.
#[derive(Debug)]
pub struct IngestLock {
    path: PathBuf,
}

impl IngestLock {
    pub fn lock_path(persist_dir: &Path, collection: &str) -> PathBuf {
        persist_dir.join(format!("{}.ingest.lock", collection))
    }

    /// Take the lock, failing with `IngestInProgress` if another run holds it.
    pub fn acquire(persist_dir: &Path, collection: &str) -> Result<Self> {
        std::fs::create_dir_all(persist_dir).map_err(Error::storage)?;
        let path = Self::lock_path(persist_dir, collection);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let lock = Self { path };
                writeln!(file, "{}", std::process::id()).map_err(|e| {
                    Error::storage(format!("cannot write lock {}: {}", lock.path.display(), e))
                })?;
                Ok(lock)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::IngestInProgress(collection.to_string()))
            }
            Err(e) => Err(Error::storage(format!(
                "cannot create lock {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

impl Drop for IngestLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove ingest lock");
        }
    }
}

/// Chunks of one successfully extracted document.
struct Prepared {
    category: String,
    chunks: Vec<Chunk>,
}

pub struct IngestPipeline {
    chunker: Chunker,
    extractors: Arc<ExtractorRegistry>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    options: IngestOptions,
}

impl IngestPipeline {
    pub fn new(
        chunker: Chunker,
        extractors: Arc<ExtractorRegistry>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        options: IngestOptions,
    ) -> Self {
        Self {
            chunker,
            extractors,
            embedder,
            index,
            options,
        }
    }

    /// Ingest every supported document under `dir`.
    pub async fn build(&self, dir: &Path) -> Result<IngestSummary> {
        if self.options.batch_size == 0 || self.options.workers == 0 {
            return Err(Error::invalid_argument(
                "ingest batch_size and workers must be at least 1",
            ));
        }
        if !dir.is_dir() {
            return Err(Error::invalid_argument(format!(
                "source directory does not exist: {}",
                dir.display()
            )));
        }

        let collection = self.index.collection().to_string();
        let _lock = if self.options.dry_run {
            None
        } else {
            Some(IngestLock::acquire(&self.options.persist_dir, &collection)?)
        };

        let mut summary = IngestSummary {
            dry_run: self.options.dry_run,
            ..IngestSummary::default()
        };

        let (files, skipped) = self.discover(dir)?;
        summary.skipped = skipped;
        info!(
            dir = %dir.display(),
            documents = files.len(),
            skipped,
            "discovered source documents"
        );

        let mut pending = Vec::new();
        for (path, outcome) in files.iter().zip(self.prepare_all(dir, &files).await?) {
            match outcome {
                Ok(doc) => {
                    summary.total_documents += 1;
                    summary.total_chunks += doc.chunks.len();
                    *summary.per_category.entry(doc.category).or_insert(0) += doc.chunks.len();
                    pending.extend(doc.chunks);
                }
                Err(message) => {
                    warn!(path = %path.display(), %message, "skipping document");
                    summary.failures.push(IngestFailure {
                        path: path.display().to_string(),
                        message,
                    });
                }
            }
        }

        if self.options.dry_run {
            info!(chunks = summary.total_chunks, "dry run, nothing written");
            return Ok(summary);
        }

        let mut batches = Vec::new();
        while !pending.is_empty() {
            let take = self.options.batch_size.min(pending.len());
            batches.push(pending.drain(..take).collect::<Vec<Chunk>>());
        }

        if self.options.reset {
            let mut embedded = Vec::with_capacity(batches.len());
            for batch in batches {
                embedded.push(self.embed_batch(batch).await?);
            }
            self.index.reset().await?;
            for records in embedded {
                summary.records_added += self.store_batch(records).await?;
            }
        } else {
            for batch in batches {
                let records = self.embed_batch(batch).await?;
                summary.records_added += self.store_batch(records).await?;
            }
        }

        info!(
            collection = %collection,
            documents = summary.total_documents,
            records = summary.records_added,
            failures = summary.failures.len(),
            "ingestion complete"
        );
        Ok(summary)
    }

    async fn embed_batch(&self, batch: Vec<Chunk>) -> Result<Vec<NewRecord>> {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        check_output(&vectors, texts.len(), self.embedder.dims())?;
        Ok(batch
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| chunk.into_record(embedding))
            .collect())
    }

    async fn store_batch(&self, records: Vec<NewRecord>) -> Result<usize> {
        let ids = self.index.add(records).await?;
        debug!(added = ids.len(), "batch stored");
        Ok(ids.len())
    }

    /// Supported files under `dir` in path order, plus the unsupported count.
    fn discover(&self, dir: &Path) -> Result<(Vec<PathBuf>, usize)> {
        let mut files = Vec::new();
        let mut skipped = 0;
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(Error::storage)?;
            if !entry.file_type().is_file() {
                continue;
            }
            if self.extractors.supports(entry.path()) {
                files.push(entry.into_path());
            } else {
                debug!(path = %entry.path().display(), "no extractor, skipping");
                skipped += 1;
            }
        }
        files.sort();
        Ok((files, skipped))
    }

    /// Extract and chunk `files`, at most `workers` at a time.
    ///
    /// Outcomes are returned in the order of `files`.
    async fn prepare_all(
        &self,
        dir: &Path,
        files: &[PathBuf],
    ) -> Result<Vec<std::result::Result<Prepared, String>>> {
        let root_category = root_category(dir);
        let permits = Arc::new(Semaphore::new(self.options.workers));
        let mut set = JoinSet::new();

        for (position, path) in files.iter().enumerate() {
            let permit = Arc::clone(&permits)
                .acquire_owned()
                .await
                .map_err(Error::storage)?;
            let extractors = Arc::clone(&self.extractors);
            let chunker = self.chunker.clone();
            let path = path.clone();
            let category = category_for(dir, &path, &root_category);

            set.spawn_blocking(move || {
                let _permit = permit;
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    prepare_document(&extractors, &chunker, &path, category)
                }))
                .unwrap_or_else(|_| Err("extractor panicked".to_string()));
                (position, outcome)
            });
        }

        let mut outcomes: Vec<Option<std::result::Result<Prepared, String>>> =
            files.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            let (position, outcome) =
                joined.map_err(|e| Error::storage(format!("extraction worker failed: {}", e)))?;
            outcomes[position] = Some(outcome);
        }

        Ok(outcomes
            .into_iter()
            .map(|o| o.unwrap_or_else(|| Err("document was not processed".to_string())))
            .collect())
    }
}

/// `crag ingest`: build the configured collection from `dir` (or
/// `ingest.root`) and print the summary.
pub async fn run_ingest(
    config: &Config,
    dir: Option<PathBuf>,
    reset: bool,
    dry_run: bool,
    json: bool,
) -> anyhow::Result<()> {
    let dir = dir.unwrap_or_else(|| config.ingest.root.clone());
    let chunker = Chunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap)?;
    // Dry runs neither load the model nor open the database.
    let (embedder, index): (Arc<dyn Embedder>, Arc<dyn VectorIndex>) = if dry_run {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(DEFAULT_HASH_DIMS)?);
        let index: Arc<dyn VectorIndex> = Arc::new(MemoryIndex::new(
            config.index.collection.clone(),
            config.index.metric,
            configured_model_name(&config.embedding),
        ));
        (embedder, index)
    } else {
        let embedder = create_embedder(&config.embedding)
            .await
            .context("Failed to initialise embedding model")?;
        let index: Arc<dyn VectorIndex> = Arc::new(
            SqliteIndex::from_config(config)
                .await
                .with_context(|| format!("Failed to open collection '{}'", config.index.collection))?,
        );
        (embedder, index)
    };

    let pipeline = IngestPipeline::new(
        chunker,
        Arc::new(ExtractorRegistry::with_defaults()),
        embedder,
        index,
        IngestOptions {
            persist_dir: config.index.persist_dir.clone(),
            reset,
            dry_run,
            batch_size: config.ingest.batch_size,
            workers: config.ingest.workers,
        },
    );
    let summary = pipeline
        .build(&dir)
        .await
        .with_context(|| format!("Ingestion of {} failed", dir.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if summary.dry_run {
        println!("ingest {} (dry-run)", dir.display());
    } else {
        println!("ingest {}", dir.display());
    }
    println!("  documents: {}", summary.total_documents);
    println!("  chunks: {}", summary.total_chunks);
    for (category, chunks) in &summary.per_category {
        println!("    {}: {}", category, chunks);
    }
    println!("  skipped (unsupported): {}", summary.skipped);
    println!("  failed: {}", summary.failures.len());
    for failure in &summary.failures {
        println!("    {}: {}", failure.path, failure.message);
    }
    if !summary.dry_run {
        println!("  records added: {}", summary.records_added);
    }
    println!("ok");
    Ok(())
}

fn root_category(dir: &Path) -> String {
    dir.canonicalize()
        .ok()
        .as_deref()
        .unwrap_or(dir)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "uncategorized".to_string())
}

/// Immediate parent folder name; files directly under `dir` take `dir`'s own.
fn category_for(dir: &Path, path: &Path, root_category: &str) -> String {
    match path.parent() {
        Some(parent) if parent != dir => parent
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| root_category.to_string()),
        _ => root_category.to_string(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn prepare_document(
    extractors: &ExtractorRegistry,
    chunker: &Chunker,
    path: &Path,
    category: String,
) -> std::result::Result<Prepared, String> {
    let size = std::fs::metadata(path).map_err(|e| e.to_string())?.len();
    let document = extractors.extract_file(path).map_err(|e| match e {
        Error::Extraction { message, .. } => message,
        other => other.to_string(),
    })?;
    if document.text.trim().is_empty() {
        return Err("no extractable text".to_string());
    }

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut metadata = Metadata::new(path.display().to_string(), filename, category.clone())
        .with("file_size_kb", round2(size as f64 / 1024.0));
    for (key, value) in document.properties {
        metadata.insert(key, value);
    }
    metadata.validate().map_err(|e| e.to_string())?;

    Ok(Prepared {
        category,
        chunks: chunker.chunk(&document.text, &metadata),
    })
}
