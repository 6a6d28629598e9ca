//! End-to-end library scenarios: ingestion into a persistent collection and
//! retrieval from it.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use compliance_rag::extract::{ExtractError, ExtractedDocument, Extractor, ExtractorRegistry};
use compliance_rag::ingest::{IngestLock, IngestOptions, IngestPipeline};
use compliance_rag::sqlite_index::SqliteIndex;
use compliance_rag_core::chunk::Chunker;
use compliance_rag_core::embedding::{Embedder, HashingEmbedder};
use compliance_rag_core::index::{DistanceMetric, VectorIndex};
use compliance_rag_core::models::{Metadata, NewRecord, RecordId};
use compliance_rag_core::retriever::{cited_sources, Retriever};
use compliance_rag_core::Error;
use tempfile::TempDir;

/// Treats `.pdf` and `.docx` files as UTF-8 text.
struct Utf8Fixture;

impl Extractor for Utf8Fixture {
    fn name(&self) -> &'static str {
        "utf8-fixture"
    }

    fn extensions(&self) -> &[&'static str] {
        &["pdf", "docx"]
    }

    fn extract(&self, bytes: &[u8]) -> Result<ExtractedDocument, ExtractError> {
        let text = std::str::from_utf8(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
        Ok(ExtractedDocument {
            text: text.to_string(),
            properties: BTreeMap::new(),
        })
    }
}

struct Fixture {
    _tmp: TempDir,
    source: std::path::PathBuf,
    persist: std::path::PathBuf,
}

fn corpus() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("raw");
    fs::create_dir_all(source.join("guidance")).unwrap();
    fs::create_dir_all(source.join("forms")).unwrap();
    fs::write(source.join("guidance/doc1.pdf"), "gmp ".repeat(625)).unwrap();
    fs::write(source.join("forms/doc2.docx"), "form ".repeat(160)).unwrap();
    let persist = tmp.path().join("vectorstore");
    Fixture {
        _tmp: tmp,
        source,
        persist,
    }
}

async fn open(persist: &Path) -> Arc<SqliteIndex> {
    Arc::new(
        SqliteIndex::open(persist, "compliance_docs", DistanceMetric::Cosine, "hash-64")
            .await
            .unwrap(),
    )
}

fn pipeline(persist: &Path, index: Arc<SqliteIndex>, reset: bool) -> IngestPipeline {
    let mut registry = ExtractorRegistry::new();
    registry.register(Arc::new(Utf8Fixture));
    IngestPipeline::new(
        Chunker::new(1000, 200).unwrap(),
        Arc::new(registry),
        Arc::new(HashingEmbedder::new(64).unwrap()),
        index,
        IngestOptions {
            persist_dir: persist.to_path_buf(),
            reset,
            dry_run: false,
            batch_size: 3,
            workers: 2,
        },
    )
}

#[tokio::test]
async fn two_document_corpus_yields_four_records() {
    let fx = corpus();
    let index = open(&fx.persist).await;

    let summary = pipeline(&fx.persist, index.clone(), false)
        .build(&fx.source)
        .await
        .unwrap();

    assert_eq!(summary.total_documents, 2);
    assert_eq!(summary.total_chunks, 4);
    assert_eq!(summary.per_category.get("guidance"), Some(&3));
    assert_eq!(summary.per_category.get("forms"), Some(&1));
    assert_eq!(summary.records_added, 4);

    let stats = index.stats().await.unwrap();
    assert_eq!(stats.total_records, 4);
    assert_eq!(stats.categories, vec!["forms", "guidance"]);
    assert_eq!(stats.dims, Some(64));
    assert_eq!(stats.embedding_model.as_deref(), Some("hash-64"));
}

#[tokio::test]
async fn retriever_over_persisted_collection() {
    let fx = corpus();
    let index = open(&fx.persist).await;
    pipeline(&fx.persist, index.clone(), false)
        .build(&fx.source)
        .await
        .unwrap();

    let retriever = Retriever::new(Arc::new(HashingEmbedder::new(64).unwrap()), index.clone());

    let response = retriever.search("form form", 10, None).await.unwrap();
    assert_eq!(response.num_results, 4);
    assert_eq!(response.results[0].metadata.filename, "doc2.docx");
    assert!(response
        .results
        .windows(2)
        .all(|w| w[0].distance <= w[1].distance));

    let guidance = retriever.search("form", 5, Some("guidance")).await.unwrap();
    assert_eq!(guidance.num_results, 3);
    assert!(guidance
        .results
        .iter()
        .all(|r| r.metadata.category == "guidance"));

    let context = retriever.get_context("gmp", 2).await.unwrap();
    assert_eq!(cited_sources(&context), vec![1, 2]);
    assert!(context.starts_with("[Source 1] — doc1.pdf (relevance: 100%)"));
}

#[tokio::test]
async fn empty_collection_returns_no_results() {
    let fx = corpus();
    let index = open(&fx.persist).await;
    let retriever = Retriever::new(Arc::new(HashingEmbedder::new(64).unwrap()), index);

    let response = retriever.search("cleaning validation", 5, None).await.unwrap();
    assert_eq!(response.num_results, 0);
    assert!(retriever.get_context("cleaning validation", 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn reset_then_add_starts_fresh_id_space() {
    let fx = corpus();
    let index = open(&fx.persist).await;
    pipeline(&fx.persist, index.clone(), false)
        .build(&fx.source)
        .await
        .unwrap();

    index.reset().await.unwrap();
    let embedder = HashingEmbedder::new(64).unwrap();
    let ids = index
        .add(vec![NewRecord {
            text: "annex 1 contamination control".to_string(),
            metadata: Metadata::new("/raw/guidance/annex1.pdf", "annex1.pdf", "guidance"),
            embedding: embedder.embed_one("annex 1 contamination control"),
        }])
        .await
        .unwrap();

    assert_eq!(ids, vec![RecordId(0)]);
    assert_eq!(ids[0].to_string(), "doc_0");
    assert_eq!(index.count().await.unwrap(), 1);
}

#[tokio::test]
async fn reopened_collection_matches_last_commit() {
    let fx = corpus();
    {
        let index = open(&fx.persist).await;
        pipeline(&fx.persist, index, false)
            .build(&fx.source)
            .await
            .unwrap();
    }

    let reopened = open(&fx.persist).await;
    assert_eq!(reopened.count().await.unwrap(), 4);
    let query = HashingEmbedder::new(64).unwrap().embed_query("gmp").await.unwrap();
    let hits = reopened.query(&query, 1, None).await.unwrap();
    assert_eq!(hits[0].metadata.category, "guidance");

    pipeline(&fx.persist, reopened.clone(), true)
        .build(&fx.source)
        .await
        .unwrap();
    let again = open(&fx.persist).await;
    assert_eq!(again.count().await.unwrap(), 4);
}

#[tokio::test]
async fn mixed_dimensions_rejected() {
    let fx = corpus();
    let index = open(&fx.persist).await;
    pipeline(&fx.persist, index.clone(), false)
        .build(&fx.source)
        .await
        .unwrap();

    let wide = IngestPipeline::new(
        Chunker::default(),
        Arc::new({
            let mut registry = ExtractorRegistry::new();
            registry.register(Arc::new(Utf8Fixture));
            registry
        }),
        Arc::new(HashingEmbedder::new(128).unwrap()),
        index.clone(),
        IngestOptions {
            persist_dir: fx.persist.clone(),
            reset: false,
            dry_run: false,
            batch_size: 10,
            workers: 1,
        },
    );
    let err = wide.build(&fx.source).await.unwrap_err();
    assert!(matches!(
        err,
        Error::DimensionMismatch {
            expected: 64,
            found: 128
        }
    ));
    assert_eq!(index.count().await.unwrap(), 4);
    assert!(!IngestLock::lock_path(&fx.persist, "compliance_docs").exists());
}

#[tokio::test]
async fn concurrent_ingest_is_rejected() {
    let fx = corpus();
    let index = open(&fx.persist).await;
    let _held = IngestLock::acquire(&fx.persist, "compliance_docs").unwrap();

    let err = pipeline(&fx.persist, index.clone(), false)
        .build(&fx.source)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IngestInProgress(_)));
    assert_eq!(index.count().await.unwrap(), 0);
}
