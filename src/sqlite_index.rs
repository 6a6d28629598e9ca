//! SQLite-backed [`VectorIndex`].
//!
//! Records live in `<persist_dir>/index.sqlite` (WAL mode), partitioned by
//! collection name. Vectors are stored as little-endian `f32` BLOBs and
//! ranked by brute force at query time; `category` constraints are pushed
//! down to SQL, other metadata keys are checked in Rust.
//!
//! Every mutation runs in one transaction, so a failed `add` stores nothing.
//! Within the process an async `RwLock` blocks new queries while a mutation
//! is in flight; each query reads collection state and records inside one
//! read transaction, so it ranks a single committed snapshot.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use compliance_rag_core::embedding::{blob_to_vec, vec_to_blob};
use compliance_rag_core::index::{
    check_batch, check_ids, check_query, rank, reserve_ids, DistanceMetric, IndexStats,
    VectorIndex,
};
use compliance_rag_core::models::{
    Metadata, MetadataFilter, MetadataValue, NewRecord, RecordId, SearchResult,
};
use compliance_rag_core::{Error, Result};
use serde::Serialize;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db;
use crate::embedding::configured_model_name;
use crate::migrate;

/// Persisted per-collection state.
#[derive(Debug, Clone)]
struct CollectionRow {
    metric: DistanceMetric,
    embedding_model: Option<String>,
    dims: Option<usize>,
    next_id: u64,
}

/// One entry of [`SqliteIndex::list_collections`].
#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub records: usize,
    pub dims: Option<usize>,
    pub embedding_model: Option<String>,
    pub metric: String,
}

/// Persistent vector index bound to one named collection.
pub struct SqliteIndex {
    pool: SqlitePool,
    collection: String,
    metric: DistanceMetric,
    embedding_model: String,
    gate: RwLock<()>,
}

impl SqliteIndex {
    /// Open `collection` under `persist_dir`, creating the database, schema
    /// and collection as needed.
    ///
    /// An existing collection keeps the metric it was created with.
    pub async fn open(
        persist_dir: &Path,
        collection: &str,
        metric: DistanceMetric,
        embedding_model: &str,
    ) -> Result<Self> {
        if collection.trim().is_empty() {
            return Err(Error::invalid_argument("collection name must not be empty"));
        }
        let pool = db::connect(persist_dir).await?;
        migrate::run_migrations(&pool).await?;

        sqlx::query("INSERT OR IGNORE INTO collections (name, metric) VALUES (?, ?)")
            .bind(collection)
            .bind(metric.as_str())
            .execute(&pool)
            .await
            .map_err(Error::storage)?;

        let row = load_collection(&pool, collection).await?;
        if row.metric != metric {
            warn!(
                collection,
                stored = %row.metric,
                requested = %metric,
                "collection keeps its original distance metric"
            );
        }
        if let Some(stored) = row.embedding_model.as_deref() {
            if stored != embedding_model {
                warn!(
                    collection,
                    stored,
                    requested = embedding_model,
                    "collection was built with a different embedding model; reset before re-ingesting"
                );
            }
        }
        info!(
            collection,
            path = %db::database_path(persist_dir).display(),
            "opened vector index"
        );

        Ok(Self {
            pool,
            collection: collection.to_string(),
            metric: row.metric,
            embedding_model: embedding_model.to_string(),
            gate: RwLock::new(()),
        })
    }

    /// Open the collection named by `config.index` for the configured embedder.
    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::open(
            &config.index.persist_dir,
            &config.index.collection,
            config.index.metric,
            &configured_model_name(&config.embedding),
        )
        .await
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// All collections stored in this database, sorted by name.
    pub async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let rows: Vec<(String, String, Option<String>, Option<i64>, i64)> = sqlx::query_as(
            r#"
            SELECT c.name, c.metric, c.embedding_model, c.dims,
                   (SELECT COUNT(*) FROM records r WHERE r.collection = c.name)
            FROM collections c
            ORDER BY c.name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::storage)?;

        Ok(rows
            .into_iter()
            .map(|(name, metric, embedding_model, dims, records)| CollectionInfo {
                name,
                records: records as usize,
                dims: dims.map(|d| d as usize),
                embedding_model,
                metric,
            })
            .collect())
    }

    /// Delete another collection and all of its records.
    ///
    /// Returns whether it existed. The collection this handle is bound to
    /// cannot be dropped through it; use [`VectorIndex::reset`] instead.
    pub async fn drop_collection(&self, name: &str) -> Result<bool> {
        if name == self.collection {
            return Err(Error::invalid_argument(format!(
                "cannot drop the open collection '{}'; reset it instead",
                name
            )));
        }
        let _guard = self.gate.write().await;
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;
        sqlx::query("DELETE FROM records WHERE collection = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(Error::storage)?;
        let removed = sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(Error::storage)?
            .rows_affected();
        tx.commit().await.map_err(Error::storage)?;
        Ok(removed > 0)
    }

    /// Close the underlying pool.
    pub async fn close(self) {
        self.pool.close().await;
    }

    async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: RecordId,
        record: &NewRecord,
    ) -> Result<()> {
        let metadata_json = serde_json::to_string(&record.metadata)
            .map_err(|e| Error::invalid_argument(format!("unserializable metadata: {}", e)))?;
        sqlx::query(
            "INSERT INTO records (collection, id, text, category, metadata_json, embedding) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&self.collection)
        .bind(id.0 as i64)
        .bind(&record.text)
        .bind(&record.metadata.category)
        .bind(metadata_json)
        .bind(vec_to_blob(&record.embedding))
        .execute(&mut **tx)
        .await
        .map_err(Error::storage)?;
        Ok(())
    }

    async fn save_collection(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        dims: Option<usize>,
        next_id: u64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE collections \
             SET dims = ?, next_id = ?, embedding_model = COALESCE(embedding_model, ?) \
             WHERE name = ?",
        )
        .bind(dims.map(|d| d as i64))
        .bind(next_id as i64)
        .bind(&self.embedding_model)
        .bind(&self.collection)
        .execute(&mut **tx)
        .await
        .map_err(Error::storage)?;
        Ok(())
    }
}

async fn load_collection<'e, E>(executor: E, name: &str) -> Result<CollectionRow>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<(String, Option<String>, Option<i64>, i64)> = sqlx::query_as(
        "SELECT metric, embedding_model, dims, next_id FROM collections WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(executor)
    .await
    .map_err(Error::storage)?;

    let (metric, embedding_model, dims, next_id) =
        row.ok_or_else(|| Error::IndexCorrupt(format!("collection '{}' is missing", name)))?;
    let metric: DistanceMetric = metric
        .parse()
        .map_err(|_| Error::IndexCorrupt(format!("collection '{}' has metric '{}'", name, metric)))?;
    if dims.is_some_and(|d| d <= 0) || next_id < 0 {
        return Err(Error::IndexCorrupt(format!(
            "collection '{}' has invalid dims or id counter",
            name
        )));
    }

    Ok(CollectionRow {
        metric,
        embedding_model,
        dims: dims.map(|d| d as usize),
        next_id: next_id as u64,
    })
}

fn decode_record(
    row: (i64, String, String, Vec<u8>),
    dims: Option<usize>,
) -> Result<(RecordId, String, Metadata, Vec<f32>)> {
    let (id, text, metadata_json, blob) = row;
    let id = RecordId(id as u64);
    let metadata: Metadata = serde_json::from_str(&metadata_json)
        .map_err(|e| Error::IndexCorrupt(format!("{}: unreadable metadata: {}", id, e)))?;
    let expected = dims.ok_or_else(|| {
        Error::IndexCorrupt(format!("{} stored in a collection without dims", id))
    })?;
    if blob.len() != expected * 4 {
        return Err(Error::IndexCorrupt(format!(
            "{}: embedding has {} bytes, expected {}",
            id,
            blob.len(),
            expected * 4
        )));
    }
    Ok((id, text, metadata, blob_to_vec(&blob)))
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn add(&self, records: Vec<NewRecord>) -> Result<Vec<RecordId>> {
        let _guard = self.gate.write().await;
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;
        let state = load_collection(&mut *tx, &self.collection).await?;
        let dims = check_batch(&records, state.dims)?;
        reserve_ids(state.next_id, records.len())?;

        let mut next_id = state.next_id;
        let mut ids = Vec::with_capacity(records.len());
        for record in &records {
            let id = RecordId(next_id);
            self.insert(&mut tx, id, record).await?;
            ids.push(id);
            next_id += 1;
        }
        self.save_collection(&mut tx, dims, next_id).await?;
        tx.commit().await.map_err(Error::storage)?;

        debug!(collection = %self.collection, added = ids.len(), "records committed");
        Ok(ids)
    }

    async fn add_with_ids(&self, records: Vec<(RecordId, NewRecord)>) -> Result<()> {
        let _guard = self.gate.write().await;
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;
        let state = load_collection(&mut *tx, &self.collection).await?;
        let dims = check_batch(records.iter().map(|(_, r)| r), state.dims)?;
        let next_id = check_ids(records.iter().map(|(id, _)| id), state.next_id)?;

        let mut seen = HashSet::new();
        for (id, _) in &records {
            if !seen.insert(*id) {
                return Err(Error::DuplicateId(*id));
            }
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM records WHERE collection = ? AND id = ?")
                    .bind(&self.collection)
                    .bind(id.0 as i64)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(Error::storage)?;
            if exists.is_some() {
                return Err(Error::DuplicateId(*id));
            }
        }

        for (id, record) in &records {
            self.insert(&mut tx, *id, record).await?;
        }
        self.save_collection(&mut tx, dims, next_id).await?;
        tx.commit().await.map_err(Error::storage)?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        let _guard = self.gate.read().await;
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;
        let state = load_collection(&mut *tx, &self.collection).await?;
        check_query(vector, k, state.dims)?;

        let category = filter.and_then(|f| match f.get("category") {
            Some(MetadataValue::Str(c)) => Some(c.clone()),
            _ => None,
        });
        let rows: Vec<(i64, String, String, Vec<u8>)> = match category {
            Some(category) => {
                sqlx::query_as(
                    "SELECT id, text, metadata_json, embedding FROM records \
                     WHERE collection = ? AND category = ?",
                )
                .bind(&self.collection)
                .bind(category)
                .fetch_all(&mut *tx)
                .await
            }
            None => {
                sqlx::query_as(
                    "SELECT id, text, metadata_json, embedding FROM records WHERE collection = ?",
                )
                .bind(&self.collection)
                .fetch_all(&mut *tx)
                .await
            }
        }
        .map_err(Error::storage)?;
        tx.commit().await.map_err(Error::storage)?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let (id, text, metadata, embedding) = decode_record(row, state.dims)?;
            if filter.is_some_and(|f| !metadata.matches(f)) {
                continue;
            }
            let distance = state.metric.distance(vector, &embedding);
            hits.push(SearchResult {
                id,
                text,
                metadata,
                distance,
                relevance_score: state.metric.relevance(distance),
            });
        }
        Ok(rank(hits, k))
    }

    async fn delete(&self, ids: &[RecordId]) -> Result<usize> {
        let _guard = self.gate.write().await;
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;
        let mut removed = 0u64;
        for id in ids {
            removed += sqlx::query("DELETE FROM records WHERE collection = ? AND id = ?")
                .bind(&self.collection)
                .bind(id.0 as i64)
                .execute(&mut *tx)
                .await
                .map_err(Error::storage)?
                .rows_affected();
        }
        tx.commit().await.map_err(Error::storage)?;
        Ok(removed as usize)
    }

    async fn count(&self) -> Result<usize> {
        let _guard = self.gate.read().await;
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(n as usize)
    }

    async fn stats(&self) -> Result<IndexStats> {
        let _guard = self.gate.read().await;
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;
        let state = load_collection(&mut *tx, &self.collection).await?;
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::storage)?;
        let categories: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT category FROM records WHERE collection = ? ORDER BY category",
        )
        .bind(&self.collection)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::storage)?;
        tx.commit().await.map_err(Error::storage)?;

        Ok(IndexStats {
            collection: self.collection.clone(),
            total_records: total as usize,
            categories,
            dims: state.dims,
            embedding_model: state.embedding_model,
            metric: state.metric,
        })
    }

    async fn reset(&self) -> Result<()> {
        let _guard = self.gate.write().await;
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;
        let removed = sqlx::query("DELETE FROM records WHERE collection = ?")
            .bind(&self.collection)
            .execute(&mut *tx)
            .await
            .map_err(Error::storage)?
            .rows_affected();
        sqlx::query(
            "UPDATE collections SET next_id = 0, dims = NULL, embedding_model = NULL WHERE name = ?",
        )
        .bind(&self.collection)
        .execute(&mut *tx)
        .await
        .map_err(Error::storage)?;
        tx.commit().await.map_err(Error::storage)?;

        info!(collection = %self.collection, removed, "collection reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compliance_rag_core::index::MAX_RECORD_ID;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn rec(name: &str, category: &str, embedding: Vec<f32>) -> NewRecord {
        NewRecord {
            text: format!("text of {}", name),
            metadata: Metadata::new(
                format!("/corpus/{}/{}", category, name),
                name,
                category,
            )
            .with("page_count", 2i64),
            embedding,
        }
    }

    async fn open(dir: &TempDir) -> SqliteIndex {
        SqliteIndex::open(dir.path(), "compliance_docs", DistanceMetric::Cosine, "test-model")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn add_query_roundtrip_preserves_metadata() {
        let tmp = TempDir::new().unwrap();
        let index = open(&tmp).await;
        let ids = index
            .add(vec![
                rec("a.pdf", "guidance", vec![1.0, 0.0]),
                rec("b.docx", "forms", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();
        assert_eq!(ids, vec![RecordId(0), RecordId(1)]);

        let hits = index.query(&[1.0, 0.0], 5, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, RecordId(0));
        assert_eq!(hits[0].metadata.filename, "a.pdf");
        assert_eq!(hits[0].metadata.get("page_count"), Some(MetadataValue::Int(2)));
        assert!(hits[0].distance.abs() < 1e-6);
        assert!((hits[1].distance - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn reopen_reflects_last_commit() {
        let tmp = TempDir::new().unwrap();
        {
            let index = open(&tmp).await;
            index
                .add(vec![rec("a.pdf", "guidance", vec![1.0, 0.0, 0.0])])
                .await
                .unwrap();
            index.close().await;
        }
        let index = open(&tmp).await;
        assert_eq!(index.count().await.unwrap(), 1);
        let stats = index.stats().await.unwrap();
        assert_eq!(stats.dims, Some(3));
        assert_eq!(stats.embedding_model.as_deref(), Some("test-model"));
        assert_eq!(
            index.add(vec![rec("b.pdf", "guidance", vec![0.0, 1.0, 0.0])]).await.unwrap(),
            vec![RecordId(1)]
        );
        index.reset().await.unwrap();
        index.close().await;

        let index = open(&tmp).await;
        assert_eq!(index.count().await.unwrap(), 0);
        assert_eq!(index.stats().await.unwrap().dims, None);
    }

    #[tokio::test]
    async fn dimension_mismatch_rolls_back() {
        let tmp = TempDir::new().unwrap();
        let index = open(&tmp).await;
        index.add(vec![rec("a.pdf", "g", vec![1.0, 0.0])]).await.unwrap();
        let err = index
            .add(vec![rec("b.pdf", "g", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, found: 3 }));
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_ids_store_nothing() {
        let tmp = TempDir::new().unwrap();
        let index = open(&tmp).await;
        index
            .add_with_ids(vec![(RecordId(10), rec("a.pdf", "g", vec![1.0]))])
            .await
            .unwrap();
        let err = index
            .add_with_ids(vec![
                (RecordId(11), rec("b.pdf", "g", vec![1.0])),
                (RecordId(10), rec("c.pdf", "g", vec![1.0])),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateId(RecordId(10))));
        assert_eq!(index.count().await.unwrap(), 1);
        assert_eq!(
            index.add(vec![rec("d.pdf", "g", vec![1.0])]).await.unwrap(),
            vec![RecordId(11)]
        );
    }

    #[tokio::test]
    async fn out_of_range_ids_leave_collection_usable() {
        let tmp = TempDir::new().unwrap();
        let index = open(&tmp).await;
        index.add(vec![rec("a.pdf", "g", vec![1.0])]).await.unwrap();
        for id in [u64::MAX, 1 << 63] {
            let err = index
                .add_with_ids(vec![(RecordId(id), rec("b.pdf", "g", vec![1.0]))])
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)));
        }
        assert_eq!(index.count().await.unwrap(), 1);
        assert_eq!(index.query(&[1.0], 5, None).await.unwrap().len(), 1);
        assert_eq!(
            index.add(vec![rec("c.pdf", "g", vec![1.0])]).await.unwrap(),
            vec![RecordId(1)]
        );

        index
            .add_with_ids(vec![(RecordId(MAX_RECORD_ID), rec("d.pdf", "g", vec![1.0]))])
            .await
            .unwrap();
        let err = index.add(vec![rec("e.pdf", "g", vec![1.0])]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(index.stats().await.unwrap().total_records, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn queries_see_whole_snapshots_during_rebuild() {
        let tmp = TempDir::new().unwrap();
        let index = Arc::new(open(&tmp).await);
        index
            .add((0..50).map(|i| rec(&format!("r{}.pdf", i), "g", vec![1.0, i as f32])).collect())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let index = Arc::clone(&index);
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..5 {
                    seen.push(index.query(&[1.0, 1.0], 100, None).await.unwrap().len());
                    tokio::task::yield_now().await;
                }
                seen
            }));
        }
        index.reset().await.unwrap();
        index
            .add((0..30).map(|i| rec(&format!("n{}.pdf", i), "g", vec![i as f32, 1.0])).collect())
            .await
            .unwrap();

        for h in handles {
            for n in h.await.unwrap() {
                assert!(n == 50 || n == 0 || n == 30, "saw partial state: {}", n);
            }
        }
        assert_eq!(index.count().await.unwrap(), 30);
    }

    #[tokio::test]
    async fn category_filter_pushdown() {
        let tmp = TempDir::new().unwrap();
        let index = open(&tmp).await;
        index
            .add(vec![
                rec("a.pdf", "guidance", vec![1.0, 0.0]),
                rec("b.docx", "forms", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();
        let forms = MetadataFilter::category("forms");
        let hits = index.query(&[1.0, 0.0], 5, Some(&forms)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.category, "forms");

        let none = MetadataFilter::category("forms").eq("page_count", 3i64);
        assert!(index.query(&[1.0, 0.0], 5, Some(&none)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_blob_is_detected() {
        let tmp = TempDir::new().unwrap();
        let index = open(&tmp).await;
        index.add(vec![rec("a.pdf", "g", vec![1.0, 0.0])]).await.unwrap();
        sqlx::query("UPDATE records SET embedding = ? WHERE id = 0")
            .bind(vec![0u8; 3])
            .execute(&index.pool)
            .await
            .unwrap();
        assert!(matches!(
            index.query(&[1.0, 0.0], 1, None).await,
            Err(Error::IndexCorrupt(_))
        ));
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let tmp = TempDir::new().unwrap();
        let main = open(&tmp).await;
        let other = SqliteIndex::open(tmp.path(), "scratch", DistanceMetric::Euclidean, "test-model")
            .await
            .unwrap();
        main.add(vec![rec("a.pdf", "g", vec![1.0])]).await.unwrap();
        other.add(vec![rec("b.pdf", "g", vec![1.0, 2.0])]).await.unwrap();
        assert_eq!(main.count().await.unwrap(), 1);
        assert_eq!(other.count().await.unwrap(), 1);
        assert_eq!(other.metric(), DistanceMetric::Euclidean);

        let names: Vec<String> = main
            .list_collections()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["compliance_docs", "scratch"]);

        assert!(main.drop_collection("scratch").await.unwrap());
        assert!(!main.drop_collection("scratch").await.unwrap());
        assert!(main.drop_collection("compliance_docs").await.is_err());
        assert_eq!(main.list_collections().await.unwrap().len(), 1);
    }
}
