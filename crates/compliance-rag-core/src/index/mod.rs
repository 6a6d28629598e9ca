//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the persistence seam of the retrieval core:
//! the ingestion pipeline writes through it and the retriever reads through
//! it. Backends:
//!
//! - [`memory::MemoryIndex`]: copy-on-write, in-process; tests and
//!   ephemeral collections.
//! - `SqliteIndex` in the `compliance-rag` app crate: persistent.
//!
//! # Contract
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`add`](VectorIndex::add) | Append records, assigning fresh monotonic ids |
//! | [`add_with_ids`](VectorIndex::add_with_ids) | Append under caller-chosen ids; duplicates rejected |
//! | [`query`](VectorIndex::query) | `k` nearest records, optional exact-match filter |
//! | [`delete`](VectorIndex::delete) | Remove records; ids are never reused |
//! | [`count`](VectorIndex::count) / [`stats`](VectorIndex::stats) | Collection summary |
//! | [`reset`](VectorIndex::reset) | Atomically discard everything and restart the id space |
//!
//! Every mutation is all-or-nothing, and readers never observe a
//! half-applied mutation.

pub mod memory;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embedding::{cosine_similarity, euclidean_distance};
use crate::error::{Error, Result};
use crate::models::{MetadataFilter, NewRecord, RecordId, SearchResult};

/// Distance function fixed per collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Normalised cosine distance `(1 - cos) / 2`, in `[0, 1]`.
    #[default]
    Cosine,
    /// Plain L2 distance, in `[0, inf)`.
    Euclidean,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
        }
    }

    /// Distance between two equal-length vectors; lower is closer.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            DistanceMetric::Cosine => ((1.0 - cosine_similarity(a, b) as f64) / 2.0).clamp(0.0, 1.0),
            DistanceMetric::Euclidean => euclidean_distance(a, b) as f64,
        }
    }

    /// Monotonically decreasing map from distance into `[0, 1]`.
    pub fn relevance(&self, distance: f64) -> f64 {
        match self {
            DistanceMetric::Cosine => (1.0 - distance).clamp(0.0, 1.0),
            DistanceMetric::Euclidean => 1.0 / (1.0 + distance.max(0.0)),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            other => Err(Error::invalid_argument(format!(
                "unknown distance metric '{}' (expected cosine or euclidean)",
                other
            ))),
        }
    }
}

/// Summary of one collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub collection: String,
    pub total_records: usize,
    /// Distinct `category` values, sorted.
    pub categories: Vec<String>,
    /// `None` until the first add after creation or reset.
    pub dims: Option<usize>,
    pub embedding_model: Option<String>,
    pub metric: DistanceMetric,
}

/// A persistent, queryable collection of embedded chunks.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Name of the collection this handle is bound to.
    fn collection(&self) -> &str;

    /// Append records, returning their newly assigned ids in input order.
    async fn add(&self, records: Vec<NewRecord>) -> Result<Vec<RecordId>>;

    /// Append records under caller-chosen ids.
    ///
    /// Fails with [`Error::DuplicateId`] (storing nothing) if any id already
    /// exists or repeats within the call.
    async fn add_with_ids(&self, records: Vec<(RecordId, NewRecord)>) -> Result<()>;

    /// The `k` records nearest to `vector`, ascending by distance with ties
    /// broken by id.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>>;

    /// Remove records by id, returning how many existed.
    async fn delete(&self, ids: &[RecordId]) -> Result<usize>;

    async fn count(&self) -> Result<usize>;

    async fn stats(&self) -> Result<IndexStats>;

    /// Discard all records and restart the id space at `doc_0`.
    async fn reset(&self) -> Result<()>;
}

/// Validate a batch before it touches storage and return its dimensionality.
///
/// All vectors must be non-empty, share one length, and agree with
/// `existing_dims` when the collection already has one. Metadata must pass
/// [`Metadata::validate`](crate::models::Metadata::validate).
pub fn check_batch<'a>(
    records: impl IntoIterator<Item = &'a NewRecord>,
    existing_dims: Option<usize>,
) -> Result<Option<usize>> {
    let mut dims = existing_dims;
    for record in records {
        record.metadata.validate()?;
        let found = record.embedding.len();
        if found == 0 {
            return Err(Error::invalid_argument("embedding must not be empty"));
        }
        match dims {
            Some(expected) if expected != found => {
                return Err(Error::DimensionMismatch { expected, found });
            }
            Some(_) => {}
            None => dims = Some(found),
        }
    }
    Ok(dims)
}

/// Largest id a record may carry. The counter one past it still fits a
/// signed 64-bit integer column.
pub const MAX_RECORD_ID: u64 = i64::MAX as u64 - 1;

/// Counter value after assigning `count` fresh ids from `next_id`.
pub fn reserve_ids(next_id: u64, count: usize) -> Result<u64> {
    next_id
        .checked_add(count as u64)
        .filter(|next| *next <= MAX_RECORD_ID + 1)
        .ok_or_else(|| Error::invalid_argument("record id space exhausted"))
}

/// Range-check caller-chosen ids and return the counter value that follows
/// the largest of them (or `next_id`, if that is larger).
pub fn check_ids<'a>(ids: impl IntoIterator<Item = &'a RecordId>, next_id: u64) -> Result<u64> {
    let mut next = next_id;
    for id in ids {
        if id.0 > MAX_RECORD_ID {
            return Err(Error::invalid_argument(format!(
                "record id {} exceeds the maximum of {}",
                id.0, MAX_RECORD_ID
            )));
        }
        next = next.max(id.0 + 1);
    }
    Ok(next)
}

/// Validate query arguments against the collection's dimensionality.
pub fn check_query(vector: &[f32], k: usize, dims: Option<usize>) -> Result<()> {
    if k == 0 {
        return Err(Error::invalid_argument("k must be a positive integer"));
    }
    if let Some(expected) = dims {
        if vector.len() != expected {
            return Err(Error::DimensionMismatch {
                expected,
                found: vector.len(),
            });
        }
    }
    Ok(())
}

/// Sort scored hits by `(distance, id)` and keep the first `k`.
pub fn rank(mut hits: Vec<SearchResult>, k: usize) -> Vec<SearchResult> {
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(k);
    hits
}
