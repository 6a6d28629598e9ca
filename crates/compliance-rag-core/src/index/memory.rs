//! In-memory [`VectorIndex`] for tests and ephemeral collections.
//!
//! State lives in an `Arc` behind a `std::sync::RwLock`. Queries clone the
//! `Arc` and release the lock immediately, so each one ranks a consistent
//! snapshot. Writers build a modified copy and swap it in, so a reader sees
//! either all of a mutation or none of it. Search is brute force over every
//! stored vector.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{MetadataFilter, NewRecord, RecordId, SearchResult};

use super::{
    check_batch, check_ids, check_query, rank, reserve_ids, DistanceMetric, IndexStats,
    VectorIndex,
};

#[derive(Clone, Default)]
struct State {
    records: BTreeMap<RecordId, Arc<NewRecord>>,
    next_id: u64,
    dims: Option<usize>,
    model: Option<String>,
}

/// Copy-on-write in-memory vector index.
pub struct MemoryIndex {
    collection: String,
    metric: DistanceMetric,
    embedding_model: String,
    state: RwLock<Arc<State>>,
}

impl MemoryIndex {
    pub fn new(
        collection: impl Into<String>,
        metric: DistanceMetric,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            metric,
            embedding_model: embedding_model.into(),
            state: RwLock::new(Arc::new(State::default())),
        }
    }

    fn snapshot(&self) -> Result<Arc<State>> {
        self.state
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| Error::storage("memory index lock poisoned"))
    }

    /// Apply `f` to a private copy of the state and publish it on success.
    fn mutate<T>(&self, f: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| Error::storage("memory index lock poisoned"))?;
        let mut next = State::clone(&guard);
        let out = f(&mut next)?;
        *guard = Arc::new(next);
        Ok(out)
    }

    fn fix_dims(&self, state: &mut State, dims: Option<usize>) {
        if state.dims.is_none() && dims.is_some() {
            state.dims = dims;
            state.model = Some(self.embedding_model.clone());
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn add(&self, records: Vec<NewRecord>) -> Result<Vec<RecordId>> {
        self.mutate(|state| {
            let dims = check_batch(&records, state.dims)?;
            reserve_ids(state.next_id, records.len())?;
            self.fix_dims(state, dims);
            let mut ids = Vec::with_capacity(records.len());
            for record in records {
                let id = RecordId(state.next_id);
                state.next_id += 1;
                state.records.insert(id, Arc::new(record));
                ids.push(id);
            }
            Ok(ids)
        })
    }

    async fn add_with_ids(&self, records: Vec<(RecordId, NewRecord)>) -> Result<()> {
        self.mutate(|state| {
            let dims = check_batch(records.iter().map(|(_, r)| r), state.dims)?;
            let next_id = check_ids(records.iter().map(|(id, _)| id), state.next_id)?;
            let mut seen = HashSet::new();
            for (id, _) in &records {
                if state.records.contains_key(id) || !seen.insert(*id) {
                    return Err(Error::DuplicateId(*id));
                }
            }
            self.fix_dims(state, dims);
            state.next_id = next_id;
            for (id, record) in records {
                state.records.insert(id, Arc::new(record));
            }
            Ok(())
        })
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        let state = self.snapshot()?;
        check_query(vector, k, state.dims)?;

        let hits = state
            .records
            .iter()
            .filter(|(_, r)| filter.map_or(true, |f| r.metadata.matches(f)))
            .map(|(id, r)| {
                let distance = self.metric.distance(vector, &r.embedding);
                SearchResult {
                    id: *id,
                    text: r.text.clone(),
                    metadata: r.metadata.clone(),
                    distance,
                    relevance_score: self.metric.relevance(distance),
                }
            })
            .collect();
        Ok(rank(hits, k))
    }

    async fn delete(&self, ids: &[RecordId]) -> Result<usize> {
        self.mutate(|state| {
            Ok(ids
                .iter()
                .filter(|id| state.records.remove(*id).is_some())
                .count())
        })
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.snapshot()?.records.len())
    }

    async fn stats(&self) -> Result<IndexStats> {
        let state = self.snapshot()?;
        let categories: BTreeSet<&str> = state
            .records
            .values()
            .map(|r| r.metadata.category.as_str())
            .collect();
        Ok(IndexStats {
            collection: self.collection.clone(),
            total_records: state.records.len(),
            categories: categories.into_iter().map(str::to_string).collect(),
            dims: state.dims,
            embedding_model: state.model.clone(),
            metric: self.metric,
        })
    }

    async fn reset(&self) -> Result<()> {
        self.mutate(|state| {
            *state = State::default();
            Ok(())
        })
    }
}
