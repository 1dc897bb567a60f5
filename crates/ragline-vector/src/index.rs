//! Exact in-memory cosine index.
//!
//! Entries are kept in insertion order; a query scores every entry and keeps
//! the `k` best, breaking score ties by insertion order. Writers and readers
//! are serialized by one `RwLock`, so a search never sees a half-applied
//! insert or removal.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use ragline_core::{Chunk, ChunkId, Error, Result, ScoredChunk, SearchHit};

use crate::similarity::{cosine, norm, validate};

#[derive(Debug)]
struct Entry {
    chunk: Arc<Chunk>,
    norm: f64,
}

impl Entry {
    fn vector(&self) -> &[f32] {
        self.chunk.vector.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Default)]
struct State {
    dim: Option<usize>,
    next_seq: u64,
    entries: BTreeMap<u64, Entry>,
    ids: HashMap<ChunkId, u64>,
}

impl State {
    fn check(&self, vector: &[f32]) -> Result<()> {
        validate(vector).map_err(Error::InvalidVector)?;
        match self.dim {
            Some(expected) if expected != vector.len() => {
                Err(Error::DimensionMismatch { expected, actual: vector.len() })
            }
            _ => Ok(()),
        }
    }

    fn push(&mut self, mut chunk: Chunk, vector: Vec<f32>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.dim.get_or_insert(vector.len());
        let norm = norm(&vector);
        chunk.vector = Some(vector);
        self.ids.insert(chunk.id.clone(), seq);
        self.entries.insert(seq, Entry { chunk: Arc::new(chunk), norm });
    }

    /// `(seq, score)` of the best `k` entries, best first.
    fn rank(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        self.check(query)?;
        let query_norm = norm(query);
        let mut scored: Vec<(u64, f32)> = self
            .entries
            .iter()
            .map(|(&seq, e)| (seq, cosine(query, query_norm, e.vector(), e.norm)))
            .collect();

        let by_rank = |a: &(u64, f32), b: &(u64, f32)| -> Ordering { b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)) };
        if scored.len() > k {
            scored.select_nth_unstable_by(k - 1, by_rank);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_rank);
        Ok(scored)
    }
}

#[derive(Debug)]
pub struct VectorIndex {
    embedder_id: String,
    state: RwLock<State>,
}

impl VectorIndex {
    /// Empty index for vectors produced by `embedder_id`. The first insert
    /// fixes the dimensionality.
    pub fn new(embedder_id: impl Into<String>) -> Self {
        Self { embedder_id: embedder_id.into(), state: RwLock::new(State::default()) }
    }

    /// Empty index whose dimensionality is already fixed.
    pub(crate) fn with_dim(embedder_id: impl Into<String>, dim: Option<usize>) -> Self {
        let state = State { dim, ..State::default() };
        Self { embedder_id: embedder_id.into(), state: RwLock::new(state) }
    }

    pub fn embedder_id(&self) -> &str {
        &self.embedder_id
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, chunk: Chunk, vector: Vec<f32>) -> Result<()> {
        let mut state = self.write();
        state.check(&vector)?;
        if state.ids.contains_key(&chunk.id) {
            return Err(Error::DuplicateChunk(chunk.id));
        }
        state.push(chunk, vector);
        Ok(())
    }

    /// Insert all pairs or none of them.
    pub fn insert_batch(&self, items: Vec<(Chunk, Vec<f32>)>) -> Result<()> {
        let mut state = self.write();
        let mut dim = state.dim;
        let mut seen = std::collections::HashSet::with_capacity(items.len());
        for (chunk, vector) in &items {
            validate(vector).map_err(Error::InvalidVector)?;
            let expected = *dim.get_or_insert(vector.len());
            if expected != vector.len() {
                return Err(Error::DimensionMismatch { expected, actual: vector.len() });
            }
            if state.ids.contains_key(&chunk.id) || !seen.insert(chunk.id.as_str()) {
                return Err(Error::DuplicateChunk(chunk.id.clone()));
            }
        }
        let added = items.len();
        for (chunk, vector) in items {
            state.push(chunk, vector);
        }
        debug!(added, total = state.entries.len(), "inserted batch");
        Ok(())
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let state = self.read();
        let ranked = state.rank(query, k)?;
        Ok(ranked
            .into_iter()
            .filter_map(|(seq, score)| {
                state.entries.get(&seq).map(|e| SearchHit { id: e.chunk.id.clone(), score })
            })
            .collect())
    }

    /// Like [`search`](Self::search), resolved to chunks under the same lock.
    pub fn search_chunks(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let state = self.read();
        let ranked = state.rank(query, k)?;
        Ok(ranked
            .into_iter()
            .filter_map(|(seq, score)| {
                state.entries.get(&seq).map(|e| ScoredChunk { chunk: Arc::clone(&e.chunk), score })
            })
            .collect())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Chunk>> {
        let mut state = self.write();
        let seq = state.ids.remove(id)?;
        state.entries.remove(&seq).map(|e| e.chunk)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Chunk>> {
        let state = self.read();
        let seq = state.ids.get(id)?;
        state.entries.get(seq).map(|e| Arc::clone(&e.chunk))
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    pub fn dim(&self) -> Option<usize> {
        self.read().dim
    }

    /// All chunks in insertion order.
    pub fn chunks(&self) -> Vec<Arc<Chunk>> {
        self.read().entries.values().map(|e| Arc::clone(&e.chunk)).collect()
    }

    /// Number of distinct source documents.
    pub fn document_count(&self) -> usize {
        let state = self.read();
        let mut docs: Vec<&str> = state.entries.values().map(|e| e.chunk.doc_id.as_str()).collect();
        docs.sort_unstable();
        docs.dedup();
        docs.len()
    }
}
