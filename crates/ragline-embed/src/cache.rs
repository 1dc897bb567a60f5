//! In-memory embedding cache keyed by `(embedder_id, blake3(content))`.
//!
//! The cache is consulted before calling the wrapped provider and written
//! through on misses, so re-indexing unchanged text costs no provider calls.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use ragline_core::{EmbeddingProvider, Error, Result};

pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    entries: Mutex<HashMap<String, Vec<f32>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            inner,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key(&self, text: &str) -> String {
        format!("{}:{}", self.inner.embedder_id(), content_hash(text))
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    fn embedder_id(&self) -> &str {
        self.inner.embedder_id()
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(&[text.to_string()]).await?;
        out.pop().ok_or_else(|| Error::Embedding("provider returned no embedding".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let keys: Vec<String> = texts.iter().map(|t| self.key(t)).collect();
        let mut out: Vec<Option<Vec<f32>>> = {
            let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            keys.iter().map(|k| entries.get(k).cloned()).collect()
        };

        let missing: Vec<usize> = (0..texts.len()).filter(|&i| out[i].is_none()).collect();
        self.hits.fetch_add(texts.len() - missing.len(), Ordering::Relaxed);
        self.misses.fetch_add(missing.len(), Ordering::Relaxed);

        if !missing.is_empty() {
            debug!(hits = texts.len() - missing.len(), misses = missing.len(), "embedding cache lookup");
            let miss_texts: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed_batch(&miss_texts).await?;
            if fresh.len() != miss_texts.len() {
                return Err(Error::Embedding(format!(
                    "provider returned {} embeddings for {} inputs",
                    fresh.len(),
                    miss_texts.len()
                )));
            }
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            for (&i, vector) in missing.iter().zip(fresh) {
                entries.insert(keys[i].clone(), vector.clone());
                out[i] = Some(vector);
            }
        }

        out.into_iter()
            .map(|v| v.ok_or_else(|| Error::Embedding("embedding missing after cache fill".into())))
            .collect()
    }
}
