use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use ragline_core::retry::with_timeout;
use ragline_core::{EmbeddingProvider, Error, Result, ScoredChunk};
use ragline_vector::VectorIndex;

/// Embeds the query text and returns the `top_k` nearest chunks.
///
/// Embedding errors are returned as-is; retries belong to the provider.
pub struct VectorRetriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    embed_timeout: Option<Duration>,
}

impl VectorRetriever {
    /// Fails when the index was built by a different embedder than the one
    /// used for queries.
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        if index.embedder_id() != embedder.embedder_id() {
            return Err(Error::InvalidConfig(format!(
                "index was built with embedder '{}', queries use '{}'",
                index.embedder_id(),
                embedder.embedder_id()
            )));
        }
        Ok(Self { index, embedder, embed_timeout: None })
    }

    pub fn with_embed_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.embed_timeout = timeout;
        self
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>> {
        let vector = with_timeout(self.embed_timeout, self.embedder.embed(query), |limit| {
            Error::Embedding(format!("query embedding timed out after {limit:?}"))
        })
        .await?;
        let hits = self.index.search_chunks(&vector, top_k)?;
        debug!(top_k, hits = hits.len(), best = hits.first().map(|h| h.score), "retrieved");
        Ok(hits)
    }
}
