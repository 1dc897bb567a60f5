//! Bulk indexing: embed chunks in batches and insert them in loader order.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use ragline_core::config::EmbeddingSettings;
use ragline_core::{Chunk, EmbeddingProvider, Error, Result};

use crate::index::VectorIndex;

pub struct IndexBuilder {
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    concurrency: usize,
    show_progress: bool,
}

impl IndexBuilder {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder, batch_size: 32, concurrency: 4, show_progress: false }
    }

    pub fn from_settings(embedder: Arc<dyn EmbeddingProvider>, settings: &EmbeddingSettings) -> Self {
        Self::new(embedder).batch_size(settings.batch_size).concurrency(settings.concurrency)
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }

    /// Maximum number of embedding batches in flight.
    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn show_progress(mut self, yes: bool) -> Self {
        self.show_progress = yes;
        self
    }

    pub async fn build(&self, chunks: Vec<Chunk>) -> Result<VectorIndex> {
        let index = VectorIndex::new(self.embedder.embedder_id());
        self.extend(&index, chunks).await?;
        Ok(index)
    }

    /// Embed and insert `chunks` into an existing index. Batches complete
    /// concurrently but are inserted in input order; a failing batch stops
    /// the build and leaves earlier batches in place.
    pub async fn extend(&self, index: &VectorIndex, chunks: Vec<Chunk>) -> Result<usize> {
        if index.embedder_id() != self.embedder.embedder_id() {
            return Err(Error::InvalidConfig(format!(
                "index holds '{}' vectors, builder embeds with '{}'",
                index.embedder_id(),
                self.embedder.embedder_id()
            )));
        }
        if chunks.is_empty() {
            return Ok(0);
        }

        let total = chunks.len();
        let pb = self.progress_bar(total);
        let mut batches = Vec::with_capacity(total.div_ceil(self.batch_size));
        let mut rest = chunks.into_iter().peekable();
        while rest.peek().is_some() {
            batches.push(rest.by_ref().take(self.batch_size).collect::<Vec<_>>());
        }

        let embedder = &self.embedder;
        let mut embedded = stream::iter(batches.into_iter().map(|batch| async move {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embedder.embed_batch(&texts).await?;
            Ok::<_, Error>((batch, vectors))
        }))
        .buffered(self.concurrency);

        let mut inserted = 0usize;
        while let Some(result) = embedded.next().await {
            let (batch, vectors) = result?;
            if vectors.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "provider returned {} embeddings for {} chunks",
                    vectors.len(),
                    batch.len()
                )));
            }
            let n = batch.len();
            index.insert_batch(batch.into_iter().zip(vectors).collect())?;
            inserted += n;
            pb.inc(n as u64);
        }
        pb.finish_with_message("indexed");
        info!(chunks = inserted, total = index.len(), embedder = index.embedder_id(), "indexing complete");
        Ok(inserted)
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        pb.set_style(style);
        pb
    }
}
