//! The query pipeline: retrieve, postprocess, synthesize.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use ragline_core::config::{ChunkingSettings, Settings, SynthesisMode};
use ragline_core::loader::DocumentLoader;
use ragline_core::{Answer, CompletionOptions, EmbeddingProvider, Error, LanguageModel, QueryRequest, Result};
use ragline_vector::{IndexBuilder, VectorIndex};

use crate::postprocess::{KeywordRerank, Postprocessor, PostprocessorChain, SimilarityCutoff};
use crate::retriever::VectorRetriever;
use crate::synthesizer::{ResponseSynthesizer, SynthesizerConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct QueryConfig {
    pub top_k: usize,
    pub similarity_cutoff: Option<f32>,
    pub keyword_rerank_weight: Option<f32>,
    pub model_name: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub stop_sequences: Vec<String>,
    pub context_window: u32,
    pub synthesis_mode: SynthesisMode,
    pub cite_sources: bool,
    pub embed_timeout: Option<Duration>,
    pub llm_timeout: Option<Duration>,
    /// Used by [`QueryEngine::from_directory`] when it loads documents.
    pub chunking: ChunkingSettings,
    pub embed_batch_size: usize,
    pub embed_concurrency: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        let options = CompletionOptions::default();
        Self {
            top_k: 10,
            similarity_cutoff: None,
            keyword_rerank_weight: None,
            model_name: options.model_name,
            temperature: options.temperature,
            max_output_tokens: options.max_output_tokens,
            stop_sequences: options.stop_sequences,
            context_window: 4096,
            synthesis_mode: SynthesisMode::Compact,
            cite_sources: false,
            embed_timeout: Some(Duration::from_secs(30)),
            llm_timeout: Some(Duration::from_secs(60)),
            chunking: ChunkingSettings::default(),
            embed_batch_size: 32,
            embed_concurrency: 4,
        }
    }
}

impl QueryConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            top_k: settings.retrieval.top_k,
            similarity_cutoff: settings.retrieval.similarity_cutoff,
            keyword_rerank_weight: settings.retrieval.keyword_rerank_weight,
            model_name: settings.llm.model_name.clone(),
            temperature: settings.llm.temperature,
            max_output_tokens: settings.llm.max_output_tokens,
            stop_sequences: settings.llm.stop_sequences.clone(),
            context_window: settings.llm.context_window,
            synthesis_mode: settings.synthesis.mode,
            cite_sources: settings.synthesis.cite_sources,
            embed_timeout: Some(Duration::from_secs(settings.embedding.timeout_secs)),
            llm_timeout: Some(Duration::from_secs(settings.llm.timeout_secs)),
            chunking: settings.chunking.clone(),
            embed_batch_size: settings.embedding.batch_size,
            embed_concurrency: settings.embedding.concurrency,
        }
    }

    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            model_name: self.model_name.clone(),
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
            stop_sequences: self.stop_sequences.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        QueryRequest::new("", self.top_k, self.similarity_cutoff)?;
        self.completion_options().validate()?;
        if self.context_window <= self.max_output_tokens {
            return Err(Error::InvalidConfig(format!(
                "context_window ({}) must exceed max_output_tokens ({})",
                self.context_window, self.max_output_tokens
            )));
        }
        if let Some(weight) = self.keyword_rerank_weight {
            KeywordRerank::new(weight)?;
        }
        Ok(())
    }

    fn synthesizer_config(&self) -> SynthesizerConfig {
        SynthesizerConfig {
            options: self.completion_options(),
            context_window: self.context_window,
            mode: self.synthesis_mode,
            cite_sources: self.cite_sources,
            llm_timeout: self.llm_timeout,
        }
    }
}

/// Answers questions over an indexed corpus.
///
/// Holds no per-query state; concurrent queries share the index read lock.
pub struct QueryEngine {
    retriever: VectorRetriever,
    postprocessors: PostprocessorChain,
    synthesizer: ResponseSynthesizer,
    config: QueryConfig,
}

impl QueryEngine {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
        config: QueryConfig,
    ) -> Result<Self> {
        config.validate()?;
        let retriever = VectorRetriever::new(index, embedder)?.with_embed_timeout(config.embed_timeout);
        let mut postprocessors = PostprocessorChain::new();
        if let Some(weight) = config.keyword_rerank_weight {
            postprocessors.push(Box::new(KeywordRerank::new(weight)?));
        }
        let synthesizer = ResponseSynthesizer::new(llm, config.synthesizer_config());
        Ok(Self { retriever, postprocessors, synthesizer, config })
    }

    /// Load, chunk, embed and index every text file under `path`.
    ///
    /// Fails with `EmptyInput` before anything is embedded when the
    /// directory yields no chunks.
    pub async fn from_directory(
        path: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
        config: QueryConfig,
    ) -> Result<Self> {
        config.validate()?;
        let chunks = DocumentLoader::new(config.chunking.clone()).load(path)?;
        info!(path = %path.display(), chunks = chunks.len(), "documents loaded");
        let index = IndexBuilder::new(Arc::clone(&embedder))
            .batch_size(config.embed_batch_size)
            .concurrency(config.embed_concurrency)
            .build(chunks)
            .await?;
        Self::new(Arc::new(index), embedder, llm, config)
    }

    /// Append a custom stage after the configured ones.
    pub fn with_postprocessor(mut self, stage: impl Postprocessor + 'static) -> Self {
        self.postprocessors.push(Box::new(stage));
        self
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        self.retriever.index()
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub async fn query(&self, text: &str) -> Result<Answer> {
        let request = QueryRequest::new(text, self.config.top_k, self.config.similarity_cutoff)?;
        self.query_request(&request).await
    }

    #[tracing::instrument(skip(self, request), fields(top_k = request.top_k(), cutoff = ?request.similarity_cutoff()))]
    pub async fn query_request(&self, request: &QueryRequest) -> Result<Answer> {
        let query = request.text();
        let retrieved = self.retriever.retrieve(query, request.top_k()).await?;
        let retrieved_count = retrieved.len();

        let mut kept = match request.similarity_cutoff() {
            Some(cutoff) => SimilarityCutoff::new(cutoff)?.process(query, retrieved),
            None => retrieved,
        };
        kept = self.postprocessors.apply(query, kept);
        debug!(retrieved = retrieved_count, kept = kept.len(), "postprocessing done");

        let answer = self.synthesizer.synthesize(query, &kept).await?;
        info!(retrieved = retrieved_count, used = answer.used_chunks.len(), "query answered");
        Ok(answer)
    }

    /// Like [`query`](Self::query), abandoned as soon as `cancel` fires. No
    /// partial answer is returned.
    pub async fn query_with_cancel(&self, text: &str, cancel: &CancellationToken) -> Result<Answer> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("query cancelled");
                Err(Error::Cancelled)
            }
            result = self.query(text) => result,
        }
    }
}
