use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChatMessage, CompletionOptions};

/// Maps text to a fixed-length vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier for the provider/model (e.g. `hash:xxh64:d256`).
    fn embedder_id(&self) -> &str;
    /// Embedding dimensionality (D).
    fn dim(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Opaque text-completion / chat service.
///
/// Implementations that talk to a remote service own their retry policy;
/// callers treat every returned error as final.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String>;
    async fn chat(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<String>;
}
