//! Domain types shared by the loader, the index and the query pipeline.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub type ChunkId = String;

/// Where a chunk came from.
///
/// `offset` is the byte offset of the chunk text inside the source file, so
/// `&file[offset..offset + text.len()]` is the chunk text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSource {
    pub path: String,
    pub offset: usize,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// A unit of retrievable text.
///
/// - `id`: globally unique chunk identifier (`"{doc_id}:{chunk_index}"`)
/// - `doc_id`: stable document identity (path relative to the load root)
/// - `text`: the text payload
/// - `source`: origin descriptor
/// - `vector`: embedding, set once by the vector index at insertion time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub doc_id: String,
    pub text: String,
    pub source: ChunkSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

impl Chunk {
    pub fn new(id: impl Into<ChunkId>, text: impl Into<String>, source: ChunkSource) -> Self {
        let id = id.into();
        let doc_id = id.rsplit_once(':').map_or_else(|| id.clone(), |(doc, _)| doc.to_string());
        Self { id, doc_id, text: text.into(), source, vector: None }
    }
}

/// Raw index match: `id` matches `Chunk::id`, higher `score` is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: ChunkId,
    pub score: f32,
}

/// A retrieved chunk with its similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Arc<Chunk>,
    pub score: f32,
}

/// One validated query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    text: String,
    top_k: usize,
    similarity_cutoff: Option<f32>,
}

impl QueryRequest {
    pub fn new(text: impl Into<String>, top_k: usize, similarity_cutoff: Option<f32>) -> Result<Self> {
        if top_k == 0 {
            return Err(Error::InvalidConfig("top_k must be at least 1".into()));
        }
        if let Some(cutoff) = similarity_cutoff {
            if !(0.0..=1.0).contains(&cutoff) {
                return Err(Error::InvalidConfig(format!(
                    "similarity_cutoff must be within [0, 1], got {cutoff}"
                )));
            }
        }
        Ok(Self { text: text.into(), top_k, similarity_cutoff })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn similarity_cutoff(&self) -> Option<f32> {
        self.similarity_cutoff
    }
}

/// Final result of a query: the model's text and the chunks it was shown,
/// in rank order.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub used_chunks: Vec<Arc<Chunk>>,
}

impl Answer {
    /// `path@offset` for every used chunk, numbered like the context blocks.
    pub fn sources(&self) -> Vec<String> {
        self.used_chunks
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[{}] {}@{}", i + 1, c.source.path, c.source.offset))
            .collect()
    }
}

impl std::fmt::Display for Answer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Per-call generation parameters for a [`crate::LanguageModel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub model_name: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            model_name: "gpt-3.5-turbo".to_string(),
            temperature: 0.1,
            max_output_tokens: 256,
            stop_sequences: Vec::new(),
        }
    }
}

impl CompletionOptions {
    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(Error::InvalidConfig("model_name must not be empty".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::InvalidConfig(format!(
                "temperature must be within [0, 2], got {}",
                self.temperature
            )));
        }
        if self.max_output_tokens == 0 {
            return Err(Error::InvalidConfig("max_output_tokens must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_request_rejects_zero_top_k_and_out_of_range_cutoff() {
        assert!(QueryRequest::new("q", 0, None).is_err());
        assert!(QueryRequest::new("q", 1, Some(1.5)).is_err());
        assert!(QueryRequest::new("q", 1, Some(-0.1)).is_err());
        let req = QueryRequest::new("q", 3, Some(0.7)).expect("valid");
        assert_eq!(req.top_k(), 3);
        assert_eq!(req.similarity_cutoff(), Some(0.7));
    }

    #[test]
    fn chunk_new_derives_doc_id() {
        let src = ChunkSource { path: "a/b.txt".into(), offset: 0, chunk_index: 2, total_chunks: 3 };
        let chunk = Chunk::new("a/b.txt:2", "hello", src);
        assert_eq!(chunk.doc_id, "a/b.txt");
        assert!(chunk.vector.is_none());
    }

    #[test]
    fn completion_options_bounds() {
        let mut opts = CompletionOptions::default();
        assert!(opts.validate().is_ok());
        opts.temperature = 2.5;
        assert!(opts.validate().is_err());
        opts.temperature = 0.0;
        opts.max_output_tokens = 0;
        assert!(opts.validate().is_err());
    }
}
