//! Shared building blocks for the ragline retrieval pipeline.
//!
//! Holds the data model, the error taxonomy, the two external-collaborator
//! interfaces (embedding provider, language model), typed configuration and
//! the document loader.

pub mod config;
pub mod error;
pub mod loader;
pub mod retry;
pub mod traits;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use traits::{EmbeddingProvider, LanguageModel};
pub use types::{
    Answer, ChatMessage, Chunk, ChunkId, ChunkSource, CompletionOptions, QueryRequest, Role,
    ScoredChunk, SearchHit,
};
