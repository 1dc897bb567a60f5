use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no readable documents under {0}")]
    EmptyInput(PathBuf),

    #[error("vector dimension mismatch: index holds {expected}-d vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid vector: {0}")]
    InvalidVector(String),

    #[error("chunk already indexed: {0}")]
    DuplicateChunk(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("language model request failed: {0}")]
    LlmRequest(String),

    #[error("language model quota exceeded: {0}")]
    LlmQuota(String),

    #[error("response synthesis failed: {source}")]
    Synthesis {
        #[source]
        source: Box<Error>,
    },

    #[error("query of {chars} characters does not fit a {limit}-character prompt")]
    QueryTooLong { chars: usize, limit: usize },

    #[error("query cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("corrupt index snapshot {path}: {reason}")]
    CorruptSnapshot { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Flat discriminant of [`Error`], for callers that report or match on the
/// failure kind without caring about the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    EmptyInput,
    DimensionMismatch,
    InvalidVector,
    DuplicateChunk,
    Embedding,
    LlmRequest,
    LlmQuota,
    Synthesis,
    QueryTooLong,
    Cancelled,
    InvalidConfig,
    NotFound,
    CorruptSnapshot,
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn synthesis(source: Error) -> Self {
        Self::Synthesis { source: Box::new(source) }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::EmptyInput(_) => ErrorKind::EmptyInput,
            Self::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Self::InvalidVector(_) => ErrorKind::InvalidVector,
            Self::DuplicateChunk(_) => ErrorKind::DuplicateChunk,
            Self::Embedding(_) => ErrorKind::Embedding,
            Self::LlmRequest(_) => ErrorKind::LlmRequest,
            Self::LlmQuota(_) => ErrorKind::LlmQuota,
            Self::Synthesis { .. } => ErrorKind::Synthesis,
            Self::QueryTooLong { .. } => ErrorKind::QueryTooLong,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::CorruptSnapshot { .. } => ErrorKind::CorruptSnapshot,
        }
    }

    /// Kind of the innermost ragline error, looking through `Synthesis`.
    pub fn root_kind(&self) -> ErrorKind {
        match self {
            Self::Synthesis { source } => source.root_kind(),
            other => other.kind(),
        }
    }

    /// Whether a retry at the network boundary may succeed.
    ///
    /// Quota errors are terminal; everything that is not a remote call is too.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LlmRequest(_) | Self::Embedding(_))
    }
}
