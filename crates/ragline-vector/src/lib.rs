//! In-memory vector index with exact cosine search, bulk building, and
//! JSON snapshot persistence.
pub mod builder;
pub mod index;
pub mod similarity;
pub mod snapshot;

pub use builder::IndexBuilder;
pub use index::VectorIndex;
