//! Retrieval, postprocessing and answer synthesis over a [`ragline_vector::VectorIndex`].
pub mod engine;
pub mod postprocess;
pub mod retriever;
pub mod synthesizer;

pub use engine::{QueryConfig, QueryEngine};
pub use postprocess::{KeywordRerank, Postprocessor, PostprocessorChain, SimilarityCutoff};
pub use retriever::VectorRetriever;
pub use synthesizer::{ResponseSynthesizer, SynthesizerConfig, EMPTY_RESPONSE};
