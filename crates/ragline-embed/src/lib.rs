//! Embedding providers.
//!
//! `get_default_embedder` picks the provider named in the settings. Setting
//! `RAGLINE_USE_FAKE_EMBEDDINGS=1` forces the hashing embedder for fast and
//! deterministic outputs in tests and development.
use std::sync::Arc;

use tracing::info;

use ragline_core::config::EmbeddingSettings;
use ragline_core::{EmbeddingProvider, Error, Result};

pub mod cache;
pub mod hashing;
pub mod normalize;
pub mod openai;

pub use cache::CachedEmbedder;
pub use hashing::HashingEmbedder;
pub use openai::OpenAiEmbedder;

pub fn use_fake_embeddings() -> bool {
    std::env::var("RAGLINE_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider = if use_fake_embeddings() { "hash" } else { settings.provider.as_str() };
    let base: Arc<dyn EmbeddingProvider> = match provider {
        "hash" => Arc::new(HashingEmbedder::new(settings.dim)),
        "openai" => Arc::new(OpenAiEmbedder::from_settings(settings)?),
        other => {
            return Err(Error::InvalidConfig(format!("unknown embedding provider '{other}'")));
        }
    };
    info!(embedder = base.embedder_id(), "embedding provider ready");
    if settings.cache {
        Ok(Arc::new(CachedEmbedder::new(base)))
    } else {
        Ok(base)
    }
}
