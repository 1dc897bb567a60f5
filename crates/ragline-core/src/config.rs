//! Typed configuration and path helpers.
//!
//! Uses Figment to merge serde defaults, `config.toml`, `config.<env>.toml`
//! and `RAGLINE_*` env vars (`__` separates nested keys, e.g.
//! `RAGLINE_LLM__MODEL_NAME`). The result is an explicit [`Settings`] value
//! that is handed to the components at construction time.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::CompletionOptions;

pub const ENV_PREFIX: &str = "RAGLINE_";

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::layered(Path::new("."), &env_name, ENV_PREFIX)
    }

    pub fn layered(base: &Path, env_name: &str, env_prefix: &str) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(base.join("config.toml")));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file(base.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(base.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(base.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed(env_prefix).split("__"));
        let config = Self { figment };
        config.settings()?;
        Ok(config)
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{}': {}", key, e)))
    }

    /// Extract and validate the full settings tree.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub llm: LlmSettings,
    pub embedding: EmbeddingSettings,
    pub retrieval: RetrievalSettings,
    pub chunking: ChunkingSettings,
    pub synthesis: SynthesisSettings,
    pub data: DataSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// `openai` (any OpenAI-compatible endpoint) or `echo`.
    pub provider: String,
    pub model_name: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub context_window: u32,
    pub stop_sequences: Vec<String>,
    pub base_url: String,
    /// Name of the env var holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model_name: "gpt-3.5-turbo".to_string(),
            temperature: 0.1,
            max_output_tokens: 256,
            context_window: 4096,
            stop_sequences: Vec::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 60,
            max_retries: 3,
        }
    }
}

impl LlmSettings {
    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            model_name: self.model_name.clone(),
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
            stop_sequences: self.stop_sequences.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// `hash` (offline, deterministic) or `openai`.
    pub provider: String,
    pub model_name: String,
    /// Output dimension of the hashing embedder.
    pub dim: usize,
    pub base_url: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub batch_size: usize,
    pub concurrency: usize,
    pub cache: bool,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: "hash".to_string(),
            model_name: "text-embedding-3-small".to_string(),
            dim: 256,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            batch_size: 32,
            concurrency: 4,
            cache: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub similarity_cutoff: Option<f32>,
    /// Weight of query-term overlap in the optional keyword re-rank stage.
    pub keyword_rerank_weight: Option<f32>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { top_k: 10, similarity_cutoff: None, keyword_rerank_weight: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub max_chunk_chars: usize,
    pub chunk_overlap_chars: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { max_chunk_chars: 1024, chunk_overlap_chars: 128 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisMode {
    /// Keep the highest-ranked chunks that fit one prompt.
    #[default]
    Compact,
    /// Walk all chunks in windows, refining the answer per window.
    Refine,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisSettings {
    pub mode: SynthesisMode,
    pub cite_sources: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub data_dir: String,
    pub index_path: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self { data_dir: "data".to_string(), index_path: "storage/index.json".to_string() }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.llm.completion_options().validate()?;
        if self.llm.context_window <= self.llm.max_output_tokens {
            return Err(Error::InvalidConfig(format!(
                "llm.context_window ({}) must exceed llm.max_output_tokens ({})",
                self.llm.context_window, self.llm.max_output_tokens
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(Error::InvalidConfig("retrieval.top_k must be at least 1".into()));
        }
        if let Some(cutoff) = self.retrieval.similarity_cutoff {
            if !(0.0..=1.0).contains(&cutoff) {
                return Err(Error::InvalidConfig(format!(
                    "retrieval.similarity_cutoff must be within [0, 1], got {cutoff}"
                )));
            }
        }
        if let Some(weight) = self.retrieval.keyword_rerank_weight {
            if !(0.0..=1.0).contains(&weight) {
                return Err(Error::InvalidConfig(format!(
                    "retrieval.keyword_rerank_weight must be within [0, 1], got {weight}"
                )));
            }
        }
        if self.chunking.max_chunk_chars == 0 {
            return Err(Error::InvalidConfig("chunking.max_chunk_chars must be positive".into()));
        }
        if self.chunking.chunk_overlap_chars >= self.chunking.max_chunk_chars {
            return Err(Error::InvalidConfig(
                "chunking.chunk_overlap_chars must be smaller than chunking.max_chunk_chars".into(),
            ));
        }
        if self.embedding.dim == 0 || self.embedding.batch_size == 0 || self.embedding.concurrency == 0 {
            return Err(Error::InvalidConfig(
                "embedding.dim, embedding.batch_size and embedding.concurrency must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// `$VAR`/`${VAR}` and a leading `~` are expanded; unknown variables are
/// left as written. No canonicalization.
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let raw = input.as_ref();
    let with_vars = shellexpand::env(raw).unwrap_or(std::borrow::Cow::Borrowed(raw));
    PathBuf::from(shellexpand::tilde(&with_vars).as_ref())
}

/// Settings paths are relative to the config directory unless absolute.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
