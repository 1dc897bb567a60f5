//! Embeddings over an OpenAI-compatible `/embeddings` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use ragline_core::config::EmbeddingSettings;
use ragline_core::retry::{CallError, RetryPolicy};
use ragline_core::{EmbeddingProvider, Error, Result};

use crate::normalize::is_finite;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dim: usize,
    id: String,
    retry: RetryPolicy,
}

impl OpenAiEmbedder {
    /// `dim` must match what the model returns; responses of another length
    /// are rejected.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        dim: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build HTTP client: {e}")))?;
        let model = model.into();
        let id = format!("openai:{}:d{}", model, dim);
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model,
            dim,
            id,
            retry: RetryPolicy::default(),
        })
    }

    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env).ok().filter(|k| !k.is_empty());
        let embedder = Self::new(
            settings.base_url.clone(),
            api_key,
            settings.model_name.clone(),
            settings.dim,
            Duration::from_secs(settings.timeout_secs),
        )?;
        Ok(embedder.with_retry(RetryPolicy::new(settings.max_retries, 500)))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn request(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, CallError> {
        let url = format!("{}/embeddings", self.base_url);
        let mut req = self.client.post(&url).json(&EmbeddingRequest { model: &self.model, input: texts });
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| CallError {
            transient: e.is_timeout() || e.is_connect() || e.is_request(),
            error: Error::Embedding(format!("request to {url} failed: {e}")),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError {
                transient: status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error(),
                error: Error::Embedding(format!("embedding request failed: {status} - {body}")),
            });
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            CallError::terminal(Error::Embedding(format!("malformed embedding response: {e}")))
        })?;
        self.collect(parsed, texts.len()).map_err(CallError::terminal)
    }

    fn collect(&self, mut parsed: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>> {
        if parsed.data.len() != expected {
            return Err(Error::Embedding(format!(
                "provider returned {} embeddings for {} inputs",
                parsed.data.len(),
                expected
            )));
        }
        parsed.data.sort_by_key(|d| d.index);
        parsed
            .data
            .into_iter()
            .map(|d| {
                if d.embedding.len() != self.dim {
                    return Err(Error::Embedding(format!(
                        "provider returned {}-d embedding, expected {}",
                        d.embedding.len(),
                        self.dim
                    )));
                }
                if !is_finite(&d.embedding) {
                    return Err(Error::Embedding("provider returned non-finite values".into()));
                }
                Ok(d.embedding)
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn embedder_id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(&[text.to_string()]).await?;
        out.pop().ok_or_else(|| Error::Embedding("provider returned no embedding".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(model = %self.model, inputs = texts.len(), "requesting embeddings");
        self.retry
            .run("embedding request", || self.request(texts))
            .await
            .map_err(Error::from)
    }
}
