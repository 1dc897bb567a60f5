//! Chat completions over an OpenAI-compatible `/chat/completions` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use ragline_core::config::LlmSettings;
use ragline_core::retry::{CallError, RetryPolicy};
use ragline_core::{ChatMessage, CompletionOptions, Error, LanguageModel, Result};

use crate::wire::{ChatRequest, ChatResponse, ErrorEnvelope};

/// Map a non-success response to an error and decide whether it is worth
/// another attempt. Exhausted quota is terminal; plain rate limiting is not,
/// but surfaces as `LlmQuota` once retries run out.
fn classify(status: StatusCode, body: &str) -> CallError {
    let api = serde_json::from_str::<ErrorEnvelope>(body).ok().map(|e| e.error);
    let message = api
        .as_ref()
        .map(|e| e.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.to_string());

    if status == StatusCode::TOO_MANY_REQUESTS {
        let quota = api.as_ref().is_some_and(|e| e.is_quota());
        return CallError { error: Error::LlmQuota(format!("{status}: {message}")), transient: !quota };
    }
    CallError {
        transient: status.is_server_error(),
        error: Error::LlmRequest(format!("{status}: {message}")),
    }
}

pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl OpenAiClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            retry: RetryPolicy::default(),
        })
    }

    pub fn from_settings(settings: &LlmSettings) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(var = %settings.api_key_env, "no API key in environment, sending unauthenticated requests");
        }
        let client = Self::new(settings.base_url.clone(), api_key, Duration::from_secs(settings.timeout_secs))?;
        Ok(client.with_retry(RetryPolicy::new(settings.max_retries, 500)))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn request(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> std::result::Result<String, CallError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &options.model_name,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_output_tokens,
            stop: &options.stop_sequences,
        };
        let mut req = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| CallError {
            transient: e.is_timeout() || e.is_connect() || e.is_request(),
            error: Error::LlmRequest(format!("request to {url} failed: {e}")),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, &body));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            CallError::terminal(Error::LlmRequest(format!("malformed chat response: {e}")))
        })?;
        first_content(parsed).map_err(CallError::terminal)
    }
}

fn first_content(parsed: ChatResponse) -> Result<String> {
    let choice = parsed
        .choices
        .into_iter()
        .min_by_key(|c| c.index)
        .ok_or_else(|| Error::LlmRequest("chat response had no choices".into()))?;
    debug!(model = %parsed.model, finish_reason = ?choice.finish_reason, "chat completion received");
    Ok(choice.message.content.unwrap_or_default().trim().to_string())
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
        self.chat(&[ChatMessage::user(prompt)], options).await
    }

    async fn chat(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<String> {
        options.validate()?;
        debug!(model = %options.model_name, messages = messages.len(), "requesting chat completion");
        self.retry
            .run("chat completion", || self.request(messages, options))
            .await
            .map_err(Error::from)
    }
}
