//! Offline model that answers with a digest of its input.
//!
//! Deterministic: the same prompt and options always produce the same text.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use ragline_core::{ChatMessage, CompletionOptions, LanguageModel, Result};

const PREVIEW_CHARS: usize = 160;

#[derive(Debug, Default)]
pub struct EchoModel {
    calls: AtomicUsize,
}

impl EchoModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn reply(&self, text: &str, options: &CompletionOptions) -> String {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut preview: String = text.chars().take(PREVIEW_CHARS).collect();
        for stop in &options.stop_sequences {
            if let Some(at) = preview.find(stop.as_str()) {
                preview.truncate(at);
            }
        }
        format!("[{}] {}", options.model_name, preview.trim())
    }
}

#[async_trait]
impl LanguageModel for EchoModel {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
        options.validate()?;
        Ok(self.reply(prompt, options))
    }

    /// Echoes the last user message.
    async fn chat(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<String> {
        options.validate()?;
        let last = messages
            .iter()
            .rev()
            .find(|m| m.role == ragline_core::Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        Ok(self.reply(last, options))
    }
}
