//! Turns the query and the surviving chunks into an [`Answer`].
//!
//! The prompt budget is `(context_window - max_output_tokens) * 4` characters
//! minus the fixed template text and the query. Context blocks are packed in
//! rank order into windows of that budget. `Compact` answers from the first
//! window only; `Refine` answers from the first window and then refines the
//! answer once per following window.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use ragline_core::config::SynthesisMode;
use ragline_core::retry::with_timeout;
use ragline_core::{Answer, CompletionOptions, Error, LanguageModel, Result, ScoredChunk};

pub const EMPTY_RESPONSE: &str = "Empty Response";

const CHARS_PER_TOKEN: usize = 4;
const BLOCK_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    pub options: CompletionOptions,
    pub context_window: u32,
    pub mode: SynthesisMode,
    pub cite_sources: bool,
    pub llm_timeout: Option<Duration>,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            options: CompletionOptions::default(),
            context_window: 4096,
            mode: SynthesisMode::Compact,
            cite_sources: false,
            llm_timeout: None,
        }
    }
}

#[derive(Debug, Default)]
struct Window {
    context: String,
    chars: usize,
    used: Vec<usize>,
}

pub struct ResponseSynthesizer {
    llm: Arc<dyn LanguageModel>,
    config: SynthesizerConfig,
}

impl ResponseSynthesizer {
    pub fn new(llm: Arc<dyn LanguageModel>, config: SynthesizerConfig) -> Self {
        Self { llm, config }
    }

    pub fn config(&self) -> &SynthesizerConfig {
        &self.config
    }

    pub async fn synthesize(&self, query: &str, chunks: &[ScoredChunk]) -> Result<Answer> {
        if chunks.is_empty() {
            debug!("no chunks survived retrieval, skipping the language model");
            return Ok(Answer { text: EMPTY_RESPONSE.to_string(), used_chunks: Vec::new() });
        }
        match self.config.mode {
            SynthesisMode::Compact => self.compact(query, chunks).await,
            SynthesisMode::Refine => self.refine(query, chunks).await,
        }
    }

    async fn compact(&self, query: &str, chunks: &[ScoredChunk]) -> Result<Answer> {
        let budget = self.budget(self.qa_prompt("", "").chars().count(), query)?;
        let mut windows = self.pack(budget, chunks).into_iter();
        let Some(window) = windows.next() else {
            return Ok(Answer { text: EMPTY_RESPONSE.to_string(), used_chunks: Vec::new() });
        };
        let dropped = chunks.len() - window.used.len();
        if dropped > 0 {
            debug!(dropped, budget, "lowest-ranked chunks did not fit the prompt");
        }

        let text = self.ask(self.qa_prompt(&window.context, query)).await?;
        info!(mode = "compact", used = window.used.len(), dropped, "answer synthesized");
        Ok(Answer { text, used_chunks: window.used.iter().map(|&i| Arc::clone(&chunks[i].chunk)).collect() })
    }

    async fn refine(&self, query: &str, chunks: &[ScoredChunk]) -> Result<Answer> {
        let qa_overhead = self.qa_prompt("", "").chars().count();
        let reserve = self.config.options.max_output_tokens as usize * CHARS_PER_TOKEN;
        let refine_overhead = self.refine_prompt("", "", "").chars().count() + reserve;
        let budget = self.budget(qa_overhead.max(refine_overhead), query)?;
        let windows = self.pack(budget, chunks);

        let mut used = Vec::with_capacity(chunks.len());
        let mut answer: Option<String> = None;
        for window in &windows {
            let prompt = match answer.as_deref() {
                None => self.qa_prompt(&window.context, query),
                Some(existing) => self.refine_prompt(&window.context, query, existing),
            };
            answer = Some(self.ask(prompt).await?);
            used.extend(window.used.iter().map(|&i| Arc::clone(&chunks[i].chunk)));
        }
        info!(mode = "refine", windows = windows.len(), used = used.len(), "answer synthesized");
        Ok(Answer { text: answer.unwrap_or_else(|| EMPTY_RESPONSE.to_string()), used_chunks: used })
    }

    async fn ask(&self, prompt: String) -> Result<String> {
        debug!(prompt_chars = prompt.chars().count(), "calling language model");
        let call = self.llm.complete(&prompt, &self.config.options);
        with_timeout(self.config.llm_timeout, call, |limit| {
            Error::LlmRequest(format!("language model timed out after {limit:?}"))
        })
        .await
        .map_err(|e| match e {
            Error::Cancelled => Error::Cancelled,
            other => Error::synthesis(other),
        })
    }

    /// Characters left for context blocks once the `template` text and the
    /// query are spent.
    fn budget(&self, template: usize, query: &str) -> Result<usize> {
        let input_tokens = self.config.context_window.saturating_sub(self.config.options.max_output_tokens);
        let total = input_tokens as usize * CHARS_PER_TOKEN;
        let limit = total.checked_sub(template).filter(|&b| b > 0).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "context window of {} tokens leaves no room for context after {} output tokens \
                 and {template} template chars",
                self.config.context_window, self.config.options.max_output_tokens
            ))
        })?;
        let chars = query.chars().count();
        limit.checked_sub(chars).filter(|&b| b > 0).ok_or(Error::QueryTooLong { chars, limit })
    }

    /// Greedy packing in rank order. A block that does not fit the current
    /// window starts the next one; a block larger than a whole window is cut
    /// to the budget.
    fn pack(&self, budget: usize, chunks: &[ScoredChunk]) -> Vec<Window> {
        let mut windows = Vec::new();
        let mut current = Window::default();
        for (i, scored) in chunks.iter().enumerate() {
            let block = self.block(i + 1, &scored.chunk.text);
            let len = block.chars().count();
            let sep = if current.used.is_empty() { 0 } else { BLOCK_SEPARATOR.len() };
            if current.chars + sep + len <= budget {
                current.push(&block, len, i);
                continue;
            }
            if !current.used.is_empty() {
                windows.push(std::mem::take(&mut current));
            }
            if len <= budget {
                current.push(&block, len, i);
            } else {
                debug!(chunk = %scored.chunk.id, len, budget, "truncating oversized chunk");
                let cut: String = block.chars().take(budget).collect();
                current.push(&cut, budget, i);
            }
        }
        if !current.used.is_empty() {
            windows.push(current);
        }
        windows
    }

    fn block(&self, n: usize, text: &str) -> String {
        if self.config.cite_sources {
            format!("[{n}] {text}")
        } else {
            text.to_string()
        }
    }

    fn qa_prompt(&self, context: &str, query: &str) -> String {
        let cite = if self.config.cite_sources {
            "\nCite the numbered context blocks you rely on, for example [1]."
        } else {
            ""
        };
        format!(
            "Context information is below.\n---------------------\n{context}\n---------------------\n\
             Given the context information and not prior knowledge, answer the query.{cite}\n\
             Query: {query}\nAnswer: "
        )
    }

    fn refine_prompt(&self, context: &str, query: &str, existing: &str) -> String {
        format!(
            "The original query is as follows: {query}\nWe have provided an existing answer: {existing}\n\
             We have the opportunity to refine the existing answer (only if needed) with some more context below.\n\
             ------------\n{context}\n------------\n\
             Given the new context, refine the original answer to better answer the query. \
             If the context isn't useful, return the original answer.\nRefined Answer: "
        )
    }
}

impl Window {
    fn push(&mut self, block: &str, len: usize, index: usize) {
        if !self.used.is_empty() {
            self.context.push_str(BLOCK_SEPARATOR);
            self.chars += BLOCK_SEPARATOR.len();
        }
        self.context.push_str(block);
        self.chars += len;
        self.used.push(index);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use ragline_core::{ChatMessage, Chunk, ChunkSource, ErrorKind};

    use super::*;

    #[derive(Default)]
    struct Recorder {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for Recorder {
        async fn complete(&self, prompt: &str, _options: &CompletionOptions) -> Result<String> {
            let mut prompts = self.prompts.lock().expect("lock");
            prompts.push(prompt.to_string());
            Ok(format!("answer {}", prompts.len()))
        }

        async fn chat(&self, _messages: &[ChatMessage], _options: &CompletionOptions) -> Result<String> {
            unreachable!("synthesis uses completions")
        }
    }

    fn scored(id: &str, text: &str, score: f32) -> ScoredChunk {
        ScoredChunk { chunk: Arc::new(Chunk::new(id, text, ChunkSource::default())), score }
    }

    fn synthesizer(llm: Arc<Recorder>, config: SynthesizerConfig) -> ResponseSynthesizer {
        ResponseSynthesizer::new(llm, config)
    }

    #[test]
    fn pack_keeps_rank_order_and_cuts_oversized_blocks() {
        let s = synthesizer(Arc::default(), SynthesizerConfig::default());
        let chunks = vec![scored("a", "aaaa", 0.9), scored("b", "bbbbbbbbbbbb", 0.8), scored("c", "cc", 0.7)];
        let windows = s.pack(10, &chunks);
        let layout: Vec<(&str, Vec<usize>)> = windows.iter().map(|w| (w.context.as_str(), w.used.clone())).collect();
        assert_eq!(layout, [("aaaa", vec![0]), ("bbbbbbbbbb", vec![1]), ("cc", vec![2])]);

        let windows = s.pack(10, &[scored("a", "aaa", 0.9), scored("b", "bbb", 0.8)]);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].context, "aaa\n\nbbb");
        assert_eq!(windows[0].chars, 8);
    }

    #[test]
    fn budget_must_be_positive() {
        let config = SynthesizerConfig {
            context_window: 300,
            options: CompletionOptions { max_output_tokens: 256, ..CompletionOptions::default() },
            ..SynthesizerConfig::default()
        };
        let s = synthesizer(Arc::default(), config);
        assert_eq!(s.budget(100, "").expect("room left"), 76);
        assert_eq!(s.budget(90, "0123456789").expect("room left"), 76);
        assert!(matches!(s.budget(176, ""), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn overlong_query_is_not_a_config_error() {
        let config = SynthesizerConfig {
            context_window: 300,
            options: CompletionOptions { max_output_tokens: 256, ..CompletionOptions::default() },
            ..SynthesizerConfig::default()
        };
        let s = synthesizer(Arc::default(), config);
        let query = "q".repeat(76);
        assert!(matches!(s.budget(100, &query), Err(Error::QueryTooLong { chars: 76, limit: 76 })));
    }

    #[tokio::test]
    async fn overlong_query_never_reaches_the_model() {
        let llm = Arc::new(Recorder::default());
        let chunks = vec![scored("doc:0", "context", 0.9)];
        let query = "why ".repeat(5000);
        let err = synthesizer(llm.clone(), SynthesizerConfig::default())
            .synthesize(&query, &chunks)
            .await
            .expect_err("too long");
        assert_eq!(err.kind(), ErrorKind::QueryTooLong);
        assert!(llm.prompts.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn empty_input_skips_the_model() {
        let llm = Arc::new(Recorder::default());
        let answer = synthesizer(llm.clone(), SynthesizerConfig::default())
            .synthesize("q", &[])
            .await
            .expect("answer");
        assert_eq!(answer.text, EMPTY_RESPONSE);
        assert!(answer.used_chunks.is_empty());
        assert!(llm.prompts.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn citations_number_blocks_in_rank_order() {
        let llm = Arc::new(Recorder::default());
        let config = SynthesizerConfig { cite_sources: true, ..SynthesizerConfig::default() };
        let chunks = vec![scored("doc:0", "first", 0.9), scored("doc:1", "second", 0.5)];
        let answer = synthesizer(llm.clone(), config).synthesize("what?", &chunks).await.expect("answer");
        let prompts = llm.prompts.lock().expect("lock");
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("[1] first\n\n[2] second"));
        assert!(prompts[0].contains("Query: what?"));
        assert_eq!(answer.used_chunks.len(), 2);
    }
}
