//! Stages applied to retrieved chunks before synthesis.
//!
//! Stages may drop or reorder chunks but never add any; a stage that returns
//! more chunks than it was given is truncated back to its input size.

use std::collections::HashSet;

use tracing::{debug, warn};

use ragline_core::{Error, Result, ScoredChunk};

pub trait Postprocessor: Send + Sync {
    fn name(&self) -> &str;
    fn process(&self, query: &str, chunks: Vec<ScoredChunk>) -> Vec<ScoredChunk>;
}

/// Drops chunks scoring below the cutoff; survivors keep their order.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityCutoff {
    cutoff: f32,
}

impl SimilarityCutoff {
    pub fn new(cutoff: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&cutoff) {
            return Err(Error::InvalidConfig(format!("similarity cutoff must be within [0, 1], got {cutoff}")));
        }
        Ok(Self { cutoff })
    }

    pub fn cutoff(&self) -> f32 {
        self.cutoff
    }
}

impl Postprocessor for SimilarityCutoff {
    fn name(&self) -> &str {
        "similarity_cutoff"
    }

    fn process(&self, _query: &str, mut chunks: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
        chunks.retain(|c| c.score >= self.cutoff);
        chunks
    }
}

/// Blends vector similarity with the share of query terms found in the chunk:
/// `score' = (1 - weight) * score + weight * overlap`, then re-sorts stably.
#[derive(Debug, Clone, Copy)]
pub struct KeywordRerank {
    weight: f32,
}

impl KeywordRerank {
    pub fn new(weight: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&weight) {
            return Err(Error::InvalidConfig(format!("keyword rerank weight must be within [0, 1], got {weight}")));
        }
        Ok(Self { weight })
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(str::to_lowercase)
        .collect()
}

impl Postprocessor for KeywordRerank {
    fn name(&self) -> &str {
        "keyword_rerank"
    }

    fn process(&self, query: &str, mut chunks: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return chunks;
        }
        for c in &mut chunks {
            let chunk_terms = terms(&c.chunk.text);
            let overlap = query_terms.intersection(&chunk_terms).count() as f32 / query_terms.len() as f32;
            c.score = (1.0 - self.weight) * c.score + self.weight * overlap;
        }
        chunks.sort_by(|a, b| b.score.total_cmp(&a.score));
        chunks
    }
}

/// Ordered list of stages.
#[derive(Default)]
pub struct PostprocessorChain {
    stages: Vec<Box<dyn Postprocessor>>,
}

impl PostprocessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage: impl Postprocessor + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn push(&mut self, stage: Box<dyn Postprocessor>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn apply(&self, query: &str, mut chunks: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
        for stage in &self.stages {
            let before = chunks.len();
            chunks = stage.process(query, chunks);
            if chunks.len() > before {
                warn!(stage = stage.name(), before, after = chunks.len(), "postprocessor grew its input, truncating");
                chunks.truncate(before);
            }
            debug!(stage = stage.name(), before, after = chunks.len(), "postprocessor applied");
        }
        chunks
    }
}
