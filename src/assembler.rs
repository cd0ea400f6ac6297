//! Prompt assembly.
//!
//! [`ContextAssembler::assemble`] turns a query, the conversation so far
//! and the session corpus into a [`PromptContext`]. The rendered prompt is
//! laid out as:
//!
//! ```text
//! [system prompt]
//! [standing context]
//! [retrieved context]
//! [history, oldest first]
//! [new query]
//! ```
//!
//! Retrieved text never exceeds the context budget, counted in characters
//! of passage text. The passage that crosses the budget is truncated
//! rather than dropped. When retrieval fails the prompt is built from
//! history alone.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::config::{Config, ContextMode};
use crate::corpus::Corpus;
use crate::embedding::with_retries;
use crate::error::RetrievalError;
use crate::history::ConversationHistory;
use crate::models::ScoredChunk;

/// One block of retrieved material.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    pub source_id: String,
    /// Chunk ordinal, or `None` for a whole document in `full` mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordinal: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    pub text: String,
    pub truncated: bool,
}

/// Everything that goes into one generation request.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub system_prompt: String,
    pub standing_context: Option<String>,
    pub mode: ContextMode,
    pub passages: Vec<Passage>,
    /// Rendered history, `role: text` lines oldest first.
    pub history: String,
    pub query: String,
}

impl PromptContext {
    /// Characters of retrieved passage text.
    pub fn retrieved_chars(&self) -> usize {
        self.passages.iter().map(|p| p.text.chars().count()).sum()
    }

    pub fn render(&self) -> String {
        let mut sections: Vec<String> = vec![self.system_prompt.clone()];

        if let Some(standing) = &self.standing_context {
            sections.push(format!("Standing context:\n{}", standing));
        }

        if !self.passages.is_empty() {
            let mut block = String::from("Additional context:");
            for (i, passage) in self.passages.iter().enumerate() {
                match (self.mode, passage.score) {
                    (ContextMode::Smart, Some(score)) => {
                        block.push_str(&format!(
                            "\nChunk #{} (Score: {:.2}) from {}:\n{}",
                            i + 1,
                            score,
                            passage.source_id,
                            passage.text
                        ));
                    }
                    _ => {
                        block.push_str(&format!(
                            "\n[file name]: {}\n[file content begin]\n{}\n[file content end]",
                            passage.source_id, passage.text
                        ));
                    }
                }
            }
            sections.push(block);
        }

        if !self.history.is_empty() {
            sections.push(self.history.clone());
        }

        sections.push(format!("user: {}", self.query));
        sections.join("\n\n")
    }
}

/// Builds prompts according to the retrieval settings.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    system_prompt: String,
    top_k: usize,
    context_budget: usize,
    similarity_threshold: f32,
    max_retries: u32,
}

impl ContextAssembler {
    pub fn new(system_prompt: impl Into<String>, top_k: usize, context_budget: usize) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            top_k,
            context_budget,
            similarity_threshold: f32::NEG_INFINITY,
            max_retries: 1,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.model_runtime.system_prompt.clone(),
            config.retrieval.top_k,
            config.retrieval.context_budget,
        )
        .with_threshold(config.retrieval.similarity_threshold)
        .with_retries(config.retrieval.max_retries)
    }

    /// Results scoring below `threshold` are discarded.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Build the prompt for `query`. `history` must not yet contain the
    /// query itself.
    pub async fn assemble(
        &self,
        query: &str,
        history: &ConversationHistory,
        corpus: &Corpus,
        mode: ContextMode,
        standing_context: Option<&str>,
    ) -> PromptContext {
        let passages = match mode {
            ContextMode::Full => self.whole_documents(corpus),
            ContextMode::Smart => match self.retrieve(query, corpus).await {
                Ok(hits) => self.fit_to_budget(dedup(hits)),
                Err(e) => {
                    tracing::warn!(error = %e, "retrieval failed, answering from history only");
                    Vec::new()
                }
            },
        };

        tracing::debug!(
            mode = ?mode,
            passages = passages.len(),
            history = history.len(),
            "prompt assembled"
        );

        PromptContext {
            system_prompt: self.system_prompt.clone(),
            standing_context: standing_context
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string),
            mode,
            passages,
            history: history.render(),
            query: query.to_string(),
        }
    }

    async fn retrieve(
        &self,
        query: &str,
        corpus: &Corpus,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        if corpus.is_empty() || corpus.index().is_empty() || self.top_k == 0 {
            return Ok(Vec::new());
        }

        let embedder = corpus.embedder();
        let vector = with_retries("query embedding", self.max_retries, || {
            embedder.embed_query(query)
        })
        .await?;

        let index = corpus.index();
        let hits = with_retries("index search", self.max_retries, || {
            index.search(&vector, self.top_k)
        })
        .await?;

        Ok(hits
            .into_iter()
            .filter(|h| h.score >= self.similarity_threshold)
            .collect())
    }

    fn fit_to_budget(&self, hits: Vec<ScoredChunk>) -> Vec<Passage> {
        let mut budget = Budget::new(self.context_budget);
        let mut passages = Vec::new();
        for hit in hits {
            let Some((text, truncated)) = budget.take(&hit.chunk.text) else {
                break;
            };
            passages.push(Passage {
                source_id: hit.chunk.source_id,
                ordinal: Some(hit.chunk.ordinal),
                score: Some(hit.score),
                text,
                truncated,
            });
        }
        passages
    }

    fn whole_documents(&self, corpus: &Corpus) -> Vec<Passage> {
        let mut budget = Budget::new(self.context_budget);
        let mut passages = Vec::new();
        for document in corpus.documents() {
            if document.text.trim().is_empty() {
                continue;
            }
            let Some((text, truncated)) = budget.take(&document.text) else {
                break;
            };
            passages.push(Passage {
                source_id: document.source_id.clone(),
                ordinal: None,
                score: None,
                text,
                truncated,
            });
        }
        passages
    }
}

/// Drop repeated hits and trim text a better hit from the same source
/// already covers. Hits arrive best first.
fn dedup(hits: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
    let mut hashes = HashSet::new();
    let mut covered: HashMap<String, Vec<(usize, usize)>> = HashMap::new();
    let mut kept = Vec::new();

    for mut hit in hits {
        if hashes.contains(&hit.chunk.hash) {
            continue;
        }
        let spans = covered.entry(hit.chunk.source_id.clone()).or_default();
        let Some((start, end)) = uncovered(spans, hit.chunk.start, hit.chunk.end) else {
            continue;
        };
        if (start, end) != (hit.chunk.start, hit.chunk.end) {
            trim_chunk(&mut hit, start, end);
        }
        spans.push((hit.chunk.start, hit.chunk.end));
        hashes.insert(hit.chunk.hash.clone());
        kept.push(hit);
    }
    kept
}

/// The part of `start..end` outside every span in `spans`, or `None` when
/// nothing is left. A covered span strictly inside the range is ignored.
fn uncovered(spans: &[(usize, usize)], mut start: usize, mut end: usize) -> Option<(usize, usize)> {
    loop {
        let before = (start, end);
        for &(s, e) in spans {
            if s <= start && start < e {
                start = e;
            }
            if s < end && end <= e {
                end = s;
            }
            if start >= end {
                return None;
            }
        }
        if (start, end) == before {
            return Some((start, end));
        }
    }
}

/// Narrow a hit to `start..end` of its source. Only chunks whose text is a
/// verbatim slice of the source can be cut.
fn trim_chunk(hit: &mut ScoredChunk, start: usize, end: usize) {
    let chunk = &mut hit.chunk;
    if chunk.text.len() != chunk.end - chunk.start {
        return;
    }
    let offset = chunk.start;
    if let Some(text) = chunk.text.get(start - offset..end - offset) {
        chunk.text = text.to_string();
        chunk.start = start;
        chunk.end = end;
    }
}

/// Remaining character allowance.
struct Budget {
    remaining: usize,
}

impl Budget {
    fn new(total: usize) -> Self {
        Self { remaining: total }
    }

    /// Take as much of `text` as fits. `None` once the budget is spent.
    fn take(&mut self, text: &str) -> Option<(String, bool)> {
        if self.remaining == 0 {
            return None;
        }
        let len = text.chars().count();
        if len <= self.remaining {
            self.remaining -= len;
            Some((text.to_string(), false))
        } else {
            let cut: String = text.chars().take(self.remaining).collect();
            self.remaining = 0;
            Some((cut, true))
        }
    }
}
