//! Synthesizer - turns a question and ranked chunks into a cited answer
//!
//! Provides:
//! - Budgeted prompt assembly (lowest-ranked chunks dropped first)
//! - A single language-model call per answer
//! - Source cards deduplicated by document

use super::llm::{CompletionOptions, LanguageModel};
use super::types::{distinct_documents, ChunkRef, SourceDoc};
use crate::config::{LlmConfig, SynthesisConfig};
use crate::errors::Result;
use crate::metrics;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

const SYSTEM_PROMPT: &str = "You are a trend analysis expert. Your job is to answer questions about industry trends, market forecasts, and strategic insights.

Rules:
1. Answer ONLY based on the provided source documents. Do not use general knowledge.
2. Cite which document each piece of information comes from using [Document Name] in your answer.
3. If the documents don't contain relevant information for the question, say so clearly.
4. Be specific: include numbers, timeframes, and named companies/technologies when they appear in the sources.
5. Structure your answer with clear paragraphs. Use bullet points for lists of forecasts or trends.
";

/// Answer returned when retrieval found nothing to ground on
pub const NO_DOCUMENTS_ANSWER: &str = "No relevant documents were found in the index for your question. \
Try rephrasing or broadening your query.";

/// Synthesized answer text and its source cards
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub answer: String,
    pub sources: Vec<SourceDoc>,
}

/// Prompt built from a question and the chunks that fit the budget
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub user: String,
    /// Number of chunks included, counted from the top of the ranking
    pub included: usize,
    pub tokens: usize,
}

/// Rough token estimate (four characters per token)
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

pub struct Synthesizer {
    model: Arc<dyn LanguageModel>,
    options: CompletionOptions,
    max_context_tokens: usize,
    max_topics: usize,
}

impl Synthesizer {
    pub fn new(model: Arc<dyn LanguageModel>, llm: &LlmConfig, synthesis: &SynthesisConfig) -> Self {
        Self {
            model,
            options: CompletionOptions {
                temperature: llm.temperature,
                max_tokens: llm.max_output_tokens,
            },
            max_context_tokens: synthesis.max_context_tokens,
            max_topics: synthesis.max_topics,
        }
    }

    /// Produce an answer grounded in `chunks`.
    ///
    /// An empty chunk set yields a fixed answer without calling the model.
    pub async fn synthesize(&self, question: &str, chunks: &[ChunkRef]) -> Result<Synthesis> {
        let sources = self.sources(chunks);

        if chunks.is_empty() {
            debug!("No chunks to ground on, returning canned answer");
            return Ok(Synthesis {
                answer: NO_DOCUMENTS_ANSWER.to_string(),
                sources,
            });
        }

        let prompt = self.build_prompt(question, chunks);
        let start = Instant::now();

        let answer = self
            .model
            .complete(SYSTEM_PROMPT, &prompt.user, &self.options)
            .await
            .map_err(|e| e.into_synthesis())?;

        let elapsed = start.elapsed();
        metrics::record_synthesis(elapsed.as_secs_f64(), self.model.model_name());
        info!(
            model = %self.model.model_name(),
            chunks = prompt.included,
            dropped = chunks.len() - prompt.included,
            prompt_tokens = prompt.tokens,
            elapsed_ms = elapsed.as_millis() as u64,
            "Answer synthesized"
        );

        Ok(Synthesis { answer, sources })
    }

    /// Assemble the user message, adding chunks in rank order until the budget is spent.
    ///
    /// A top chunk larger than the whole budget is cut to fit so the prompt is never empty.
    pub fn build_prompt(&self, question: &str, chunks: &[ChunkRef]) -> Prompt {
        let mut user = format!("Question: {}\n\nSOURCE DOCUMENTS:", question);
        let mut used = 0;
        let mut included = 0;

        for chunk in chunks {
            let tokens = estimate_tokens(&chunk.text);
            if used + tokens > self.max_context_tokens {
                if included == 0 {
                    let cut: String = chunk.text.chars().take(self.max_context_tokens * 4).collect();
                    used += estimate_tokens(&cut);
                    push_source(&mut user, &chunk.document_name, &cut);
                    included = 1;
                }
                break;
            }
            push_source(&mut user, &chunk.document_name, &chunk.text);
            used += tokens;
            included += 1;
        }

        Prompt { user, included, tokens: used }
    }

    /// One source card per document, in rank order
    pub fn sources(&self, chunks: &[ChunkRef]) -> Vec<SourceDoc> {
        distinct_documents(chunks)
            .into_iter()
            .map(|c| SourceDoc {
                gcs_name: c.document_id.clone(),
                name: c.document_name.clone(),
                industry: c.industry.clone(),
                topics: c.topics.iter().take(self.max_topics).cloned().collect(),
                url: c.url.clone(),
            })
            .collect()
    }
}

fn push_source(prompt: &mut String, document_name: &str, text: &str) {
    prompt.push_str("\n\n--- SOURCE: ");
    prompt.push_str(document_name);
    prompt.push_str(" ---\n");
    prompt.push_str(text);
}
