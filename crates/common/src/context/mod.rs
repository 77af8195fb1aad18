//! Query orchestration core
//!
//! Provides:
//! - Retrieval under industry, pinned-document or unrestricted filters
//! - Context cache of chunk sets behind opaque handles for follow-ups
//! - Budgeted answer synthesis with per-document source cards
//! - The query state machine and its phase-event stream

mod context_cache;
mod llm;
mod orchestrator;
mod protocol;
mod retriever;
mod synthesizer;
mod types;

pub use context_cache::{create_context_store, ContextStore, MemoryContextStore, RedisContextStore};
pub use llm::{create_language_model, CompletionOptions, LanguageModel, MockLanguageModel, OpenAIChatModel};
pub use orchestrator::{OrchestratorSettings, QueryOrchestrator};
pub use protocol::{IndustryFilter, QueryPayload};
pub use retriever::Retriever;
pub use synthesizer::{estimate_tokens, Prompt, Synthesis, Synthesizer, NO_DOCUMENTS_ANSWER};
pub use types::{
    distinct_documents, AnswerResult, ChunkRef, ContextHandle, DocumentId, LoadingDoc, PhaseEvent,
    QueryContext, QueryRequest, RequestMode, RetrievalFilter, SourceDoc,
};
