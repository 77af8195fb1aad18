//! TrendLens Common Library
//! 
//! Shared code for the TrendLens query service including:
//! - Query orchestration (retrieval, context cache, synthesis, phase events)
//! - Corpus backends (vector index and chunk store)
//! - Embedding client abstraction
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod cache;
pub mod config;
pub mod context;
pub mod corpus;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod metrics;

// Re-export commonly used types
pub use errors::{AppError, Result};
pub use config::AppConfig;
pub use context::{QueryOrchestrator, QueryRequest, PhaseEvent, AnswerResult};
pub use embeddings::Embedder;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;
