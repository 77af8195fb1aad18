//! Corpus access: the vector index and chunk store the retriever reads
//!
//! Two backends implement the traits:
//! - `memory`: a JSON snapshot loaded at startup (cosine similarity in process)
//! - `postgres`: pgvector tables queried through the SeaORM pool

mod memory;

pub use memory::{MemoryCorpus, Snapshot, SnapshotChunk, SnapshotDocument};

use crate::config::{CorpusBackend, CorpusConfig};
use crate::context::{DocumentId, RetrievalFilter};
use crate::db::{DbPool, PgCorpus};
use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Documents eligible for a nearest-neighbour query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidates {
    All,
    Only(HashSet<DocumentId>),
}

impl Candidates {
    pub fn is_empty(&self) -> bool {
        matches!(self, Candidates::Only(ids) if ids.is_empty())
    }

    pub fn admits(&self, document_id: &str) -> bool {
        match self {
            Candidates::All => true,
            Candidates::Only(ids) => ids.contains(document_id),
        }
    }
}

/// A chunk id returned by the index with its similarity
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub score: f32,
}

/// Source document metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub gcs_name: DocumentId,
    pub doc_name: String,
    pub industry: String,
    pub topics: Vec<String>,
    pub url: Option<String>,
}

/// Chunk text resolved from the store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub ordinal: u32,
    pub text: String,
    pub document: DocumentMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustryCount {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusStats {
    pub total: u64,
    pub indexed: u64,
    pub failed: u64,
    pub industries: u64,
    pub embeddings: u64,
}

/// Nearest-neighbour search over chunk vectors
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Resolve the documents a filter admits
    async fn candidates(&self, filter: &RetrievalFilter) -> Result<Candidates>;

    /// `top_k` most similar chunks among the candidates, most similar first
    async fn nearest(&self, embedding: &[f32], top_k: usize, candidates: &Candidates) -> Result<Vec<ScoredChunk>>;
}

/// Chunk id to text and document metadata
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Unknown ids are skipped
    async fn fetch(&self, chunk_ids: &[String]) -> Result<Vec<StoredChunk>>;
}

/// Read-only corpus summaries
#[async_trait]
pub trait CorpusCatalog: Send + Sync {
    async fn industries(&self, limit: usize) -> Result<Vec<IndustryCount>>;

    async fn stats(&self) -> Result<CorpusStats>;

    async fn ping(&self) -> Result<()>;
}

/// The three corpus facets, usually backed by one store
#[derive(Clone)]
pub struct Corpus {
    pub index: Arc<dyn VectorIndex>,
    pub chunks: Arc<dyn ChunkStore>,
    pub catalog: Arc<dyn CorpusCatalog>,
}

impl Corpus {
    /// Build all facets from a single backend
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: VectorIndex + ChunkStore + CorpusCatalog + 'static,
    {
        Self {
            index: backend.clone(),
            chunks: backend.clone(),
            catalog: backend,
        }
    }
}

/// Open the configured corpus backend
pub async fn open_corpus(config: &CorpusConfig) -> Result<Corpus> {
    match config.backend {
        CorpusBackend::Memory => {
            info!(path = %config.snapshot_path, "Loading corpus snapshot");
            let corpus = MemoryCorpus::load(&config.snapshot_path).await?;
            Ok(Corpus::from_backend(Arc::new(corpus)))
        }
        CorpusBackend::Postgres => {
            let pool = DbPool::new(config).await?;
            Ok(Corpus::from_backend(Arc::new(PgCorpus::new(pool))))
        }
    }
}
