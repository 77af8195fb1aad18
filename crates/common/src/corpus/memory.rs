//! In-process corpus loaded from a JSON snapshot

use super::{
    Candidates, ChunkStore, CorpusCatalog, CorpusStats, DocumentMeta, IndustryCount,
    ScoredChunk, StoredChunk, VectorIndex,
};
use crate::context::{DocumentId, RetrievalFilter};
use crate::embeddings::cosine_similarity;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Snapshot file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub documents: Vec<SnapshotDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub gcs_name: DocumentId,
    pub doc_name: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// pending, done or failed; only `done` documents are searchable
    #[serde(default = "default_status")]
    pub parse_status: String,
    #[serde(default)]
    pub chunks: Vec<SnapshotChunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotChunk {
    pub ordinal: u32,
    pub text: String,
    pub embedding: Vec<f32>,
}

fn default_status() -> String { "done".to_string() }

struct IndexedChunk {
    chunk_id: String,
    document: usize,
    ordinal: u32,
    text: String,
    embedding: Vec<f32>,
}

/// Corpus held entirely in memory; read-only after load
pub struct MemoryCorpus {
    documents: Vec<SnapshotDocument>,
    chunks: Vec<IndexedChunk>,
    by_id: HashMap<String, usize>,
}

impl MemoryCorpus {
    /// Read and index a snapshot file
    pub async fn load(path: &str) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| AppError::Corpus {
            message: format!("Failed to read snapshot '{}': {}", path, e),
        })?;
        let snapshot: Snapshot = serde_json::from_str(&raw).map_err(|e| AppError::Corpus {
            message: format!("Invalid snapshot '{}': {}", path, e),
        })?;
        let corpus = Self::from_snapshot(snapshot);
        tracing::info!(
            documents = corpus.documents.len(),
            chunks = corpus.chunks.len(),
            "Corpus snapshot loaded"
        );
        Ok(corpus)
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut documents = snapshot.documents;
        let mut chunks = Vec::new();
        let mut by_id = HashMap::new();

        for (doc_idx, document) in documents.iter_mut().enumerate() {
            for chunk in std::mem::take(&mut document.chunks) {
                let chunk_id = format!("{}#{}", document.gcs_name, chunk.ordinal);
                by_id.insert(chunk_id.clone(), chunks.len());
                chunks.push(IndexedChunk {
                    chunk_id,
                    document: doc_idx,
                    ordinal: chunk.ordinal,
                    text: chunk.text,
                    embedding: chunk.embedding,
                });
            }
        }

        Self { documents, chunks, by_id }
    }

    fn searchable(&self) -> impl Iterator<Item = &SnapshotDocument> {
        self.documents.iter().filter(|d| d.parse_status == "done")
    }

    fn meta(document: &SnapshotDocument) -> DocumentMeta {
        DocumentMeta {
            gcs_name: document.gcs_name.clone(),
            doc_name: document.doc_name.clone(),
            industry: document.industry.clone(),
            topics: document.topics.clone(),
            url: document.url.clone(),
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryCorpus {
    async fn candidates(&self, filter: &RetrievalFilter) -> Result<Candidates> {
        let ids = match filter {
            RetrievalFilter::Unrestricted => return Ok(Candidates::All),
            RetrievalFilter::ByIndustries(industries) => self
                .searchable()
                .filter(|d| RetrievalFilter::matches_industry(industries, &d.industry))
                .map(|d| d.gcs_name.clone())
                .collect(),
            RetrievalFilter::ByDocuments(pinned) => self
                .searchable()
                .filter(|d| pinned.contains(&d.gcs_name))
                .map(|d| d.gcs_name.clone())
                .collect(),
        };
        Ok(Candidates::Only(ids))
    }

    async fn nearest(&self, embedding: &[f32], top_k: usize, candidates: &Candidates) -> Result<Vec<ScoredChunk>> {
        let searchable: HashSet<&str> = self.searchable().map(|d| d.gcs_name.as_str()).collect();

        let mut scored: Vec<(f32, &IndexedChunk)> = self
            .chunks
            .iter()
            .filter(|c| {
                let doc = self.documents[c.document].gcs_name.as_str();
                searchable.contains(doc) && candidates.admits(doc)
            })
            .map(|c| (cosine_similarity(embedding, &c.embedding), c))
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| {
            sb.total_cmp(sa)
                .then_with(|| self.documents[a.document].gcs_name.cmp(&self.documents[b.document].gcs_name))
                .then_with(|| a.ordinal.cmp(&b.ordinal))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(score, c)| ScoredChunk { chunk_id: c.chunk_id.clone(), score })
            .collect())
    }
}

#[async_trait]
impl ChunkStore for MemoryCorpus {
    async fn fetch(&self, chunk_ids: &[String]) -> Result<Vec<StoredChunk>> {
        Ok(chunk_ids
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .map(|&idx| {
                let chunk = &self.chunks[idx];
                StoredChunk {
                    chunk_id: chunk.chunk_id.clone(),
                    ordinal: chunk.ordinal,
                    text: chunk.text.clone(),
                    document: Self::meta(&self.documents[chunk.document]),
                }
            })
            .collect())
    }
}

#[async_trait]
impl CorpusCatalog for MemoryCorpus {
    async fn industries(&self, limit: usize) -> Result<Vec<IndustryCount>> {
        let mut counts: HashMap<&str, u64> = HashMap::new();
        for document in self.searchable().filter(|d| !d.industry.is_empty()) {
            *counts.entry(document.industry.as_str()).or_default() += 1;
        }

        let mut industries: Vec<IndustryCount> = counts
            .into_iter()
            .map(|(name, count)| IndustryCount { name: name.to_string(), count })
            .collect();
        industries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        industries.truncate(limit);
        Ok(industries)
    }

    async fn stats(&self) -> Result<CorpusStats> {
        let industries: HashSet<&str> = self
            .searchable()
            .filter(|d| !d.industry.is_empty())
            .map(|d| d.industry.as_str())
            .collect();

        Ok(CorpusStats {
            total: self.documents.len() as u64,
            indexed: self.searchable().count() as u64,
            failed: self.documents.iter().filter(|d| d.parse_status == "failed").count() as u64,
            industries: industries.len() as u64,
            embeddings: self.chunks.len() as u64,
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(name: &str, industry: &str, status: &str, vectors: &[[f32; 2]]) -> SnapshotDocument {
        SnapshotDocument {
            gcs_name: name.to_string(),
            doc_name: name.to_uppercase(),
            industry: industry.to_string(),
            topics: vec!["trends".to_string()],
            url: None,
            parse_status: status.to_string(),
            chunks: vectors
                .iter()
                .enumerate()
                .map(|(i, v)| SnapshotChunk {
                    ordinal: i as u32,
                    text: format!("{} chunk {}", name, i),
                    embedding: v.to_vec(),
                })
                .collect(),
        }
    }

    fn corpus() -> MemoryCorpus {
        MemoryCorpus::from_snapshot(Snapshot {
            documents: vec![
                document("b.pdf", "Retail & E-commerce", "done", &[[1.0, 0.0], [0.0, 1.0]]),
                document("a.pdf", "Healthcare", "done", &[[1.0, 0.0]]),
                document("c.pdf", "Retail", "failed", &[[1.0, 0.0]]),
            ],
        })
    }

    #[tokio::test]
    async fn test_nearest_ties_break_by_document_then_ordinal() {
        let corpus = corpus();
        let hits = corpus.nearest(&[1.0, 0.0], 10, &Candidates::All).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        // c.pdf is not parsed, so it never appears
        assert_eq!(ids, vec!["a.pdf#0", "b.pdf#0", "b.pdf#1"]);
    }

    #[tokio::test]
    async fn test_industry_candidates() {
        let corpus = corpus();
        let filter = RetrievalFilter::industries(["retail"]);
        let candidates = corpus.candidates(&filter).await.unwrap();
        assert_eq!(candidates, Candidates::Only(["b.pdf".to_string()].into_iter().collect()));

        let none = corpus.candidates(&RetrievalFilter::industries(["Energy"])).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_pinned_candidates_skip_unknown_documents() {
        let corpus = corpus();
        let filter = RetrievalFilter::documents(["a.pdf", "missing.pdf"]);
        let candidates = corpus.candidates(&filter).await.unwrap();
        assert_eq!(candidates, Candidates::Only(["a.pdf".to_string()].into_iter().collect()));
    }

    #[tokio::test]
    async fn test_fetch_resolves_metadata() {
        let corpus = corpus();
        let chunks = corpus
            .fetch(&["b.pdf#1".to_string(), "nope".to_string()])
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].document.doc_name, "B.PDF");
        assert_eq!(chunks[0].ordinal, 1);
    }

    #[tokio::test]
    async fn test_catalog() {
        let corpus = corpus();
        let stats = corpus.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.indexed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.industries, 2);

        let industries = corpus.industries(1).await.unwrap();
        assert_eq!(industries.len(), 1);
        assert_eq!(industries[0].name, "Healthcare");
    }
}
