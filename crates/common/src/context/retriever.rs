//! Retriever - embeds the question and queries the corpus under a filter

use super::types::{ChunkRef, RetrievalFilter};
use crate::corpus::Corpus;
use crate::embeddings::Embedder;
use crate::errors::Result;
use crate::metrics;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    corpus: Corpus,
    top_k: usize,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, corpus: Corpus, top_k: usize) -> Self {
        Self { embedder, corpus, top_k }
    }

    /// Ranked chunks for `question`, limited to `max_docs` distinct documents.
    ///
    /// A filter that admits no document yields an empty result, not an error.
    /// Every failure is reported as a retrieval failure and never retried.
    pub async fn retrieve(&self, question: &str, filter: &RetrievalFilter, max_docs: usize) -> Result<Vec<ChunkRef>> {
        let start = Instant::now();
        let chunks = self
            .retrieve_inner(question, filter, max_docs)
            .await
            .map_err(|e| e.into_retrieval())?;

        metrics::record_retrieval(start.elapsed().as_secs_f64(), filter.label(), chunks.len());
        info!(
            filter = filter.label(),
            chunks = chunks.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Retrieval complete"
        );
        Ok(chunks)
    }

    async fn retrieve_inner(&self, question: &str, filter: &RetrievalFilter, max_docs: usize) -> Result<Vec<ChunkRef>> {
        let candidates = self.corpus.index.candidates(filter).await?;
        if candidates.is_empty() {
            debug!(filter = filter.label(), "Filter admits no documents");
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed(question).await?;
        let hits = self.corpus.index.nearest(&embedding, self.top_k, &candidates).await?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = hits.iter().map(|h| h.chunk_id.clone()).collect();
        let scores: HashMap<String, f32> = hits.into_iter().map(|h| (h.chunk_id, h.score)).collect();
        let stored = self.corpus.chunks.fetch(&ids).await?;

        let mut chunks: Vec<ChunkRef> = stored
            .into_iter()
            .filter(|c| candidates.admits(&c.document.gcs_name))
            .filter_map(|c| {
                let score = *scores.get(&c.chunk_id)?;
                Some(ChunkRef {
                    chunk_id: c.chunk_id,
                    document_id: c.document.gcs_name,
                    document_name: c.document.doc_name,
                    ordinal: c.ordinal,
                    text: c.text,
                    industry: c.document.industry,
                    topics: c.document.topics,
                    url: c.document.url,
                    score,
                })
            })
            .collect();

        rank(&mut chunks);
        Ok(cap_documents(chunks, max_docs))
    }
}

/// Score descending, then document id, then ordinal
fn rank(chunks: &mut [ChunkRef]) {
    chunks.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.ordinal.cmp(&b.ordinal))
    });
}

/// Keep chunks of the first `max_docs` documents in rank order
fn cap_documents(chunks: Vec<ChunkRef>, max_docs: usize) -> Vec<ChunkRef> {
    let mut kept: HashSet<String> = HashSet::new();
    chunks
        .into_iter()
        .filter(|c| {
            if kept.contains(&c.document_id) {
                return true;
            }
            if kept.len() < max_docs {
                kept.insert(c.document_id.clone());
                return true;
            }
            false
        })
        .collect()
}
