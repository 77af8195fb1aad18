//! Query data model
//!
//! Retrieved chunks, retrieval filters, context handles, query requests,
//! answers and the phase events streamed while a query runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use uuid::Uuid;

/// Stable document identifier (the object name of the source report)
pub type DocumentId = String;

/// A retrieved unit of report text with its source metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub chunk_id: String,
    pub document_id: DocumentId,
    pub document_name: String,
    /// Position of the chunk within its document
    pub ordinal: u32,
    pub text: String,
    pub industry: String,
    pub topics: Vec<String>,
    pub url: Option<String>,
    /// Cosine similarity to the question (higher is better)
    pub score: f32,
}

/// How retrieval candidates are restricted.
///
/// A single value is active per retrieval, so document pinning and industry
/// filtering can never be combined.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RetrievalFilter {
    #[default]
    Unrestricted,
    ByIndustries(BTreeSet<String>),
    ByDocuments(BTreeSet<DocumentId>),
}

/// Industry selections that mean "no filter"
const WILDCARD_INDUSTRIES: &[&str] = &["all", "any", "all industries", ""];

impl RetrievalFilter {
    /// Industry filter with wildcards and blanks dropped; nothing left means unrestricted
    pub fn industries<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: BTreeSet<String> = names
            .into_iter()
            .map(|n| n.as_ref().trim().to_string())
            .filter(|n| !WILDCARD_INDUSTRIES.contains(&n.to_lowercase().as_str()))
            .collect();

        if names.is_empty() {
            RetrievalFilter::Unrestricted
        } else {
            RetrievalFilter::ByIndustries(names)
        }
    }

    /// Document pin set; an empty set means unrestricted
    pub fn documents<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: BTreeSet<DocumentId> = ids
            .into_iter()
            .map(|id| id.as_ref().trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();

        if ids.is_empty() {
            RetrievalFilter::Unrestricted
        } else {
            RetrievalFilter::ByDocuments(ids)
        }
    }

    /// Short label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            RetrievalFilter::Unrestricted => "unrestricted",
            RetrievalFilter::ByIndustries(_) => "industry",
            RetrievalFilter::ByDocuments(_) => "pinned",
        }
    }

    /// Case-insensitive substring match of an industry against the filter
    pub fn matches_industry(filters: &BTreeSet<String>, industry: &str) -> bool {
        let industry = industry.to_lowercase();
        filters.iter().any(|f| industry.contains(&f.to_lowercase()))
    }
}

/// Opaque, caller-visible reference to a cached chunk set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextHandle(String);

impl ContextHandle {
    /// Fresh random handle (UUID v4, simple hex form)
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ContextHandle {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ContextHandle {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The cached unit behind a context handle. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryContext {
    pub handle: ContextHandle,
    pub chunks: Vec<ChunkRef>,
    pub question: String,
    pub created_at: DateTime<Utc>,
}

/// How a request obtains its chunks
#[derive(Debug, Clone, PartialEq)]
pub enum RequestMode {
    /// New question, unrestricted or industry filtered
    Fresh(RetrievalFilter),
    /// Follow-up on a cached context; `fallback` is used when the handle misses
    FollowUp {
        handle: ContextHandle,
        fallback: RetrievalFilter,
    },
    /// Follow-up restricted to explicit documents when no handle is available
    Pinned(BTreeSet<DocumentId>),
}

/// A validated query. Exactly one retrieval mode is derivable from it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub question: String,
    pub mode: RequestMode,
    /// Cap on distinct source documents; the configured default applies when unset
    pub max_docs: Option<usize>,
}

impl QueryRequest {
    pub fn fresh(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            mode: RequestMode::Fresh(RetrievalFilter::Unrestricted),
            max_docs: None,
        }
    }

    pub fn with_industries<I, S>(question: impl Into<String>, industries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            question: question.into(),
            mode: RequestMode::Fresh(RetrievalFilter::industries(industries)),
            max_docs: None,
        }
    }

    pub fn follow_up(question: impl Into<String>, handle: ContextHandle, fallback: RetrievalFilter) -> Self {
        Self {
            question: question.into(),
            mode: RequestMode::FollowUp { handle, fallback },
            max_docs: None,
        }
    }

    pub fn pinned<I, S>(question: impl Into<String>, documents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mode = match RetrievalFilter::documents(documents) {
            RetrievalFilter::ByDocuments(ids) => RequestMode::Pinned(ids),
            _ => RequestMode::Fresh(RetrievalFilter::Unrestricted),
        };
        Self {
            question: question.into(),
            mode,
            max_docs: None,
        }
    }

    pub fn max_docs(mut self, max_docs: usize) -> Self {
        self.max_docs = Some(max_docs);
        self
    }

    /// Label of the retrieval path for logs and metrics
    pub fn path_label(&self) -> &'static str {
        match &self.mode {
            RequestMode::Fresh(filter) => match filter {
                RetrievalFilter::ByIndustries(_) => "industry",
                _ => "fresh",
            },
            RequestMode::FollowUp { .. } => "follow_up",
            RequestMode::Pinned(_) => "pinned",
        }
    }
}

/// One source card per document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDoc {
    pub gcs_name: DocumentId,
    pub name: String,
    pub industry: String,
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A completed answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResult {
    pub answer: String,
    pub sources: Vec<SourceDoc>,
    pub context_id: ContextHandle,
    pub doc_count: usize,
    pub elapsed_ms: u64,
}

/// Document shown while its chunks are confirmed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadingDoc {
    pub name: String,
    pub industry: String,
}

/// A step of the streaming progress protocol.
///
/// Order: `Searching`, `Found`, `Loading`*, `Answering`, then exactly one of
/// `Answer` or `Error`. The cached fast path starts at `Answering`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PhaseEvent {
    Searching,
    Found {
        total: usize,
    },
    Loading {
        index: usize,
        total: usize,
        doc: LoadingDoc,
    },
    Answering,
    Answer(AnswerResult),
    Error {
        message: String,
    },
}

impl PhaseEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PhaseEvent::Answer(_) | PhaseEvent::Error { .. })
    }

    /// Wire name of the event (`type` field)
    pub fn kind(&self) -> &'static str {
        match self {
            PhaseEvent::Searching => "searching",
            PhaseEvent::Found { .. } => "found",
            PhaseEvent::Loading { .. } => "loading",
            PhaseEvent::Answering => "answering",
            PhaseEvent::Answer(_) => "answer",
            PhaseEvent::Error { .. } => "error",
        }
    }
}

/// First chunk of every distinct document, in rank order
pub fn distinct_documents(chunks: &[ChunkRef]) -> Vec<&ChunkRef> {
    let mut seen = HashSet::new();
    chunks
        .iter()
        .filter(|c| seen.insert(c.document_id.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(doc: &str, ordinal: u32) -> ChunkRef {
        ChunkRef {
            chunk_id: format!("{}#{}", doc, ordinal),
            document_id: doc.to_string(),
            document_name: doc.to_uppercase(),
            ordinal,
            text: "text".to_string(),
            industry: "Retail".to_string(),
            topics: vec![],
            url: None,
            score: 0.5,
        }
    }

    #[test]
    fn test_industry_wildcards_are_unrestricted() {
        assert_eq!(RetrievalFilter::industries(["All", " ", "any"]), RetrievalFilter::Unrestricted);

        let filter = RetrievalFilter::industries(["Retail", "all"]);
        match filter {
            RetrievalFilter::ByIndustries(names) => assert_eq!(names.len(), 1),
            other => panic!("unexpected filter {:?}", other),
        }
    }

    #[test]
    fn test_empty_pin_set_is_unrestricted() {
        assert_eq!(RetrievalFilter::documents(Vec::<String>::new()), RetrievalFilter::Unrestricted);
        assert_eq!(QueryRequest::pinned("q", [""]).mode, RequestMode::Fresh(RetrievalFilter::Unrestricted));
    }

    #[test]
    fn test_industry_match_is_case_insensitive_substring() {
        let filters: BTreeSet<String> = ["retail".to_string()].into_iter().collect();
        assert!(RetrievalFilter::matches_industry(&filters, "Retail & E-commerce"));
        assert!(!RetrievalFilter::matches_industry(&filters, "Healthcare"));
    }

    #[test]
    fn test_handles_are_unique() {
        let a = ContextHandle::generate();
        let b = ContextHandle::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_phase_event_wire_format() {
        let found = serde_json::to_value(PhaseEvent::Found { total: 2 }).unwrap();
        assert_eq!(found, serde_json::json!({"type": "found", "total": 2}));

        let searching = serde_json::to_value(PhaseEvent::Searching).unwrap();
        assert_eq!(searching, serde_json::json!({"type": "searching"}));

        let loading = serde_json::to_value(PhaseEvent::Loading {
            index: 0,
            total: 1,
            doc: LoadingDoc { name: "Report".into(), industry: "Retail".into() },
        })
        .unwrap();
        assert_eq!(loading["doc"]["name"], "Report");

        let answer = serde_json::to_value(PhaseEvent::Answer(AnswerResult {
            answer: "text".into(),
            sources: vec![],
            context_id: ContextHandle::from("h1"),
            doc_count: 0,
            elapsed_ms: 3,
        }))
        .unwrap();
        assert_eq!(answer["type"], "answer");
        assert_eq!(answer["context_id"], "h1");
        assert_eq!(answer["answer"], "text");
    }

    #[test]
    fn test_distinct_documents_keep_rank_order() {
        let chunks = vec![chunk("b", 0), chunk("a", 1), chunk("b", 2)];
        let docs: Vec<&str> = distinct_documents(&chunks)
            .into_iter()
            .map(|c| c.document_id.as_str())
            .collect();
        assert_eq!(docs, vec!["b", "a"]);
    }
}
