//! pgvector-backed corpus
//!
//! Expects the tables written by the ingestion pipeline:
//!
//! ```sql
//! documents (gcs_name TEXT PRIMARY KEY, doc_name TEXT, industry TEXT,
//!            topics TEXT /* JSON array */, url TEXT, parse_status TEXT)
//! chunks    (id TEXT PRIMARY KEY, gcs_name TEXT REFERENCES documents,
//!            ordinal INT, content TEXT, embedding vector)
//! ```

use crate::context::RetrievalFilter;
use crate::corpus::{
    Candidates, ChunkStore, CorpusCatalog, CorpusStats, DocumentMeta, IndustryCount,
    ScoredChunk, StoredChunk, VectorIndex,
};
use crate::db::DbPool;
use crate::errors::Result;
use async_trait::async_trait;
use sea_orm::{DbBackend, FromQueryResult, Statement};
use std::collections::HashSet;

/// Vector index, chunk store and catalog over Postgres
#[derive(Clone)]
pub struct PgCorpus {
    pool: DbPool,
}

#[derive(Debug, FromQueryResult)]
struct GcsNameRow {
    gcs_name: String,
}

#[derive(Debug, FromQueryResult)]
struct ScoreRow {
    chunk_id: String,
    score: f64,
}

#[derive(Debug, FromQueryResult)]
struct ChunkRow {
    chunk_id: String,
    ordinal: i32,
    content: String,
    gcs_name: String,
    doc_name: Option<String>,
    industry: Option<String>,
    topics: Option<String>,
    url: Option<String>,
}

#[derive(Debug, FromQueryResult)]
struct IndustryRow {
    name: String,
    count: i64,
}

#[derive(Debug, FromQueryResult)]
struct StatsRow {
    total: i64,
    indexed: i64,
    failed: i64,
    industries: i64,
    embeddings: i64,
}

/// Convert a vector to the pgvector text literal "[1,2,...]"
fn vector_literal(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding.iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

/// "$start, $start+1, ..." for `count` bind parameters
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

impl PgCorpus {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn statement(sql: &str, values: Vec<sea_orm::Value>) -> Statement {
        Statement::from_sql_and_values(DbBackend::Postgres, sql, values)
    }
}

/// Candidate lookup for a filter; `None` when the filter needs no query
fn candidate_query(filter: &RetrievalFilter) -> Option<(String, Vec<sea_orm::Value>)> {
    match filter {
        RetrievalFilter::Unrestricted => None,
        RetrievalFilter::ByIndustries(industries) => {
            let clauses = (1..=industries.len())
                .map(|i| format!("industry ILIKE ${}", i))
                .collect::<Vec<_>>()
                .join(" OR ");
            let sql = format!(
                "SELECT gcs_name FROM documents WHERE parse_status = 'done' AND ({})",
                clauses
            );
            let values = industries
                .iter()
                .map(|name| format!("%{}%", name.replace('%', "\\%").replace('_', "\\_")).into())
                .collect();
            Some((sql, values))
        }
        RetrievalFilter::ByDocuments(ids) => {
            let sql = format!(
                "SELECT gcs_name FROM documents WHERE parse_status = 'done' AND gcs_name IN ({})",
                placeholders(1, ids.len())
            );
            Some((sql, ids.iter().map(|id| id.clone().into()).collect()))
        }
    }
}

/// A filter built directly from an empty set admits nothing
fn admits_nothing(filter: &RetrievalFilter) -> bool {
    match filter {
        RetrievalFilter::Unrestricted => false,
        RetrievalFilter::ByIndustries(industries) => industries.is_empty(),
        RetrievalFilter::ByDocuments(ids) => ids.is_empty(),
    }
}

#[async_trait]
impl VectorIndex for PgCorpus {
    async fn candidates(&self, filter: &RetrievalFilter) -> Result<Candidates> {
        if admits_nothing(filter) {
            return Ok(Candidates::Only(HashSet::new()));
        }
        let Some((sql, values)) = candidate_query(filter) else {
            return Ok(Candidates::All);
        };

        let rows = GcsNameRow::find_by_statement(Self::statement(&sql, values))
            .all(self.pool.read())
            .await?;

        Ok(Candidates::Only(rows.into_iter().map(|r| r.gcs_name).collect()))
    }

    async fn nearest(&self, embedding: &[f32], top_k: usize, candidates: &Candidates) -> Result<Vec<ScoredChunk>> {
        if candidates.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let mut values: Vec<sea_orm::Value> = vec![
            vector_literal(embedding).into(),
            (top_k as i64).into(),
        ];

        let candidate_filter = match candidates {
            Candidates::All => String::new(),
            Candidates::Only(ids) => {
                let mut ids: Vec<&String> = ids.iter().collect();
                ids.sort();
                let clause = format!("AND c.gcs_name IN ({})", placeholders(3, ids.len()));
                values.extend(ids.into_iter().map(|id| sea_orm::Value::from(id.clone())));
                clause
            }
        };

        let sql = format!(
            r#"
            SELECT
                c.id AS chunk_id,
                1 - (c.embedding <=> $1::vector) AS score
            FROM chunks c
            JOIN documents d ON d.gcs_name = c.gcs_name
            WHERE c.embedding IS NOT NULL
              AND d.parse_status = 'done'
              {}
            ORDER BY c.embedding <=> $1::vector, c.gcs_name, c.ordinal
            LIMIT $2
            "#,
            candidate_filter
        );

        let rows = ScoreRow::find_by_statement(Self::statement(&sql, values))
            .all(self.pool.read())
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| ScoredChunk { chunk_id: r.chunk_id, score: r.score as f32 })
            .collect())
    }
}

#[async_trait]
impl ChunkStore for PgCorpus {
    async fn fetch(&self, chunk_ids: &[String]) -> Result<Vec<StoredChunk>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            SELECT
                c.id AS chunk_id,
                c.ordinal,
                c.content,
                d.gcs_name,
                d.doc_name,
                d.industry,
                d.topics,
                d.url
            FROM chunks c
            JOIN documents d ON d.gcs_name = c.gcs_name
            WHERE c.id IN ({})
            "#,
            placeholders(1, chunk_ids.len())
        );
        let values = chunk_ids.iter().map(|id| id.clone().into()).collect();

        let rows = ChunkRow::find_by_statement(Self::statement(&sql, values))
            .all(self.pool.read())
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let topics = row
                    .topics
                    .as_deref()
                    .and_then(|t| serde_json::from_str::<Vec<String>>(t).ok())
                    .unwrap_or_default();
                StoredChunk {
                    chunk_id: row.chunk_id,
                    ordinal: row.ordinal.max(0) as u32,
                    text: row.content,
                    document: DocumentMeta {
                        doc_name: row.doc_name.unwrap_or_else(|| row.gcs_name.clone()),
                        gcs_name: row.gcs_name,
                        industry: row.industry.unwrap_or_default(),
                        topics,
                        url: row.url,
                    },
                }
            })
            .collect())
    }
}

#[async_trait]
impl CorpusCatalog for PgCorpus {
    async fn industries(&self, limit: usize) -> Result<Vec<IndustryCount>> {
        let sql = r#"
            SELECT industry AS name, COUNT(*) AS count
            FROM documents
            WHERE parse_status = 'done' AND industry IS NOT NULL AND industry <> ''
            GROUP BY industry
            ORDER BY count DESC, industry
            LIMIT $1
        "#;

        let rows = IndustryRow::find_by_statement(Self::statement(sql, vec![(limit as i64).into()]))
            .all(self.pool.read())
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| IndustryCount { name: r.name, count: r.count.max(0) as u64 })
            .collect())
    }

    async fn stats(&self) -> Result<CorpusStats> {
        let sql = r#"
            SELECT
                (SELECT COUNT(*) FROM documents) AS total,
                (SELECT COUNT(*) FROM documents WHERE parse_status = 'done') AS indexed,
                (SELECT COUNT(*) FROM documents WHERE parse_status = 'failed') AS failed,
                (SELECT COUNT(DISTINCT industry) FROM documents WHERE parse_status = 'done') AS industries,
                (SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL) AS embeddings
        "#;

        let row = StatsRow::find_by_statement(Self::statement(sql, vec![]))
            .one(self.pool.read())
            .await?;

        Ok(row
            .map(|r| CorpusStats {
                total: r.total.max(0) as u64,
                indexed: r.indexed.max(0) as u64,
                failed: r.failed.max(0) as u64,
                industries: r.industries.max(0) as u64,
                embeddings: r.embeddings.max(0) as u64,
            })
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}
