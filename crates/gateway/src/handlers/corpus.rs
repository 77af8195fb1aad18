//! Corpus summary handlers backing the filter chips and header counters

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::AppState;
use trendlens_common::{
    corpus::{CorpusStats, IndustryCount},
    errors::Result,
};

const DEFAULT_INDUSTRY_LIMIT: usize = 40;
const MAX_INDUSTRY_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct IndustriesParams {
    pub limit: Option<usize>,
}

/// Industries of searchable documents, most populated first
pub async fn industries(
    State(state): State<AppState>,
    Query(params): Query<IndustriesParams>,
) -> Result<Json<Vec<IndustryCount>>> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_INDUSTRY_LIMIT)
        .clamp(1, MAX_INDUSTRY_LIMIT);

    let industries = state.corpus.catalog.industries(limit).await?;
    Ok(Json(industries))
}

/// Document, industry and embedding counts
pub async fn stats(State(state): State<AppState>) -> Result<Json<CorpusStats>> {
    let stats = state.corpus.catalog.stats().await?;
    Ok(Json(stats))
}
