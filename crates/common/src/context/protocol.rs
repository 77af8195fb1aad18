//! HTTP request contract shared by the buffered and streaming endpoints

use super::types::{ContextHandle, QueryRequest, RequestMode, RetrievalFilter};
use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// `industry_filter` arrives as a single name or a list
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum IndustryFilter {
    One(String),
    Many(Vec<String>),
}

impl IndustryFilter {
    fn into_filter(self) -> RetrievalFilter {
        match self {
            IndustryFilter::One(name) => RetrievalFilter::industries([name]),
            IndustryFilter::Many(names) => RetrievalFilter::industries(names),
        }
    }
}

/// Query request body
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct QueryPayload {
    #[validate(length(min = 1, max = 4000))]
    pub question: String,

    #[serde(default)]
    pub industry_filter: Option<IndustryFilter>,

    #[serde(default)]
    pub pinned_gcs_names: Option<Vec<String>>,

    /// Handle returned by a previous answer
    #[serde(default)]
    pub context_id: Option<String>,

    #[validate(range(min = 1, max = 20))]
    #[serde(default)]
    pub max_docs: Option<usize>,
}

impl TryFrom<QueryPayload> for QueryRequest {
    type Error = AppError;

    /// Classify the payload into exactly one retrieval mode.
    ///
    /// A context handle may travel with pinned ids or an industry filter; those
    /// only describe the retrieval to run if the handle misses.
    fn try_from(payload: QueryPayload) -> Result<Self> {
        let question = payload.question.trim().to_string();
        let payload = QueryPayload { question, ..payload };
        payload.validate()?;

        let industries = payload
            .industry_filter
            .map(IndustryFilter::into_filter)
            .unwrap_or_default();
        let pinned = RetrievalFilter::documents(payload.pinned_gcs_names.unwrap_or_default());

        let fallback = match (pinned, industries) {
            (RetrievalFilter::ByDocuments(_), RetrievalFilter::ByIndustries(_)) => {
                return Err(AppError::Protocol {
                    message: "pinned_gcs_names and industry_filter cannot be combined".to_string(),
                });
            }
            (pinned @ RetrievalFilter::ByDocuments(_), _) => pinned,
            (_, industries) => industries,
        };

        let handle = payload
            .context_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .map(ContextHandle::from);

        let mode = match (handle, fallback) {
            (Some(handle), fallback) => RequestMode::FollowUp { handle, fallback },
            (None, RetrievalFilter::ByDocuments(ids)) => RequestMode::Pinned(ids),
            (None, filter) => RequestMode::Fresh(filter),
        };

        Ok(QueryRequest {
            question: payload.question,
            mode,
            max_docs: payload.max_docs,
        })
    }
}
