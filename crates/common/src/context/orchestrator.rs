//! Query orchestrator - drives one query from request to answer
//!
//! States: `Start -> Searching -> Loading -> Answering -> Answer | Error`.
//! A follow-up whose handle is still cached skips straight to `Answering`.
//! The buffered and streaming surfaces run the same machine; the buffered
//! one discards intermediate events.

use super::context_cache::ContextStore;
use super::retriever::Retriever;
use super::synthesizer::Synthesizer;
use super::types::{
    distinct_documents, AnswerResult, ChunkRef, LoadingDoc, PhaseEvent, QueryContext, QueryRequest,
    RequestMode, RetrievalFilter,
};
use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, info_span, warn, Instrument};

/// Limits applied to every query
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub default_max_docs: usize,
    pub retrieval_timeout: Duration,
    pub synthesis_timeout: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            default_max_docs: config.retrieval.max_docs,
            retrieval_timeout: config.retrieval.timeout(),
            synthesis_timeout: config.llm.timeout(),
        }
    }
}

/// Outcome of the `Start` state
enum Resolution {
    Cached(Arc<QueryContext>),
    Retrieve(RetrievalFilter),
}

/// Why a query stopped before delivering an answer
enum Stop {
    Failed(AppError),
    /// The client went away; nothing more is emitted or cached
    Abandoned,
}

/// Where phase events go
enum Sink {
    Discard,
    Channel(mpsc::Sender<PhaseEvent>),
}

impl Sink {
    async fn emit(&self, event: PhaseEvent) -> std::result::Result<(), Stop> {
        match self {
            Sink::Discard => Ok(()),
            Sink::Channel(tx) => tx.send(event).await.map_err(|_| Stop::Abandoned),
        }
    }

    /// Resolves once the consumer is gone
    async fn closed(&self) {
        match self {
            Sink::Discard => std::future::pending::<()>().await,
            Sink::Channel(tx) => tx.closed().await,
        }
    }
}

pub struct QueryOrchestrator {
    retriever: Retriever,
    synthesizer: Synthesizer,
    contexts: Arc<dyn ContextStore>,
    settings: OrchestratorSettings,
}

impl QueryOrchestrator {
    pub fn new(
        retriever: Retriever,
        synthesizer: Synthesizer,
        contexts: Arc<dyn ContextStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self { retriever, synthesizer, contexts, settings }
    }

    pub fn contexts(&self) -> &Arc<dyn ContextStore> {
        &self.contexts
    }

    /// Run a query and return only its terminal outcome
    pub async fn answer(&self, request: QueryRequest) -> Result<AnswerResult> {
        match self.run(request, &Sink::Discard).await {
            Ok(answer) => Ok(answer),
            Err(Stop::Failed(err)) => Err(err),
            Err(Stop::Abandoned) => Err(AppError::Internal {
                message: "Buffered query was abandoned".to_string(),
            }),
        }
    }

    /// Run a query, yielding its phase events as they happen.
    ///
    /// The stream is finite and ends right after the terminal event. Dropping
    /// it cancels the query; an answer produced after that is not cached.
    pub fn stream(self: &Arc<Self>, request: QueryRequest) -> ReceiverStream<PhaseEvent> {
        let (tx, rx) = mpsc::channel(1);
        let orchestrator = Arc::clone(self);
        let span = info_span!("query_stream", path = request.path_label());

        tokio::spawn(
            async move {
                let _ = orchestrator.run(request, &Sink::Channel(tx)).await;
            }
            .instrument(span),
        );

        ReceiverStream::new(rx)
    }

    async fn run(&self, request: QueryRequest, sink: &Sink) -> std::result::Result<AnswerResult, Stop> {
        let start = Instant::now();
        let (path, outcome) = self.execute(&request, sink, start).await;
        let elapsed = start.elapsed();

        match &outcome {
            Ok(answer) => {
                metrics::record_query(elapsed.as_secs_f64(), path, "answered");
                info!(
                    path,
                    docs = answer.doc_count,
                    context_id = %answer.context_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Query answered"
                );
            }
            Err(Stop::Failed(err)) => {
                metrics::record_query(elapsed.as_secs_f64(), path, "failed");
                warn!(path, error = %err, "Query failed");
                // The consumer may already be gone; there is nothing else to tell it
                let _ = sink.emit(PhaseEvent::Error { message: err.to_string() }).await;
            }
            Err(Stop::Abandoned) => {
                metrics::record_abandoned(path);
                info!(path, "Client disconnected, query abandoned");
            }
        }
        outcome
    }

    async fn execute(
        &self,
        request: &QueryRequest,
        sink: &Sink,
        start: Instant,
    ) -> (&'static str, std::result::Result<AnswerResult, Stop>) {
        let resolution = self.resolve(&request.mode).await;
        let path = match &resolution {
            Resolution::Cached(_) => "cached",
            Resolution::Retrieve(filter) => path_for(filter),
        };

        let chunks = match resolution {
            Resolution::Cached(context) => context.chunks.clone(),
            Resolution::Retrieve(filter) => {
                let max_docs = request.max_docs.unwrap_or(self.settings.default_max_docs);
                match self.search(&request.question, &filter, max_docs, sink).await {
                    Ok(chunks) => chunks,
                    Err(stop) => return (path, Err(stop)),
                }
            }
        };

        (path, self.respond(&request.question, chunks, sink, start).await)
    }

    /// `Start`: a cached handle wins; a miss falls back to the request's filter
    async fn resolve(&self, mode: &RequestMode) -> Resolution {
        match mode {
            RequestMode::Fresh(filter) => Resolution::Retrieve(filter.clone()),
            RequestMode::Pinned(ids) => Resolution::Retrieve(RetrievalFilter::ByDocuments(ids.clone())),
            RequestMode::FollowUp { handle, fallback } => match self.contexts.load(handle).await {
                Some(context) => {
                    info!(context_id = %handle, chunks = context.chunks.len(), "Context cache hit");
                    Resolution::Cached(context)
                }
                None => {
                    info!(context_id = %handle, fallback = fallback.label(), "Context cache miss, re-retrieving");
                    Resolution::Retrieve(fallback.clone())
                }
            },
        }
    }

    /// `Searching` and `Loading`
    async fn search(
        &self,
        question: &str,
        filter: &RetrievalFilter,
        max_docs: usize,
        sink: &Sink,
    ) -> std::result::Result<Vec<ChunkRef>, Stop> {
        sink.emit(PhaseEvent::Searching).await?;

        let limit = self.settings.retrieval_timeout;
        let chunks = guarded(
            sink,
            limit,
            self.retriever.retrieve(question, filter, max_docs),
            || AppError::RetrievalTimeout { timeout_ms: limit.as_millis() as u64 },
        )
        .await?;

        let documents = distinct_documents(&chunks);
        let total = documents.len();
        sink.emit(PhaseEvent::Found { total }).await?;

        // Chunks arrive from one batched fetch; each document is announced in rank order
        for (index, chunk) in documents.into_iter().enumerate() {
            sink.emit(PhaseEvent::Loading {
                index,
                total,
                doc: LoadingDoc {
                    name: chunk.document_name.clone(),
                    industry: chunk.industry.clone(),
                },
            })
            .await?;
        }

        Ok(chunks)
    }

    /// `Answering` and the terminal `Answer`
    async fn respond(
        &self,
        question: &str,
        chunks: Vec<ChunkRef>,
        sink: &Sink,
        start: Instant,
    ) -> std::result::Result<AnswerResult, Stop> {
        sink.emit(PhaseEvent::Answering).await?;

        let limit = self.settings.synthesis_timeout;
        let synthesis = guarded(
            sink,
            limit,
            self.synthesizer.synthesize(question, &chunks),
            || AppError::SynthesisTimeout { timeout_ms: limit.as_millis() as u64 },
        )
        .await?;

        // Claim the slot for the answer before caching it, so an answer the
        // client never receives leaves no handle behind
        let permit = match sink {
            Sink::Discard => None,
            Sink::Channel(tx) => Some(tx.reserve().await.map_err(|_| Stop::Abandoned)?),
        };

        let doc_count = synthesis.sources.len();
        let context_id = self.contexts.store(question, chunks).await;
        let answer = AnswerResult {
            answer: synthesis.answer,
            sources: synthesis.sources,
            context_id,
            doc_count,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };

        if let Some(permit) = permit {
            permit.send(PhaseEvent::Answer(answer.clone()));
        }
        Ok(answer)
    }
}

/// Metrics label of the retrieval path taken
fn path_for(filter: &RetrievalFilter) -> &'static str {
    match filter {
        RetrievalFilter::Unrestricted => "fresh",
        RetrievalFilter::ByIndustries(_) => "industry",
        RetrievalFilter::ByDocuments(_) => "pinned",
    }
}

/// Bound an external call by `limit` and stop early if the consumer leaves
async fn guarded<T, F>(
    sink: &Sink,
    limit: Duration,
    call: F,
    on_timeout: impl FnOnce() -> AppError,
) -> std::result::Result<T, Stop>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        _ = sink.closed() => Err(Stop::Abandoned),
        result = tokio::time::timeout(limit, call) => match result {
            Ok(inner) => inner.map_err(Stop::Failed),
            Err(_) => Err(Stop::Failed(on_timeout())),
        },
    }
}
