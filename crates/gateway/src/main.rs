//! TrendLens API Gateway
//!
//! HTTP entry point for the trend-report chat service.
//! Handles:
//! - Buffered and streaming (SSE) query endpoints
//! - Context handle eviction
//! - Corpus summary endpoints (industries, stats)
//! - Rate limiting and observability (logging, metrics)

mod handlers;
mod middleware;

use axum::{
    http::StatusCode,
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{signal, sync::oneshot};
use tower::{limit::ConcurrencyLimitLayer, ServiceBuilder};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use trendlens_common::{
    config::{AppConfig, ObservabilityConfig},
    context::{
        create_context_store, create_language_model, OrchestratorSettings, QueryOrchestrator,
        Retriever, Synthesizer,
    },
    corpus::{open_corpus, Corpus},
    embeddings::create_embedder,
    metrics,
};

use crate::middleware::rate_limit::{self, RateLimit};

/// Maximum concurrent requests (backpressure control)
const MAX_CONCURRENT_REQUESTS: usize = 256;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub orchestrator: Arc<QueryOrchestrator>,
    pub corpus: Corpus,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;
    let config = Arc::new(config);

    // Initialize tracing
    init_tracing(&config.observability);

    info!(
        service = %config.observability.service_name,
        "Starting TrendLens API Gateway v{}",
        trendlens_common::VERSION
    );

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .set_buckets_for_metric(Matcher::Suffix("query_duration_seconds".to_string()), metrics::QUERY_BUCKETS)?
            .set_buckets_for_metric(Matcher::Suffix("retrieval_duration_seconds".to_string()), metrics::RETRIEVAL_BUCKETS)?
            .install()?;
        info!(%addr, "Prometheus exporter listening");
    }
    metrics::register_metrics();

    // Wire the query pipeline
    let corpus = open_corpus(&config.corpus).await.map_err(|e| {
        error!(error = %e, "Failed to open corpus");
        e
    })?;
    let embedder = create_embedder(&config.embedding)?;
    let model = create_language_model(&config.llm)?;
    let contexts = create_context_store(&config.context_cache).await?;

    info!(
        embedding_model = embedder.model_name(),
        llm_model = model.model_name(),
        context_backend = contexts.backend_name(),
        "Query pipeline ready"
    );

    let orchestrator = QueryOrchestrator::new(
        Retriever::new(embedder, corpus.clone(), config.retrieval.top_k),
        Synthesizer::new(model, &config.llm, &config.synthesis),
        contexts,
        OrchestratorSettings::from_config(&config),
    );

    // Create app state
    let state = AppState {
        config: config.clone(),
        orchestrator: Arc::new(orchestrator),
        corpus,
    };

    // Build the router
    let app = create_router(state)?;

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Open streams get a grace period after the signal, then are cut
    let (draining_tx, draining_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = draining_tx.send(());
        })
        .into_future();

    let grace = config.shutdown_timeout();
    let deadline = async move {
        match draining_rx.await {
            Ok(()) => tokio::time::sleep(grace).await,
            Err(_) => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = server => result?,
        _ = deadline => warn!(grace_secs = grace.as_secs(), "Shutdown grace period elapsed, closing open connections"),
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Create the main application router
fn create_router(state: AppState) -> trendlens_common::Result<Router> {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // Query and corpus routes
    let mut api_routes = Router::new()
        .route("/query", post(handlers::query::query))
        .route("/query-stream", post(handlers::query::query_stream))
        .route("/context/{context_id}", delete(handlers::query::clear_context))
        .route("/industries", get(handlers::corpus::industries))
        .route("/stats", get(handlers::corpus::stats));

    if state.config.rate_limit.enabled {
        let limit = RateLimit::new(
            state.config.rate_limit.requests_per_second,
            state.config.rate_limit.burst,
        )?;
        api_routes = api_routes.layer(axum::middleware::from_fn_with_state(
            limit,
            rate_limit::rate_limit_middleware,
        ));
    }

    // Compose the app
    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/api", api_routes)
        .layer(axum::middleware::from_fn(middleware::track_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(request_id)
                .layer(propagate_id)
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    state.config.request_timeout(),
                ))
                .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS)),
        )
        .with_state(state);

    Ok(app)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Router wired to an in-memory corpus, hash embedder and mock model

    use super::*;
    use std::time::Duration;
    use trendlens_common::{
        context::{MemoryContextStore, MockLanguageModel},
        corpus::{MemoryCorpus, Snapshot, SnapshotChunk, SnapshotDocument},
        embeddings::HashEmbedder,
    };

    const DIM: usize = 128;

    fn document(gcs_name: &str, name: &str, industry: &str, status: &str, texts: &[&str]) -> SnapshotDocument {
        let embedder = HashEmbedder::new(DIM);
        SnapshotDocument {
            gcs_name: gcs_name.to_string(),
            doc_name: name.to_string(),
            industry: industry.to_string(),
            topics: vec!["consumers".into(), "pricing".into(), "loyalty".into(), "media".into(), "ai".into()],
            url: Some(format!("https://reports.example.com/{}", gcs_name)),
            parse_status: status.to_string(),
            chunks: texts
                .iter()
                .enumerate()
                .map(|(i, t)| SnapshotChunk {
                    ordinal: i as u32,
                    text: t.to_string(),
                    embedding: embedder.embed_text(t),
                })
                .collect(),
        }
    }

    pub fn state(config: AppConfig) -> AppState {
        let snapshot = Snapshot {
            documents: vec![
                document(
                    "consumer-2026.pdf",
                    "Consumer Trends 2026",
                    "Retail & E-commerce",
                    "done",
                    &[
                        "The biggest consumer trends for 2026 are value seeking and wellness",
                        "Consumers in 2026 trade down on staples",
                    ],
                ),
                document(
                    "media-outlook.pdf",
                    "Media Outlook",
                    "Media",
                    "done",
                    &["Streaming fatigue shapes consumer trends"],
                ),
                document("scan.pdf", "Scanned Deck", "Media", "failed", &[]),
            ],
        };
        let corpus = Corpus::from_backend(Arc::new(MemoryCorpus::from_snapshot(snapshot)));

        let orchestrator = QueryOrchestrator::new(
            Retriever::new(Arc::new(HashEmbedder::new(DIM)), corpus.clone(), config.retrieval.top_k),
            Synthesizer::new(Arc::new(MockLanguageModel::new()), &config.llm, &config.synthesis),
            Arc::new(MemoryContextStore::new(Duration::from_secs(600), 32, 4)),
            OrchestratorSettings::from_config(&config),
        );

        AppState {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            corpus,
        }
    }

    pub fn router() -> Router {
        router_with(AppConfig::default())
    }

    pub fn router_with(config: AppConfig) -> Router {
        create_router(state(config)).unwrap()
    }

    pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    pub async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }
}
