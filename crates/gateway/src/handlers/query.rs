//! Query handlers
//!
//! `POST /api/query` returns the terminal answer only; `POST /api/query-stream`
//! pushes every phase event as a `data: {json}` record.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderName, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::StreamExt;
use serde::Serialize;
use tracing::info;

use crate::AppState;
use trendlens_common::{
    context::{AnswerResult, ContextHandle, QueryPayload, QueryRequest},
    errors::{AppError, Result},
};

/// Explicit eviction response
#[derive(Debug, Serialize)]
pub struct EvictResponse {
    pub evicted: bool,
}

/// Classify a query body; an undecodable body is a malformed request
fn classify(body: std::result::Result<Json<QueryPayload>, JsonRejection>) -> Result<QueryRequest> {
    let Json(payload) = body.map_err(|rejection| AppError::Protocol {
        message: rejection.body_text(),
    })?;
    QueryRequest::try_from(payload)
}

/// Answer a question and return the final result
pub async fn query(
    State(state): State<AppState>,
    body: std::result::Result<Json<QueryPayload>, JsonRejection>,
) -> Result<Json<AnswerResult>> {
    let request = classify(body)?;
    info!(path = request.path_label(), "Buffered query");

    let answer = state.orchestrator.answer(request).await?;
    Ok(Json(answer))
}

/// Answer a question, streaming phase events as server-sent events.
///
/// Malformed requests are rejected with a plain error response before the
/// stream opens; failures after that arrive as an `error` event.
pub async fn query_stream(
    State(state): State<AppState>,
    body: std::result::Result<Json<QueryPayload>, JsonRejection>,
) -> Result<Response> {
    let request = classify(body)?;
    info!(path = request.path_label(), "Streaming query");

    let events = state
        .orchestrator
        .stream(request)
        .map(|event| Event::default().json_data(&event));

    Ok((
        [
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no")),
        ],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
        .into_response())
}

/// Drop a context handle so follow-ups re-retrieve
pub async fn clear_context(
    State(state): State<AppState>,
    Path(context_id): Path<String>,
) -> Json<EvictResponse> {
    let handle = ContextHandle::from(context_id);
    let evicted = state.orchestrator.contexts().evict(&handle).await;
    info!(context_id = %handle, evicted, "Context cleared");
    Json(EvictResponse { evicted })
}

#[cfg(test)]
mod tests {
    use crate::test_support::{body_json, body_text, router};
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// Parse `data: {json}` records of an SSE body
    fn sse_events(body: &str) -> Vec<Value> {
        body.split("\n\n")
            .filter_map(|record| record.lines().find_map(|l| l.strip_prefix("data: ")))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect()
    }

    async fn ask(app: &Router, body: Value) -> Value {
        let response = app.clone().oneshot(post("/api/query", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await
    }

    #[tokio::test]
    async fn test_buffered_query_returns_answer_and_handle() {
        let app = router();
        let body = ask(&app, json!({"question": "What are the biggest consumer trends for 2026?"})).await;

        assert!(body["answer"].as_str().unwrap().contains("[Consumer Trends 2026]"));
        assert_eq!(body["doc_count"], 2);
        assert_eq!(body["context_id"].as_str().unwrap().len(), 32);

        let source = &body["sources"][0];
        assert_eq!(source["gcs_name"], "consumer-2026.pdf");
        assert_eq!(source["name"], "Consumer Trends 2026");
        assert_eq!(source["industry"], "Retail & E-commerce");
        assert_eq!(source["topics"].as_array().unwrap().len(), 4);
        assert_eq!(source["url"], "https://reports.example.com/consumer-2026.pdf");
    }

    #[tokio::test]
    async fn test_stream_emits_phases_in_order() {
        let app = router();
        let response = app
            .oneshot(post("/api/query-stream", json!({"question": "What are the biggest consumer trends for 2026?"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(response.headers()["x-accel-buffering"], "no");

        let events = sse_events(&body_text(response).await);
        let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(types, vec!["searching", "found", "loading", "loading", "answering", "answer"]);

        assert_eq!(events[1]["total"], 2);
        assert_eq!(events[2]["doc"]["name"], "Consumer Trends 2026");
        assert_eq!(events[2]["doc"]["industry"], "Retail & E-commerce");
        assert_eq!(events[3]["index"], 1);
        assert!(events[5]["context_id"].is_string());
        assert_eq!(events[5]["sources"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stream_follow_up_uses_cached_context() {
        let app = router();
        let first = ask(&app, json!({"question": "consumer trends 2026"})).await;

        let response = app
            .oneshot(post(
                "/api/query-stream",
                json!({"question": "Which matter for grocers?", "context_id": first["context_id"]}),
            ))
            .await
            .unwrap();

        let events = sse_events(&body_text(response).await);
        let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(types, vec!["answering", "answer"]);
        assert_eq!(events[1]["sources"], first["sources"]);
        assert_ne!(events[1]["context_id"], first["context_id"]);
    }

    #[tokio::test]
    async fn test_cleared_context_falls_back_to_pinned_documents() {
        let app = router();
        let first = ask(&app, json!({"question": "consumer trends 2026"})).await;
        let context_id = first["context_id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(
                Request::delete(format!("/api/context/{}", context_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await, json!({"evicted": true}));

        let body = ask(
            &app,
            json!({
                "question": "and streaming?",
                "context_id": context_id,
                "pinned_gcs_names": ["media-outlook.pdf"]
            }),
        )
        .await;
        assert_eq!(body["doc_count"], 1);
        assert_eq!(body["sources"][0]["gcs_name"], "media-outlook.pdf");
    }

    #[tokio::test]
    async fn test_unknown_industry_answers_without_sources() {
        let app = router();
        let response = app
            .oneshot(post("/api/query-stream", json!({"question": "retail?", "industry_filter": ["Aerospace"]})))
            .await
            .unwrap();

        let events = sse_events(&body_text(response).await);
        let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(types, vec!["searching", "found", "answering", "answer"]);
        assert_eq!(events[1]["total"], 0);
        assert_eq!(events[3]["sources"], json!([]));
    }

    #[tokio::test]
    async fn test_pinned_with_industry_is_rejected_before_streaming() {
        let app = router();
        let response = app
            .oneshot(post(
                "/api/query-stream",
                json!({"question": "q", "industry_filter": "Retail", "pinned_gcs_names": ["a.pdf"]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "PROTOCOL_ERROR");
    }

    #[tokio::test]
    async fn test_undecodable_bodies_are_protocol_errors() {
        let app = router();
        let bodies = [
            json!({"context_id": "h1"}),
            json!({"question": "q", "industry_filter": 5}),
        ];

        for uri in ["/api/query", "/api/query-stream"] {
            for body in &bodies {
                let response = app.clone().oneshot(post(uri, body.clone())).await.unwrap();

                assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{} {}", uri, body);
                assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
                let error = body_json(response).await;
                assert_eq!(error["error"]["code"], "PROTOCOL_ERROR");
                assert!(error["error"]["message"].as_str().unwrap().starts_with("Malformed query request"));
            }
        }
    }

    #[tokio::test]
    async fn test_missing_content_type_is_protocol_error() {
        let response = router()
            .oneshot(
                Request::post("/api/query")
                    .body(Body::from(r#"{"question":"q"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "PROTOCOL_ERROR");
    }

    #[tokio::test]
    async fn test_blank_question_is_validation_error() {
        let app = router();
        let response = app.oneshot(post("/api/query", json!({"question": "  "}))).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["field"], "question");
    }

    #[tokio::test]
    async fn test_clearing_unknown_context() {
        let app = router();
        let response = app
            .oneshot(Request::delete("/api/context/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"evicted": false}));
    }
}
