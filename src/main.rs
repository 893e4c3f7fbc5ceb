mod assemble;
mod config;
mod extract;
mod fetch;
mod http;
mod llm;
mod metrics;
mod models;
mod pipeline;
mod query;
#[cfg(test)]
mod testing;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use chrono::Utc;
use config::AppConfig;
use futures::{Stream, StreamExt};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, ScrapeParams, SearchRequest, SearchResponse};
use pipeline::{Pipeline, PipelineError, SearchEvent};
use serde_json::json;
use std::{convert::Infallible, net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

const SERVICE_NAME: &str = "halcon-search-rs";
const OPENAPI_YAML: &str = include_str!("../docs/openapi.yaml");

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "halcon.api", "server crashed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    let pipeline = Pipeline::from_config(&config);
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;

    let state = AppState {
        pipeline,
        openapi: Arc::new(load_openapi()),
        prometheus_handle,
        metrics_key: config.server.metrics_key.clone(),
        openapi_key: config.server.openapi_key.clone(),
    };
    let app = build_router(state, config.server.body_limit);

    let addr: SocketAddr = ([0, 0, 0, 0], config.server.port).into();
    info!(
        target = "halcon.api",
        model = %config.llm.model,
        marketplace = %config.fetch.marketplace_url,
        "listening on {addr}"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
    metrics_key: Option<String>,
    openapi_key: Option<String>,
}

fn build_router(state: AppState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let api = Router::new()
        .route("/search", post(search))
        .route("/scrape", get(scrape))
        .route("/scrape-stream", post(scrape_stream));

    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
        .route("/health/live", get(live))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .nest("/api", api)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

fn load_openapi() -> serde_json::Value {
    serde_yaml::from_str(OPENAPI_YAML).unwrap_or_else(|err| {
        warn!(target = "halcon.api", error = %err, "openapi_parse_failed");
        json!({"openapi": "3.0.3"})
    })
}

/// Health check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now(),
    }))
}

async fn ready() -> Json<serde_json::Value> {
    Json(json!({ "status": "ready", "timestamp": Utc::now() }))
}

async fn live() -> Json<serde_json::Value> {
    Json(json!({ "status": "alive", "timestamp": Utc::now() }))
}

fn header_matches(headers: &HeaderMap, name: &str, expected: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|presented| presented == expected)
}

async fn openapi_json(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(key) = &state.openapi_key
        && !header_matches(&headers, "X-Docs-Key", key)
    {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiError {
                error: "unauthorized".into(),
                details: None,
            }),
        )
            .into_response();
    }
    Json((*state.openapi).clone()).into_response()
}

async fn swagger_ui() -> impl IntoResponse {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Halcon Search API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    (
        [(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.metrics_key
        && !header_matches(&headers, "X-Metrics-Key", secret)
    {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Single-shot search.
///
/// - Method: `POST`
/// - Path: `/api/search`
/// - Body: `{ "query": "iPhone 15" }`
/// - Response: `SearchResponse`
async fn search(
    State(state): State<AppState>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    crate::metrics::inc_requests("/api/search");
    let query = require_query(payload.query)?;
    let response = state.pipeline.run(&query).await?;
    Ok(Json(response))
}

/// Single-shot search addressed by query string.
///
/// - Method: `GET`
/// - Path: `/api/scrape?output_busqueda=<query>`
/// - Response: `SearchResponse`
async fn scrape(
    State(state): State<AppState>,
    Query(params): Query<ScrapeParams>,
) -> Result<Json<SearchResponse>, AppError> {
    crate::metrics::inc_requests("/api/scrape");
    let query = require_query(params.output_busqueda)?;
    let response = state.pipeline.run(&query).await?;
    Ok(Json(response))
}

/// Incremental search over server-sent events.
///
/// - Method: `POST`
/// - Path: `/api/scrape-stream`
/// - Body: `{ "query": "iPhone 15" }`
/// - Events: `partial`*, then exactly one of `complete` or `error`
///
/// Query and fetch failures are reported with a status code because nothing
/// has been streamed yet.
async fn scrape_stream(
    State(state): State<AppState>,
    Json(payload): Json<SearchRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    crate::metrics::inc_requests("/api/scrape-stream");
    let query = require_query(payload.query)?;
    let stream = state.pipeline.stream(&query).await?;
    info!(target = "halcon.api", search_id = %stream.search_id(), "stream_opened");
    let events = stream.into_stream().map(|event| Ok(sse_event(event)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn sse_event(event: SearchEvent) -> Event {
    let encoded = match &event {
        SearchEvent::Partial(frame) => Event::default().event("partial").json_data(frame),
        SearchEvent::Complete(frame) => Event::default().event("complete").json_data(frame),
        SearchEvent::Failed(err) => Event::default()
            .event("error")
            .json_data(ApiError::from(err)),
    };
    encoded.unwrap_or_else(|err| {
        warn!(target = "halcon.api", error = %err, "sse_encode_failed");
        Event::default()
            .event("error")
            .data(r#"{"error":"pipeline failure"}"#)
    })
}

fn require_query(query: Option<String>) -> Result<String, AppError> {
    query.ok_or(AppError::MissingQuery)
}

#[derive(Debug)]
enum AppError {
    MissingQuery,
    Pipeline(PipelineError),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl From<&PipelineError> for ApiError {
    fn from(err: &PipelineError) -> Self {
        let error = if err.is_caller_error() {
            "invalid query"
        } else {
            "pipeline failure"
        };
        ApiError {
            error: error.into(),
            details: Some(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::MissingQuery => (
                StatusCode::BAD_REQUEST,
                Json(ApiError {
                    error: "missing query".into(),
                    details: None,
                }),
            )
                .into_response(),
            AppError::Pipeline(err) => {
                let status = if err.is_caller_error() {
                    StatusCode::BAD_REQUEST
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                (status, Json(ApiError::from(&err))).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::Assembler;
    use crate::extract::Extractor;
    use crate::testing::{FakeExtraction, FakeFetcher};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    fn app(fetcher: FakeFetcher, extraction: FakeExtraction) -> Router {
        app_with_keys(fetcher, extraction, None)
    }

    fn app_with_keys(
        fetcher: FakeFetcher,
        extraction: FakeExtraction,
        metrics_key: Option<&str>,
    ) -> Router {
        let pipeline = Pipeline::new(
            Arc::new(fetcher),
            Extractor::new(Arc::new(extraction), 10, 8),
            Assembler::new("COP", 10),
        );
        let state = AppState {
            pipeline,
            openapi: Arc::new(load_openapi()),
            prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
            metrics_key: metrics_key.map(str::to_string),
            openapi_key: None,
        };
        build_router(state, 64 * 1024)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// SSE body with field separators normalized to `name:value`.
    async fn sse_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec())
            .unwrap()
            .replace("event: ", "event:")
            .replace("data: ", "data:")
    }

    fn one_product() -> FakeExtraction {
        FakeExtraction::object(json!({"products": [
            {"name": "iPhone 15 128GB", "url": "https://x/1"}
        ]}))
    }

    #[tokio::test]
    async fn search_returns_unified_response() {
        let response = app(FakeFetcher::content("page"), one_product())
            .oneshot(post_json("/api/search", json!({"query": "iPhone 15"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["query"], "iPhone 15");
        assert_eq!(body["total_found"], 1);
        assert_eq!(body["structured_request"]["condition"], "any");
        let product = &body["results"][0];
        assert_eq!(product["title"], "iPhone 15 128GB");
        assert_eq!(product["price"], 0.0);
        assert_eq!(product["currency"], "COP");
        assert_eq!(product["condition"], "Nuevo");
        assert_eq!(product["free_shipping"], false);
        assert_eq!(product["url"], "https://x/1");
        assert!(product.get("thumbnail").is_none());
        assert!(body["execution_time_ms"].is_number());
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn scrape_route_reads_query_param() {
        let fetcher = FakeFetcher::content("page");
        let targets = fetcher.targets();
        let response = app(fetcher, one_product())
            .oneshot(get("/api/scrape?output_busqueda=iPhone%2015"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*targets.lock().unwrap(), vec!["iphone-15".to_string()]);
    }

    #[tokio::test]
    async fn missing_query_is_400() {
        let response = app(FakeFetcher::content("page"), one_product())
            .oneshot(post_json("/api/search", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "missing query");

        let response = app(FakeFetcher::content("page"), one_product())
            .oneshot(get("/api/scrape"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn blank_query_is_400_invalid_query() {
        let response = app(FakeFetcher::content("page"), one_product())
            .oneshot(post_json("/api/search", json!({"query": "   "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid query");
        assert!(body["details"].as_str().unwrap().contains("normalize"));
    }

    #[tokio::test]
    async fn fetch_failure_is_500_without_extraction() {
        let extraction = one_product();
        let calls = extraction.calls();
        let response = app(FakeFetcher::failing(), extraction)
            .oneshot(post_json("/api/search", json!({"query": "iPhone 15"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "pipeline failure");
        assert!(body["details"].as_str().unwrap().contains("fetch"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stream_route_emits_partial_then_complete() {
        let extraction = FakeExtraction::deltas(&[
            r#"{"products":[{"name":"A""#,
            r#","url":"u1"},{"name":"B","url":"u2"}]}"#,
        ]);
        let response = app(FakeFetcher::content("page"), extraction)
            .oneshot(post_json("/api/scrape-stream", json!({"query": "iPhone 15"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = sse_text(response).await;
        let partials = text.matches("event:partial").count();
        assert_eq!(partials, 2);
        assert_eq!(text.matches("event:complete").count(), 1);
        assert!(!text.contains("event:error"));

        let complete = text
            .split("event:complete")
            .nth(1)
            .and_then(|rest| rest.lines().find_map(|l| l.strip_prefix("data:")))
            .expect("complete data");
        let frame: Value = serde_json::from_str(complete).unwrap();
        assert_eq!(frame["total_found"], 2);
        assert_eq!(frame["products"][1]["url"], "u2");
        assert_eq!(frame["results"][1]["url"], "u2");
    }

    #[tokio::test]
    async fn stream_route_reports_mid_stream_failure_as_event() {
        let extraction =
            FakeExtraction::deltas_then_error(&[r#"{"products":[{"name":"A","url":"u1"}"#]);
        let response = app(FakeFetcher::content("page"), extraction)
            .oneshot(post_json("/api/scrape-stream", json!({"query": "iPhone 15"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = sse_text(response).await;
        assert_eq!(text.matches("event:error").count(), 1);
        assert!(!text.contains("event:complete"));
        assert!(text.contains("pipeline failure"));
    }

    #[tokio::test]
    async fn stream_route_never_completes_after_producer_crash() {
        let extraction =
            FakeExtraction::deltas_then_panic(&[r#"{"products":[{"name":"A","url":"u1"}"#]);
        let response = app(FakeFetcher::content("page"), extraction)
            .oneshot(post_json("/api/scrape-stream", json!({"query": "iPhone 15"})))
            .await
            .unwrap();
        let text = sse_text(response).await;
        assert_eq!(text.matches("event:error").count(), 1);
        assert!(!text.contains("event:complete"));
    }

    #[tokio::test]
    async fn stream_route_fetch_failure_is_status_code() {
        let response = app(FakeFetcher::empty(), one_product())
            .oneshot(post_json("/api/scrape-stream", json!({"query": "iPhone 15"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn health_routes_respond() {
        let router = app(FakeFetcher::content("page"), one_product());
        let body = body_json(router.clone().oneshot(get("/health")).await.unwrap()).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], SERVICE_NAME);
        let body = body_json(router.clone().oneshot(get("/health/ready")).await.unwrap()).await;
        assert_eq!(body["status"], "ready");
        let body = body_json(router.oneshot(get("/health/live")).await.unwrap()).await;
        assert_eq!(body["status"], "alive");
    }

    #[tokio::test]
    async fn metrics_requires_key_when_configured() {
        let router = app_with_keys(FakeFetcher::content("page"), one_product(), Some("s3cret"));
        let denied = router.clone().oneshot(get("/metrics")).await.unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .uri("/metrics")
            .header("X-Metrics-Key", "s3cret")
            .body(Body::empty())
            .unwrap();
        let allowed = router.oneshot(request).await.unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let response = app(FakeFetcher::content("page"), one_product())
            .oneshot(get("/openapi.json"))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert!(body["paths"].get("/api/search").is_some());
        assert!(body["paths"].get("/api/scrape-stream").is_some());
    }
}
