//! HTTP server: tool endpoints, ingestion API, query API, and webhook intake.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/tools/search` | Legacy keyword/semantic/hybrid search |
//! | `POST` | `/tools/get` | Retrieve a document by UUID |
//! | `POST` | `/api/ingest/file` | Ingest a single file's raw bytes |
//! | `POST` | `/api/ingest/url` | Ingest a URL-sourced item |
//! | `POST` | `/api/ingest/batch` | Ingest a batch of items under one job |
//! | `GET`  | `/api/ingest/jobs/{job_id}` | Poll job status |
//! | `GET`  | `/api/ingest/jobs/{job_id}/events` | SSE stream of job progress |
//! | `POST` | `/api/query` | Query Engine (keyword/vector/hybrid/graph-augmented) |
//! | `POST` | `/webhook/session-logger` | AI agent session lifecycle events |
//! | `POST` | `/webhook/action-tracker` | AI agent action/message events |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `embeddings_disabled` (400),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients and cross-origin MCP tool calls.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::get::{get_document, DocumentResponse};
use crate::job_queue::Priority;
use crate::migrate;
use crate::models::{SearchResult, SourceItem};
use crate::orchestrator::{JobStatus, Orchestrator, ProgressEvent};
use crate::search::{self, QueryFilters, QueryOptions};
use crate::store::{GrStore, RvStore, ViStore};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rv: RvStore,
    pub vi: ViStore,
    pub gr: GrStore,
    pub orchestrator: Arc<Orchestrator>,
}

/// Starts the HTTP server.
///
/// Binds to the address configured in `[server].bind`, opens the shared
/// store pool, spawns the ingestion worker pool, and registers all routes.
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    migrate::run_migrations(config).await?;
    let pool = Arc::new(db::connect(config).await?);
    let rv = RvStore::new(pool.clone());
    let vi = ViStore::new(pool.clone());
    let gr = GrStore::new(pool.clone());
    let orchestrator = Orchestrator::new(config.clone(), rv.clone(), vi.clone(), gr.clone());
    orchestrator.spawn_workers();

    let state = AppState {
        config: Arc::new(config.clone()),
        rv,
        vi,
        gr,
        orchestrator,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/tools/search", post(handle_search))
        .route("/tools/get", post(handle_get))
        .route("/api/ingest/file", post(handle_ingest_file))
        .route("/api/ingest/url", post(handle_ingest_url))
        .route("/api/ingest/batch", post(handle_ingest_batch))
        .route("/api/ingest/jobs/{job_id}", get(handle_job_status))
        .route("/api/ingest/jobs/{job_id}/events", get(handle_job_events))
        .route("/api/query", post(handle_query))
        .route("/webhook/session-logger", post(crate::webhook::handle_session_logger))
        .route("/webhook/action-tracker", post(crate::webhook::handle_action_tracker))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    tracing::info!(addr = %bind_addr, "http server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    pub fn internal(message: impl Into<String>) -> Self {
        internal_error(message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

pub fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn embeddings_disabled(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "embeddings_disabled".to_string(),
        message: message.into(),
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ POST /tools/search (legacy keyword/semantic/hybrid) ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default = "default_mode")]
    mode: String,
    #[serde(default = "default_search_limit")]
    limit: i64,
    #[serde(default)]
    project: Option<String>,
}

fn default_mode() -> String {
    "hybrid".to_string()
}

fn default_search_limit() -> i64 {
    12
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let mode = match req.mode.as_str() {
        "keyword" | "vector" | "hybrid" | "graph-augmented" => req.mode.clone(),
        "semantic" => "vector".to_string(),
        other => {
            return Err(bad_request(format!(
                "Unknown search mode: {other}. Use keyword, vector, hybrid, or graph-augmented."
            )))
        }
    };

    let options = QueryOptions {
        top_k: req.limit,
        mode,
        filters: QueryFilters::default(),
    };
    let project = req.project.as_deref().unwrap_or("default");

    let results = search::query(&state.config, &state.rv, &state.vi, &state.gr, project, &req.query, &options)
        .await
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains("embeddings") {
                embeddings_disabled(msg)
            } else {
                internal_error(msg)
            }
        })?;

    Ok(Json(SearchResponse { results }))
}

// ============ POST /tools/get ============

#[derive(Deserialize)]
struct GetRequest {
    id: String,
}

async fn handle_get(
    State(state): State<AppState>,
    Json(req): Json<GetRequest>,
) -> Result<Json<DocumentResponse>, AppError> {
    if req.id.trim().is_empty() {
        return Err(bad_request("id must not be empty"));
    }

    let doc = get_document(&state.config, &req.id).await.map_err(|e| {
        let msg = e.to_string();
        if msg.contains("not found") {
            not_found(msg)
        } else {
            internal_error(msg)
        }
    })?;

    Ok(Json(doc))
}

// ============ POST /api/ingest/file ============

#[derive(Deserialize)]
struct IngestFileRequest {
    project: String,
    path: String,
    #[serde(default)]
    content_base64: Option<String>,
    #[serde(default = "default_priority")]
    priority: String,
    #[serde(default)]
    force_reingest: bool,
}

fn default_priority() -> String {
    "batch".to_string()
}

#[derive(Serialize)]
struct IngestJobResponse {
    job_id: String,
}

async fn handle_ingest_file(
    State(state): State<AppState>,
    Json(req): Json<IngestFileRequest>,
) -> Result<Json<IngestJobResponse>, AppError> {
    if req.project.trim().is_empty() || req.path.trim().is_empty() {
        return Err(bad_request("project and path are required"));
    }
    let priority = parse_priority(&req.priority)?;

    let raw_bytes = match req.content_base64 {
        Some(b64) => Some(
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, b64)
                .map_err(|e| bad_request(format!("invalid base64: {e}")))?,
        ),
        None => None,
    };
    let body = match &raw_bytes {
        Some(bytes) => String::from_utf8_lossy(bytes).to_string(),
        None => std::fs::read_to_string(&req.path).unwrap_or_default(),
    };

    let now = Utc::now();
    let item = SourceItem {
        source: "filesystem".to_string(),
        source_id: req.path.clone(),
        source_url: None,
        title: req.path.rsplit('/').next().map(|s| s.to_string()),
        author: None,
        created_at: now,
        updated_at: now,
        content_type: mime_guess_for(&req.path),
        body,
        metadata_json: "{}".to_string(),
        raw_json: None,
        raw_bytes,
    };

    let job_id = state
        .orchestrator
        .ingest_item(&req.project, item, priority, req.force_reingest);
    Ok(Json(IngestJobResponse { job_id: job_id.to_string() }))
}

fn mime_guess_for(path: &str) -> String {
    match path.rsplit('.').next() {
        Some("md") => "text/markdown",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        _ => "text/plain",
    }
    .to_string()
}

// ============ POST /api/ingest/url ============

#[derive(Deserialize)]
struct IngestUrlRequest {
    project: String,
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default = "default_priority")]
    priority: String,
    #[serde(default)]
    force_reingest: bool,
}

async fn handle_ingest_url(
    State(state): State<AppState>,
    Json(req): Json<IngestUrlRequest>,
) -> Result<Json<IngestJobResponse>, AppError> {
    if req.url.trim().is_empty() {
        return Err(bad_request("url must not be empty"));
    }
    let priority = parse_priority(&req.priority)?;

    let bytes = reqwest::get(&req.url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| internal_error(format!("fetch failed: {e}")))?
        .bytes()
        .await
        .map_err(|e| internal_error(format!("read body failed: {e}")))?;

    let now = Utc::now();
    let item = SourceItem {
        source: "url".to_string(),
        source_id: req.url.clone(),
        source_url: Some(req.url.clone()),
        title: req.title,
        author: None,
        created_at: now,
        updated_at: now,
        content_type: "text/html".to_string(),
        body: String::new(),
        metadata_json: "{}".to_string(),
        raw_json: None,
        raw_bytes: Some(bytes.to_vec()),
    };

    let job_id = state
        .orchestrator
        .ingest_item(&req.project, item, priority, req.force_reingest);
    Ok(Json(IngestJobResponse { job_id: job_id.to_string() }))
}

// ============ POST /api/ingest/batch ============

#[derive(Deserialize)]
struct BatchItem {
    source: String,
    source_id: String,
    #[serde(default)]
    source_url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: String,
    #[serde(default = "default_content_type")]
    content_type: String,
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

#[derive(Deserialize)]
struct IngestBatchRequest {
    project: String,
    items: Vec<BatchItem>,
    #[serde(default = "default_priority")]
    priority: String,
    #[serde(default)]
    force_reingest: bool,
}

async fn handle_ingest_batch(
    State(state): State<AppState>,
    Json(req): Json<IngestBatchRequest>,
) -> Result<Json<IngestJobResponse>, AppError> {
    if req.items.is_empty() {
        return Err(bad_request("items must not be empty"));
    }
    let priority = parse_priority(&req.priority)?;

    let now = Utc::now();
    let items: Vec<SourceItem> = req
        .items
        .into_iter()
        .map(|i| SourceItem {
            source: i.source,
            source_id: i.source_id,
            source_url: i.source_url,
            title: i.title,
            author: None,
            created_at: now,
            updated_at: now,
            content_type: i.content_type,
            body: i.body,
            metadata_json: "{}".to_string(),
            raw_json: None,
            raw_bytes: None,
        })
        .collect();

    let job_id = state
        .orchestrator
        .ingest_batch(&req.project, items, priority, None, req.force_reingest);
    Ok(Json(IngestJobResponse { job_id: job_id.to_string() }))
}

fn parse_priority(s: &str) -> Result<Priority, AppError> {
    match s {
        "interactive" => Ok(Priority::Interactive),
        "batch" => Ok(Priority::Batch),
        "background" => Ok(Priority::Background),
        other => Err(bad_request(format!("unknown priority: {other}"))),
    }
}

// ============ GET /api/ingest/jobs/{job_id} ============

#[derive(Serialize)]
struct JobStatusResponse {
    job_id: String,
    status: &'static str,
    processed_count: usize,
    total: usize,
    last_error: Option<String>,
}

async fn handle_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, AppError> {
    let id = Uuid::parse_str(&job_id).map_err(|_| bad_request("invalid job id"))?;
    let record = state
        .orchestrator
        .get_job(id)
        .ok_or_else(|| not_found(format!("job not found: {job_id}")))?;

    Ok(Json(JobStatusResponse {
        job_id: record.id.to_string(),
        status: match record.status {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        },
        processed_count: record.processed_count,
        total: record.total,
        last_error: record.last_error,
    }))
}

// ============ GET /api/ingest/jobs/{job_id}/events (SSE) ============

async fn handle_job_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let id = Uuid::parse_str(&job_id).map_err(|_| bad_request("invalid job id"))?;
    let rx = state
        .orchestrator
        .subscribe_progress(id)
        .ok_or_else(|| not_found(format!("job not found: {job_id}")))?;

    let stream = BroadcastStream::new(rx).filter_map(|res| match res {
        Ok(ev) => Some(Ok(progress_event_to_sse(ev))),
        Err(_) => None,
    });

    Ok(Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new().interval(Duration::from_secs(15)),
    ))
}

fn progress_event_to_sse(ev: ProgressEvent) -> Event {
    let payload = serde_json::json!({
        "job_id": ev.job_id.to_string(),
        "processed_count": ev.processed_count,
        "total": ev.total,
        "current_item_id": ev.current_item_id,
        "last_error": ev.last_error,
        "done": ev.done,
    });
    Event::default().json_data(payload).unwrap_or_else(|_| Event::default().data("{}"))
}

// ============ POST /api/query ============

#[derive(Deserialize)]
struct QueryRequest {
    project: String,
    q: String,
    #[serde(default = "default_query_mode")]
    mode: String,
    #[serde(default = "default_top_k")]
    top_k: i64,
    #[serde(default)]
    doc_type: Option<String>,
    #[serde(default)]
    since: Option<i64>,
}

fn default_query_mode() -> String {
    "hybrid".to_string()
}

fn default_top_k() -> i64 {
    10
}

#[derive(Serialize)]
struct QueryResponse {
    results: Vec<SearchResult>,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    if req.q.trim().is_empty() {
        return Err(bad_request("q must not be empty"));
    }

    let options = QueryOptions {
        top_k: req.top_k,
        mode: req.mode,
        filters: QueryFilters {
            doc_type: req.doc_type,
            since: req.since,
        },
    };

    let results = search::query(&state.config, &state.rv, &state.vi, &state.gr, &req.project, &req.q, &options)
        .await
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains("embeddings") {
                embeddings_disabled(msg)
            } else if msg.contains("unknown query mode") {
                bad_request(msg)
            } else {
                internal_error(msg)
            }
        })?;

    Ok(Json(QueryResponse { results }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

