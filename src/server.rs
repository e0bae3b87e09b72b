//! HTTP server for uploads and the leaderboard.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/leaderboard` | Total steps per person, highest first |
//! | `GET`  | `/people` | Everyone with at least one record |
//! | `GET`  | `/people/{name}/records` | Paginated daily records, newest first |
//! | `POST` | `/uploads/{source}` | Multipart `name` + `file`; runs the pipeline |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "person name must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `ocr_failed` (502),
//! `internal` (500).
//!
//! # Lifecycle
//!
//! On start the database is restored from `[backup]` if it is missing, then
//! migrated. Ctrl-C stops accepting connections, drains in-flight requests,
//! and writes a fresh backup.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::backup;
use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::models::{DailyRecord, LeaderboardEntry, UploadSource};
use crate::pipeline::{PipelineError, StepPipeline, Upload, UploadOutcome};
use crate::preprocess::PreprocessError;
use crate::store::sqlite::SqliteRecordStore;
use crate::store::{Page, RecordStore};
use crate::upload::{self, UploadError};

/// Screenshots larger than this are refused before reaching the pipeline.
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pipeline: Arc<StepPipeline>,
}

/// Starts the HTTP server on `[server].bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    if backup::restore_if_missing(config)? {
        println!("Restored database from backup");
    }

    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(pool.clone()));
    let app = router(config, store);

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "server started");
    println!("Stepboard listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    backup::backup_database(config, Some(&pool)).await?;
    pool.close().await;
    Ok(())
}

/// Build the router over an existing store.
pub fn router(config: &Config, store: Arc<dyn RecordStore>) -> Router {
    let state = AppState {
        pipeline: Arc::new(StepPipeline::from_config(config, store)),
        config: Arc::new(config.clone()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/leaderboard", get(handle_leaderboard))
        .route("/people", get(handle_people))
        .route("/people/{name}/records", get(handle_records))
        .route("/uploads/{source}", post(handle_upload))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
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

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = %err, "request failed");
        internal(err.to_string())
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Io { .. } => {
                error!(error = %err, "cannot store upload");
                internal(err.to_string())
            }
            other => bad_request(other.to_string()),
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Ocr(e) => {
                warn!(error = %e, "ocr failed");
                AppError {
                    status: StatusCode::BAD_GATEWAY,
                    code: "ocr_failed",
                    message: e.to_string(),
                }
            }
            // Uploaded bytes that are not an image.
            PipelineError::Preprocess(e @ PreprocessError::Decode { .. }) => {
                bad_request(e.to_string())
            }
            other => {
                error!(error = %other, "pipeline failed");
                internal(other.to_string())
            }
        }
    }
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

// ============ GET /leaderboard, /people ============

#[derive(Serialize)]
struct LeaderboardResponse {
    entries: Vec<LeaderboardEntry>,
}

async fn handle_leaderboard(
    State(state): State<AppState>,
) -> Result<Json<LeaderboardResponse>, AppError> {
    let entries = state.pipeline.store().leaderboard().await?;
    Ok(Json(LeaderboardResponse { entries }))
}

#[derive(Serialize)]
struct PeopleResponse {
    people: Vec<String>,
}

async fn handle_people(State(state): State<AppState>) -> Result<Json<PeopleResponse>, AppError> {
    let people = state.pipeline.store().people().await?;
    Ok(Json(PeopleResponse { people }))
}

// ============ GET /people/{name}/records ============

#[derive(Serialize)]
struct RecordsResponse {
    person: String,
    page: u32,
    per_page: u32,
    records: Vec<DailyRecord>,
}

/// Parse `page` / `per_page` by hand so bad values get the JSON error body.
fn parse_page(params: &HashMap<String, String>) -> Result<Page, AppError> {
    let defaults = Page::default();
    let number = |key: &str, fallback: u32| -> Result<u32, AppError> {
        match params.get(key) {
            None => Ok(fallback),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| bad_request(format!("{} must be a positive integer", key))),
        }
    };
    let page = number("page", defaults.page)?;
    let per_page = number("per_page", defaults.per_page)?;
    Page::new(page, per_page).map_err(|e| bad_request(e.to_string()))
}

async fn handle_records(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<RecordsResponse>, AppError> {
    let page = parse_page(&params)?;
    let records = state.pipeline.store().history(&name, page).await?;
    if records.is_empty() && page.page == 1 {
        return Err(not_found(format!("no records for '{}'", name)));
    }
    Ok(Json(RecordsResponse {
        person: name,
        page: page.page,
        per_page: page.per_page,
        records,
    }))
}

// ============ POST /uploads/{source} ============

async fn handle_upload(
    State(state): State<AppState>,
    Path(source): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<UploadOutcome>, AppError> {
    let source: UploadSource = source.parse().map_err(|e: String| not_found(e))?;

    let mut person = None;
    let mut file = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        let field_name = field.name().map(str::to_owned);
        match field_name.as_deref() {
            Some("name") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("invalid name field: {}", e)))?;
                person = Some(text);
            }
            Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("invalid file field: {}", e)))?;
                file = Some((file_name, bytes));
            }
            _ => {}
        }
    }

    let person = upload::validate_person(person.as_deref().unwrap_or_default())?;
    let (file_name, bytes) = match file {
        Some((name, bytes)) if !name.is_empty() && !bytes.is_empty() => (name, bytes),
        _ => return Err(UploadError::MissingFile.into()),
    };

    let stored = upload::store_upload(&state.config.uploads.dir, &file_name, &bytes).await?;
    info!(person = %person, source = %source, image = %stored.display(), "upload stored");

    let outcome = state
        .pipeline
        .process(&Upload {
            person,
            image: stored,
            source,
            received_at: chrono::Local::now().naive_local(),
        })
        .await?;
    Ok(Json(outcome))
}
