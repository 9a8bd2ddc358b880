//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/analyze` | Analyze a barcode, search text or label photo |
//! | `GET`  | `/history` | Recent verdicts; filter with `q`, `min_score`, `band` |
//! | `GET`  | `/history/stats` | Summary statistics |
//! | `GET`  | `/history/{identity}` | Latest verdict for one product |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! `POST /analyze` takes exactly one of `barcode`, `search` or
//! `image_base64` (with optional `mime`, default `image/jpeg`), plus an
//! optional `timeout_secs`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "product_not_found", "message": "...", "hint": "Try a label photo instead..." } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `invalid_input`, `bad_request` | 400 |
//! | `product_not_found`, `not_found` | 404 |
//! | `timeout` | 408 |
//! | `ambiguous_match` | 409 (with `candidates`) |
//! | `insufficient_data`, `malformed_nutrition` | 422 |
//! | `assessment_schema`, `assessment_unavailable` | 502 |
//! | `source_unavailable` | 503 |
//! | `internal` | 500 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front end
//! can call the API directly.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::error::{CandidateSummary, PipelineError};
use crate::history::{HistoryQuery, HistoryStats, SqliteHistoryStore};
use crate::models::{Band, HistoryEntry, RawInput, Verdict};
use crate::pipeline::Pipeline;
use crate::db;

const DEFAULT_MIME: &str = "image/jpeg";
const MAX_HISTORY_PAGE: usize = 200;

/// Starts the HTTP server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::open(config).await?;
    let history = Arc::new(SqliteHistoryStore::new(
        pool,
        config.history.dedup_window_secs,
    ));
    let pipeline = Arc::new(Pipeline::from_config(config, history)?);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "HTTP API listening");
    axum::serve(listener, router(pipeline)).await?;

    Ok(())
}

/// All routes, with CORS, over a shared pipeline.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/analyze", post(handle_analyze))
        .route("/history", get(handle_history_list))
        .route("/history/stats", get(handle_history_stats))
        .route("/history/{identity}", get(handle_history_show))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(pipeline)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    candidates: Option<Vec<CandidateSummary>>,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    detail: ErrorDetail,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.detail })).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(e: PipelineError) -> Self {
        let status = match &e {
            PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PipelineError::ProductNotFound { .. } => StatusCode::NOT_FOUND,
            PipelineError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            PipelineError::AmbiguousMatch { .. } => StatusCode::CONFLICT,
            PipelineError::InsufficientData | PipelineError::MalformedNutrition { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            PipelineError::AssessmentSchema { .. } | PipelineError::AssessmentUnavailable { .. } => {
                StatusCode::BAD_GATEWAY
            }
            PipelineError::SourceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        };
        let candidates = e.candidates().map(<[CandidateSummary]>::to_vec);
        AppError {
            status,
            detail: ErrorDetail {
                code: e.code().to_string(),
                message: e.to_string(),
                hint: e.hint().map(str::to_string),
                candidates,
            },
        }
    }
}

fn simple_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        detail: ErrorDetail {
            code: code.to_string(),
            message: message.into(),
            hint: None,
            candidates: None,
        },
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    simple_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn internal(err: anyhow::Error) -> AppError {
    error!(error = %err, "request failed");
    simple_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
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

// ============ POST /analyze ============

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeRequest {
    pub barcode: Option<String>,
    pub search: Option<String>,
    pub image_base64: Option<String>,
    pub mime: Option<String>,
    pub timeout_secs: Option<f64>,
}

impl AnalyzeRequest {
    fn into_input(self) -> Result<(RawInput, Option<Duration>), AppError> {
        let timeout = match self.timeout_secs {
            Some(t) if t.is_finite() && t > 0.0 => Some(Duration::from_secs_f64(t)),
            Some(t) => return Err(bad_request(format!("timeout_secs must be positive, got {}", t))),
            None => None,
        };

        let input = match (self.barcode, self.search, self.image_base64) {
            (Some(code), None, None) => RawInput::Barcode(code),
            (None, Some(query), None) => RawInput::SearchText(query),
            (None, None, Some(b64)) => {
                let bytes = STANDARD
                    .decode(b64.trim())
                    .map_err(|e| bad_request(format!("image_base64 is not valid base64: {}", e)))?;
                RawInput::LabelImage {
                    bytes,
                    mime: self.mime.unwrap_or_else(|| DEFAULT_MIME.to_string()),
                }
            }
            _ => {
                return Err(bad_request(
                    "provide exactly one of barcode, search, image_base64",
                ))
            }
        };
        Ok((input, timeout))
    }
}

async fn handle_analyze(
    State(pipeline): State<Arc<Pipeline>>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<Verdict>, AppError> {
    let (input, timeout) = req.into_input()?;
    let verdict = pipeline.analyze(&input, timeout).await?;
    Ok(Json(verdict))
}

// ============ GET /history ============

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
    offset: Option<usize>,
    q: Option<String>,
    min_score: Option<u8>,
    band: Option<String>,
}

#[derive(Serialize)]
struct HistoryListResponse {
    entries: Vec<HistoryEntry>,
}

async fn handle_history_list(
    State(pipeline): State<Arc<Pipeline>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryListResponse>, AppError> {
    let limit = params.limit.unwrap_or(20).min(MAX_HISTORY_PAGE);
    let band = match params.band.as_deref() {
        Some(b) => Some(
            Band::parse(b).ok_or_else(|| bad_request(format!("unknown band: '{}'", b)))?,
        ),
        None => None,
    };

    let store = pipeline.history();
    let result = if params.q.is_some() || params.min_score.is_some() || band.is_some() {
        store
            .search(&HistoryQuery {
                name_contains: params.q,
                min_score: params.min_score,
                band,
                limit,
            })
            .await
    } else {
        store.list(limit, params.offset.unwrap_or(0)).await
    };
    let entries = result.map_err(internal)?;

    Ok(Json(HistoryListResponse { entries }))
}

async fn handle_history_stats(
    State(pipeline): State<Arc<Pipeline>>,
) -> Result<Json<HistoryStats>, AppError> {
    let stats = pipeline.history().stats().await.map_err(internal)?;
    Ok(Json(stats))
}

async fn handle_history_show(
    State(pipeline): State<Arc<Pipeline>>,
    Path(identity): Path<String>,
) -> Result<Json<HistoryEntry>, AppError> {
    pipeline
        .history()
        .find_by_identity(&identity)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| {
            simple_error(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("no history for '{}'", identity),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_requires_exactly_one_input() {
        let err = AnalyzeRequest::default().into_input().err().unwrap();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let both = AnalyzeRequest {
            barcode: Some("3017620422003".into()),
            search: Some("nutella".into()),
            ..Default::default()
        };
        assert!(both.into_input().is_err());
    }

    #[test]
    fn test_image_request_decodes_base64() {
        let req = AnalyzeRequest {
            image_base64: Some(STANDARD.encode(b"\x89PNG")),
            timeout_secs: Some(2.5),
            ..Default::default()
        };
        let (input, timeout) = req.into_input().unwrap();
        match input {
            RawInput::LabelImage { bytes, mime } => {
                assert_eq!(bytes, b"\x89PNG");
                assert_eq!(mime, DEFAULT_MIME);
            }
            other => panic!("unexpected input: {:?}", other),
        }
        assert_eq!(timeout, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_bad_base64_and_timeout_rejected() {
        let req = AnalyzeRequest {
            image_base64: Some("not base64!!".into()),
            ..Default::default()
        };
        assert!(req.into_input().is_err());

        let req = AnalyzeRequest {
            barcode: Some("3017620422003".into()),
            timeout_secs: Some(0.0),
            ..Default::default()
        };
        assert!(req.into_input().is_err());
    }

    #[test]
    fn test_pipeline_error_mapping() {
        let err = AppError::from(PipelineError::ProductNotFound {
            what: "barcode 123".into(),
        });
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.detail.code, "product_not_found");
        assert!(err.detail.hint.unwrap().contains("label photo"));

        let err = AppError::from(PipelineError::AmbiguousMatch {
            query: "cola".into(),
            candidates: vec![CandidateSummary {
                code: Some("5449000000996".into()),
                name: "Coca-Cola".into(),
                brand: None,
                confidence: 0.85,
            }],
        });
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.detail.candidates.unwrap().len(), 1);
    }
}
