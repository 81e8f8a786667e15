// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// The dashboard polls `/get_latest`, which runs one full cycle and returns the
// appended record with its forecast. The remaining endpoints are read-only
// views over the store and the last outcome.
//
// CORS admits the single configured frontend origin.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use crate::app_state::{AppState, ErrorRecord};
use crate::error::ForecastError;
use crate::pipeline::CycleOutcome;
use crate::types::{Forecast, IndicatorRow};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.allowed_origin);

    Router::new()
        .route("/", get(root))
        .route("/api/v1/health", get(health))
        .route("/get_latest", get(get_latest))
        .route("/api/v1/predict", get(predict))
        .route("/api/v1/window", get(window))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true);

    match HeaderValue::from_str(origin) {
        Ok(value) => layer.allow_origin(AllowOrigin::exact(value)),
        Err(e) => {
            warn!(origin, error = %e, "invalid CORS origin, cross-origin requests disabled");
            layer.allow_origin(AllowOrigin::list(Vec::<HeaderValue>::new()))
        }
    }
}

// =============================================================================
// Error mapping
// =============================================================================

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

/// A `ForecastError` rendered as `{"error", "kind"}` with a status per kind.
pub struct ApiError(pub ForecastError);

impl From<ForecastError> for ApiError {
    fn from(e: ForecastError) -> Self {
        Self(e)
    }
}

fn status_for(error: &ForecastError) -> StatusCode {
    match error {
        ForecastError::UpstreamUnavailable { .. } | ForecastError::MalformedBar { .. } => {
            StatusCode::BAD_GATEWAY
        }
        ForecastError::EmptyResult { .. } => StatusCode::NOT_FOUND,
        ForecastError::OutOfOrderTimestamp { .. } => StatusCode::CONFLICT,
        ForecastError::InsufficientWindow { .. } | ForecastError::InvalidWindow { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ForecastError::ArtifactLoadFailure { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ForecastError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.0.to_string(),
            kind: self.0.kind(),
        };
        (status_for(&self.0), Json(body)).into_response()
    }
}

// =============================================================================
// Root & health (public)
// =============================================================================

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "Forex Prediction System API is running!" }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    ticker: String,
    rows: usize,
    latest: Option<DateTime<Utc>>,
    model_loaded: bool,
    artifact_error: Option<String>,
    cycles_run: u64,
    last_forecast: Option<Forecast>,
    last_error: Option<ErrorRecord>,
    uptime_secs: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (rows, latest) = {
        let store = state.store.lock().await;
        (store.len(), store.latest_timestamp())
    };
    let resp = HealthResponse {
        status: "ok",
        ticker: state.config.ticker.clone(),
        rows,
        latest,
        model_loaded: state.engine.is_some(),
        artifact_error: state.artifact_error.clone(),
        cycles_run: state.cycles_run.load(std::sync::atomic::Ordering::Relaxed),
        last_forecast: *state.last_forecast.read(),
        last_error: state.last_error.read().clone(),
        uptime_secs: state.uptime_secs(),
        server_time: Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Polling cycle
// =============================================================================

#[derive(Deserialize)]
struct LatestQuery {
    /// Hour to fetch; defaults to the first bar after the latest stored row.
    #[serde(default)]
    date: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct LatestResponse {
    #[serde(flatten)]
    record: IndicatorRow,
    already_present: bool,
    forecast: Option<Forecast>,
}

async fn get_latest(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LatestQuery>,
) -> Result<Json<LatestResponse>, ApiError> {
    match state.run_cycle(query.date).await {
        CycleOutcome::Success(report) => {
            info!(timestamp = %report.record.timestamp, "get_latest served");
            Ok(Json(LatestResponse {
                record: report.record,
                already_present: report.already_present,
                forecast: report.forecast,
            }))
        }
        CycleOutcome::Failure { error, .. } => Err(error.into()),
    }
}

// =============================================================================
// Read-only views
// =============================================================================

async fn predict(State(state): State<Arc<AppState>>) -> Result<Json<Forecast>, ApiError> {
    let engine = state.engine()?;
    let store = state.store.lock().await;
    let forecast = engine.predict_from_store(&store)?;
    drop(store);

    *state.last_forecast.write() = Some(forecast);
    Ok(Json(forecast))
}

async fn window(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let size = state
        .engine
        .as_ref()
        .map_or(crate::types::WINDOW_SIZE, |e| e.window_size());
    let store = state.store.lock().await;
    Json(store.last_rows(size).to_vec())
}
