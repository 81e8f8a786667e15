// =============================================================================
// Central Application State — FX forecaster
// =============================================================================
//
// Ties together the price source, the record store and the optional
// prediction engine, and remembers the outcome of the last cycle for the
// HTTP surface.
//
// Thread safety:
//   - The store sits behind a tokio Mutex; a cycle holds it across the
//     upstream await so concurrent triggers run one after another.
//   - parking_lot::RwLock for the small "last result" slots.
//   - The prediction engine is Arc-shared and read-only.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::ForecastError;
use crate::market_data::PriceSource;
use crate::pipeline::{self, CycleOutcome};
use crate::prediction::PredictionEngine;
use crate::record_store::RecordStore;
use crate::runtime_config::RuntimeConfig;
use crate::types::Forecast;

// =============================================================================
// Error Record
// =============================================================================

/// The last error seen by a cycle, for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// Error taxonomy name (e.g. `UpstreamUnavailable`).
    pub code: Option<String>,
    /// ISO 8601 timestamp.
    pub at: String,
}

// =============================================================================
// AppState
// =============================================================================

/// Shared across all request handlers via `Arc<AppState>`.
pub struct AppState {
    pub config: RuntimeConfig,
    pub source: Arc<dyn PriceSource>,
    pub store: Mutex<RecordStore>,

    /// `None` when the artifacts failed to load; see `artifact_error`.
    pub engine: Option<PredictionEngine>,
    pub artifact_error: Option<String>,

    pub last_forecast: RwLock<Option<Forecast>>,
    pub last_error: RwLock<Option<ErrorRecord>>,
    pub cycles_run: AtomicU64,

    /// Instant when the server was started. Used for uptime calculations.
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: RuntimeConfig,
        source: Arc<dyn PriceSource>,
        store: RecordStore,
        engine: Result<PredictionEngine, ForecastError>,
    ) -> Self {
        let (engine, artifact_error) = match engine {
            Ok(engine) => (Some(engine), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            config,
            source,
            store: Mutex::new(store),
            engine,
            artifact_error,
            last_forecast: RwLock::new(None),
            last_error: RwLock::new(None),
            cycles_run: AtomicU64::new(0),
            start_time: std::time::Instant::now(),
        }
    }

    /// The prediction engine, or the reason it is unavailable.
    pub fn engine(&self) -> Result<&PredictionEngine, ForecastError> {
        self.engine.as_ref().ok_or_else(|| ForecastError::ArtifactLoadFailure {
            artifact: "prediction artifacts".into(),
            reason: self
                .artifact_error
                .clone()
                .unwrap_or_else(|| "not loaded".into()),
        })
    }

    /// Run one polling cycle under the store lock and record its outcome.
    pub async fn run_cycle(&self, target: Option<DateTime<Utc>>) -> CycleOutcome {
        let mut store = self.store.lock().await;
        let outcome =
            pipeline::run_cycle(self.source.as_ref(), &mut store, self.engine.as_ref(), target).await;
        drop(store);

        self.cycles_run.fetch_add(1, Ordering::SeqCst);
        match &outcome {
            CycleOutcome::Success(report) => {
                if let Some(forecast) = report.forecast {
                    *self.last_forecast.write() = Some(forecast);
                }
                *self.last_error.write() = None;
            }
            CycleOutcome::Failure { error, .. } => {
                self.record_error(error);
            }
        }
        outcome
    }

    pub fn record_error(&self, error: &ForecastError) {
        *self.last_error.write() = Some(ErrorRecord {
            message: error.to_string(),
            code: Some(error.kind().to_string()),
            at: Utc::now().to_rfc3339(),
        });
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::bootstrapped_state;
    use super::*;

    #[tokio::test]
    async fn successful_cycle_records_forecast() {
        let (state, _) = bootstrapped_state(131, true);
        assert!(state.run_cycle(None).await.is_success());
        assert_eq!(state.cycles_run.load(Ordering::SeqCst), 1);
        assert!(state.last_forecast.read().is_some());
        assert!(state.last_error.read().is_none());
    }

    #[tokio::test]
    async fn failed_cycle_records_error_kind() {
        let (state, feed) = bootstrapped_state(131, true);
        feed.fail("connection reset");
        assert!(!state.run_cycle(None).await.is_success());
        let err = state.last_error.read().clone().unwrap();
        assert_eq!(err.code.as_deref(), Some("UpstreamUnavailable"));
    }

    #[test]
    fn missing_artifacts_surface_as_artifact_failure() {
        let (state, _) = bootstrapped_state(130, false);
        let err = state.engine().unwrap_err();
        assert_eq!(err.kind(), "ArtifactLoadFailure");
        assert!(err.to_string().contains("file not found"));
    }
}
