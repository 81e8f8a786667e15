// =============================================================================
// Polling cycle — FETCH_LATEST → UPDATE_STORE → PREDICT
// =============================================================================
//
//   IDLE → FETCH_LATEST ─┬─ ok ──→ UPDATE_STORE → PREDICT → EXPOSE_RESULT → IDLE
//                        └─ err ─→ EXPOSE_ERROR → IDLE
//
// Without an explicit hour, FETCH_LATEST takes the first bar after the
// latest stored row, so upstream gaps are stepped over. Every failure is
// caught here and turned into a `CycleOutcome::Failure` naming the phase it
// happened in. Nothing is retried; the caller triggers
// the next cycle. Callers must serialize cycles against one store.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::update::{apply_bar, fetch_bar, fetch_next_bar, UpdateOutcome};
use crate::error::ForecastError;
use crate::market_data::PriceSource;
use crate::prediction::PredictionEngine;
use crate::record_store::RecordStore;
use crate::types::{Forecast, IndicatorRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CyclePhase {
    Idle,
    FetchLatest,
    UpdateStore,
    Predict,
    ExposeResult,
    ExposeError,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::FetchLatest => write!(f, "FETCH_LATEST"),
            Self::UpdateStore => write!(f, "UPDATE_STORE"),
            Self::Predict => write!(f, "PREDICT"),
            Self::ExposeResult => write!(f, "EXPOSE_RESULT"),
            Self::ExposeError => write!(f, "EXPOSE_ERROR"),
        }
    }
}

/// Successful cycle payload.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// Hour of the bar that was fetched.
    pub target: DateTime<Utc>,
    pub record: IndicatorRow,
    /// The bar was already stored; the store was not modified.
    pub already_present: bool,
    /// `None` when no prediction engine is configured.
    pub forecast: Option<Forecast>,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Success(CycleReport),
    Failure {
        phase: CyclePhase,
        error: ForecastError,
        /// Row appended before a later phase failed, if any.
        appended: Option<IndicatorRow>,
    },
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Run one full polling cycle against `store`.
///
/// With `target` set, exactly that hour is fetched. Otherwise the first bar
/// after the latest stored row is used, however many hours later it is.
pub async fn run_cycle(
    source: &dyn PriceSource,
    store: &mut RecordStore,
    engine: Option<&PredictionEngine>,
    target: Option<DateTime<Utc>>,
) -> CycleOutcome {
    debug!(phase = %CyclePhase::Idle, rows = store.len(), "cycle starting");
    let mut phase = CyclePhase::FetchLatest;
    let outcome = run_phases(source, store, engine, target, &mut phase).await;

    let outcome = match outcome {
        Ok(report) => {
            info!(
                phase = %CyclePhase::ExposeResult,
                target = %report.target,
                already_present = report.already_present,
                forecast = ?report.forecast.as_ref().map(|f| f.predicted_close),
                "cycle complete"
            );
            CycleOutcome::Success(report)
        }
        Err((error, appended)) => {
            let stage = CyclePhase::ExposeError;
            let appended_at = appended.map(|r| r.timestamp);
            if error.is_recoverable() {
                warn!(phase = %stage, failed_in = %phase, kind = error.kind(), ?appended_at, error = %error, "cycle failed");
            } else {
                error!(phase = %stage, failed_in = %phase, kind = error.kind(), ?appended_at, error = %error, "cycle failed");
            }
            CycleOutcome::Failure {
                phase,
                error,
                appended,
            }
        }
    };
    debug!(phase = %CyclePhase::Idle, "cycle finished");
    outcome
}

async fn run_phases(
    source: &dyn PriceSource,
    store: &mut RecordStore,
    engine: Option<&PredictionEngine>,
    target: Option<DateTime<Utc>>,
    phase: &mut CyclePhase,
) -> Result<CycleReport, (ForecastError, Option<IndicatorRow>)> {
    let latest = store.latest_timestamp().ok_or_else(|| {
        (
            ForecastError::store("record store is empty, bootstrap it first"),
            None,
        )
    })?;

    *phase = CyclePhase::FetchLatest;
    let bar = match target {
        Some(target) => fetch_bar(source, target).await,
        None => fetch_next_bar(source, latest, Utc::now()).await,
    }
    .map_err(|e| (e, None))?;

    *phase = CyclePhase::UpdateStore;
    let update = apply_bar(store, bar).map_err(|e| (e, None))?;
    let (record, already_present) = match update {
        UpdateOutcome::Appended(row) => (row, false),
        UpdateOutcome::AlreadyPresent(row) => (row, true),
    };
    let appended = (!already_present).then_some(record);

    let forecast = match engine {
        Some(engine) => {
            *phase = CyclePhase::Predict;
            Some(
                engine
                    .predict_from_store(store)
                    .map_err(|e| (e, appended))?,
            )
        }
        None => None,
    };

    *phase = CyclePhase::ExposeResult;
    Ok(CycleReport {
        target: bar.timestamp,
        record,
        already_present,
        forecast,
    })
}
