// =============================================================================
// Forecaster error taxonomy
// =============================================================================
//
// Every failure a polling cycle can hit maps onto one variant here. Upstream,
// empty-result and ordering failures are recoverable: the cycle reports them
// and leaves the store untouched. Artifact failures are fatal at startup of
// the prediction engine.
// =============================================================================

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("upstream price source unavailable: {reason}")]
    UpstreamUnavailable { reason: String },

    #[error("upstream returned no records for {start} .. {end}")]
    EmptyResult {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("bar at {incoming} is not after the latest stored bar at {latest}")]
    OutOfOrderTimestamp {
        incoming: DateTime<Utc>,
        latest: DateTime<Utc>,
    },

    #[error("insufficient window: need {expected} complete rows, have {actual}")]
    InsufficientWindow { expected: usize, actual: usize },

    #[error("invalid window: {reason}")]
    InvalidWindow { reason: String },

    #[error("failed to load artifact {artifact}: {reason}")]
    ArtifactLoadFailure { artifact: String, reason: String },

    #[error("malformed bar: {reason}")]
    MalformedBar { reason: String },

    #[error("record store error: {reason}")]
    Store { reason: String },
}

impl ForecastError {
    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpstreamUnavailable { .. } => "UpstreamUnavailable",
            Self::EmptyResult { .. } => "EmptyResult",
            Self::OutOfOrderTimestamp { .. } => "OutOfOrderTimestamp",
            Self::InsufficientWindow { .. } => "InsufficientWindow",
            Self::InvalidWindow { .. } => "InvalidWindow",
            Self::ArtifactLoadFailure { .. } => "ArtifactLoadFailure",
            Self::MalformedBar { .. } => "MalformedBar",
            Self::Store { .. } => "Store",
        }
    }

    /// Whether a later cycle may succeed without operator intervention.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. }
                | Self::EmptyResult { .. }
                | Self::OutOfOrderTimestamp { .. }
                | Self::MalformedBar { .. }
        )
    }

    pub(crate) fn store(reason: impl std::fmt::Display) -> Self {
        Self::Store {
            reason: reason.to_string(),
        }
    }

    pub(crate) fn artifact(artifact: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ArtifactLoadFailure {
            artifact: artifact.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<reqwest::Error> for ForecastError {
    fn from(e: reqwest::Error) -> Self {
        Self::UpstreamUnavailable {
            reason: e.to_string(),
        }
    }
}

pub type ForecastResult<T> = std::result::Result<T, ForecastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_errors_are_distinct_from_network_errors() {
        let window = ForecastError::InsufficientWindow {
            expected: 60,
            actual: 59,
        };
        let upstream = ForecastError::UpstreamUnavailable {
            reason: "timeout".into(),
        };
        assert_ne!(window.kind(), upstream.kind());
        assert!(!window.is_recoverable());
        assert!(upstream.is_recoverable());
        assert_eq!(
            window.to_string(),
            "insufficient window: need 60 complete rows, have 59"
        );
    }
}
