// =============================================================================
// Runtime Configuration — forecaster settings with atomic save
// =============================================================================
//
// Everything the binary needs to locate its data and talk to the outside:
// ticker, store path, artifact paths, bootstrap span and the serving address.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::prediction::ArtifactPaths;
use crate::tiingo::client::DEFAULT_BASE_URL;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_ticker() -> String {
    "EURUSD".to_string()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/forex_data.csv")
}

fn default_model_path() -> PathBuf {
    PathBuf::from("artifacts/model.json")
}

fn default_feature_scaler_path() -> PathBuf {
    PathBuf::from("artifacts/feature_scaler.json")
}

fn default_target_scaler_path() -> PathBuf {
    PathBuf::from("artifacts/target_scaler.json")
}

fn default_warmup_hours() -> i64 {
    70
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_allowed_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_tiingo_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level configuration for the forecaster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Upstream ------------------------------------------------------------

    /// FX pair requested from the price source.
    #[serde(default = "default_ticker")]
    pub ticker: String,

    #[serde(default = "default_tiingo_base_url")]
    pub tiingo_base_url: String,

    // --- Store & artifacts ---------------------------------------------------

    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    #[serde(default = "default_feature_scaler_path")]
    pub feature_scaler_path: PathBuf,

    #[serde(default = "default_target_scaler_path")]
    pub target_scaler_path: PathBuf,

    // --- Bootstrap -----------------------------------------------------------

    /// Hours fetched on top of the window so the slow indicators settle.
    #[serde(default = "default_warmup_hours")]
    pub warmup_hours: i64,

    /// Fixed end of the bootstrap range. `None` means the current hour.
    #[serde(default)]
    pub bootstrap_end: Option<DateTime<Utc>>,

    // --- Serving -------------------------------------------------------------

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// The single browser origin allowed through CORS.
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            ticker: default_ticker(),
            tiingo_base_url: default_tiingo_base_url(),
            store_path: default_store_path(),
            model_path: default_model_path(),
            feature_scaler_path: default_feature_scaler_path(),
            target_scaler_path: default_target_scaler_path(),
            warmup_hours: default_warmup_hours(),
            bootstrap_end: None,
            bind_addr: default_bind_addr(),
            allowed_origin: default_allowed_origin(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            ticker = %config.ticker,
            store = %config.store_path.display(),
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply `FORECASTER_*` overrides from the environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(ticker) = non_empty("FORECASTER_TICKER") {
            self.ticker = ticker.to_uppercase();
        }
        if let Some(addr) = non_empty("FORECASTER_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(origin) = non_empty("FORECASTER_ALLOWED_ORIGIN") {
            self.allowed_origin = origin;
        }
        if let Some(path) = non_empty("FORECASTER_STORE_PATH") {
            self.store_path = PathBuf::from(path);
        }
        if let Some(hours) = non_empty("FORECASTER_WARMUP_HOURS") {
            match hours.parse::<i64>() {
                Ok(h) if h >= 0 => self.warmup_hours = h,
                _ => warn!(value = %hours, "ignoring invalid FORECASTER_WARMUP_HOURS"),
            }
        }
    }

    pub fn artifact_paths(&self) -> ArtifactPaths {
        ArtifactPaths {
            model: self.model_path.clone(),
            feature_scaler: self.feature_scaler_path.clone(),
            target_scaler: self.target_scaler_path.clone(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.ticker, "EURUSD");
        assert_eq!(cfg.store_path, PathBuf::from("data/forex_data.csv"));
        assert_eq!(cfg.warmup_hours, 70);
        assert_eq!(cfg.allowed_origin, "http://localhost:3000");
        assert_eq!(cfg.bind_addr, "0.0.0.0:8000");
        assert!(cfg.bootstrap_end.is_none());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.ticker, "EURUSD");
        assert_eq!(cfg.tiingo_base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.model_path, PathBuf::from("artifacts/model.json"));
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "ticker": "GBPUSD", "bootstrap_end": "2025-02-21T12:00:00Z" }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.ticker, "GBPUSD");
        assert_eq!(
            cfg.bootstrap_end.unwrap().to_rfc3339(),
            "2025-02-21T12:00:00+00:00"
        );
        assert_eq!(cfg.warmup_hours, 70);
    }

    #[test]
    fn env_overrides_replace_fields() {
        let env: HashMap<&str, &str> = [
            ("FORECASTER_TICKER", " gbpusd "),
            ("FORECASTER_BIND_ADDR", "127.0.0.1:9000"),
            ("FORECASTER_ALLOWED_ORIGIN", ""),
            ("FORECASTER_WARMUP_HOURS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut cfg = RuntimeConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.ticker, "GBPUSD");
        assert_eq!(cfg.bind_addr, "127.0.0.1:9000");
        assert_eq!(cfg.allowed_origin, "http://localhost:3000");
        assert_eq!(cfg.warmup_hours, 70);
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = std::env::temp_dir().join(format!("fx-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("forecaster_config.json");

        let mut cfg = RuntimeConfig::default();
        cfg.ticker = "USDJPY".into();
        cfg.save(&path).unwrap();
        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.ticker, "USDJPY");
        assert!(!path.with_extension("json.tmp").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(RuntimeConfig::load("/nonexistent/forecaster_config.json").is_err());
    }
}
