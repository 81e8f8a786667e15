// =============================================================================
// FX Forecaster — Main Entry Point
// =============================================================================
//
// `bootstrap` seeds the record store from history, `update` appends one hour,
// `predict` forecasts from the current store and `serve` exposes the polling
// cycle over HTTP. Every subcommand shares the same config and store.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod error;
mod indicators;
mod market_data;
mod pipeline;
mod prediction;
mod record_store;
mod runtime_config;
mod tiingo;
mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, DurationRound, Utc};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::error::ForecastResult;
use crate::pipeline::CycleOutcome;
use crate::prediction::{ArtifactContext, PredictionEngine};
use crate::record_store::RecordStore;
use crate::runtime_config::RuntimeConfig;
use crate::tiingo::TiingoClient;
use crate::types::WINDOW_SIZE;

const CONFIG_PATH: &str = "forecaster_config.json";

#[derive(Parser)]
#[command(author, version, about = "Hourly FX close forecaster", long_about = None)]
struct Cli {
    /// Path to the JSON runtime config
    #[arg(long, default_value = CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch history and write the initial record store
    Bootstrap {
        /// End of the history range (RFC 3339); defaults to the current hour
        #[arg(long)]
        end: Option<DateTime<Utc>>,
    },
    /// Fetch one hourly bar, append it and forecast the next close
    Update {
        /// Hour to fetch (RFC 3339); defaults to the first bar after the latest row
        #[arg(long)]
        date: Option<DateTime<Utc>>,
    },
    /// Forecast the next close from the stored window
    Predict,
    /// Serve the HTTP API
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = RuntimeConfig::load(&cli.config).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();

    // ── 2. Store ─────────────────────────────────────────────────────────
    let mut store = RecordStore::open(&config.store_path)
        .with_context(|| format!("failed to open record store {}", config.store_path.display()))?;
    info!(path = %config.store_path.display(), rows = store.len(), "record store opened");

    // ── 3. Dispatch ──────────────────────────────────────────────────────
    match cli.command {
        Commands::Bootstrap { end } => {
            let client = tiingo_client(&config)?;
            let end = match end.or(config.bootstrap_end) {
                Some(end) => end,
                None => current_hour()?,
            };
            let report = pipeline::bootstrap(
                &client,
                &mut store,
                end,
                WINDOW_SIZE,
                config.warmup_hours,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Update { date } => {
            let client = tiingo_client(&config)?;
            let engine = match load_engine(&config) {
                Ok(engine) => Some(engine),
                Err(e) => {
                    warn!(error = %e, "prediction artifacts unavailable, forecasting disabled");
                    None
                }
            };
            match pipeline::run_cycle(&client, &mut store, engine.as_ref(), date).await {
                CycleOutcome::Success(report) => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                CycleOutcome::Failure { phase, error, appended } => {
                    if let Some(row) = appended {
                        warn!(timestamp = %row.timestamp, "row was stored before the failure");
                    }
                    anyhow::bail!("cycle failed in {phase}: {error}");
                }
            }
        }
        Commands::Predict => {
            let engine = load_engine(&config)?;
            let forecast = engine.predict_from_store(&store)?;
            println!("{}", serde_json::to_string_pretty(&forecast)?);
        }
        Commands::Serve => serve(config, store).await?,
    }

    Ok(())
}

async fn serve(config: RuntimeConfig, store: RecordStore) -> Result<()> {
    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        FX Forecaster — Starting Up                      ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    if store.is_empty() {
        warn!("record store is empty; run `bootstrap` before polling");
    }

    let client = tiingo_client(&config)?;
    let engine = load_engine(&config);
    if let Err(e) = &engine {
        error!(error = %e, "prediction artifacts unavailable, forecasts disabled");
    }

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config, Arc::new(client), store, engine));
    let app = api::rest::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            warn!("Shutdown signal received — stopping gracefully");
        })
        .await
        .context("API server failed")?;

    info!("FX Forecaster shut down complete.");
    Ok(())
}

fn tiingo_client(config: &RuntimeConfig) -> Result<TiingoClient> {
    let api_key = std::env::var("TIINGO_API_KEY").context("TIINGO_API_KEY is not set")?;
    let client = TiingoClient::with_base_url(api_key, &config.ticker, &config.tiingo_base_url)?;
    info!(ticker = client.ticker(), base_url = %config.tiingo_base_url, "Tiingo client ready");
    Ok(client)
}

fn load_engine(config: &RuntimeConfig) -> ForecastResult<PredictionEngine> {
    let ctx = ArtifactContext::load(&config.artifact_paths())?;
    Ok(PredictionEngine::new(Arc::new(ctx)))
}

/// The start of the current UTC hour.
fn current_hour() -> Result<DateTime<Utc>> {
    Utc::now()
        .duration_trunc(Duration::hours(1))
        .context("failed to truncate current time to the hour")
}
