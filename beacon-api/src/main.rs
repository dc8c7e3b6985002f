//! Beacon gateway entry point.
//!
//! Opens the record store, builds the resolution engine and admission
//! controller, spawns the expiration sweeper, and serves HTTP until
//! interrupted.

use std::sync::Arc;

use beacon_api::jobs::{expiration_sweep_task, SweepConfig};
use beacon_api::middleware::{AdmissionConfig, AdmissionState};
use beacon_api::routes::create_api_router;
use beacon_api::state::AppState;
use beacon_api::telemetry::{init_telemetry, TelemetryConfig};
use beacon_api::{ApiError, ApiResult, GatewayConfig};
use beacon_relay::HttpRelayPool;
use beacon_resolver::{Engine, ResolverConfig};
use beacon_storage::RecordStore;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_telemetry(&telemetry_config)?;

    let config = GatewayConfig::from_env();
    let store = Arc::new(RecordStore::open(&config.store_config()).map_err(|e| {
        ApiError::internal_error(format!("Failed to open record store: {}", e))
    })?);

    let pool = Arc::new(HttpRelayPool::new());
    let engine = Engine::new(Arc::clone(&store), pool, ResolverConfig::default());
    let admission = AdmissionState::new(AdmissionConfig::from_env());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(expiration_sweep_task(
        Arc::clone(&store),
        SweepConfig::from_env(),
        shutdown_rx,
    ));

    let state = AppState::new(engine, store);
    let app = create_api_router(state, admission);

    let addr = config.bind_addr();
    tracing::info!(%addr, "Starting beacon gateway");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Ok(metrics) = sweeper.await {
        let snapshot = metrics.snapshot();
        tracing::info!(
            cycles = snapshot.cycles,
            records_swept = snapshot.records_swept,
            "Sweeper drained"
        );
    }

    Ok(())
}
