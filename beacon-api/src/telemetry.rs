//! Tracing subscriber initialization.
//!
//! Structured JSON logs filtered by `RUST_LOG`, defaulting to debug for the
//! gateway's own crates. Logs are the gateway's only observability surface;
//! there is no export pipeline.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ApiError, ApiResult};

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name stamped into startup logs.
    pub service_name: String,
    /// Environment (production, staging, development).
    pub environment: String,
    /// Emit JSON log lines instead of human-readable ones.
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: std::env::var("BEACON_SERVICE_NAME")
                .unwrap_or_else(|_| "beacon-api".to_string()),
            environment: std::env::var("BEACON_ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            json_logs: std::env::var("BEACON_JSON_LOGS")
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(true),
        }
    }
}

/// Initialize the tracing subscriber.
///
/// Call once at startup before any tracing occurs.
pub fn init_telemetry(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("beacon_api=debug,tower_http=debug,info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = config.service_name,
        environment = config.environment,
        "Telemetry initialized"
    );

    Ok(())
}
