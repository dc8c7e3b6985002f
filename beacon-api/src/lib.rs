//! BEACON API - HTTP gateway
//!
//! The front door of the beacon resolver: an Axum HTTP surface exposing
//! record resolution, author feeds, per-relay listings, moderation, and
//! health probes. The admission controller wraps the router and guarantees
//! at most one in-flight resolution per identifier bucket under load; the
//! expiration sweeper runs alongside the server and drains the store's
//! expiry index.

pub mod config;
pub mod error;
pub mod jobs;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use config::GatewayConfig;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use jobs::{expiration_sweep_task, SweepConfig, SweepMetrics};
pub use middleware::{admission_middleware, AdmissionConfig, AdmissionState};
pub use routes::create_api_router;
pub use state::AppState;
pub use telemetry::{init_telemetry, TelemetryConfig};
