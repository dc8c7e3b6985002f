//! Shared application state for Axum routers.

use std::sync::Arc;

use beacon_resolver::Engine;
use beacon_storage::RecordStore;

/// Application-wide state shared across all routes.
///
/// Built once at startup and cloned into every handler; there is no global
/// state anywhere, so tests construct as many independent instances as they
/// like.
#[derive(Clone)]
pub struct AppState {
    /// The resolution engine (store + relay pool + config).
    pub engine: Engine,
    /// Direct store handle for moderation and health probes.
    pub store: Arc<RecordStore>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(engine: Engine, store: Arc<RecordStore>) -> Self {
        Self {
            engine,
            store,
            start_time: std::time::Instant::now(),
        }
    }
}
