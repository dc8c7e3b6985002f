//! HTTP routes for the beacon gateway.
//!
//! The catch-all `GET /:identifier` is the resolver surface; everything else
//! (health, per-relay listings, moderation) lives under its own prefix so the
//! admission controller can skip it by prefix match.

pub mod feed;
pub mod health;
pub mod moderation;
pub mod relay;
pub mod resolve;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::middleware::{admission_middleware, AdmissionState};
use crate::state::AppState;

/// Assemble the gateway router: routes, trace layer, admission controller.
///
/// The admission middleware is the outermost layer, so overload shedding
/// happens before any per-request work.
pub fn create_api_router(state: AppState, admission: AdmissionState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .route("/relay/:name", get(relay::ids_for_relay))
        .route("/feed/:identifier", get(feed::author_feed))
        .route(
            "/admin/ban/record/:id",
            post(moderation::ban_record).delete(moderation::unban_record),
        )
        .route(
            "/admin/ban/author/:id",
            post(moderation::ban_author).delete(moderation::unban_author),
        )
        .route("/:identifier", get(resolve::resolve_record))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(from_fn_with_state(admission, admission_middleware))
}
