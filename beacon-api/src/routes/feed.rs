//! Author feeds: `GET /feed/:identifier`.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::routes::resolve::ResolveResponse;
use crate::state::AppState;

/// Query parameters for feeds.
#[derive(Debug, Default, Deserialize)]
pub struct FeedQuery {
    /// Maximum number of notes, clamped server-side.
    pub limit: Option<usize>,
}

/// A feed of an author's recent notes, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedResponse {
    pub records: Vec<ResolveResponse>,
}

/// GET /feed/:identifier?limit=20
///
/// The identifier must name an author (author or entity pointer, or a
/// subject pointer carrying its author). Relay hints ride inside the
/// identifier itself.
pub async fn author_feed(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    Query(query): Query<FeedQuery>,
) -> ApiResult<Json<FeedResponse>> {
    let limit = query.limit.unwrap_or(usize::MAX);
    let feed = state.engine.feed(&identifier, limit).await?;
    Ok(Json(FeedResponse {
        records: feed
            .into_iter()
            .map(|resolution| ResolveResponse {
                record: resolution.record,
                seen_on: resolution.relays,
            })
            .collect(),
    }))
}
