//! Per-relay listings: `GET /relay/:name`.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use beacon_core::{RecordId, RelayName};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct RelayQuery {
    pub limit: Option<usize>,
}

/// Records a relay is known to hold, from the store's secondary index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayResponse {
    pub relay: RelayName,
    pub ids: Vec<RecordId>,
}

/// GET /relay/:name?limit=100
pub async fn ids_for_relay(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<RelayQuery>,
) -> ApiResult<Json<RelayResponse>> {
    let relay = RelayName::parse(&name)
        .ok_or_else(|| ApiError::invalid_input(format!("invalid relay name '{name}'")))?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let ids = state.store.ids_by_relay(&relay, limit)?;
    Ok(Json(RelayResponse { relay, ids }))
}
