//! The resolver surface: `GET /:identifier`.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use beacon_core::{Record, RelayName};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Query parameters for resolution.
#[derive(Debug, Default, Deserialize)]
pub struct ResolveQuery {
    /// Comma-separated relay hints, ranked ahead of everything else.
    pub hint: Option<String>,
}

/// A resolved record with the relays known to hold it, hinted relays first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub record: Record,
    pub seen_on: Vec<RelayName>,
}

/// GET /:identifier?hint=relay.a,relay.b
pub async fn resolve_record(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    Query(query): Query<ResolveQuery>,
) -> ApiResult<Json<ResolveResponse>> {
    let hints = parse_hints(query.hint.as_deref())?;
    let resolution = state.engine.resolve(&identifier, &hints).await?;
    Ok(Json(ResolveResponse {
        record: resolution.record,
        seen_on: resolution.relays,
    }))
}

/// Parse the comma-separated `hint` parameter into normalized relay names.
pub(crate) fn parse_hints(raw: Option<&str>) -> ApiResult<Vec<RelayName>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            RelayName::parse(part)
                .ok_or_else(|| ApiError::invalid_input(format!("invalid relay hint '{part}'")))
        })
        .collect()
}
