//! Moderation surface: ban and unban records and authors.
//!
//! Banning a record forgets it from the cache and refuses future
//! resolutions with 410; banning an author does the same for everything
//! they publish. Caller authentication is deployment concern handled in
//! front of the gateway.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use beacon_core::{AuthorId, RecordId};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Request body for ban endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanRequest {
    pub reason: String,
}

/// POST /admin/ban/record/:id
pub async fn ban_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<BanRequest>,
) -> ApiResult<StatusCode> {
    let id = parse_record_id(&id)?;
    state.store.ban_record(&id, &body.reason)?;
    tracing::info!(id = %id, reason = %body.reason, "record banned");
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /admin/ban/record/:id
pub async fn unban_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_record_id(&id)?;
    let removed = state.store.unban_record(&id)?;
    if !removed {
        return Err(ApiError::record_not_found(format!(
            "record {id} is not banned"
        )));
    }
    tracing::info!(id = %id, "record unbanned");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /admin/ban/author/:id
pub async fn ban_author(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<BanRequest>,
) -> ApiResult<StatusCode> {
    let author = parse_author_id(&id)?;
    state.store.ban_author(&author, &body.reason)?;
    tracing::info!(author = %author, reason = %body.reason, "author banned");
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /admin/ban/author/:id
pub async fn unban_author(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let author = parse_author_id(&id)?;
    let removed = state.store.unban_author(&author)?;
    if !removed {
        return Err(ApiError::record_not_found(format!(
            "author {author} is not banned"
        )));
    }
    tracing::info!(author = %author, "author unbanned");
    Ok(StatusCode::NO_CONTENT)
}

fn parse_record_id(raw: &str) -> ApiResult<RecordId> {
    RecordId::from_hex(raw)
        .map_err(|e| ApiError::invalid_input(format!("invalid record id '{raw}': {e}")))
}

fn parse_author_id(raw: &str) -> ApiResult<AuthorId> {
    AuthorId::from_hex(raw)
        .map_err(|e| ApiError::invalid_input(format!("invalid author id '{raw}': {e}")))
}
