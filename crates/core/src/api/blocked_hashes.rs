//! `GET|POST /api/v1/blocked-hashes`, `DELETE /api/v1/blocked-hashes/{hash}`.

use super::AppState;
use crate::error::ApiResult;
use crate::models::BlockedHash;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<BlockedHash>>> {
    Ok(Json(state.store.list_blocked_hashes()?))
}

#[derive(Debug, Deserialize)]
pub struct CreateBlockedHashRequest {
    pub hash: String,
    pub reason: String,
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateBlockedHashRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    state.store.block_hash(&req.hash, &req.reason)?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "hash": req.hash }))))
}

pub async fn remove(State(state): State<AppState>, Path(hash): Path<String>) -> ApiResult<StatusCode> {
    state.store.unblock_hash(&hash)?;
    Ok(StatusCode::NO_CONTENT)
}
