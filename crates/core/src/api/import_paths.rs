//! `GET|POST /api/v1/import-paths`, `DELETE /api/v1/import-paths/{id}`.

use super::AppState;
use crate::error::ApiResult;
use crate::models::ImportPath;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<ImportPath>>> {
    Ok(Json(state.store.list_import_paths()?))
}

#[derive(Debug, Deserialize)]
pub struct CreateImportPathRequest {
    pub path: String,
    pub display_name: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateImportPathRequest>,
) -> ApiResult<(StatusCode, Json<ImportPath>)> {
    let entry = state
        .store
        .create_import_path(&req.path, req.display_name.as_deref())?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn remove(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.store.delete_import_path(&id)?;
    Ok(StatusCode::NO_CONTENT)
}
