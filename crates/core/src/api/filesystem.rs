//! `GET /api/filesystem/browse`, `POST|DELETE /api/filesystem/exclude` — the
//! directory-picker helpers the UI needs to let a user choose import paths
//! and mark subdirectories out of scan scope without leaving the app.

use super::AppState;
use crate::error::{ApiError, ApiResult};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct BrowseQuery {
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub excluded: bool,
}

#[derive(Debug, Serialize)]
pub struct BrowseResponse {
    pub path: String,
    pub entries: Vec<DirEntry>,
}

/// Lists the immediate children of `path` (default: the library root).
/// Directories containing the configured opt-out marker are flagged
/// `excluded` rather than hidden, so the UI can offer to toggle them back in.
pub async fn browse(
    State(state): State<AppState>,
    Query(q): Query<BrowseQuery>,
) -> ApiResult<Json<BrowseResponse>> {
    let dir = match q.path {
        Some(p) => PathBuf::from(p),
        None => state.library_root.clone(),
    };

    let read_dir = fs::read_dir(&dir).map_err(|e| {
        ApiError::InvalidInput(format!("cannot read directory {}: {e}", dir.display()))
    })?;

    let mut entries = Vec::new();
    for entry in read_dir {
        let entry = entry?;
        let metadata = entry.metadata()?;
        let path = entry.path();
        let excluded = metadata.is_dir() && path.join(&state.opt_out_marker).exists();
        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            path: path.to_string_lossy().to_string(),
            is_dir: metadata.is_dir(),
            size: metadata.len(),
            excluded,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Json(BrowseResponse {
        path: dir.to_string_lossy().to_string(),
        entries,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ExclusionRequest {
    pub path: String,
}

/// Drops the opt-out marker file into `path`, taking it out of scan scope
/// (spec.md §6.3).
pub async fn exclude(
    State(state): State<AppState>,
    Json(req): Json<ExclusionRequest>,
) -> ApiResult<StatusCode> {
    let marker = PathBuf::from(&req.path).join(&state.opt_out_marker);
    fs::write(&marker, b"")?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unexclude(
    State(state): State<AppState>,
    Json(req): Json<ExclusionRequest>,
) -> ApiResult<StatusCode> {
    let marker = PathBuf::from(&req.path).join(&state.opt_out_marker);
    match fs::remove_file(&marker) {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StatusCode::NO_CONTENT),
        Err(e) => Err(e.into()),
    }
}
