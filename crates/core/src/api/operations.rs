//! `POST /api/v1/operations/scan`, `POST .../organize`, and per-operation
//! status/logs/cancel.

use super::AppState;
use crate::error::ApiResult;
use crate::models::{LogEntry, Operation, OperationKind, Priority};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize, Default)]
pub struct ScanRequest {
    pub path: Option<String>,
    #[serde(default)]
    pub force_update: bool,
}

/// `POST /api/v1/operations/scan` — a missing `path` scans every enabled
/// import path, plus the library root if `force_update` is set; a given
/// `path` scans just that directory. One `scan` Operation is enqueued per
/// target.
pub async fn scan(
    State(state): State<AppState>,
    Json(req): Json<ScanRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let force_update = req.force_update;
    let mut targets = Vec::new();
    match req.path {
        Some(path) => targets.push(path),
        None => {
            for import_path in state.store.list_import_paths()? {
                if import_path.enabled {
                    targets.push(import_path.path);
                }
            }
            if force_update {
                targets.push(state.library_root.to_string_lossy().to_string());
            }
        }
    }

    let mut operation_ids = Vec::new();
    for target in targets {
        let id = state
            .queue
            .enqueue(
                OperationKind::Scan,
                Priority::Normal,
                json!({ "path": target, "force_update": force_update }),
                Some(target),
            )
            .await?;
        operation_ids.push(id);
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "operation_ids": operation_ids })),
    ))
}

/// `POST /api/v1/operations/organize` — enqueues organize for every
/// eligible book; the registered executor resolves "eligible" at run time.
pub async fn organize(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let id = state
        .queue
        .enqueue(OperationKind::Organize, Priority::Normal, json!({}), None)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "operation_id": id }))))
}

pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Operation>> {
    Ok(Json(state.queue.status(&id)?))
}

pub async fn logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<LogEntry>>> {
    Ok(Json(state.queue.logs(&id)?))
}

pub async fn cancel(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.queue.cancel(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
