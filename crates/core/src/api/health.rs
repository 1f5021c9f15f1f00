//! `GET /api/health` — liveness, store reachability, operation counts.

use super::AppState;
use axum::extract::State;
use axum::response::Json;
use serde_json::json;

use crate::error::ApiResult;
use crate::models::OperationState;

pub async fn health(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let active = state.store.list_active_operations()?.len();
    let failed = state
        .store
        .list_operations_by_state(OperationState::Failed)?
        .len();

    Ok(Json(json!({
        "status": "ok",
        "module": "shelfkeeperd",
        "version": env!("CARGO_PKG_VERSION"),
        "build_timestamp": env!("BUILD_TIMESTAMP"),
        "operations": {
            "active": active,
            "failed": failed,
        },
    })))
}
