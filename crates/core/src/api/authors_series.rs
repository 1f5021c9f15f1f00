//! `GET /api/v1/authors`, `GET /api/v1/series` — flat lists.

use super::AppState;
use crate::error::ApiResult;
use crate::models::{Author, Series};
use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub async fn list_authors(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> ApiResult<Json<Vec<Author>>> {
    let authors = state
        .store
        .list_authors(q.limit.unwrap_or(50), q.offset.unwrap_or(0))?;
    Ok(Json(authors))
}

pub async fn list_series(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> ApiResult<Json<Vec<Series>>> {
    let series = state
        .store
        .list_series(q.limit.unwrap_or(50), q.offset.unwrap_or(0))?;
    Ok(Json(series))
}
