//! Catalog endpoints: list/get/update/delete/batch, raw tags, fetch-metadata.

use super::AppState;
use crate::error::{ApiError, ApiResult};
use crate::models::{Book, FieldSource, MetadataFieldState, OperationKind, Priority, TrackedField};
use crate::store::{BookFilter, ListOptions, SortDirection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub sort: Option<String>,
    pub filter: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProvenanceEntry {
    pub value_from_file: Option<String>,
    pub value_from_lookup: Option<String>,
    pub value_stored: Option<String>,
    pub value_override: Option<String>,
    pub locked: bool,
    pub effective: Option<String>,
    pub source: Option<FieldSource>,
}

impl From<&MetadataFieldState> for ProvenanceEntry {
    fn from(state: &MetadataFieldState) -> Self {
        Self {
            value_from_file: state.value_from_file.clone(),
            value_from_lookup: state.value_from_lookup.clone(),
            value_stored: state.value_stored.clone(),
            value_override: state.value_override.clone(),
            locked: state.locked,
            effective: state.effective().map(str::to_string),
            source: state.last_source,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AudiobookResponse {
    #[serde(flatten)]
    pub book: Book,
    pub provenance: HashMap<String, ProvenanceEntry>,
}

fn provenance_map(store: &crate::store::Store, book_id: &str) -> ApiResult<HashMap<String, ProvenanceEntry>> {
    let mut map = HashMap::with_capacity(TrackedField::ALL.len());
    for field in TrackedField::ALL {
        if let Some(state) = store.get_field_state(book_id, field)? {
            map.insert(field.as_str().to_string(), ProvenanceEntry::from(&state));
        }
    }
    Ok(map)
}

fn build_response(store: &crate::store::Store, book: Book) -> ApiResult<AudiobookResponse> {
    let provenance = provenance_map(store, &book.id)?;
    Ok(AudiobookResponse { book, provenance })
}

/// `GET /api/v1/audiobooks?limit&offset&sort&filter`
pub async fn list(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<Vec<Book>>> {
    let mut options = ListOptions::default();
    if let Some(limit) = q.limit {
        options.limit = limit;
    }
    if let Some(offset) = q.offset {
        options.offset = offset;
    }
    if let Some(sort) = &q.sort {
        let (field, direction) = match sort.split_once(':') {
            Some((f, "desc")) => (f, SortDirection::Descending),
            Some((f, _)) => (f, SortDirection::Ascending),
            None => (sort.as_str(), SortDirection::Ascending),
        };
        options.sort_field = Some(field.to_string());
        options.sort_direction = direction;
    }

    let filter = match q.filter.as_deref() {
        Some(state_name) => BookFilter {
            library_state: Some(parse_library_state(state_name)?),
            ..Default::default()
        },
        None => BookFilter::default(),
    };

    let books = state.store.list_books(&filter, &options)?;
    Ok(Json(books))
}

fn parse_library_state(name: &str) -> ApiResult<crate::models::LibraryState> {
    use crate::models::LibraryState::*;
    match name {
        "wanted" => Ok(Wanted),
        "import" => Ok(Import),
        "organized" => Ok(Organized),
        "deleted" => Ok(Deleted),
        other => Err(ApiError::InvalidInput(format!("unknown library_state filter: {other}"))),
    }
}

/// `GET /api/v1/audiobooks/{id}`
pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<AudiobookResponse>> {
    let book = state
        .store
        .get_book(&id)?
        .ok_or_else(|| ApiError::NotFound(format!("audiobook {id}")))?;
    Ok(Json(build_response(&state.store, book)?))
}

#[derive(Debug, Deserialize, Default)]
pub struct AudiobookUpdateRequest {
    /// Field name -> new override value; `null` clears the override.
    #[serde(default)]
    pub overrides: HashMap<String, Option<String>>,
    /// Field name -> lock bit.
    #[serde(default)]
    pub locks: HashMap<String, bool>,
    /// Link this book into the version group of the named book.
    pub link_to_book_id: Option<String>,
}

fn apply_non_fk_field(book: &mut Book, field: TrackedField, value: Option<&str>) {
    match field {
        TrackedField::Title => book.title = value.map(str::to_string),
        TrackedField::SeriesPosition => book.series_position = value.and_then(|v| v.parse().ok()),
        TrackedField::Narrator => book.narrator = value.map(str::to_string),
        TrackedField::Publisher => book.publisher = value.map(str::to_string),
        TrackedField::PublishDate => book.publish_date = value.map(str::to_string),
        TrackedField::Language => book.language = value.map(str::to_string),
        TrackedField::Description => book.description = value.map(str::to_string),
        TrackedField::CoverUrl => book.cover_url = value.map(str::to_string),
        TrackedField::Author | TrackedField::Series => {}
    }
}

/// Applies `req`'s overrides/locks/link to the book identified by `id`,
/// re-deriving cached fields and foreign keys from the updated provenance.
async fn apply_update(
    store: &crate::store::Store,
    id: &str,
    req: AudiobookUpdateRequest,
) -> ApiResult<Book> {
    let mut book = store
        .get_book(id)?
        .ok_or_else(|| ApiError::NotFound(format!("audiobook {id}")))?;

    for field in TrackedField::ALL {
        let key = field.as_str();
        let value_edit = req.overrides.get(key).cloned();
        let lock_edit = req.locks.get(key).copied();
        if value_edit.is_none() && lock_edit.is_none() {
            continue;
        }

        let mut fstate = store
            .get_field_state(id, field)?
            .unwrap_or_else(|| MetadataFieldState::new(id, field));
        if let Some(value) = value_edit {
            fstate.value_override = value;
        }
        if let Some(lock) = lock_edit {
            fstate.locked = lock;
        }
        fstate.last_updated = Utc::now();
        fstate.last_source = fstate.effective_source();
        store.put_field_state(&fstate)?;

        let effective = fstate.effective().map(str::to_string);
        match field {
            TrackedField::Author => {
                if let Some(name) = effective.filter(|v| !v.is_empty()) {
                    let author = store.get_or_create_author(&name)?;
                    book.author_id = Some(author.id);
                }
            }
            TrackedField::Series => {
                if let Some(name) = effective.filter(|v| !v.is_empty()) {
                    let series = store.get_or_create_series(&name, book.author_id.as_deref())?;
                    book.series_id = Some(series.id);
                }
            }
            _ => apply_non_fk_field(&mut book, field, effective.as_deref()),
        }
    }

    book.updated_at = Utc::now();
    store.update_book(book.clone())?;

    if let Some(target_id) = req.link_to_book_id {
        store.link_version_group(id, &target_id)?;
        book = store
            .get_book(id)?
            .ok_or_else(|| ApiError::NotFound(format!("audiobook {id}")))?;
    }

    Ok(book)
}

/// `PUT /api/v1/audiobooks/{id}`
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AudiobookUpdateRequest>,
) -> ApiResult<Json<AudiobookResponse>> {
    let book = apply_update(&state.store, &id, req).await?;
    Ok(Json(build_response(&state.store, book)?))
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub soft_delete: bool,
    #[serde(default)]
    pub block_hash: bool,
}

/// `DELETE /api/v1/audiobooks/{id}?soft_delete=bool&block_hash=bool`
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<DeleteQuery>,
) -> ApiResult<StatusCode> {
    state.store.delete_book(&id, q.soft_delete, q.block_hash)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct BatchItem {
    pub id: String,
    #[serde(flatten)]
    pub update: AudiobookUpdateRequest,
}

#[derive(Debug, Serialize)]
pub struct BatchResult {
    pub updated: Vec<Book>,
    pub errors: Vec<BatchError>,
}

#[derive(Debug, Serialize)]
pub struct BatchError {
    pub id: String,
    pub message: String,
}

/// `POST /api/v1/audiobooks/batch` — same per-item semantics as `update`;
/// one item's failure does not abort the rest, per the error handling
/// design's "per-item errors are logged and skipped" policy.
pub async fn batch_update(
    State(state): State<AppState>,
    Json(items): Json<Vec<BatchItem>>,
) -> ApiResult<Json<BatchResult>> {
    let mut updated = Vec::new();
    let mut errors = Vec::new();

    for item in items {
        match apply_update(&state.store, &item.id, item.update).await {
            Ok(book) => updated.push(book),
            Err(e) => errors.push(BatchError {
                id: item.id,
                message: e.to_string(),
            }),
        }
    }

    Ok(Json(BatchResult { updated, errors }))
}

/// JSON-safe projection of `TagCandidate`: drops the raw cover art bytes
/// (reported only as present/absent) so the response stays small and text-only.
#[derive(Debug, Serialize)]
pub struct RawTags {
    pub title: Option<String>,
    pub author_primary: Option<String>,
    pub author_additional: Vec<String>,
    pub narrator: Option<String>,
    pub series: Option<String>,
    pub series_position: Option<i32>,
    pub publisher: Option<String>,
    pub publish_year: Option<i32>,
    pub language: Option<String>,
    pub duration_seconds: Option<u64>,
    pub genre: Option<String>,
    pub comment: Option<String>,
    pub has_cover_art: bool,
}

impl From<crate::extractors::TagCandidate> for RawTags {
    fn from(tag: crate::extractors::TagCandidate) -> Self {
        Self {
            title: tag.title,
            author_primary: tag.author_primary,
            author_additional: tag.author_additional,
            narrator: tag.narrator,
            series: tag.series,
            series_position: tag.series_position,
            publisher: tag.publisher,
            publish_year: tag.publish_year,
            language: tag.language,
            duration_seconds: tag.duration_seconds,
            genre: tag.genre,
            comment: tag.comment,
            has_cover_art: tag.cover_art.is_some(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TagsResponse {
    pub raw: Option<RawTags>,
    pub provenance: HashMap<String, ProvenanceEntry>,
}

/// `GET /api/v1/audiobooks/{id}/tags` — raw extractor output plus full
/// provenance.
pub async fn tags(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TagsResponse>> {
    let book = state
        .store
        .get_book(&id)?
        .ok_or_else(|| ApiError::NotFound(format!("audiobook {id}")))?;

    let raw = book
        .file_path
        .as_deref()
        .map(std::path::Path::new)
        .and_then(|path| crate::extractors::TagExtractor::new().extract(path).ok())
        .map(RawTags::from);

    let provenance = provenance_map(&state.store, &id)?;
    Ok(Json(TagsResponse { raw, provenance }))
}

/// `POST /api/v1/audiobooks/{id}/fetch-metadata` — enqueues a
/// `fetch_metadata` operation for this book.
pub async fn fetch_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    state
        .store
        .get_book(&id)?
        .ok_or_else(|| ApiError::NotFound(format!("audiobook {id}")))?;

    let operation_id = state
        .queue
        .enqueue(
            OperationKind::FetchMetadata,
            Priority::Normal,
            serde_json::json!({ "book_id": id }),
            Some(id.clone()),
        )
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "operation_id": operation_id })),
    ))
}
