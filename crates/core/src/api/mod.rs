//! HTTP surface for the operation core: catalog CRUD, operation control, the
//! event stream, and the handful of filesystem helpers the UI needs.
//!
//! Grounded on the teacher's `api/mod.rs` (an `AppState` holding the
//! long-lived engine handles, a flat `Router::new().route(...)` tree nested
//! under `/api/v1`, `with_state` at the end), generalized from one playback
//! engine to the store/events/queue trio this crate is built around.

mod audiobooks;
mod authors_series;
mod blocked_hashes;
mod events;
mod filesystem;
mod health;
mod import_paths;
mod operations;

use crate::queue::Queue;
use axum::routing::{delete, get, post};
use axum::Router;
use shelfkeeper_common::events::EventHub;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::store::Store;

/// Shared handles every handler needs. Cheaply `Clone`-able: `Store` and
/// `EventHub` already wrap an `Arc` internally, and `Queue` is held behind
/// one here.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub events: EventHub,
    pub queue: Arc<Queue>,
    pub library_root: PathBuf,
    pub opt_out_marker: String,
    pub event_stream_max_lifetime: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/events", get(events::stream))
        .route("/api/filesystem/browse", get(filesystem::browse))
        .route(
            "/api/filesystem/exclude",
            post(filesystem::exclude).delete(filesystem::unexclude),
        )
        .nest(
            "/api/v1",
            Router::new()
                .route("/audiobooks", get(audiobooks::list))
                .route("/audiobooks/batch", post(audiobooks::batch_update))
                .route(
                    "/audiobooks/:id",
                    get(audiobooks::get_one)
                        .put(audiobooks::update)
                        .delete(audiobooks::delete),
                )
                .route("/audiobooks/:id/tags", get(audiobooks::tags))
                .route(
                    "/audiobooks/:id/fetch-metadata",
                    post(audiobooks::fetch_metadata),
                )
                .route("/authors", get(authors_series::list_authors))
                .route("/series", get(authors_series::list_series))
                .route(
                    "/import-paths",
                    get(import_paths::list).post(import_paths::create),
                )
                .route("/import-paths/:id", delete(import_paths::remove))
                .route(
                    "/blocked-hashes",
                    get(blocked_hashes::list).post(blocked_hashes::create),
                )
                .route("/blocked-hashes/:hash", delete(blocked_hashes::remove))
                .route("/operations/scan", post(operations::scan))
                .route("/operations/organize", post(operations::organize))
                .route("/operations/:id/status", get(operations::status))
                .route("/operations/:id/logs", get(operations::logs))
                .route("/operations/:id/cancel", post(operations::cancel)),
        )
        .with_state(state)
}
