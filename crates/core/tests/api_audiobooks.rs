//! HTTP surface integration tests, driven through the router directly via
//! `tower::ServiceExt::oneshot` rather than a bound socket.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use shelfkeeper_common::events::EventHub;
use shelfkeeper_core::api::{router, AppState};
use shelfkeeper_core::models::{Book, LibraryState};
use shelfkeeper_core::queue::Queue;
use shelfkeeper_core::store::Store;
use tower::ServiceExt;

fn test_state() -> (AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::open(&dir.path().join("catalog.redb")).expect("open store");
    shelfkeeper_core::migrations::run(&store).expect("migrations");
    let events = EventHub::new(32, Duration::from_secs(3600));
    let queue = Arc::new(Queue::new(store.clone(), events.clone(), 1, Default::default()));

    let state = AppState {
        store,
        events,
        queue,
        library_root: dir.path().join("library"),
        opt_out_marker: ".jabexclude".to_string(),
        event_stream_max_lifetime: Duration::from_secs(5),
    };
    (state, dir)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("valid json")
}

#[tokio::test]
async fn health_reports_ok() {
    let (state, _dir) = test_state();
    let app = router(state);

    let response = app
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn list_audiobooks_starts_empty() {
    let (state, _dir) = test_state();
    let app = router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/audiobooks")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn get_missing_audiobook_is_404() {
    let (state, _dir) = test_state();
    let app = router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/audiobooks/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn update_sets_override_and_effective_title() {
    let (state, _dir) = test_state();
    let mut book = Book::new("book-1");
    book.library_state = LibraryState::Import;
    state.store.create_book(book).unwrap();

    let app = router(state.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/v1/audiobooks/book-1")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({ "overrides": { "title": "The Hobbit (Unabridged)" } })
                        .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["title"], "The Hobbit (Unabridged)");
    assert_eq!(body["provenance"]["title"]["effective"], "The Hobbit (Unabridged)");
}

#[tokio::test]
async fn delete_soft_deletes_by_default_query() {
    let (state, _dir) = test_state();
    state.store.create_book(Book::new("book-2")).unwrap();

    let app = router(state.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/v1/audiobooks/book-2?soft_delete=true")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let book = state.store.get_book("book-2").unwrap().unwrap();
    assert!(book.soft_deleted);
}

#[tokio::test]
async fn scan_with_no_import_paths_enqueues_nothing() {
    let (state, _dir) = test_state();
    let app = router(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/operations/scan")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::json!({}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["operation_ids"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn unknown_operation_status_is_not_found() {
    let (state, _dir) = test_state();
    let app = router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/operations/does-not-exist/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
