//! `GET /api/events?filter=...` — a long-lived SSE stream, closed by the
//! server after the configured maximum lifetime so the client reconnects
//! and picks up a fresh snapshot; no replay of missed events.
//!
//! Grounded on the teacher's `import_event_stream` (`async_stream::stream!`
//! forwarding a broadcast receiver, heartbeat via `tokio::select!`),
//! generalized to the event hub's per-subscriber `mpsc` channel and to an
//! enforced stream lifetime instead of running forever.

use super::AppState;
use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Deserialize;
use shelfkeeper_common::events::{EventKind, Filter};
use std::convert::Infallible;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Deserialize, Default)]
pub struct EventsQuery {
    /// Comma-separated event kinds, e.g. `operation.progress,operation.status`.
    pub filter: Option<String>,
    /// Comma-separated operation ids to restrict to.
    pub operation_id: Option<String>,
}

fn parse_kind(s: &str) -> Option<EventKind> {
    match s {
        "operation.progress" => Some(EventKind::OperationProgress),
        "operation.status" => Some(EventKind::OperationStatus),
        "operation.log" => Some(EventKind::OperationLog),
        "system.status" => Some(EventKind::SystemStatus),
        "system.heartbeat" => Some(EventKind::SystemHeartbeat),
        _ => None,
    }
}

fn build_filter(q: &EventsQuery) -> Filter {
    let kinds = q
        .filter
        .as_deref()
        .map(|s| s.split(',').filter_map(parse_kind).collect())
        .unwrap_or_default();
    let operation_ids = q
        .operation_id
        .as_deref()
        .map(|s| s.split(',').map(str::to_string).collect())
        .unwrap_or_default();
    Filter { kinds, operation_ids }
}

pub async fn stream(
    State(state): State<AppState>,
    Query(q): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    info!("new SSE client connected");
    let mut subscription = state.events.subscribe(build_filter(&q)).await;
    let deadline = Instant::now() + state.event_stream_max_lifetime;

    let out = async_stream::stream! {
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    info!("SSE stream reached its maximum lifetime, closing");
                    break;
                }
                event = subscription.recv() => {
                    let Some(event) = event else { break };
                    let payload = serde_json::json!({
                        "operation_id": event.operation_id,
                        "payload": event.payload,
                    });
                    match serde_json::to_string(&payload) {
                        Ok(data) => yield Ok(SseEvent::default().event(event.kind.as_str()).data(data)),
                        Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
                    }
                }
            }
        }
    };

    Sse::new(out).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
