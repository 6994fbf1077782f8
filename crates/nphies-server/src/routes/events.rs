use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

use crate::state::AppState;

/// GET /api/events
///
/// SSE stream emitting `poll_finished` after every run.
pub async fn sse_events(State(app): State<AppState>) -> impl axum::response::IntoResponse {
    let rx = app.poller.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| {
        let finished = msg.ok()?;
        let data = serde_json::to_string(&finished).ok()?;
        Some(Ok::<Event, Infallible>(
            Event::default().event("poll_finished").data(data),
        ))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
