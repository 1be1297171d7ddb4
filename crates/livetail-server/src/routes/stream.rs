use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::http::header::{CACHE_CONTROL, HeaderName};
use axum::response::IntoResponse;
use axum::response::sse::{Event, Sse};
use livetail_core::protocol::StreamQuery;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use super::AppState;
use crate::broadcast;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// `GET /stream?sessionId&fromSequence&replay&resumeSessionId`
pub async fn stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    info!(
        session_id = ?query.session_id,
        from_sequence = ?query.from_sequence,
        replay = ?query.replay,
        "Subscriber connected"
    );

    let events = broadcast::event_stream(state.db, state.stream, query, state.shutdown)
        .filter_map(|event| match event.data() {
            Ok(data) => Some(Ok::<_, Infallible>(
                Event::default().event(event.name()).data(data),
            )),
            Err(e) => {
                warn!(event = event.name(), error = %e, "Dropping unserializable event");
                None
            }
        });

    (
        [
            (CACHE_CONTROL, "no-cache, no-transform"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Sse::new(events),
    )
}
