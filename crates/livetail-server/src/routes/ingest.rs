//! Write routes: session lifecycle, chunk push, countdown schedule.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::{IntoResponse, Response};
use livetail_core::protocol::{
    CountdownRequest, PushChunkRequest, PushChunkResponse, SessionRequest, StartSessionResponse,
    SuccessResponse,
};
use tracing::info;

use super::AppState;
use crate::auth::RequireSecret;
use crate::error::ApiError;
use crate::lifecycle;

/// `POST /session` with `action: start | end`.
pub async fn session(
    _auth: RequireSecret,
    State(state): State<AppState>,
    payload: Result<Json<SessionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    match request {
        SessionRequest::Start { producer_ref } => {
            let session =
                lifecycle::start_session(&state.db, producer_ref, state.retention).await?;
            Ok(Json(StartSessionResponse {
                session_id: session.id,
            })
            .into_response())
        }
        SessionRequest::End { session_id, status } => {
            lifecycle::end_session(&state.db, &session_id, status).await?;
            Ok(Json(SuccessResponse { success: true }).into_response())
        }
    }
}

/// `POST /push`
pub async fn push(
    _auth: RequireSecret,
    State(state): State<AppState>,
    payload: Result<Json<PushChunkRequest>, JsonRejection>,
) -> Result<Json<PushChunkResponse>, ApiError> {
    let Json(request) = payload?;
    let received = lifecycle::push_chunk(&state.db, &request).await?;
    Ok(Json(PushChunkResponse {
        received,
        session_id: request.session_id,
    }))
}

/// `POST /countdown`
pub async fn countdown(
    _auth: RequireSecret,
    State(state): State<AppState>,
    payload: Result<Json<CountdownRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let Json(request) = payload?;
    state.db.set_next_check(request.next_check_at).await?;
    info!(next_check_at = ?request.next_check_at, "Schedule updated");
    Ok(Json(SuccessResponse { success: true }))
}
