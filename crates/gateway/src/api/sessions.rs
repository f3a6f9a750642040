//! Session endpoints.
//!
//! - `POST /v1/sessions`              mint a fresh session id (client reset)
//! - `GET  /v1/sessions/:session_id`  the session's continuity record

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::json;

use tl_domain::error::Error;
use tl_domain::ids;

use crate::state::AppState;

pub async fn create_session() -> impl IntoResponse {
    let session_id = ids::new_session_id();
    tracing::debug!(session_id = %session_id, "session minted");
    (StatusCode::CREATED, Json(json!({ "session_id": session_id })))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.registry.record(&session_id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no continuity record for this session" })),
        )
            .into_response(),
        Err(Error::Protocol(msg)) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": format!("continuity store unavailable: {e}") })),
        )
            .into_response(),
    }
}
