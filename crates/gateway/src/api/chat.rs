//! `POST /v1/chat`: one turn, answered in a single response.
//!
//! Runs the same drive loop as the WebSocket endpoint and returns the
//! concatenated chunk content plus the final thread id.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::runtime::{Discard, StreamOutcome, ThreadChoice};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Session to continue. A new one is minted when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    /// User message text.
    #[serde(alias = "message")]
    pub content: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> impl IntoResponse {
    if body.content.trim().is_empty() {
        return error(StatusCode::BAD_REQUEST, "message content is empty");
    }
    let max = state.config.streaming.max_message_bytes;
    if body.content.len() > max {
        return error(
            StatusCode::PAYLOAD_TOO_LARGE,
            &format!("message is {} bytes, limit is {max}", body.content.len()),
        );
    }

    let mut session = match state.registry.resolve(body.session_id.as_deref()).await {
        Ok(r) => r.session,
        Err(e) => return error(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let report = state
        .orchestrator
        .collect(&mut session, &body.content, ThreadChoice::Resolve, &mut Discard)
        .await;

    match report.outcome {
        StreamOutcome::Completed { thread_id, timings } => Json(json!({
            "session_id": session.session_id,
            "message_id": report.message_id,
            "content": report.content,
            "thread_id": thread_id,
            "timings_ms": timings,
        }))
        .into_response(),
        StreamOutcome::Failed(failure) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": failure.to_string(),
                "session_id": session.session_id,
                "message_id": report.message_id,
                "partial_content": report.content,
            })),
        )
            .into_response(),
        StreamOutcome::Cancelled => {
            error(StatusCode::INTERNAL_SERVER_ERROR, "stream was cancelled")
        }
    }
}

fn error(status: StatusCode, msg: &str) -> axum::response::Response {
    (status, Json(json!({ "error": msg }))).into_response()
}
