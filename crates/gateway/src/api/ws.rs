//! WebSocket endpoint for streaming chat.
//!
//! Flow:
//! 1. Client connects to `/ws?session_id=<id>` (id optional; minted when absent)
//! 2. Gateway resolves the session against the continuity store
//! 3. Each `{ "content": ... }` text message starts one stream, answered
//!    with `stream_start`, `stream_chunk`*, then `stream_end` or
//!    `stream_error`
//! 4. A message sent while a stream is open gets a `rejected` frame

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::Instrument;

use tl_domain::ids;
use tl_protocol::{encode_frame, FrameOrder, ServerFrame};

use crate::runtime::{Accepted, ConnectionManager};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query params
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Session to continue.
    pub session_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /ws: upgrade to WebSocket.
pub async fn chat_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    let session_id = query.session_id.filter(|s| !s.is_empty());
    if let Some(id) = session_id.as_deref() {
        if let Err(reason) = ids::validate_session_id(id) {
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(serde_json::json!({ "error": reason })),
            )
                .into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(socket: WebSocket, state: AppState, session_id: Option<String>) {
    let resolved = match state.registry.resolve(session_id.as_deref()).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "could not resolve session, closing");
            return;
        }
    };

    let span = tracing::info_span!(
        "ws.connection",
        session_id = %resolved.session.session_id,
    );
    run_connection(socket, state, resolved.session)
        .instrument(span)
        .await;
}

async fn run_connection(socket: WebSocket, state: AppState, session: tl_sessions::Session) {
    let (ws_sink, mut ws_stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<ServerFrame>(state.config.streaming.outbound_buffer);

    tracing::info!(has_thread = session.thread_id.is_some(), "client connected");

    // Writer task: the only place frames are encoded and written.
    let writer = tokio::spawn(write_frames(ws_sink, outbound_rx).in_current_span());

    let mut conn = ConnectionManager::new(
        state.orchestrator.clone(),
        session,
        outbound_tx,
        state.config.streaming.max_message_bytes,
    );

    // Reader loop: one inbound text message at a time.
    while let Some(msg) = ws_stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    tracing::debug!("ignoring non-utf8 binary message");
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            // axum answers WS-level pings itself.
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "transport error");
                break;
            }
        };
        if conn.on_message(&text).await == Accepted::Closed {
            break;
        }
    }

    // Cleanup: cancel the open stream, then stop writing.
    let open = conn.active_message_id().map(str::to_owned);
    conn.on_disconnect().await;
    drop(conn);
    writer.abort();
    tracing::info!(cancelled_stream = ?open, "client disconnected");
}

async fn write_frames(
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<ServerFrame>,
) {
    let mut order = FrameOrder::new();
    while let Some(frame) = outbound_rx.recv().await {
        if let Err(violation) = order.observe(&frame) {
            tracing::error!(error = %violation, "dropping out-of-order frame");
            continue;
        }
        let encoded = match encode_frame(&frame) {
            Ok(e) => e,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode frame");
                continue;
            }
        };
        if ws_sink.send(Message::Text(encoded.into_string())).await.is_err() {
            break;
        }
    }
}
