pub mod auth;
pub mod chat;
pub mod health;
pub mod sessions;
pub mod ws;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth required) and **protected**
/// (gated behind the `TL_API_TOKEN` bearer-token middleware).
///
/// `state` is needed to wire up the auth middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        // Liveness (used by health probes)
        .route("/v1/health", get(health::health));

    let protected = Router::new()
        // Streaming chat
        .route("/ws", get(ws::chat_ws))
        // One-shot chat
        .route("/v1/chat", post(chat::chat))
        // Sessions
        .route("/v1/sessions", post(sessions::create_session))
        .route("/v1/sessions/:session_id", get(sessions::get_session))
        // Apply API auth middleware to all protected routes.
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public.merge(protected)
}
