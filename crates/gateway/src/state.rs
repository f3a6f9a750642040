use std::sync::Arc;

use tl_domain::config::Config;
use tl_providers::AnswerGenerator;
use tl_sessions::SessionRegistry;

use crate::runtime::StreamOrchestrator;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core services**: config and the answer generator
/// - **Sessions**: the registry over the continuity store
/// - **Streaming**: the orchestrator shared by every connection
/// - **Security**: startup-computed token digest
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub generator: Arc<dyn AnswerGenerator>,

    // ── Sessions ──────────────────────────────────────────────────────
    pub registry: SessionRegistry,

    // ── Streaming ─────────────────────────────────────────────────────
    pub orchestrator: Arc<StreamOrchestrator>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
}
