use serde::Serialize;

/// Structured trace events emitted across all Threadline crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionResolved {
        session_id: String,
        /// One of `minted`, `restored`, `miss`, `degraded`.
        outcome: String,
        has_thread: bool,
    },
    /// The continuity store could not be consulted; the turn proceeds
    /// without continuity.
    ContinuityDegraded {
        session_id: String,
        operation: String,
        reason: String,
    },
    ContinuityStoreCall {
        backend: String,
        operation: String,
        ok: bool,
        duration_ms: u64,
    },
    ThreadCommitted {
        session_id: String,
        thread_id: String,
    },
    GeneratorRequest {
        generator: String,
        reused_thread: bool,
        duration_ms: u64,
        ok: bool,
    },
    StreamStarted {
        message_id: String,
        session_id: String,
    },
    StreamFinished {
        message_id: String,
        session_id: String,
        /// One of `end`, `error`, `cancelled`.
        outcome: String,
        chunks: usize,
        first_token_ms: Option<u64>,
        total_ms: u64,
    },
    StreamRejected {
        session_id: String,
        reason: String,
        active_message_id: Option<String>,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "tl_event");
    }
}
