//! Wire protocol for the streaming chat connection.
//!
//! One inbound message type (a user message) and five outbound frame
//! types. For each `message_id` the server emits exactly one
//! `stream_start`, zero or more `stream_chunk`s, then exactly one of
//! `stream_end` / `stream_error`. `rejected` frames are connection-level
//! and never carry a stream of their own.
//!
//! Outbound frames only reach a transport as [`EncodedFrame`]s, which can
//! only be built by [`encode_frame`].

mod order;

pub use order::{FrameOrder, OrderViolation};

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client → server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// The user's text. Older clients send it as `message`.
    #[serde(alias = "message")]
    pub content: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message is {len} bytes, limit is {max}")]
    TooLarge { len: usize, max: usize },

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("message content is empty")]
    Empty,
}

/// Parse one inbound text frame.
pub fn decode_client(raw: &str, max_bytes: usize) -> Result<ClientMessage, DecodeError> {
    if raw.len() > max_bytes {
        return Err(DecodeError::TooLarge {
            len: raw.len(),
            max: max_bytes,
        });
    }
    let msg: ClientMessage =
        serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    if msg.content.trim().is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(msg)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server → client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "stream_start")]
    StreamStart {
        message_id: String,
        session_id: String,
    },

    #[serde(rename = "stream_chunk")]
    StreamChunk { message_id: String, content: String },

    #[serde(rename = "stream_end")]
    StreamEnd {
        message_id: String,
        thread_id: String,
        timings_ms: Timings,
    },

    #[serde(rename = "stream_error")]
    StreamError { message_id: String, error: String },

    /// An inbound message was refused; the connection stays open.
    #[serde(rename = "rejected")]
    Rejected {
        reason: RejectReason,
        error: String,
        retryable: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        active_message_id: Option<String>,
    },
}

impl ServerFrame {
    /// The stream this frame belongs to, if any.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::StreamStart { message_id, .. }
            | Self::StreamChunk { message_id, .. }
            | Self::StreamEnd { message_id, .. }
            | Self::StreamError { message_id, .. } => Some(message_id),
            Self::Rejected { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::StreamEnd { .. } | Self::StreamError { .. })
    }

    pub fn busy(active_message_id: impl Into<String>) -> Self {
        Self::Rejected {
            reason: RejectReason::StreamInProgress,
            error: "a response is still streaming on this connection; retry after it ends"
                .into(),
            retryable: true,
            active_message_id: Some(active_message_id.into()),
        }
    }

    pub fn invalid(err: &DecodeError) -> Self {
        Self::Rejected {
            reason: RejectReason::InvalidMessage,
            error: err.to_string(),
            retryable: false,
            active_message_id: None,
        }
    }
}

/// Stream latencies, in milliseconds from `stream_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timings {
    pub first_token: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    StreamInProgress,
    InvalidMessage,
}

// ── encoding ────────────────────────────────────────────────────────

/// A frame in its canonical wire form: compact single-line JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame(String);

impl EncodedFrame {
    pub fn into_string(self) -> String {
        self.0
    }
}

/// The only way to produce bytes for the wire.
pub fn encode_frame(frame: &ServerFrame) -> Result<EncodedFrame, serde_json::Error> {
    serde_json::to_string(frame).map(EncodedFrame)
}
