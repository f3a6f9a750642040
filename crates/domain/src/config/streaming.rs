use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Fail the stream if the generator produces nothing for this long.
    #[serde(default = "d_first_fragment")]
    pub first_fragment_timeout_ms: u64,
    /// Hard cap on one stream, start to terminal frame.
    #[serde(default = "d_total")]
    pub total_timeout_ms: u64,
    /// Frames buffered per connection before the orchestrator waits on
    /// the socket writer.
    #[serde(default = "d_outbound_buffer")]
    pub outbound_buffer: usize,
    /// Largest inbound client message accepted, in bytes.
    #[serde(default = "d_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            first_fragment_timeout_ms: d_first_fragment(),
            total_timeout_ms: d_total(),
            outbound_buffer: d_outbound_buffer(),
            max_message_bytes: d_max_message_bytes(),
        }
    }
}

fn d_first_fragment() -> u64 {
    60_000
}
fn d_total() -> u64 {
    300_000
}
fn d_outbound_buffer() -> usize {
    64
}
fn d_max_message_bytes() -> usize {
    64 * 1024
}
