//! Streaming runtime: the per-connection [`ConnectionManager`] and the
//! [`StreamOrchestrator`] that turns generator output into protocol frames.

pub mod connection;
pub mod orchestrator;

pub use connection::{Accepted, ConnectionManager};
pub use orchestrator::{
    ActiveStream, Discard, FrameSink, StreamFailure, StreamLimits, StreamOrchestrator,
    StreamOutcome, StreamReport, ThreadChoice,
};
