//! Threadline gateway: the streaming chat endpoint, its HTTP companions,
//! and the `threadline` CLI.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod runtime;
pub mod state;
