pub mod config;
pub mod error;
pub mod ids;
pub mod stream;
pub mod trace;
