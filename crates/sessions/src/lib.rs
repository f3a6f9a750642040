//! Session continuity for Threadline.
//!
//! Maps a client-stable session id to the generator's conversation thread
//! through a pluggable [`ContinuityStore`], and wraps the store in a
//! [`SessionRegistry`] that bounds every call and degrades to "no
//! continuity" instead of failing a turn.

pub mod continuity;
pub mod local;
pub mod registry;
pub mod rest;
pub mod store;

pub use continuity::{create_store, ContinuityRecord, ContinuityStore};
pub use local::LocalState;
pub use registry::{CommitPlan, Lookup, ResolveOutcome, Resolved, Session, SessionRegistry};
pub use rest::RestContinuityStore;
pub use store::{FileContinuityStore, InMemoryContinuityStore};
