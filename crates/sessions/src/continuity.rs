use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tl_domain::config::{ContinuityBackend, ContinuityConfig};
use tl_domain::error::Result;

use crate::rest::RestContinuityStore;
use crate::store::{FileContinuityStore, InMemoryContinuityStore};

/// The persisted `(session_id, thread_id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuityRecord {
    pub session_id: String,
    pub thread_id: String,
    pub updated_at: DateTime<Utc>,
}

impl ContinuityRecord {
    pub fn new(session_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            thread_id: thread_id.into(),
            updated_at: Utc::now(),
        }
    }
}

/// Durable session → thread mapping.
///
/// `upsert` is the serialization point for concurrent writers: two
/// upserts for the same session must leave exactly one of the two values
/// in place, never a mix.
#[async_trait]
pub trait ContinuityStore: Send + Sync {
    /// Short backend name for logs (`file`, `memory`, `rest`).
    fn backend(&self) -> &'static str;

    /// `Ok(None)` means the store has no record for this session.
    async fn get(&self, session_id: &str) -> Result<Option<ContinuityRecord>>;

    async fn upsert(&self, session_id: &str, thread_id: &str) -> Result<ContinuityRecord>;

    /// Push any buffered state to durable storage.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Build the store selected by `[continuity].backend`.
pub async fn create_store(cfg: &ContinuityConfig) -> Result<Arc<dyn ContinuityStore>> {
    let store: Arc<dyn ContinuityStore> = match cfg.backend {
        ContinuityBackend::Memory => Arc::new(InMemoryContinuityStore::new()),
        ContinuityBackend::File => Arc::new(FileContinuityStore::open(&cfg.path).await?),
        ContinuityBackend::Rest => Arc::new(RestContinuityStore::new(cfg)?),
    };
    tracing::info!(backend = store.backend(), "continuity store ready");
    Ok(store)
}
