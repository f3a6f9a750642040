//! Local continuity stores.
//!
//! [`FileContinuityStore`] keeps every record in one JSON document
//! (`{session_id: record}`) and rewrites it atomically on each upsert.
//! [`InMemoryContinuityStore`] is the same map without the file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;

use tl_domain::error::{Error, Result};
use tl_domain::trace::TraceEvent;

use crate::continuity::{ContinuityRecord, ContinuityStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
pub struct InMemoryContinuityStore {
    records: RwLock<HashMap<String, ContinuityRecord>>,
}

impl InMemoryContinuityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl ContinuityStore for InMemoryContinuityStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, session_id: &str) -> Result<Option<ContinuityRecord>> {
        Ok(self.records.read().get(session_id).cloned())
    }

    async fn upsert(&self, session_id: &str, thread_id: &str) -> Result<ContinuityRecord> {
        let record = ContinuityRecord::new(session_id, thread_id);
        self.records
            .write()
            .insert(session_id.to_owned(), record.clone());
        Ok(record)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSON file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Continuity store backed by a single JSON file.
///
/// Reads are served from memory. Upserts hold `write_lock`, write the
/// updated document first and only then swap it into memory, so an upsert
/// that fails or is dropped halfway leaves both sides on the old value.
pub struct FileContinuityStore {
    path: PathBuf,
    records: RwLock<HashMap<String, ContinuityRecord>>,
    write_lock: Mutex<()>,
}

impl FileContinuityStore {
    /// Load the document at `path`, creating parent directories. A missing
    /// file is an empty store; an unreadable one is an error.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let records: HashMap<String, ContinuityRecord> = match tokio::fs::read_to_string(path).await
        {
            Ok(raw) if raw.trim().is_empty() => HashMap::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                Error::Continuity(format!("corrupt store file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(Error::Io(e)),
        };

        tracing::info!(
            sessions = records.len(),
            path = %path.display(),
            "continuity store loaded"
        );

        Ok(Self {
            path: path.to_owned(),
            records: RwLock::new(records),
            write_lock: Mutex::new(()),
        })
    }

    async fn persist(&self, records: &HashMap<String, ContinuityRecord>) -> Result<()> {
        let json = serde_json::to_string_pretty(records)?;
        // Unique per write: a dropped upsert's blocking write may still be
        // running when the next one starts.
        let tmp = self
            .path
            .with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Io(e));
        }
        Ok(())
    }
}

#[async_trait]
impl ContinuityStore for FileContinuityStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    async fn get(&self, session_id: &str) -> Result<Option<ContinuityRecord>> {
        Ok(self.records.read().get(session_id).cloned())
    }

    async fn upsert(&self, session_id: &str, thread_id: &str) -> Result<ContinuityRecord> {
        let _guard = self.write_lock.lock().await;
        let start = Instant::now();

        let record = ContinuityRecord::new(session_id, thread_id);
        let mut next = self.records.read().clone();
        next.insert(session_id.to_owned(), record.clone());

        let result = self.persist(&next).await;
        if result.is_ok() {
            *self.records.write() = next;
        }

        TraceEvent::ContinuityStoreCall {
            backend: self.backend().into(),
            operation: "upsert".into(),
            ok: result.is_ok(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
        .emit();

        result.map(|()| record)
    }

    async fn flush(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.records.read().clone();
        self.persist(&snapshot).await
    }
}
