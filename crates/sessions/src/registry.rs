//! Session Registry: resolves a session id to its conversation thread and
//! records new threads after a completed stream.
//!
//! Every store call is bounded by the configured timeout. A store that
//! errors or times out never fails the turn: the caller gets
//! [`Lookup::Unavailable`] and proceeds without continuity, and the
//! degradation is reported through a `ContinuityDegraded` trace event.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use tl_domain::error::{Error, Result};
use tl_domain::ids;
use tl_domain::trace::TraceEvent;

use crate::continuity::{ContinuityRecord, ContinuityStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A client session as seen by one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub session_id: String,
    /// Thread last used for this session on this connection.
    pub thread_id: Option<String>,
    pub last_seen: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, thread_id: Option<String>) -> Self {
        Self {
            session_id: session_id.into(),
            thread_id,
            last_seen: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }
}

/// Result of asking the store for a session's thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(String),
    Missing,
    /// Store errored or timed out.
    Unavailable(String),
}

impl Lookup {
    /// Thread to hand the generator: the store's value wins, otherwise
    /// whatever this connection used last.
    pub fn thread_for_turn(&self, cached: Option<&str>) -> Option<String> {
        match self {
            Lookup::Found(t) => Some(t.clone()),
            Lookup::Missing | Lookup::Unavailable(_) => cached.map(str::to_owned),
        }
    }

    /// Decide what to write after the generator finished on `returned`.
    pub fn commit_plan(&self, returned: &str) -> CommitPlan {
        match self {
            Lookup::Found(t) if t == returned => CommitPlan::Unchanged,
            Lookup::Found(t) => CommitPlan::KeepPersisted {
                persisted: t.clone(),
            },
            Lookup::Missing => CommitPlan::Write,
            Lookup::Unavailable(_) => CommitPlan::SkipUnavailable,
        }
    }
}

/// What to do with a thread id returned by the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitPlan {
    /// Store has nothing for this session yet.
    Write,
    /// Store already holds this thread.
    Unchanged,
    /// Store holds a different thread. A persisted thread is only replaced
    /// by starting a new session, so nothing is written.
    KeepPersisted { persisted: String },
    /// The store could not be read this turn, so its current value is
    /// unknown and writing could clobber a persisted thread.
    SkipUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// No id was presented; a new one was minted.
    Minted,
    Restored,
    Miss,
    Degraded,
}

impl ResolveOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minted => "minted",
            Self::Restored => "restored",
            Self::Miss => "miss",
            Self::Degraded => "degraded",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub session: Session,
    pub outcome: ResolveOutcome,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn ContinuityStore>,
    timeout: Duration,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn ContinuityStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn store(&self) -> &Arc<dyn ContinuityStore> {
        &self.store
    }

    /// Resolve a client-presented session id, minting one when absent.
    ///
    /// Only an invalid id is an error; store trouble degrades to a session
    /// without a thread.
    pub async fn resolve(&self, session_id: Option<&str>) -> Result<Resolved> {
        let Some(session_id) = session_id else {
            let session = Session::new(ids::new_session_id(), None);
            self.trace_resolved(&session, ResolveOutcome::Minted);
            return Ok(Resolved {
                session,
                outcome: ResolveOutcome::Minted,
            });
        };

        ids::validate_session_id(session_id).map_err(|e| Error::Protocol(e.into()))?;

        let (thread_id, outcome) = match self.lookup(session_id).await {
            Lookup::Found(t) => (Some(t), ResolveOutcome::Restored),
            Lookup::Missing => (None, ResolveOutcome::Miss),
            Lookup::Unavailable(_) => (None, ResolveOutcome::Degraded),
        };
        let session = Session::new(session_id, thread_id);
        self.trace_resolved(&session, outcome);
        Ok(Resolved { session, outcome })
    }

    /// Bounded store read. Never fails.
    pub async fn lookup(&self, session_id: &str) -> Lookup {
        match self.get_bounded(session_id).await {
            Ok(Some(rec)) => Lookup::Found(rec.thread_id),
            Ok(None) => Lookup::Missing,
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(
                    session_id,
                    backend = self.store.backend(),
                    error = %reason,
                    "continuity store unavailable, proceeding without thread"
                );
                TraceEvent::ContinuityDegraded {
                    session_id: session_id.to_owned(),
                    operation: "get".into(),
                    reason: reason.clone(),
                }
                .emit();
                Lookup::Unavailable(reason)
            }
        }
    }

    /// Bounded store read that surfaces errors, for callers that report
    /// the record itself.
    pub async fn record(&self, session_id: &str) -> Result<Option<ContinuityRecord>> {
        ids::validate_session_id(session_id).map_err(|e| Error::Protocol(e.into()))?;
        self.get_bounded(session_id).await
    }

    /// Idempotent upsert of `session_id → thread_id`.
    ///
    /// Failures are logged and returned; callers treat them as a missed
    /// write that the next completed stream will repair.
    pub async fn commit(&self, session_id: &str, thread_id: &str) -> Result<ContinuityRecord> {
        let result = tokio::time::timeout(self.timeout, self.store.upsert(session_id, thread_id))
            .await
            .unwrap_or_else(|_| {
                Err(Error::Timeout(format!(
                    "upsert exceeded {}ms",
                    self.timeout.as_millis()
                )))
            });

        match &result {
            Ok(_) => TraceEvent::ThreadCommitted {
                session_id: session_id.to_owned(),
                thread_id: thread_id.to_owned(),
            }
            .emit(),
            Err(e) => {
                tracing::warn!(
                    session_id,
                    thread_id,
                    backend = self.store.backend(),
                    error = %e,
                    "failed to persist thread"
                );
                TraceEvent::ContinuityDegraded {
                    session_id: session_id.to_owned(),
                    operation: "upsert".into(),
                    reason: e.to_string(),
                }
                .emit();
            }
        }
        result
    }

    /// Apply `plan` for a stream that finished on `thread_id`.
    /// Returns whether a write succeeded.
    pub async fn apply(&self, session_id: &str, thread_id: &str, plan: &CommitPlan) -> bool {
        match plan {
            CommitPlan::Write => self.commit(session_id, thread_id).await.is_ok(),
            CommitPlan::Unchanged => false,
            CommitPlan::KeepPersisted { persisted } => {
                tracing::warn!(
                    session_id,
                    persisted = %persisted,
                    returned = thread_id,
                    "generator returned a different thread; keeping the persisted one"
                );
                false
            }
            CommitPlan::SkipUnavailable => {
                tracing::info!(
                    session_id,
                    thread_id,
                    "store was unavailable at resolution; not persisting thread this turn"
                );
                false
            }
        }
    }

    async fn get_bounded(&self, session_id: &str) -> Result<Option<ContinuityRecord>> {
        tokio::time::timeout(self.timeout, self.store.get(session_id))
            .await
            .unwrap_or_else(|_| {
                Err(Error::Timeout(format!(
                    "get exceeded {}ms",
                    self.timeout.as_millis()
                )))
            })
    }

    fn trace_resolved(&self, session: &Session, outcome: ResolveOutcome) {
        TraceEvent::SessionResolved {
            session_id: session.session_id.clone(),
            outcome: outcome.as_str().into(),
            has_thread: session.thread_id.is_some(),
        }
        .emit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryContinuityStore;
    use async_trait::async_trait;

    struct DownStore;

    #[async_trait]
    impl ContinuityStore for DownStore {
        fn backend(&self) -> &'static str {
            "down"
        }
        async fn get(&self, _: &str) -> Result<Option<ContinuityRecord>> {
            Err(Error::Continuity("connection refused".into()))
        }
        async fn upsert(&self, _: &str, _: &str) -> Result<ContinuityRecord> {
            Err(Error::Continuity("connection refused".into()))
        }
    }

    struct HangingStore;

    #[async_trait]
    impl ContinuityStore for HangingStore {
        fn backend(&self) -> &'static str {
            "hanging"
        }
        async fn get(&self, _: &str) -> Result<Option<ContinuityRecord>> {
            std::future::pending().await
        }
        async fn upsert(&self, _: &str, _: &str) -> Result<ContinuityRecord> {
            std::future::pending().await
        }
    }

    fn registry(store: Arc<dyn ContinuityStore>) -> SessionRegistry {
        SessionRegistry::new(store, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn absent_id_is_minted() {
        let reg = registry(Arc::new(InMemoryContinuityStore::new()));
        let r = reg.resolve(None).await.unwrap();
        assert_eq!(r.outcome, ResolveOutcome::Minted);
        assert!(r.session.session_id.starts_with("session_"));
        assert!(r.session.thread_id.is_none());
    }

    #[tokio::test]
    async fn known_id_restores_thread() {
        let store = Arc::new(InMemoryContinuityStore::new());
        store.upsert("s1", "t1").await.unwrap();
        let reg = registry(store);
        let r = reg.resolve(Some("s1")).await.unwrap();
        assert_eq!(r.outcome, ResolveOutcome::Restored);
        assert_eq!(r.session.thread_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn unknown_id_is_a_fresh_conversation() {
        let reg = registry(Arc::new(InMemoryContinuityStore::new()));
        let r = reg.resolve(Some("s1")).await.unwrap();
        assert_eq!(r.outcome, ResolveOutcome::Miss);
        assert_eq!(r.session.session_id, "s1");
        assert!(r.session.thread_id.is_none());
    }

    #[tokio::test]
    async fn failing_store_degrades() {
        let reg = registry(Arc::new(DownStore));
        let r = reg.resolve(Some("s1")).await.unwrap();
        assert_eq!(r.outcome, ResolveOutcome::Degraded);
        assert!(r.session.thread_id.is_none());
        assert!(reg.commit("s1", "t1").await.is_err());
    }

    #[tokio::test]
    async fn slow_store_times_out_instead_of_blocking() {
        let reg = registry(Arc::new(HangingStore));
        let r = reg.resolve(Some("s1")).await.unwrap();
        assert_eq!(r.outcome, ResolveOutcome::Degraded);
        assert!(matches!(
            reg.commit("s1", "t1").await,
            Err(Error::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn invalid_id_is_rejected() {
        let reg = registry(Arc::new(InMemoryContinuityStore::new()));
        assert!(matches!(
            reg.resolve(Some("../etc")).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn commit_is_idempotent() {
        let store = Arc::new(InMemoryContinuityStore::new());
        let reg = registry(store.clone());
        reg.commit("s1", "t1").await.unwrap();
        reg.commit("s1", "t1").await.unwrap();
        assert_eq!(store.get("s1").await.unwrap().unwrap().thread_id, "t1");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn store_value_wins_over_cached_thread() {
        let found = Lookup::Found("t1".into());
        assert_eq!(found.thread_for_turn(Some("t9")).as_deref(), Some("t1"));
        assert_eq!(
            Lookup::Missing.thread_for_turn(Some("t9")).as_deref(),
            Some("t9")
        );
        assert_eq!(
            Lookup::Unavailable("x".into()).thread_for_turn(None),
            None
        );
    }

    #[test]
    fn commit_plan_only_writes_new_threads() {
        assert_eq!(Lookup::Missing.commit_plan("t1"), CommitPlan::Write);
        assert_eq!(
            Lookup::Found("t1".into()).commit_plan("t1"),
            CommitPlan::Unchanged
        );
        assert_eq!(
            Lookup::Found("t1".into()).commit_plan("t2"),
            CommitPlan::KeepPersisted {
                persisted: "t1".into()
            }
        );
        assert_eq!(
            Lookup::Unavailable("x".into()).commit_plan("t1"),
            CommitPlan::SkipUnavailable
        );
    }

    #[tokio::test]
    async fn apply_respects_plan() {
        let store = Arc::new(InMemoryContinuityStore::new());
        let reg = registry(store.clone());
        assert!(!reg.apply("s1", "t1", &CommitPlan::SkipUnavailable).await);
        assert!(store.is_empty());
        assert!(reg.apply("s1", "t1", &CommitPlan::Write).await);
        assert_eq!(store.get("s1").await.unwrap().unwrap().thread_id, "t1");
    }
}
