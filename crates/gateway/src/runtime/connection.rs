//! Connection Manager: one instance per client connection.
//!
//! Owns the connection's [`Session`] and at most one [`ActiveStream`].
//! While a stream runs the session is lent to it and comes back in its
//! [`StreamReport`](super::orchestrator::StreamReport).

use std::sync::Arc;

use tokio::sync::mpsc;

use tl_domain::trace::TraceEvent;
use tl_protocol::{decode_client, ServerFrame};
use tl_sessions::Session;

use super::orchestrator::{ActiveStream, StreamOrchestrator};

pub struct ConnectionManager {
    orchestrator: Arc<StreamOrchestrator>,
    outbound: mpsc::Sender<ServerFrame>,
    max_message_bytes: usize,
    session_id: String,
    /// `None` while lent to the active stream.
    session: Option<Session>,
    active: Option<ActiveStream>,
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
    /// A stream was started under this message id.
    Started(String),
    /// Another stream is still open.
    Busy,
    /// The message could not be decoded.
    Invalid,
    /// The outbound side is gone.
    Closed,
}

impl ConnectionManager {
    pub fn new(
        orchestrator: Arc<StreamOrchestrator>,
        session: Session,
        outbound: mpsc::Sender<ServerFrame>,
        max_message_bytes: usize,
    ) -> Self {
        Self {
            orchestrator,
            outbound,
            max_message_bytes,
            session_id: session.session_id.clone(),
            session: Some(session),
            active: None,
        }
    }

    /// Message id of the stream currently open, if any.
    pub fn active_message_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.message_id.as_str())
    }

    /// Handle one raw inbound text frame.
    pub async fn on_message(&mut self, raw: &str) -> Accepted {
        self.reap().await;

        if let Some(active) = &self.active {
            let active_id = active.message_id.clone();
            tracing::info!(active_message_id = %active_id, "rejecting message while a stream is open");
            TraceEvent::StreamRejected {
                session_id: self.session_id.clone(),
                reason: "stream_in_progress".into(),
                active_message_id: Some(active_id.clone()),
            }
            .emit();
            return self.reject(ServerFrame::busy(active_id), Accepted::Busy).await;
        }

        let msg = match decode_client(raw, self.max_message_bytes) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(error = %e, "rejecting undecodable message");
                TraceEvent::StreamRejected {
                    session_id: self.session_id.clone(),
                    reason: "invalid_message".into(),
                    active_message_id: None,
                }
                .emit();
                return self.reject(ServerFrame::invalid(&e), Accepted::Invalid).await;
            }
        };

        let session = self
            .session
            .take()
            .unwrap_or_else(|| Session::new(self.session_id.clone(), None));
        let active = self
            .orchestrator
            .spawn(session, msg.content, self.outbound.clone());
        let message_id = active.message_id.clone();
        self.active = Some(active);
        Accepted::Started(message_id)
    }

    /// Connection is gone: cancel the open stream and wait for it to stop.
    pub async fn on_disconnect(&mut self) {
        if let Some(active) = self.active.take() {
            let settled = active.is_settled();
            if !settled {
                tracing::info!(message_id = %active.message_id, "cancelling stream on disconnect");
            }
            active.cancel.cancel();
            self.take_back(active).await;
        }
    }

    /// Retire the active stream once its terminal frame is queued.
    async fn reap(&mut self) {
        if self.active.as_ref().is_some_and(ActiveStream::is_settled) {
            if let Some(active) = self.active.take() {
                self.take_back(active).await;
            }
        }
    }

    async fn take_back(&mut self, active: ActiveStream) {
        let message_id = active.message_id.clone();
        match active.join().await {
            Ok(report) => self.session = Some(report.session),
            Err(e) => {
                // The session's cached thread is lost; the store still has it.
                tracing::error!(message_id = %message_id, error = %e, "stream task failed");
                self.session = Some(Session::new(self.session_id.clone(), None));
            }
        }
    }

    async fn reject(&self, frame: ServerFrame, accepted: Accepted) -> Accepted {
        if self.outbound.send(frame).await.is_err() {
            return Accepted::Closed;
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tl_protocol::RejectReason;
    use tl_providers::{ScriptedGenerator, Step};
    use tl_sessions::{ContinuityStore, InMemoryContinuityStore, SessionRegistry};

    use crate::runtime::orchestrator::StreamLimits;

    fn manager(
        gen: Arc<ScriptedGenerator>,
        store: Arc<InMemoryContinuityStore>,
    ) -> (ConnectionManager, mpsc::Receiver<ServerFrame>) {
        let registry = SessionRegistry::new(store, Duration::from_millis(100));
        let limits = StreamLimits {
            first_fragment: Duration::from_secs(2),
            total: Duration::from_secs(5),
        };
        let orch = Arc::new(StreamOrchestrator::new(gen, registry, limits));
        let (tx, rx) = mpsc::channel(32);
        (ConnectionManager::new(orch, Session::new("s1", None), tx, 1024), rx)
    }

    async fn until_terminal(rx: &mut mpsc::Receiver<ServerFrame>) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        while let Some(f) = rx.recv().await {
            let done = f.is_terminal();
            frames.push(f);
            if done {
                break;
            }
        }
        frames
    }

    #[tokio::test]
    async fn second_message_while_streaming_is_rejected() {
        let gen = Arc::new(ScriptedGenerator::new(
            "t1",
            vec![
                Step::Fragment("a".into()),
                Step::Delay(Duration::from_millis(200)),
                Step::Complete,
            ],
        ));
        let (mut conn, mut rx) = manager(gen.clone(), Arc::new(InMemoryContinuityStore::new()));

        let Accepted::Started(m1) = conn.on_message(r#"{"content":"hi"}"#).await else {
            panic!("first message should start a stream");
        };
        assert_eq!(conn.on_message(r#"{"content":"again"}"#).await, Accepted::Busy);

        let frames = until_terminal(&mut rx).await;
        let rejected: Vec<_> = frames
            .iter()
            .filter(|f| matches!(f, ServerFrame::Rejected { .. }))
            .collect();
        assert_eq!(rejected.len(), 1);
        match rejected[0] {
            ServerFrame::Rejected {
                reason,
                retryable,
                active_message_id,
                ..
            } => {
                assert_eq!(*reason, RejectReason::StreamInProgress);
                assert!(*retryable);
                assert_eq!(active_message_id.as_deref(), Some(m1.as_str()));
            }
            _ => unreachable!(),
        }
        assert!(frames
            .iter()
            .filter_map(ServerFrame::message_id)
            .all(|id| id == m1));
        assert_eq!(gen.calls().len(), 1);
    }

    #[tokio::test]
    async fn next_message_after_end_reuses_thread() {
        let gen = Arc::new(ScriptedGenerator::replying("t1", &["Hel", "lo"]));
        let store = Arc::new(InMemoryContinuityStore::new());
        let (mut conn, mut rx) = manager(gen.clone(), store.clone());

        assert!(matches!(conn.on_message(r#"{"content":"hi"}"#).await, Accepted::Started(_)));
        until_terminal(&mut rx).await;
        assert!(matches!(conn.on_message(r#"{"content":"more"}"#).await, Accepted::Started(_)));
        let frames = until_terminal(&mut rx).await;

        assert!(matches!(frames.last(), Some(ServerFrame::StreamEnd { thread_id, .. }) if thread_id == "t1"));
        let calls = gen.calls();
        assert_eq!(calls[0].thread_id, None);
        assert_eq!(calls[1].thread_id.as_deref(), Some("t1"));
        assert_eq!(store.get("s1").await.unwrap().unwrap().thread_id, "t1");
    }

    #[tokio::test]
    async fn malformed_message_is_rejected_and_connection_stays_usable() {
        let gen = Arc::new(ScriptedGenerator::replying("t1", &["ok"]));
        let (mut conn, mut rx) = manager(gen, Arc::new(InMemoryContinuityStore::new()));

        assert_eq!(conn.on_message("not json").await, Accepted::Invalid);
        assert!(matches!(
            rx.recv().await,
            Some(ServerFrame::Rejected { reason: RejectReason::InvalidMessage, retryable: false, .. })
        ));
        assert!(matches!(conn.on_message(r#"{"message":"hi"}"#).await, Accepted::Started(_)));
    }

    #[tokio::test]
    async fn disconnect_cancels_the_open_stream() {
        let gen = Arc::new(ScriptedGenerator::new(
            "t1",
            vec![Step::Fragment("a".into()), Step::Hang],
        ));
        let store = Arc::new(InMemoryContinuityStore::new());
        let (mut conn, mut rx) = manager(gen.clone(), store.clone());

        conn.on_message(r#"{"content":"hi"}"#).await;
        rx.recv().await;
        rx.recv().await;
        conn.on_disconnect().await;

        assert_eq!(gen.abandoned(), 1);
        assert!(conn.active_message_id().is_none());
        assert!(store.is_empty());
    }
}
