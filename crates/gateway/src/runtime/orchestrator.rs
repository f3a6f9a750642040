//! Stream Orchestrator: turns one generator invocation into the
//! `stream_start → stream_chunk* → (stream_end | stream_error)` frame
//! sequence.
//!
//! The same drive loop serves every consumer. Streaming connections hand
//! it an mpsc sender; the HTTP and CLI one-shot paths hand it a sink that
//! collects or prints. Accumulated content is therefore identical across
//! modes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use tl_domain::config::StreamingConfig;
use tl_domain::ids;
use tl_domain::stream::GeneratorEvent;
use tl_domain::trace::TraceEvent;
use tl_protocol::{ServerFrame, Timings};
use tl_providers::{AnswerGenerator, GenerateRequest};
use tl_sessions::{CommitPlan, Session, SessionRegistry};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sinks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Destination for one stream's frames.
///
/// `emit` returns `false` once the consumer is gone; the orchestrator then
/// treats the stream as cancelled.
#[async_trait::async_trait]
pub trait FrameSink: Send {
    async fn emit(&mut self, frame: ServerFrame) -> bool;
}

#[async_trait::async_trait]
impl FrameSink for mpsc::Sender<ServerFrame> {
    async fn emit(&mut self, frame: ServerFrame) -> bool {
        self.send(frame).await.is_ok()
    }
}

/// Sink for callers that only want the final result.
#[derive(Debug, Default)]
pub struct Discard;

#[async_trait::async_trait]
impl FrameSink for Discard {
    async fn emit(&mut self, _frame: ServerFrame) -> bool {
        true
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn input and outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How the thread for a turn is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadChoice {
    /// Re-read the continuity store; fall back to the session's cached
    /// thread when the store has nothing or is unreachable.
    Resolve,
    /// Use exactly this thread (`None` = start a new one) and record the
    /// result unconditionally. Only for explicit client requests.
    Explicit(Option<String>),
}

/// Why a stream ended in `stream_error`. The Display text is what the
/// client sees.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamFailure {
    #[error("no response from the assistant within {0} ms")]
    FirstFragmentTimeout(u64),

    #[error("response exceeded the {0} ms limit")]
    TotalTimeout(u64),

    #[error("{0}")]
    Generator(String),

    #[error("the assistant stopped without finishing its answer")]
    Incomplete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// `stream_end` was emitted.
    Completed { thread_id: String, timings: Timings },
    /// `stream_error` was emitted.
    Failed(StreamFailure),
    /// The consumer went away; no terminal frame was delivered.
    Cancelled,
}

impl StreamOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "end",
            Self::Failed(_) => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Everything a finished stream hands back to its owner.
#[derive(Debug, Clone)]
pub struct StreamReport {
    pub message_id: String,
    pub session: Session,
    /// Concatenation of every emitted chunk, in order.
    pub content: String,
    pub chunks: usize,
    pub outcome: StreamOutcome,
}

/// A stream running on its own task.
pub struct ActiveStream {
    pub message_id: String,
    pub cancel: CancellationToken,
    settled: Arc<AtomicBool>,
    handle: JoinHandle<StreamReport>,
}

impl ActiveStream {
    /// True once the terminal frame is queued or the task has exited.
    ///
    /// A client can only react to `stream_end`/`stream_error` after it was
    /// queued, so a message arriving after the terminal frame always sees
    /// the stream as settled.
    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire) || self.handle.is_finished()
    }

    pub async fn join(self) -> Result<StreamReport, tokio::task::JoinError> {
        self.handle.await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy)]
pub struct StreamLimits {
    pub first_fragment: Duration,
    pub total: Duration,
}

impl From<&StreamingConfig> for StreamLimits {
    fn from(cfg: &StreamingConfig) -> Self {
        Self {
            first_fragment: Duration::from_millis(cfg.first_fragment_timeout_ms),
            total: Duration::from_millis(cfg.total_timeout_ms),
        }
    }
}

pub struct StreamOrchestrator {
    generator: Arc<dyn AnswerGenerator>,
    registry: SessionRegistry,
    limits: StreamLimits,
}

impl StreamOrchestrator {
    pub fn new(
        generator: Arc<dyn AnswerGenerator>,
        registry: SessionRegistry,
        limits: StreamLimits,
    ) -> Self {
        Self {
            generator,
            registry,
            limits,
        }
    }

    /// Run one stream on a new task, emitting into `sink`.
    ///
    /// The task owns `session` until it finishes and returns it (with the
    /// thread updated) in the [`StreamReport`].
    pub fn spawn(
        self: &Arc<Self>,
        session: Session,
        message: String,
        sink: mpsc::Sender<ServerFrame>,
    ) -> ActiveStream {
        let message_id = ids::new_message_id();
        let cancel = CancellationToken::new();
        let settled = Arc::new(AtomicBool::new(false));

        let span = tracing::info_span!(
            "stream",
            message_id = %message_id,
            session_id = %session.session_id,
        );

        let this = Arc::clone(self);
        let task_cancel = cancel.clone();
        let task_settled = settled.clone();
        let task_message_id = message_id.clone();
        let handle = tokio::spawn(
            async move {
                let mut session = session;
                let mut sink = SettleOnTerminal {
                    inner: sink,
                    settled: task_settled,
                };
                let (content, chunks, outcome) = this
                    .drive(
                        &mut session,
                        &task_message_id,
                        &message,
                        ThreadChoice::Resolve,
                        &mut sink,
                        &task_cancel,
                    )
                    .await;
                StreamReport {
                    message_id: task_message_id,
                    session,
                    content,
                    chunks,
                    outcome,
                }
            }
            .instrument(span),
        );

        ActiveStream {
            message_id,
            cancel,
            settled,
            handle,
        }
    }

    /// Run one stream to completion on the current task and return the
    /// whole result. Dropping the future cancels the generator.
    pub async fn collect(
        &self,
        session: &mut Session,
        message: &str,
        thread: ThreadChoice,
        sink: &mut (impl FrameSink + ?Sized),
    ) -> StreamReport {
        let message_id = ids::new_message_id();
        let cancel = CancellationToken::new();
        let span = tracing::info_span!(
            "stream",
            message_id = %message_id,
            session_id = %session.session_id,
        );
        let (content, chunks, outcome) = self
            .drive(session, &message_id, message, thread, sink, &cancel)
            .instrument(span)
            .await;
        StreamReport {
            message_id,
            session: session.clone(),
            content,
            chunks,
            outcome,
        }
    }

    /// The shared drive loop. Returns `(content, chunk_count, outcome)`.
    async fn drive(
        &self,
        session: &mut Session,
        message_id: &str,
        message: &str,
        thread: ThreadChoice,
        sink: &mut (impl FrameSink + ?Sized),
        cancel: &CancellationToken,
    ) -> (String, usize, StreamOutcome) {
        let mut progress = Progress::new();
        session.touch();
        let session_id = session.session_id.clone();

        let start = ServerFrame::StreamStart {
            message_id: message_id.to_owned(),
            session_id: session_id.clone(),
        };
        if !emit(sink, start, cancel).await {
            return self.finish(message_id, &session_id, progress, StreamOutcome::Cancelled);
        }
        TraceEvent::StreamStarted {
            message_id: message_id.to_owned(),
            session_id: session_id.clone(),
        }
        .emit();

        // ── Resolve the thread for this turn ────────────────────────
        let (thread_for_turn, lookup) = match thread {
            ThreadChoice::Resolve => {
                let lookup = tokio::select! {
                    _ = cancel.cancelled() => {
                        return self.finish(message_id, &session_id, progress, StreamOutcome::Cancelled);
                    }
                    l = self.registry.lookup(&session_id) => l,
                };
                (lookup.thread_for_turn(session.thread_id.as_deref()), Some(lookup))
            }
            ThreadChoice::Explicit(t) => (t, None),
        };
        let reused_thread = thread_for_turn.is_some();

        // ── Consume the generator ───────────────────────────────────
        let gen_started = Instant::now();
        let result = self
            .consume(&mut progress, gen_started, message_id, message, thread_for_turn, sink, cancel)
            .await;

        TraceEvent::GeneratorRequest {
            generator: self.generator.generator_id().to_owned(),
            reused_thread,
            duration_ms: gen_started.elapsed().as_millis() as u64,
            ok: result.is_ok(),
        }
        .emit();

        let thread_id = match result {
            Ok(t) => t,
            Err(None) => {
                return self.finish(message_id, &session_id, progress, StreamOutcome::Cancelled);
            }
            Err(Some(failure)) => {
                tracing::warn!(error = %failure, chunks = progress.chunks, "stream failed");
                let frame = ServerFrame::StreamError {
                    message_id: message_id.to_owned(),
                    error: failure.to_string(),
                };
                let outcome = if emit(sink, frame, cancel).await {
                    StreamOutcome::Failed(failure)
                } else {
                    StreamOutcome::Cancelled
                };
                return self.finish(message_id, &session_id, progress, outcome);
            }
        };

        // ── Record the thread, then end the stream ──────────────────
        let plan = match lookup {
            Some(ref l) => l.commit_plan(&thread_id),
            None => CommitPlan::Write,
        };
        session.thread_id = Some(thread_id.clone());

        if plan != CommitPlan::Unchanged {
            // Detached: a write already in flight finishes even if the
            // client goes away.
            let registry = self.registry.clone();
            let (sid, tid) = (session_id.clone(), thread_id.clone());
            let commit = tokio::spawn(async move { registry.apply(&sid, &tid, &plan).await });
            tokio::select! {
                _ = cancel.cancelled() => {
                    return self.finish(message_id, &session_id, progress, StreamOutcome::Cancelled);
                }
                _ = commit => {}
            }
        }

        let total = progress.started.elapsed();
        let timings = Timings {
            first_token: progress.first_token.unwrap_or(total).as_millis() as u64,
            total: total.as_millis() as u64,
        };
        let frame = ServerFrame::StreamEnd {
            message_id: message_id.to_owned(),
            thread_id: thread_id.clone(),
            timings_ms: timings,
        };
        let outcome = if emit(sink, frame, cancel).await {
            StreamOutcome::Completed { thread_id, timings }
        } else {
            StreamOutcome::Cancelled
        };
        self.finish(message_id, &session_id, progress, outcome)
    }

    /// Invoke the generator and forward its fragments until it completes.
    /// Both deadlines run from `gen_started`, after the store lookup.
    ///
    /// `Err(None)` means the stream was cancelled; nothing more may be
    /// emitted in that case.
    #[allow(clippy::too_many_arguments)]
    async fn consume(
        &self,
        progress: &mut Progress,
        gen_started: Instant,
        message_id: &str,
        message: &str,
        thread_id: Option<String>,
        sink: &mut (impl FrameSink + ?Sized),
        cancel: &CancellationToken,
    ) -> Result<String, Option<StreamFailure>> {
        let started = tokio::time::Instant::from_std(gen_started);
        let req = GenerateRequest::new(thread_id, message);

        let (deadline, on_expiry) = self.deadline(started, false);
        let mut events = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(None),
            _ = sleep_until(deadline) => return Err(Some(on_expiry)),
            r = self.generator.invoke(req) => {
                r.map_err(|e| Some(StreamFailure::Generator(e.to_string())))?
            }
        };

        loop {
            let (deadline, on_expiry) = self.deadline(started, progress.first_token.is_some());
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(None),
                _ = sleep_until(deadline) => return Err(Some(on_expiry)),
                item = events.next() => item,
            };

            match item {
                Some(Ok(GeneratorEvent::Fragment { text })) => {
                    if text.is_empty() {
                        continue;
                    }
                    progress.push(&text);
                    let frame = ServerFrame::StreamChunk {
                        message_id: message_id.to_owned(),
                        content: text,
                    };
                    if !emit(sink, frame, cancel).await {
                        return Err(None);
                    }
                }
                Some(Ok(GeneratorEvent::Completed { thread_id })) => return Ok(thread_id),
                Some(Err(e)) => return Err(Some(StreamFailure::Generator(e.to_string()))),
                None => return Err(Some(StreamFailure::Incomplete)),
            }
        }
    }

    /// The next deadline and the failure reported if it passes.
    fn deadline(
        &self,
        started: tokio::time::Instant,
        have_fragment: bool,
    ) -> (tokio::time::Instant, StreamFailure) {
        let total = started + self.limits.total;
        let total_failure = StreamFailure::TotalTimeout(self.limits.total.as_millis() as u64);
        if have_fragment || self.limits.first_fragment >= self.limits.total {
            return (total, total_failure);
        }
        (
            started + self.limits.first_fragment,
            StreamFailure::FirstFragmentTimeout(self.limits.first_fragment.as_millis() as u64),
        )
    }

    fn finish(
        &self,
        message_id: &str,
        session_id: &str,
        progress: Progress,
        outcome: StreamOutcome,
    ) -> (String, usize, StreamOutcome) {
        TraceEvent::StreamFinished {
            message_id: message_id.to_owned(),
            session_id: session_id.to_owned(),
            outcome: outcome.label().into(),
            chunks: progress.chunks,
            first_token_ms: progress.first_token.map(|d| d.as_millis() as u64),
            total_ms: progress.started.elapsed().as_millis() as u64,
        }
        .emit();
        if outcome == StreamOutcome::Cancelled {
            tracing::info!(chunks = progress.chunks, "stream cancelled");
        }
        (progress.content, progress.chunks, outcome)
    }
}

/// What one stream has delivered so far.
struct Progress {
    started: Instant,
    content: String,
    chunks: usize,
    first_token: Option<Duration>,
}

impl Progress {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            content: String::new(),
            chunks: 0,
            first_token: None,
        }
    }

    fn push(&mut self, text: &str) {
        let started = self.started;
        self.first_token.get_or_insert_with(|| started.elapsed());
        self.chunks += 1;
        self.content.push_str(text);
    }
}

/// Emit one frame unless the stream is cancelled first.
async fn emit(
    sink: &mut (impl FrameSink + ?Sized),
    frame: ServerFrame,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        ok = sink.emit(frame) => ok,
    }
}

/// Flags the stream as settled once its terminal frame is queued.
struct SettleOnTerminal {
    inner: mpsc::Sender<ServerFrame>,
    settled: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl FrameSink for SettleOnTerminal {
    async fn emit(&mut self, frame: ServerFrame) -> bool {
        let terminal = frame.is_terminal();
        let ok = self.inner.emit(frame).await;
        if ok && terminal {
            self.settled.store(true, Ordering::Release);
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tl_domain::error::{Error, Result};
    use tl_providers::{ScriptedGenerator, Step};
    use tl_sessions::{ContinuityRecord, ContinuityStore, InMemoryContinuityStore};

    #[derive(Default)]
    struct Recorder(Vec<ServerFrame>);

    #[async_trait::async_trait]
    impl FrameSink for Recorder {
        async fn emit(&mut self, frame: ServerFrame) -> bool {
            self.0.push(frame);
            true
        }
    }

    struct DownStore;

    #[async_trait::async_trait]
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

    const LIMITS: StreamLimits = StreamLimits {
        first_fragment: Duration::from_millis(200),
        total: Duration::from_secs(5),
    };

    fn orchestrator(
        generator: Arc<ScriptedGenerator>,
        store: Arc<dyn ContinuityStore>,
        limits: StreamLimits,
    ) -> Arc<StreamOrchestrator> {
        let registry = SessionRegistry::new(store, Duration::from_millis(100));
        Arc::new(StreamOrchestrator::new(generator, registry, limits))
    }

    #[tokio::test]
    async fn frames_follow_start_chunk_end() {
        let gen = Arc::new(ScriptedGenerator::replying("t1", &["Hel", "lo"]));
        let store = Arc::new(InMemoryContinuityStore::new());
        let orch = orchestrator(gen, store.clone(), LIMITS);

        let mut session = Session::new("s1", None);
        let mut rec = Recorder::default();
        let report = orch
            .collect(&mut session, "hi", ThreadChoice::Resolve, &mut rec)
            .await;

        assert_eq!(rec.0.len(), 4);
        assert!(matches!(&rec.0[0], ServerFrame::StreamStart { session_id, .. } if session_id == "s1"));
        assert!(matches!(&rec.0[1], ServerFrame::StreamChunk { content, .. } if content == "Hel"));
        assert!(matches!(&rec.0[2], ServerFrame::StreamChunk { content, .. } if content == "lo"));
        match &rec.0[3] {
            ServerFrame::StreamEnd { thread_id, timings_ms, .. } => {
                assert_eq!(thread_id, "t1");
                assert!(timings_ms.first_token <= timings_ms.total);
            }
            other => panic!("expected stream_end, got {other:?}"),
        }
        assert!(rec.0.iter().all(|f| f.message_id() == Some(report.message_id.as_str())));
        assert_eq!(report.content, "Hello");
        assert_eq!(report.chunks, 2);
        assert_eq!(session.thread_id.as_deref(), Some("t1"));
        assert_eq!(store.get("s1").await.unwrap().unwrap().thread_id, "t1");
    }

    #[tokio::test]
    async fn next_turn_continues_the_stored_thread() {
        let gen = Arc::new(ScriptedGenerator::replying("t-new", &["ok"]));
        let store = Arc::new(InMemoryContinuityStore::new());
        store.upsert("s1", "t1").await.unwrap();
        let orch = orchestrator(gen.clone(), store, LIMITS);

        // The connection's cached thread is stale; the store wins.
        let mut session = Session::new("s1", Some("t0".into()));
        let report = orch
            .collect(&mut session, "again", ThreadChoice::Resolve, &mut Discard)
            .await;

        assert_eq!(gen.calls()[0].thread_id.as_deref(), Some("t1"));
        assert!(matches!(report.outcome, StreamOutcome::Completed { ref thread_id, .. } if thread_id == "t1"));
    }

    #[tokio::test]
    async fn generator_failure_after_chunks_ends_in_error() {
        let gen = Arc::new(ScriptedGenerator::new(
            "t1",
            vec![
                Step::Fragment("a".into()),
                Step::Fragment("b".into()),
                Step::Fail("model overloaded".into()),
            ],
        ));
        let store = Arc::new(InMemoryContinuityStore::new());
        let orch = orchestrator(gen, store.clone(), LIMITS);

        let mut session = Session::new("s1", None);
        let mut rec = Recorder::default();
        let report = orch
            .collect(&mut session, "hi", ThreadChoice::Resolve, &mut rec)
            .await;

        assert_eq!(rec.0.len(), 4);
        match rec.0.last() {
            Some(ServerFrame::StreamError { error, .. }) => {
                assert!(error.contains("model overloaded"), "{error}")
            }
            other => panic!("expected stream_error, got {other:?}"),
        }
        assert_eq!(report.content, "ab");
        assert!(store.is_empty());
        assert!(session.thread_id.is_none());
    }

    #[tokio::test]
    async fn silent_generator_hits_first_fragment_timeout() {
        let gen = Arc::new(ScriptedGenerator::new("t1", vec![Step::Hang]));
        let limits = StreamLimits {
            first_fragment: Duration::from_millis(50),
            total: Duration::from_secs(5),
        };
        let orch = orchestrator(gen.clone(), Arc::new(InMemoryContinuityStore::new()), limits);

        let mut session = Session::new("s1", None);
        let report = orch
            .collect(&mut session, "hi", ThreadChoice::Resolve, &mut Discard)
            .await;

        assert_eq!(
            report.outcome,
            StreamOutcome::Failed(StreamFailure::FirstFragmentTimeout(50))
        );
        assert_eq!(gen.abandoned(), 1);
    }

    #[tokio::test]
    async fn stall_after_output_hits_total_timeout() {
        let gen = Arc::new(ScriptedGenerator::new(
            "t1",
            vec![Step::Fragment("a".into()), Step::Hang],
        ));
        let limits = StreamLimits {
            first_fragment: Duration::from_millis(50),
            total: Duration::from_millis(150),
        };
        let orch = orchestrator(gen, Arc::new(InMemoryContinuityStore::new()), limits);

        let mut session = Session::new("s1", None);
        let report = orch
            .collect(&mut session, "hi", ThreadChoice::Resolve, &mut Discard)
            .await;

        assert_eq!(
            report.outcome,
            StreamOutcome::Failed(StreamFailure::TotalTimeout(150))
        );
        assert_eq!(report.content, "a");
    }

    /// Answers `get` after a delay shorter than the registry bound.
    struct SlowStore(InMemoryContinuityStore);

    #[async_trait::async_trait]
    impl ContinuityStore for SlowStore {
        fn backend(&self) -> &'static str {
            "slow"
        }
        async fn get(&self, id: &str) -> Result<Option<ContinuityRecord>> {
            tokio::time::sleep(Duration::from_millis(60)).await;
            self.0.get(id).await
        }
        async fn upsert(&self, id: &str, thread: &str) -> Result<ContinuityRecord> {
            self.0.upsert(id, thread).await
        }
    }

    #[tokio::test]
    async fn slow_store_lookup_does_not_eat_the_first_fragment_budget() {
        let gen = Arc::new(ScriptedGenerator::new(
            "t1",
            vec![
                Step::Delay(Duration::from_millis(10)),
                Step::Fragment("ok".into()),
                Step::Complete,
            ],
        ));
        let limits = StreamLimits {
            first_fragment: Duration::from_millis(50),
            total: Duration::from_secs(5),
        };
        let orch = orchestrator(gen, Arc::new(SlowStore(InMemoryContinuityStore::new())), limits);

        let mut session = Session::new("s1", None);
        let report = orch
            .collect(&mut session, "hi", ThreadChoice::Resolve, &mut Discard)
            .await;

        assert!(
            matches!(report.outcome, StreamOutcome::Completed { .. }),
            "{:?}",
            report.outcome
        );
        assert_eq!(report.content, "ok");
    }

    #[tokio::test]
    async fn unreachable_store_still_ends_the_stream() {
        let gen = Arc::new(ScriptedGenerator::replying("t1", &["x"]));
        let orch = orchestrator(gen, Arc::new(DownStore), LIMITS);

        let mut session = Session::new("s1", None);
        let mut rec = Recorder::default();
        orch.collect(&mut session, "hi", ThreadChoice::Resolve, &mut rec)
            .await;

        assert!(matches!(rec.0.last(), Some(ServerFrame::StreamEnd { thread_id, .. }) if thread_id == "t1"));
        assert_eq!(session.thread_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn explicit_new_thread_ignores_the_store() {
        let gen = Arc::new(ScriptedGenerator::replying("t2", &["x"]));
        let store = Arc::new(InMemoryContinuityStore::new());
        store.upsert("s1", "t1").await.unwrap();
        let orch = orchestrator(gen.clone(), store.clone(), LIMITS);

        let mut session = Session::new("s1", None);
        orch.collect(&mut session, "hi", ThreadChoice::Explicit(None), &mut Discard)
            .await;

        assert_eq!(gen.calls()[0].thread_id, None);
        assert_eq!(store.get("s1").await.unwrap().unwrap().thread_id, "t2");
    }

    #[tokio::test]
    async fn cancelling_a_spawned_stream_drops_the_generator() {
        let gen = Arc::new(ScriptedGenerator::new(
            "t1",
            vec![Step::Fragment("a".into()), Step::Hang],
        ));
        let store = Arc::new(InMemoryContinuityStore::new());
        let orch = orchestrator(gen.clone(), store.clone(), LIMITS);

        let (tx, mut rx) = mpsc::channel(8);
        let active = orch.spawn(Session::new("s1", None), "hi".into(), tx);

        assert!(matches!(rx.recv().await, Some(ServerFrame::StreamStart { .. })));
        assert!(matches!(rx.recv().await, Some(ServerFrame::StreamChunk { .. })));
        assert!(!active.is_settled());

        active.cancel.cancel();
        let report = active.join().await.unwrap();

        assert_eq!(report.outcome, StreamOutcome::Cancelled);
        assert_eq!(report.session.session_id, "s1");
        assert_eq!(gen.abandoned(), 1);
        assert!(store.is_empty());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn spawned_stream_settles_on_its_terminal_frame() {
        let gen = Arc::new(ScriptedGenerator::replying("t1", &["a"]));
        let orch = orchestrator(gen, Arc::new(InMemoryContinuityStore::new()), LIMITS);

        let (tx, mut rx) = mpsc::channel(8);
        let active = orch.spawn(Session::new("s1", None), "hi".into(), tx);
        let mut last = None;
        while let Some(frame) = rx.recv().await {
            let terminal = frame.is_terminal();
            last = Some(frame);
            if terminal {
                break;
            }
        }
        assert!(matches!(last, Some(ServerFrame::StreamEnd { .. })));
        assert!(active.is_settled());
        let report = active.join().await.unwrap();
        assert_eq!(report.session.thread_id.as_deref(), Some("t1"));
    }
}
