//! A generator that plays back a fixed script.
//!
//! Used by the gateway's tests to drive the stream orchestrator through
//! exact fragment boundaries, mid-stream failures, stalls, and cancellation
//! without a network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use tl_domain::error::{Error, Result};
use tl_domain::stream::{BoxStream, GeneratorEvent};

use crate::traits::{AnswerGenerator, GenerateRequest};

/// One scripted action.
#[derive(Debug, Clone)]
pub enum Step {
    Fragment(String),
    Delay(Duration),
    /// Yield an error and end the stream.
    Fail(String),
    /// Complete on the request's thread, or the script's new thread.
    Complete,
    /// Complete on this thread regardless of the request.
    CompleteWith(String),
    /// Never produce another item.
    Hang,
}

pub struct ScriptedGenerator {
    new_thread: String,
    steps: Vec<Step>,
    invoke_error: Option<String>,
    calls: Mutex<Vec<GenerateRequest>>,
    abandoned: Arc<AtomicUsize>,
}

impl ScriptedGenerator {
    /// `new_thread` is the thread id assigned when a request has none.
    pub fn new(new_thread: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            new_thread: new_thread.into(),
            steps,
            invoke_error: None,
            calls: Mutex::new(Vec::new()),
            abandoned: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shorthand for `fragments...` then `Complete`.
    pub fn replying(new_thread: impl Into<String>, fragments: &[&str]) -> Self {
        let mut steps: Vec<Step> = fragments
            .iter()
            .map(|f| Step::Fragment((*f).to_owned()))
            .collect();
        steps.push(Step::Complete);
        Self::new(new_thread, steps)
    }

    /// Make every `invoke` fail before a stream exists.
    pub fn failing_on_invoke(mut self, message: impl Into<String>) -> Self {
        self.invoke_error = Some(message.into());
        self
    }

    /// Requests received so far, in order.
    pub fn calls(&self) -> Vec<GenerateRequest> {
        self.calls.lock().clone()
    }

    /// Streams dropped before reaching the end of the script.
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    fn failure(message: &str) -> Error {
        Error::Generator {
            generator: "scripted".into(),
            message: message.to_owned(),
        }
    }
}

/// Counts a stream as abandoned unless it ran to the end.
struct Finish {
    counter: Arc<AtomicUsize>,
    done: bool,
}

impl Drop for Finish {
    fn drop(&mut self) {
        if !self.done {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait::async_trait]
impl AnswerGenerator for ScriptedGenerator {
    async fn invoke(
        &self,
        req: GenerateRequest,
    ) -> Result<BoxStream<'static, Result<GeneratorEvent>>> {
        self.calls.lock().push(req.clone());
        if let Some(ref msg) = self.invoke_error {
            return Err(Self::failure(msg));
        }

        let thread_id = req.thread_id.unwrap_or_else(|| self.new_thread.clone());
        let steps = self.steps.clone();
        let counter = self.abandoned.clone();

        let stream = async_stream::stream! {
            let mut finish = Finish { counter, done: false };
            for step in steps {
                match step {
                    Step::Fragment(text) => {
                        yield Ok(GeneratorEvent::Fragment { text });
                    }
                    Step::Delay(d) => tokio::time::sleep(d).await,
                    Step::Fail(msg) => {
                        finish.done = true;
                        yield Err(ScriptedGenerator::failure(&msg));
                        return;
                    }
                    Step::Complete => {
                        finish.done = true;
                        yield Ok(GeneratorEvent::Completed { thread_id: thread_id.clone() });
                        return;
                    }
                    Step::CompleteWith(t) => {
                        finish.done = true;
                        yield Ok(GeneratorEvent::Completed { thread_id: t });
                        return;
                    }
                    Step::Hang => std::future::pending::<()>().await,
                }
            }
            finish.done = true;
        };
        Ok(Box::pin(stream))
    }

    fn generator_id(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn plays_fragments_then_completes() {
        let gen = ScriptedGenerator::replying("t1", &["Hel", "lo"]);
        let events: Vec<_> = gen
            .invoke(GenerateRequest::new(None, "hi"))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[2].as_ref().unwrap(),
            &GeneratorEvent::completed("t1")
        );
        assert_eq!(gen.calls()[0].message, "hi");
        assert_eq!(gen.abandoned(), 0);
    }

    #[tokio::test]
    async fn reuses_request_thread() {
        let gen = ScriptedGenerator::replying("t-new", &["x"]);
        let events: Vec<_> = gen
            .invoke(GenerateRequest::new(Some("t1".into()), "hi"))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(
            events.last().unwrap().as_ref().unwrap(),
            &GeneratorEvent::completed("t1")
        );
    }

    #[tokio::test]
    async fn dropping_mid_script_counts_as_abandoned() {
        let gen = ScriptedGenerator::new("t1", vec![Step::Fragment("a".into()), Step::Hang]);
        let mut stream = gen.invoke(GenerateRequest::new(None, "hi")).await.unwrap();
        assert!(stream.next().await.is_some());
        drop(stream);
        assert_eq!(gen.abandoned(), 1);
    }

    #[tokio::test]
    async fn invoke_failure_is_immediate() {
        let gen = ScriptedGenerator::replying("t1", &[]).failing_on_invoke("offline");
        assert!(gen.invoke(GenerateRequest::new(None, "hi")).await.is_err());
        assert_eq!(gen.calls().len(), 1);
    }
}
