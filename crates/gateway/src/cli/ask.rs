//! `threadline ask`: one-shot question from the command line.
//!
//! The session id lives in `<local_state_dir>/session_id.txt` so repeated
//! runs continue the same conversation. The thread comes from the
//! continuity store, with `<local_state_dir>/thread_id.txt` as a fallback
//! when the store has nothing or is unreachable.

use std::io::Write;
use std::sync::Arc;

use tl_domain::config::Config;
use tl_protocol::ServerFrame;
use tl_sessions::{LocalState, Session};

use crate::bootstrap;
use crate::cli::AskArgs;
use crate::runtime::{Discard, FrameSink, StreamOutcome, ThreadChoice};

/// Prints chunk content to stdout as it arrives.
struct PrintSink;

#[async_trait::async_trait]
impl FrameSink for PrintSink {
    async fn emit(&mut self, frame: ServerFrame) -> bool {
        if let ServerFrame::StreamChunk { content, .. } = frame {
            let mut out = std::io::stdout().lock();
            return out
                .write_all(content.as_bytes())
                .and_then(|_| out.flush())
                .is_ok();
        }
        true
    }
}

/// Which thread to use for this run.
pub fn thread_choice(args: &AskArgs) -> ThreadChoice {
    if let Some(t) = &args.thread_id {
        ThreadChoice::Explicit(Some(t.clone()))
    } else if args.no_reuse_thread {
        ThreadChoice::Explicit(None)
    } else {
        ThreadChoice::Resolve
    }
}

/// Ask one question and print the answer.
///
/// Returns `false` when the answer ended in an error.
pub async fn run(config: Arc<Config>, args: AskArgs) -> anyhow::Result<bool> {
    let local = LocalState::new(&config.continuity.local_state_dir);
    let session_id = local.load_or_create_session_id()?;
    let fallback_thread = local.load_thread_id().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "could not read local thread file");
        None
    });

    let state = bootstrap::build_app_state(config).await?;

    let mut session = Session::new(session_id, fallback_thread);
    let choice = thread_choice(&args);

    if args.stream {
        println!("=== ANSWER ===");
    }
    let report = if args.stream {
        state
            .orchestrator
            .collect(&mut session, &args.question, choice, &mut PrintSink)
            .await
    } else {
        state
            .orchestrator
            .collect(&mut session, &args.question, choice, &mut Discard)
            .await
    };

    let ok = match &report.outcome {
        StreamOutcome::Completed { thread_id, timings } => {
            if let Err(e) = local.save_thread_id(thread_id) {
                tracing::warn!(error = %e, "could not save local thread file");
            }
            if args.json {
                let out = serde_json::json!({
                    "session_id": session.session_id,
                    "message_id": report.message_id,
                    "content": report.content,
                    "thread_id": thread_id,
                    "timings_ms": timings,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                if args.stream {
                    println!();
                } else {
                    println!("=== ANSWER ===");
                    println!("{}", report.content);
                }
                println!();
                println!("[thread_id] {thread_id}");
            }
            true
        }
        StreamOutcome::Failed(failure) => {
            if args.json {
                let out = serde_json::json!({
                    "session_id": session.session_id,
                    "message_id": report.message_id,
                    "error": failure.to_string(),
                    "partial_content": report.content,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                if args.stream {
                    println!();
                }
                eprintln!("error: {failure}");
            }
            false
        }
        StreamOutcome::Cancelled => {
            eprintln!("error: output closed before the answer finished");
            false
        }
    };

    if let Err(e) = state.registry.store().flush().await {
        tracing::warn!(error = %e, "continuity store flush failed");
    }

    Ok(ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(thread_id: Option<&str>, no_reuse: bool) -> AskArgs {
        AskArgs {
            question: "hi".into(),
            thread_id: thread_id.map(str::to_owned),
            no_reuse_thread: no_reuse,
            stream: false,
            json: false,
        }
    }

    #[test]
    fn explicit_thread_wins() {
        assert_eq!(
            thread_choice(&args(Some("t9"), false)),
            ThreadChoice::Explicit(Some("t9".into()))
        );
    }

    #[test]
    fn no_reuse_starts_fresh() {
        assert_eq!(thread_choice(&args(None, true)), ThreadChoice::Explicit(None));
    }

    #[test]
    fn default_resolves_through_the_store() {
        assert_eq!(thread_choice(&args(None, false)), ThreadChoice::Resolve);
    }

    #[tokio::test]
    async fn ask_keeps_session_and_thread_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.continuity.backend = tl_domain::config::ContinuityBackend::File;
        config.continuity.path = dir.path().join("continuity.json");
        config.continuity.local_state_dir = dir.path().join("state");
        config.generator.echo.fragment_delay_ms = 0;
        let config = Arc::new(config);

        assert!(run(config.clone(), args(None, false)).await.unwrap());
        let local = LocalState::new(dir.path().join("state"));
        let session_id = local.load_or_create_session_id().unwrap();
        let first_thread = local.load_thread_id().unwrap().unwrap();

        assert!(run(config, args(None, false)).await.unwrap());
        assert_eq!(local.load_or_create_session_id().unwrap(), session_id);
        assert_eq!(local.load_thread_id().unwrap().unwrap(), first_thread);
    }
}
