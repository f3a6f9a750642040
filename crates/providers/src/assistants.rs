//! Adapter for thread-based "Assistants"-style agent APIs.
//!
//! Works against OpenAI's Assistants v2 endpoints and the Azure AI agent
//! service, which share the wire format:
//!
//! * `POST {base}/threads` creates a conversation thread.
//! * `POST {base}/threads/{thread}/runs` with `stream: true` and the user
//!   message in `additional_messages` starts a run and streams SSE events.
//! * `POST {base}/threads/{thread}/runs/{run}/cancel` stops a run.
//!
//! Text arrives as `thread.message.delta` events; the run ends with
//! `thread.run.completed` or one of the failure statuses.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::{json, Value};

use tl_domain::config::GeneratorConfig;
use tl_domain::error::{Error, Result};
use tl_domain::stream::{BoxStream, GeneratorEvent};

use crate::sse::{sse_event_stream, SseEvent};
use crate::traits::{AnswerGenerator, GenerateRequest};
use crate::util::{api_key_from_env, from_reqwest};

#[derive(Clone)]
pub struct AssistantsGenerator {
    id: String,
    base_url: String,
    assistant_id: String,
    api_version: Option<String>,
    auth_header: &'static str,
    auth_value: String,
    is_azure: bool,
    client: Client,
}

impl AssistantsGenerator {
    pub fn from_config(cfg: &GeneratorConfig) -> Result<Self> {
        let key = api_key_from_env(&cfg.api_key_env)?;

        // Azure accepts `api-key`; OpenAI wants a bearer token.
        let (auth_header, auth_value) = if cfg.azure {
            ("api-key", key)
        } else {
            ("Authorization", format!("Bearer {key}"))
        };

        // No overall timeout: a run streams for as long as it streams and
        // the orchestrator owns the deadline.
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: if cfg.azure { "azure-agents" } else { "assistants" }.into(),
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            assistant_id: cfg.assistant_id.clone(),
            api_version: cfg.api_version.clone(),
            auth_header,
            auth_value,
            is_azure: cfg.azure,
            client,
        })
    }

    // ── Internal: URLs and authenticated requests ──────────────────

    fn url(&self, path: &str) -> String {
        match self.api_version {
            Some(ref v) => format!("{}{path}?api-version={v}", self.base_url),
            None => format!("{}{path}", self.base_url),
        }
    }

    fn authed(&self, method: Method, url: &str) -> RequestBuilder {
        let rb = self
            .client
            .request(method, url)
            .header(self.auth_header, &self.auth_value);
        if self.is_azure {
            rb
        } else {
            rb.header("OpenAI-Beta", "assistants=v2")
        }
    }

    fn failure(&self, message: impl Into<String>) -> Error {
        Error::Generator {
            generator: self.id.clone(),
            message: message.into(),
        }
    }

    async fn create_thread(&self) -> Result<String> {
        let resp = self
            .authed(Method::POST, &self.url("/threads"))
            .json(&json!({}))
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let body = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(self.failure(format!("create thread: HTTP {} - {body}", status.as_u16())));
        }

        let v: Value = serde_json::from_str(&body)?;
        v.get("id")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| self.failure("create thread: response has no id"))
    }

    async fn start_run(&self, thread_id: &str, message: &str) -> Result<reqwest::Response> {
        let body = json!({
            "assistant_id": self.assistant_id,
            "stream": true,
            "additional_messages": [{ "role": "user", "content": message }],
        });

        let resp = self
            .authed(Method::POST, &self.url(&format!("/threads/{thread_id}/runs")))
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.map_err(from_reqwest)?;
            return Err(self.failure(format!("start run: HTTP {} - {text}", status.as_u16())));
        }
        Ok(resp)
    }
}

#[async_trait::async_trait]
impl AnswerGenerator for AssistantsGenerator {
    async fn invoke(
        &self,
        req: GenerateRequest,
    ) -> Result<BoxStream<'static, Result<GeneratorEvent>>> {
        let thread_id = match req.thread_id {
            Some(t) => t,
            None => {
                let t = self.create_thread().await?;
                tracing::debug!(generator = %self.id, thread_id = %t, "created thread");
                t
            }
        };

        let resp = self.start_run(&thread_id, &req.message).await?;
        tracing::debug!(generator = %self.id, thread_id = %thread_id, "run started");

        let this = self.clone();
        let stream = async_stream::stream! {
            let mut events = sse_event_stream(resp);
            let mut guard = RunGuard::new(this.clone(), thread_id.clone());

            while let Some(item) = events.next().await {
                let ev = match item {
                    Ok(ev) => ev,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                match parse_run_event(&ev) {
                    RunSignal::Started(run_id) => guard.run_id = Some(run_id),
                    RunSignal::Text(text) => {
                        if !text.is_empty() {
                            yield Ok(GeneratorEvent::Fragment { text });
                        }
                    }
                    RunSignal::Completed => {
                        guard.disarm();
                        yield Ok(GeneratorEvent::Completed { thread_id: thread_id.clone() });
                        return;
                    }
                    RunSignal::Failed(message) => {
                        guard.disarm();
                        yield Err(this.failure(message));
                        return;
                    }
                    RunSignal::Done | RunSignal::Ignore => {}
                }
            }

            yield Err(this.failure("event stream closed before the run completed"));
        };

        Ok(Box::pin(stream))
    }

    fn generator_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run cancellation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cancels the remote run if the event stream is dropped before the run
/// reached a terminal status. Dropping the response body alone only stops
/// delivery; the service would keep generating.
struct RunGuard {
    generator: AssistantsGenerator,
    thread_id: String,
    run_id: Option<String>,
    armed: bool,
}

impl RunGuard {
    fn new(generator: AssistantsGenerator, thread_id: String) -> Self {
        Self {
            generator,
            thread_id,
            run_id: None,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(run_id) = self.run_id.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let gen = self.generator.clone();
        let thread_id = std::mem::take(&mut self.thread_id);
        handle.spawn(async move {
            let url = gen.url(&format!("/threads/{thread_id}/runs/{run_id}/cancel"));
            match gen.authed(Method::POST, &url).send().await {
                Ok(resp) => tracing::debug!(
                    thread_id = %thread_id,
                    run_id = %run_id,
                    status = resp.status().as_u16(),
                    "requested run cancellation"
                ),
                Err(e) => tracing::warn!(
                    thread_id = %thread_id,
                    run_id = %run_id,
                    error = %e,
                    "run cancellation failed"
                ),
            }
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, PartialEq, Eq)]
enum RunSignal {
    Started(String),
    Text(String),
    Completed,
    Failed(String),
    Done,
    Ignore,
}

fn parse_run_event(ev: &SseEvent) -> RunSignal {
    let name = ev.event.as_deref().unwrap_or("");
    if name == "done" || ev.data == "[DONE]" {
        return RunSignal::Done;
    }

    let Ok(data) = serde_json::from_str::<Value>(&ev.data) else {
        return if name == "error" {
            RunSignal::Failed(ev.data.clone())
        } else {
            RunSignal::Ignore
        };
    };

    match name {
        "thread.run.created" | "thread.run.queued" | "thread.run.in_progress" => data
            .get("id")
            .and_then(Value::as_str)
            .map(|id| RunSignal::Started(id.to_owned()))
            .unwrap_or(RunSignal::Ignore),
        "thread.message.delta" => RunSignal::Text(delta_text(&data)),
        "thread.run.completed" => RunSignal::Completed,
        "thread.run.failed" => RunSignal::Failed(
            data.pointer("/last_error/message")
                .and_then(Value::as_str)
                .unwrap_or("run failed")
                .to_owned(),
        ),
        "thread.run.cancelled" | "thread.run.expired" | "thread.run.incomplete" => {
            let status = data
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_else(|| name.trim_start_matches("thread.run."));
            RunSignal::Failed(format!("run ended with status {status}"))
        }
        "thread.run.requires_action" => {
            RunSignal::Failed("run requires tool outputs, which are not supported".into())
        }
        "error" => RunSignal::Failed(
            data.pointer("/error/message")
                .or_else(|| data.get("message"))
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| ev.data.clone()),
        ),
        _ => RunSignal::Ignore,
    }
}

/// Concatenate the text parts of a `thread.message.delta` payload.
fn delta_text(data: &Value) -> String {
    data.pointer("/delta/content")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|p| p.pointer("/text/value").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(name: &str, data: &str) -> SseEvent {
        SseEvent {
            event: Some(name.into()),
            data: data.into(),
        }
    }

    #[test]
    fn parses_message_delta_text() {
        let data = r#"{"id":"msg_1","object":"thread.message.delta","delta":{"content":[
            {"index":0,"type":"text","text":{"value":"Hel","annotations":[]}},
            {"index":1,"type":"image_file","image_file":{"file_id":"f"}},
            {"index":2,"type":"text","text":{"value":"lo"}}]}}"#;
        assert_eq!(
            parse_run_event(&ev("thread.message.delta", data)),
            RunSignal::Text("Hello".into())
        );
    }

    #[test]
    fn parses_run_lifecycle() {
        assert_eq!(
            parse_run_event(&ev("thread.run.created", r#"{"id":"run_1","status":"queued"}"#)),
            RunSignal::Started("run_1".into())
        );
        assert_eq!(
            parse_run_event(&ev("thread.run.completed", r#"{"id":"run_1"}"#)),
            RunSignal::Completed
        );
        assert_eq!(parse_run_event(&ev("done", "[DONE]")), RunSignal::Done);
        assert_eq!(
            parse_run_event(&ev("thread.run.step.created", "{}")),
            RunSignal::Ignore
        );
    }

    #[test]
    fn parses_failures() {
        assert_eq!(
            parse_run_event(&ev(
                "thread.run.failed",
                r#"{"id":"run_1","last_error":{"code":"rate_limit_exceeded","message":"slow down"}}"#
            )),
            RunSignal::Failed("slow down".into())
        );
        assert_eq!(
            parse_run_event(&ev("thread.run.expired", r#"{"status":"expired"}"#)),
            RunSignal::Failed("run ended with status expired".into())
        );
        assert_eq!(
            parse_run_event(&ev("error", r#"{"error":{"message":"bad key"}}"#)),
            RunSignal::Failed("bad key".into())
        );
        assert!(matches!(
            parse_run_event(&ev("thread.run.requires_action", "{}")),
            RunSignal::Failed(_)
        ));
    }

    #[test]
    fn api_version_is_appended() {
        let cfg = GeneratorConfig {
            api_version: Some("2025-05-01".into()),
            azure: true,
            ..GeneratorConfig::default()
        };
        std::env::set_var("TL_TEST_ASSISTANTS_KEY_A", "k");
        let gen = AssistantsGenerator::from_config(&GeneratorConfig {
            api_key_env: "TL_TEST_ASSISTANTS_KEY_A".into(),
            base_url: "https://x.example/api/".into(),
            ..cfg
        })
        .unwrap();
        assert_eq!(gen.url("/threads"), "https://x.example/api/threads?api-version=2025-05-01");
        assert_eq!(gen.generator_id(), "azure-agents");
    }
}
