//! REST implementation of [`ContinuityStore`].
//!
//! Talks to a remote document store that exposes one resource per
//! session:
//!
//! * `GET  {base}/sessions/{session_id}` → `200` + record, or `404`
//! * `PUT  {base}/sessions/{session_id}` with the record as body
//!
//! Transient failures (5xx, timeouts, connection errors) are retried with
//! capped exponential back-off; 4xx responses are permanent. Each attempt
//! is limited to an equal share of `continuity.timeout_ms` so a retry can
//! still fit inside the registry's overall bound.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use tl_domain::config::ContinuityConfig;
use tl_domain::error::{Error, Result};
use tl_domain::trace::TraceEvent;

use crate::continuity::{ContinuityRecord, ContinuityStore};

/// First retry delay; doubles per attempt up to [`MAX_BACKOFF`].
const BASE_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct RestContinuityStore {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
}

/// Delay before retry number `attempt` (1-based).
fn backoff(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    BASE_BACKOFF.saturating_mul(factor).min(MAX_BACKOFF)
}

impl RestContinuityStore {
    /// Build a client from `[continuity]`. The API key is read from the
    /// env var named by `api_key_env`; an unset var means no key header.
    pub fn new(cfg: &ContinuityConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.attempt_timeout_ms()))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        let api_key = std::env::var(&cfg.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            api_key,
            max_retries: cfg.max_retries,
        })
    }

    fn session_url(&self, session_id: &str) -> String {
        format!("{}/sessions/{session_id}", self.base_url)
    }

    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        let rb = rb
            .header("X-Client-Type", "threadline")
            .header("X-Trace-Id", uuid::Uuid::new_v4().to_string());
        match self.api_key {
            Some(ref key) => rb.header("X-Api-Key", key),
            None => rb,
        }
    }

    // ── retry engine ─────────────────────────────────────────────────

    /// Send with retry on transient errors. `404` is handed back to the
    /// caller untouched; other 4xx become errors without retrying.
    async fn execute_with_retry(
        &self,
        operation: &str,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff(attempt)).await;
            }

            let start = Instant::now();
            let result = self.decorate(build_request()).send().await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let resp = match result {
                Ok(resp) => resp,
                Err(e) => {
                    self.trace(operation, false, duration_ms);
                    last_err = Some(from_reqwest(e));
                    continue;
                }
            };

            let status = resp.status();
            self.trace(
                operation,
                status.is_success() || status == StatusCode::NOT_FOUND,
                duration_ms,
            );

            if status.is_server_error() {
                let body = resp.text().await.unwrap_or_default();
                last_err = Some(Error::Continuity(format!(
                    "{operation} returned {status}: {body}"
                )));
                continue;
            }

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                let body = resp.text().await.unwrap_or_default();
                return Err(Error::Auth(format!(
                    "{operation} auth failed ({status}): {body}"
                )));
            }

            if status.is_client_error() && status != StatusCode::NOT_FOUND {
                let body = resp.text().await.unwrap_or_default();
                return Err(Error::Continuity(format!(
                    "{operation} returned {status}: {body}"
                )));
            }

            return Ok(resp);
        }

        Err(last_err.unwrap_or_else(|| {
            Error::Continuity(format!("{operation}: all retries exhausted"))
        }))
    }

    fn trace(&self, operation: &str, ok: bool, duration_ms: u64) {
        TraceEvent::ContinuityStoreCall {
            backend: self.backend().into(),
            operation: operation.into(),
            ok,
            duration_ms,
        }
        .emit();
    }
}

#[async_trait]
impl ContinuityStore for RestContinuityStore {
    fn backend(&self) -> &'static str {
        "rest"
    }

    async fn get(&self, session_id: &str) -> Result<Option<ContinuityRecord>> {
        let url = self.session_url(session_id);
        let resp = self
            .execute_with_retry("get", || self.http.get(&url))
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = resp.text().await.map_err(from_reqwest)?;
        let record: ContinuityRecord = serde_json::from_str(&body).map_err(|e| {
            Error::Continuity(format!("failed to parse record: {e}: {body}"))
        })?;
        if record.session_id != session_id {
            return Err(Error::Continuity(format!(
                "store returned record for {} when asked for {session_id}",
                record.session_id
            )));
        }
        Ok(Some(record))
    }

    async fn upsert(&self, session_id: &str, thread_id: &str) -> Result<ContinuityRecord> {
        let url = self.session_url(session_id);
        let record = ContinuityRecord::new(session_id, thread_id);
        let resp = self
            .execute_with_retry("upsert", || self.http.put(&url).json(&record))
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(Error::Continuity(format!(
                "upsert returned 404 for {url}"
            )));
        }
        Ok(record)
    }
}

fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}
