//! Local development generator: streams the user's message back.

use std::time::Duration;

use tl_domain::config::EchoConfig;
use tl_domain::error::Result;
use tl_domain::stream::{BoxStream, GeneratorEvent};

use crate::traits::{AnswerGenerator, GenerateRequest};
use crate::util::split_chars;

pub struct EchoGenerator {
    fragment_chars: usize,
    delay: Duration,
}

impl EchoGenerator {
    pub fn new(cfg: &EchoConfig) -> Self {
        Self {
            fragment_chars: cfg.fragment_chars.max(1),
            delay: Duration::from_millis(cfg.fragment_delay_ms),
        }
    }
}

#[async_trait::async_trait]
impl AnswerGenerator for EchoGenerator {
    async fn invoke(
        &self,
        req: GenerateRequest,
    ) -> Result<BoxStream<'static, Result<GeneratorEvent>>> {
        let thread_id = req
            .thread_id
            .unwrap_or_else(|| format!("thread_{}", uuid::Uuid::new_v4().simple()));
        let pieces = split_chars(&req.message, self.fragment_chars);
        let delay = self.delay;

        let stream = async_stream::stream! {
            for text in pieces {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(GeneratorEvent::Fragment { text });
            }
            yield Ok(GeneratorEvent::Completed { thread_id });
        };
        Ok(Box::pin(stream))
    }

    fn generator_id(&self) -> &str {
        "echo"
    }
}
