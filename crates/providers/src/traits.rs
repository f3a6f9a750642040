use tl_domain::error::Result;
use tl_domain::stream::{BoxStream, GeneratorEvent};

/// One user message addressed to a conversation thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    /// Existing thread to continue; `None` asks the generator for a new one.
    pub thread_id: Option<String>,
    pub message: String,
}

impl GenerateRequest {
    pub fn new(thread_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            thread_id,
            message: message.into(),
        }
    }
}

/// Trait that every answer generator adapter implements.
///
/// `invoke` may fail up front (bad credentials, unreachable endpoint) or
/// hand back a lazy event stream. The stream yields fragments and then
/// exactly one `Completed`, or an `Err` at any point. Dropping the stream
/// cancels the underlying work; adapters must not keep generating into
/// the void.
#[async_trait::async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn invoke(
        &self,
        req: GenerateRequest,
    ) -> Result<BoxStream<'static, Result<GeneratorEvent>>>;

    /// A short identifier for logs and error messages.
    fn generator_id(&self) -> &str;
}
