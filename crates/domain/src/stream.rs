use serde::Serialize;
use std::pin::Pin;

/// A boxed async stream, used for generator fragment sequences.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events produced by an answer generator for one user message.
///
/// A well-formed sequence is zero or more `Fragment`s followed by exactly
/// one `Completed`. A generator signals failure by yielding an `Err` item
/// instead; nothing is read after the first `Err` or `Completed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum GeneratorEvent {
    /// An incremental piece of answer text. Boundaries carry no meaning.
    #[serde(rename = "fragment")]
    Fragment { text: String },

    /// The generator finished; `thread_id` is the conversation handle the
    /// answer was produced under (new or reused).
    #[serde(rename = "completed")]
    Completed { thread_id: String },
}

impl GeneratorEvent {
    pub fn fragment(text: impl Into<String>) -> Self {
        Self::Fragment { text: text.into() }
    }

    pub fn completed(thread_id: impl Into<String>) -> Self {
        Self::Completed {
            thread_id: thread_id.into(),
        }
    }
}
