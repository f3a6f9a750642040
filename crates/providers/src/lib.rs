pub mod assistants;
pub mod echo;
pub mod registry;
pub mod scripted;
pub mod traits;
pub(crate) mod sse;
pub(crate) mod util;

// Re-exports for convenience.
pub use assistants::AssistantsGenerator;
pub use echo::EchoGenerator;
pub use registry::create_generator;
pub use scripted::{ScriptedGenerator, Step};
pub use traits::{AnswerGenerator, GenerateRequest};
