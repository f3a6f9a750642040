//! Generator factory.

use std::sync::Arc;

use tl_domain::config::{GeneratorConfig, GeneratorKind};
use tl_domain::error::Result;

use crate::assistants::AssistantsGenerator;
use crate::echo::EchoGenerator;
use crate::traits::AnswerGenerator;

/// Build the generator selected by `[generator].kind`.
///
/// Credentials are resolved here, so a missing API key fails startup
/// instead of the first user message.
pub fn create_generator(cfg: &GeneratorConfig) -> Result<Arc<dyn AnswerGenerator>> {
    let generator: Arc<dyn AnswerGenerator> = match cfg.kind {
        GeneratorKind::Echo => Arc::new(EchoGenerator::new(&cfg.echo)),
        GeneratorKind::Assistants => Arc::new(AssistantsGenerator::from_config(cfg)?),
    };
    tracing::info!(
        generator = generator.generator_id(),
        kind = ?cfg.kind,
        "answer generator ready"
    );
    Ok(generator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds_echo() {
        let gen = create_generator(&GeneratorConfig::default()).unwrap();
        assert_eq!(gen.generator_id(), "echo");
    }

    #[test]
    fn assistants_without_key_fails() {
        let cfg = GeneratorConfig {
            kind: GeneratorKind::Assistants,
            api_key_env: "TL_TEST_UNSET_GENERATOR_KEY".into(),
            assistant_id: "asst_1".into(),
            ..GeneratorConfig::default()
        };
        assert!(create_generator(&cfg).is_err());
    }
}
