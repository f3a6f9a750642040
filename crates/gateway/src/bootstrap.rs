//! AppState construction shared by `serve` and `ask`.
//!
//! Only `serve` reads the API token; `ask` never listens.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sha2::{Digest, Sha256};

use tl_domain::config::{Config, ConfigSeverity, ServerConfig};
use tl_providers::{create_generator, AnswerGenerator};
use tl_sessions::{create_store, ContinuityStore, SessionRegistry};

use crate::runtime::{StreamLimits, StreamOrchestrator};
use crate::state::AppState;

/// Validate config, open the continuity store, build the generator and
/// return a fully-wired [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Continuity store ─────────────────────────────────────────────
    let store = create_store(&config.continuity)
        .await
        .context("opening continuity store")?;

    // ── Answer generator ─────────────────────────────────────────────
    let generator = create_generator(&config.generator).context("initializing generator")?;
    tracing::info!(
        generator = generator.generator_id(),
        "answer generator ready"
    );

    Ok(assemble(config, store, generator))
}

/// Read the API token once and return its SHA-256 digest for
/// constant-time comparison. `None` disables auth (dev mode).
pub fn api_token_hash(server: &ServerConfig) -> Option<Vec<u8>> {
    let env_var = &server.api_token_env;
    match std::env::var(env_var).ok().filter(|t| !t.is_empty()) {
        Some(t) => {
            tracing::info!(source = %format!("env:{env_var}"), "API bearer-token auth enabled");
            Some(Sha256::digest(t.as_bytes()).to_vec())
        }
        None => {
            tracing::warn!("API bearer-token auth DISABLED; set the {env_var} env var to enable it");
            None
        }
    }
}

/// Wire an [`AppState`] from already-built parts. Auth starts disabled.
pub fn assemble(
    config: Arc<Config>,
    store: Arc<dyn ContinuityStore>,
    generator: Arc<dyn AnswerGenerator>,
) -> AppState {
    let registry = SessionRegistry::new(
        store,
        Duration::from_millis(config.continuity.timeout_ms),
    );
    let orchestrator = Arc::new(StreamOrchestrator::new(
        generator.clone(),
        registry.clone(),
        StreamLimits::from(&config.streaming),
    ));

    AppState {
        config,
        generator,
        registry,
        orchestrator,
        api_token_hash: None,
    }
}
