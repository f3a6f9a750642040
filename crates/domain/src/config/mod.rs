mod continuity;
mod generator;
mod observability;
mod server;
mod streaming;

pub use continuity::*;
pub use generator::*;
pub use observability::*;
pub use server::*;
pub use streaming::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub continuity: ContinuityConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

/// Retry count above which `config validate` warns.
const MAX_STORE_RETRIES: u32 = 10;

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }
        if self.server.max_concurrent_requests == 0 {
            errors.push(ConfigError::error(
                "server.max_concurrent_requests",
                "must be greater than 0",
            ));
        }
        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        // ── streaming ──────────────────────────────────────────────
        let st = &self.streaming;
        if st.first_fragment_timeout_ms == 0 || st.total_timeout_ms == 0 {
            errors.push(ConfigError::error(
                "streaming",
                "timeouts must be greater than 0",
            ));
        } else if st.first_fragment_timeout_ms > st.total_timeout_ms {
            errors.push(ConfigError::warning(
                "streaming.first_fragment_timeout_ms",
                "exceeds total_timeout_ms and will never fire",
            ));
        }
        if st.outbound_buffer == 0 {
            errors.push(ConfigError::error(
                "streaming.outbound_buffer",
                "must be greater than 0",
            ));
        }
        if st.max_message_bytes == 0 {
            errors.push(ConfigError::error(
                "streaming.max_message_bytes",
                "must be greater than 0",
            ));
        }

        // ── continuity ─────────────────────────────────────────────
        let ct = &self.continuity;
        if ct.timeout_ms == 0 {
            errors.push(ConfigError::error(
                "continuity.timeout_ms",
                "must be greater than 0",
            ));
        }
        if ct.max_retries > MAX_STORE_RETRIES {
            errors.push(ConfigError::warning(
                "continuity.max_retries",
                format!(
                    "{} retries leave {} ms per attempt; more than {MAX_STORE_RETRIES} is rarely useful",
                    ct.max_retries,
                    ct.attempt_timeout_ms()
                ),
            ));
        }
        match ct.backend {
            ContinuityBackend::Rest if ct.base_url.is_empty() => {
                errors.push(ConfigError::error(
                    "continuity.base_url",
                    "base_url must not be empty for the rest backend",
                ));
            }
            ContinuityBackend::File if ct.path.as_os_str().is_empty() => {
                errors.push(ConfigError::error(
                    "continuity.path",
                    "path must not be empty for the file backend",
                ));
            }
            ContinuityBackend::Memory => {
                errors.push(ConfigError::warning(
                    "continuity.backend",
                    "memory backend loses all threads on restart",
                ));
            }
            _ => {}
        }

        // ── generator ──────────────────────────────────────────────
        let gen = &self.generator;
        match gen.kind {
            GeneratorKind::Assistants => {
                if gen.base_url.is_empty() {
                    errors.push(ConfigError::error(
                        "generator.base_url",
                        "base_url must not be empty",
                    ));
                }
                if gen.assistant_id.is_empty() {
                    errors.push(ConfigError::error(
                        "generator.assistant_id",
                        "assistant_id is required for the assistants generator",
                    ));
                }
            }
            GeneratorKind::Echo => {
                if gen.echo.fragment_chars == 0 {
                    errors.push(ConfigError::error(
                        "generator.echo.fragment_chars",
                        "must be greater than 0",
                    ));
                }
            }
        }

        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            errors.push(ConfigError::error(
                "observability.sample_rate",
                "must be between 0.0 and 1.0",
            ));
        }

        errors
    }
}
