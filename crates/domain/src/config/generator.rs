use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Answer generator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub kind: GeneratorKind,
    /// Assistants-style API root, e.g. `https://api.openai.com/v1` or an
    /// Azure AI project endpoint.
    #[serde(default = "d_gen_url")]
    pub base_url: String,
    #[serde(default = "d_gen_key_env")]
    pub api_key_env: String,
    /// Assistant / agent the runs are created against.
    #[serde(default)]
    pub assistant_id: String,
    /// Sent as `?api-version=` when set (Azure endpoints).
    #[serde(default)]
    pub api_version: Option<String>,
    /// Use the `api-key` header instead of `Authorization: Bearer`.
    #[serde(default)]
    pub azure: bool,
    /// Connect/response-header timeout for generator HTTP calls.
    #[serde(default = "d_30000")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub echo: EchoConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorKind {
    /// Local generator that streams the message back; for development.
    #[default]
    Echo,
    Assistants,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            kind: GeneratorKind::Echo,
            base_url: d_gen_url(),
            api_key_env: d_gen_key_env(),
            assistant_id: String::new(),
            api_version: None,
            azure: false,
            request_timeout_ms: 30_000,
            echo: EchoConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoConfig {
    /// Characters per fragment.
    #[serde(default = "d_fragment_chars")]
    pub fragment_chars: usize,
    /// Delay between fragments.
    #[serde(default = "d_fragment_delay")]
    pub fragment_delay_ms: u64,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            fragment_chars: d_fragment_chars(),
            fragment_delay_ms: d_fragment_delay(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_gen_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_gen_key_env() -> String {
    "TL_GENERATOR_API_KEY".into()
}
fn d_30000() -> u64 {
    30_000
}
fn d_fragment_chars() -> usize {
    4
}
fn d_fragment_delay() -> u64 {
    20
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_echo() {
        let cfg: GeneratorConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.kind, GeneratorKind::Echo);
        assert_eq!(cfg.echo.fragment_chars, 4);
        assert!(!cfg.azure);
    }

    #[test]
    fn parses_azure_assistants() {
        let cfg: GeneratorConfig = toml::from_str(
            r#"
            kind = "assistants"
            base_url = "https://example.services.ai.azure.com/api/projects/hr"
            assistant_id = "asst_123"
            api_version = "2025-05-01"
            azure = true
        "#,
        )
        .unwrap();
        assert_eq!(cfg.kind, GeneratorKind::Assistants);
        assert_eq!(cfg.assistant_id, "asst_123");
        assert_eq!(cfg.api_version.as_deref(), Some("2025-05-01"));
        assert!(cfg.azure);
    }
}
