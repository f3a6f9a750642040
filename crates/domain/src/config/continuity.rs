use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Continuity store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuityConfig {
    #[serde(default)]
    pub backend: ContinuityBackend,
    /// JSON document used by the `file` backend.
    #[serde(default = "d_store_path")]
    pub path: PathBuf,
    /// Base URL of the remote document store (`rest` backend).
    #[serde(default = "d_store_url")]
    pub base_url: String,
    /// Environment variable holding the remote store's API key.
    #[serde(default = "d_store_key_env")]
    pub api_key_env: String,
    /// Upper bound on any single get/upsert, including retries. Each
    /// attempt gets an equal share, see [`ContinuityConfig::attempt_timeout_ms`].
    #[serde(default = "d_3000")]
    pub timeout_ms: u64,
    #[serde(default = "d_2")]
    pub max_retries: u32,
    /// Directory for the CLI's local session/thread files.
    #[serde(default = "d_state_dir")]
    pub local_state_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContinuityBackend {
    Memory,
    #[default]
    File,
    Rest,
}

impl ContinuityBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File => "file",
            Self::Rest => "rest",
        }
    }
}

impl ContinuityConfig {
    /// Per-request timeout for the remote store: `timeout_ms` split evenly
    /// across the first try and every retry, never below 1 ms.
    pub fn attempt_timeout_ms(&self) -> u64 {
        (self.timeout_ms / (u64::from(self.max_retries) + 1)).max(1)
    }
}

impl Default for ContinuityConfig {
    fn default() -> Self {
        Self {
            backend: ContinuityBackend::File,
            path: d_store_path(),
            base_url: d_store_url(),
            api_key_env: d_store_key_env(),
            timeout_ms: 3000,
            max_retries: 2,
            local_state_dir: d_state_dir(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_store_path() -> PathBuf {
    PathBuf::from("./data/continuity.json")
}
fn d_store_url() -> String {
    "http://localhost:5000".into()
}
fn d_store_key_env() -> String {
    "TL_STORE_API_KEY".into()
}
fn d_3000() -> u64 {
    3000
}
fn d_2() -> u32 {
    2
}
fn d_state_dir() -> PathBuf {
    PathBuf::from(".state")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_file_backend() {
        let cfg: ContinuityConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.backend, ContinuityBackend::File);
        assert_eq!(cfg.timeout_ms, 3000);
        assert_eq!(cfg.local_state_dir, PathBuf::from(".state"));
    }

    #[test]
    fn parses_rest_backend() {
        let cfg: ContinuityConfig = toml::from_str(
            r#"
            backend = "rest"
            base_url = "https://store.internal"
            timeout_ms = 500
        "#,
        )
        .unwrap();
        assert_eq!(cfg.backend, ContinuityBackend::Rest);
        assert_eq!(cfg.base_url, "https://store.internal");
        assert_eq!(cfg.timeout_ms, 500);
        assert_eq!(cfg.max_retries, 2);
        assert_eq!(cfg.attempt_timeout_ms(), 166);
    }

    #[test]
    fn attempt_timeout_never_reaches_zero() {
        let cfg = ContinuityConfig {
            timeout_ms: 10,
            max_retries: u32::MAX,
            ..ContinuityConfig::default()
        };
        assert_eq!(cfg.attempt_timeout_ms(), 1);
    }
}
