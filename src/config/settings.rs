// Configuration structs
//
// Every section deserializes with `#[serde(default)]` so a partial TOML
// file or a handful of env overrides is enough to run.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use super::constants::*;

fn snippy_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".snippy")
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub security: SecuritySettings,
    pub storage: StorageSettings,
    pub retrieval: RetrievalSettings,
    pub llm: LlmSettings,
    pub ingestion: IngestionSettings,
    pub agents: AgentSettings,
    pub orchestration: OrchestrationSettings,
}

/// HTTP host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address (e.g., "127.0.0.1:7071")
    pub bind_address: String,
    /// Base URL used in check-status payloads; derived from `Host` when unset
    pub public_base_url: Option<String>,
    /// Maximum accepted request body
    pub max_body_bytes: usize,
    /// Upper bound for a single chat completion during `/api/query`
    pub request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_HTTP_ADDR.to_string(),
            public_base_url: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            request_timeout_secs: 20,
        }
    }
}

/// Function keys and rate limiting
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Accepted function keys; empty disables key checks
    #[serde(skip_serializing)]
    pub function_keys: Vec<String>,
    /// Sustained requests per second per client IP
    pub rate_limit_per_second: f64,
    /// Burst capacity per client IP
    pub rate_limit_burst: f64,
    /// Peers whose `X-Forwarded-For` header is believed
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            function_keys: Vec::new(),
            rate_limit_per_second: 20.0,
            rate_limit_burst: 40.0,
            trusted_proxies: Vec::new(),
        }
    }
}

impl fmt::Debug for SecuritySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecuritySettings")
            .field("function_keys", &format!("<{} redacted>", self.function_keys.len()))
            .field("rate_limit_per_second", &self.rate_limit_per_second)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .field("trusted_proxies", &self.trusted_proxies)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite database holding snippets and orchestration state
    pub db_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: snippy_home().join("snippy.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    /// Characters per embedding chunk
    pub chunk_size: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Chat and embedding provider configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Use deterministic offline embeddings and canned agent output
    pub mock: bool,
    /// OpenAI-compatible endpoint (without the `/v1` suffix)
    pub base_url: String,
    /// Bearer token; read from env or config, never logged
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub chat_model: String,
    pub embedding_model: String,
    pub temperature: f32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            mock: false,
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            temperature: 0.2,
        }
    }
}

impl fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmSettings")
            .field("mock", &self.mock)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("chat_model", &self.chat_model)
            .field("embedding_model", &self.embedding_model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

/// Directory watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionSettings {
    pub enabled: bool,
    /// Directory polled for new files
    pub container_dir: PathBuf,
    pub poll_interval_secs: u64,
    /// Files above this size are deleted unprocessed
    pub max_blob_mb: u64,
    /// Lowercase extensions including the leading dot
    pub allowed_extensions: Vec<String>,
    /// Project that ingested snippets land in
    pub default_project: String,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            container_dir: snippy_home().join("ingestion"),
            poll_interval_secs: 60,
            max_blob_mb: 2,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            default_project: DEFAULT_PROJECT.to_string(),
        }
    }
}

/// Multi-agent guardrails
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub max_iterations: u32,
    /// Token budget; code is truncated to roughly 4 chars per token
    pub token_limit: usize,
    pub content_filter: bool,
    pub max_concurrent: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            token_limit: 4000,
            content_filter: false,
            max_concurrent: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationSettings {
    pub max_concurrent_activities: usize,
}

impl Default for OrchestrationSettings {
    fn default() -> Self {
        Self {
            max_concurrent_activities: 8,
        }
    }
}

impl Settings {
    /// Validate configuration, forcing mock mode when no API key is available
    pub fn validate(&mut self) -> Result<()> {
        if self.retrieval.chunk_size == 0 {
            bail!("retrieval.chunk_size must be greater than zero");
        }
        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be greater than zero");
        }
        if self.agents.max_concurrent == 0 {
            bail!("agents.max_concurrent must be greater than zero");
        }
        if self.orchestration.max_concurrent_activities == 0 {
            bail!("orchestration.max_concurrent_activities must be greater than zero");
        }
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            bail!(
                "server.bind_address '{}' is not a valid socket address",
                self.server.bind_address
            );
        }

        let has_key = self
            .llm
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty());
        if !self.llm.mock && !has_key {
            tracing::warn!("No LLM API key configured, falling back to mock embeddings and agents");
            self.llm.mock = true;
        }

        if self.security.function_keys.is_empty() {
            tracing::warn!("No function keys configured; protected routes are open");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate_into_mock_mode() {
        let mut settings = Settings::default();
        assert!(!settings.llm.mock);
        settings.validate().unwrap();
        assert!(settings.llm.mock, "missing api key must force mock mode");
    }

    #[test]
    fn test_api_key_keeps_live_mode() {
        let mut settings = Settings::default();
        settings.llm.api_key = Some("sk-test".to_string());
        settings.validate().unwrap();
        assert!(!settings.llm.mock);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut settings = Settings::default();
        settings.retrieval.chunk_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_bad_bind_address_rejected() {
        let mut settings = Settings::default();
        settings.server.bind_address = "not-an-address".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut settings = Settings::default();
        settings.llm.api_key = Some("sk-very-secret".to_string());
        settings.security.function_keys = vec!["fn-key-secret".to_string()];
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("sk-very-secret"));
        assert!(!rendered.contains("fn-key-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_default_extensions_cover_rust_and_markdown() {
        let settings = IngestionSettings::default();
        assert!(settings.allowed_extensions.iter().any(|e| e == ".rs"));
        assert!(settings.allowed_extensions.iter().any(|e| e == ".md"));
        assert!(!settings.allowed_extensions.iter().any(|e| e == ".bin"));
    }
}
