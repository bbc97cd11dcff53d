// Configuration loader
//
// Layers, lowest to highest priority:
//   defaults -> TOML file -> SNIPPY__SECTION__KEY env -> legacy flat env names

use anyhow::{Context, Result};
use config::{Environment, File, FileFormat};
use std::path::{Path, PathBuf};

use super::constants::{ENV_PREFIX, ENV_SEPARATOR};
use super::settings::Settings;

/// Resolve the config file path from flag / $SNIPPY_CONFIG / home fallback
pub fn resolve_config_path(override_path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(p) = override_path {
        return Some(p);
    }
    if let Ok(p) = std::env::var("SNIPPY_CONFIG") {
        if !p.is_empty() {
            return Some(PathBuf::from(p));
        }
    }
    dirs::home_dir().map(|h| h.join(".snippy/config.toml"))
}

/// Load configuration from file and process environment
pub fn load_config(override_path: Option<PathBuf>) -> Result<Settings> {
    let path = resolve_config_path(override_path);
    let mut builder = config::Config::builder();

    if let Some(path) = path.as_deref() {
        builder = builder.add_source(
            File::from(path)
                .format(FileFormat::Toml)
                .required(false),
        );
    }

    let layered = builder
        .add_source(env_source())
        .build()
        .context("Failed to assemble configuration layers")?;

    let mut settings: Settings = layered
        .try_deserialize()
        .context("Failed to parse configuration")?;

    apply_legacy_env(&mut settings, |name| std::env::var(name).ok());
    settings
        .validate()
        .context("Configuration validation failed")?;

    if let Some(path) = path {
        log_source(&path);
    }
    Ok(settings)
}

/// Parse configuration from an in-memory TOML document (no env layers)
pub fn load_from_toml_str(contents: &str) -> Result<Settings> {
    let mut settings: Settings = config::Config::builder()
        .add_source(File::from_str(contents, FileFormat::Toml))
        .build()
        .context("Failed to parse TOML configuration")?
        .try_deserialize()
        .context("Failed to parse configuration")?;
    settings
        .validate()
        .context("Configuration validation failed")?;
    Ok(settings)
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("security.function_keys")
        .with_list_parse_key("security.trusted_proxies")
        .with_list_parse_key("ingestion.allowed_extensions")
}

fn log_source(path: &Path) {
    if path.exists() {
        tracing::info!("Configuration loaded from {}", path.display());
    } else {
        tracing::debug!("No config file at {}, using defaults and env", path.display());
    }
}

/// Apply the flat variable names used by earlier deployments.
///
/// `lookup` is injected so tests can drive it without touching process env.
pub fn apply_legacy_env<F>(settings: &mut Settings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(k) = get("VECTOR_TOP_K")
        .or_else(|| get("COSMOS_VECTOR_TOP_K"))
        .and_then(|v| v.trim().parse().ok())
    {
        settings.retrieval.top_k = k;
    }
    if let Some(size) = get("CHUNK_SIZE").and_then(|v| v.trim().parse().ok()) {
        settings.retrieval.chunk_size = size;
    }
    if let Some(t) = get("OPENAI_TEMPERATURE").and_then(|v| v.trim().parse().ok()) {
        settings.llm.temperature = t;
    }
    if let Some(secs) = get("REQUEST_TIMEOUT_SEC").and_then(|v| v.trim().parse().ok()) {
        settings.server.request_timeout_secs = secs;
    }
    if let Some(dir) = get("INGESTION_CONTAINER") {
        settings.ingestion.container_dir = PathBuf::from(dir);
    }
    if let Some(mb) = get("MAX_BLOB_MB").and_then(|v| v.trim().parse().ok()) {
        settings.ingestion.max_blob_mb = mb;
    }
    if let Some(n) = get("MAX_AGENT_ITERATIONS").and_then(|v| v.trim().parse().ok()) {
        settings.agents.max_iterations = n;
    }
    if let Some(n) = get("AGENT_TOKEN_LIMIT").and_then(|v| v.trim().parse().ok()) {
        settings.agents.token_limit = n;
    }
    if let Some(flag) = get("ENABLE_CONTENT_FILTER") {
        settings.agents.content_filter = flag.trim() == "1";
    }
    if let Some(n) = get("MAX_CONCURRENT_AGENTS").and_then(|v| v.trim().parse().ok()) {
        settings.agents.max_concurrent = n;
    }
    if get("DISABLE_OPENAI").is_some_and(|v| v.trim() == "1") {
        settings.llm.mock = true;
    }
    if let Some(key) = get("OPENAI_API_KEY") {
        settings.llm.api_key = Some(key);
    }
    if let Some(url) = get("OPENAI_BASE_URL") {
        settings.llm.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(model) = get("AGENTS_MODEL_DEPLOYMENT_NAME").or_else(|| get("OPENAI_CHAT_MODEL")) {
        settings.llm.chat_model = model;
    }
    if let Some(model) = get("EMBEDDING_MODEL_DEPLOYMENT_NAME") {
        settings.llm.embedding_model = model;
    }
    if let Some(keys) = get("FUNCTION_KEYS") {
        settings.security.function_keys = keys
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
    }
}
